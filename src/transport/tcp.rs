use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;
use std::sync::Mutex;
use std::time::Duration;

use crate::apdu::ApduCommand;
use crate::error::TransportError;
use crate::transport::Transport;

const READ_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_RESPONSE_LEN: usize = 65536;

/// TCP transport for a Speculos-style simulator (default `127.0.0.1:9999`).
///
/// Wire: `[u32 BE length][APDU]` send, `[u32 BE length][response]` recv.
///
/// The status word (`SW1 SW2`) arrives as a bare 2-byte suffix *outside*
/// the length-prefixed frame, so both are read and stitched into a
/// standard APDU response.
pub struct TcpTransport {
    stream: Mutex<Option<TcpStream>>,
    addr: String,
}

impl TcpTransport {
    pub fn new(host: &str, port: u16) -> Result<Self, TransportError> {
        let addr = format!("{host}:{port}");
        let stream = connect(&addr)?;
        log::info!("connected to simulator at {addr}");
        Ok(Self {
            stream: Mutex::new(Some(stream)),
            addr,
        })
    }
}

fn connect(addr: &str) -> Result<TcpStream, TransportError> {
    let stream = TcpStream::connect(addr)
        .map_err(|e| TransportError::ConnectionFailed(format!("{addr}: {e}")))?;
    stream
        .set_read_timeout(Some(READ_TIMEOUT))
        .map_err(TransportError::Io)?;
    Ok(stream)
}

fn io_err(e: std::io::Error) -> TransportError {
    match e.kind() {
        ErrorKind::WouldBlock | ErrorKind::TimedOut => {
            TransportError::Timeout(READ_TIMEOUT.as_millis() as u32)
        }
        _ => TransportError::Io(e),
    }
}

impl Transport for TcpTransport {
    fn exchange(&self, command: &ApduCommand) -> Result<Vec<u8>, TransportError> {
        let apdu = command.serialize();
        let mut guard = self
            .stream
            .lock()
            .map_err(|e| TransportError::Comm(format!("mutex poisoned: {e}")))?;
        let stream = guard.as_mut().ok_or(TransportError::Closed)?;

        let len = apdu.len() as u32;
        stream.write_all(&len.to_be_bytes()).map_err(io_err)?;
        stream.write_all(&apdu).map_err(io_err)?;
        stream.flush().map_err(io_err)?;

        let mut len_buf = [0u8; 4];
        stream.read_exact(&mut len_buf).map_err(io_err)?;
        let resp_len = u32::from_be_bytes(len_buf) as usize;
        if resp_len > MAX_RESPONSE_LEN {
            return Err(TransportError::Comm(format!(
                "response too large: {resp_len} bytes (max {MAX_RESPONSE_LEN})"
            )));
        }

        let mut resp = vec![0u8; resp_len + 2];
        stream.read_exact(&mut resp[..resp_len]).map_err(io_err)?;

        // SW is sent bare after the framed data
        stream
            .read_exact(&mut resp[resp_len..resp_len + 2])
            .map_err(io_err)?;

        Ok(resp)
    }

    fn close(&self) -> Result<(), TransportError> {
        let mut guard = self
            .stream
            .lock()
            .map_err(|e| TransportError::Comm(format!("mutex poisoned: {e}")))?;
        if let Some(stream) = guard.take() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
            log::info!("closed simulator connection to {}", self.addr);
        }
        Ok(())
    }

    fn reconnect(&self) -> Result<(), TransportError> {
        let mut guard = self
            .stream
            .lock()
            .map_err(|e| TransportError::Comm(format!("mutex poisoned: {e}")))?;
        guard.take();
        *guard = Some(connect(&self.addr)?);
        log::info!("reconnected to simulator at {}", self.addr);
        Ok(())
    }
}
