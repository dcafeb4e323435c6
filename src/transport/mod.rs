//! Transport backends for talking to the dongle.
//!
//! - [`hid::HidTransport`] -- USB HID for real hardware (feature `hid`, default)
//! - [`tcp::TcpTransport`] -- TCP for a simulator (feature `tcp`)
//!
//! Backends move raw APDU bytes only; status words are decoded by the
//! session layer.

#[cfg(feature = "hid")]
pub mod hid;
#[cfg(feature = "tcp")]
pub mod tcp;

use crate::apdu::ApduCommand;
use crate::error::TransportError;

pub trait Transport: Send + Sync {
    /// Send one command and block until the raw response (payload and
    /// status word) arrives.
    fn exchange(&self, command: &ApduCommand) -> Result<Vec<u8>, TransportError>;

    /// Release the channel. Closing twice is not an error.
    fn close(&self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Drop the current connection and open a fresh one.
    ///
    /// The default returns an error. Only transports that support
    /// reconnection (e.g. USB HID) need to override this.
    fn reconnect(&self) -> Result<(), TransportError> {
        Err(TransportError::Comm("reconnect not supported".into()))
    }
}

/// Which enumerated HID device to open.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DeviceSelector {
    /// First supported device found.
    #[default]
    Any,
    /// Platform HID path, as reported by [`hid::HidTransport::list`].
    Path(String),
    Serial(String),
}

#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum TransportType {
    #[cfg(feature = "hid")]
    NativeHID(DeviceSelector),
    /// `(host, port)` of a simulator.
    #[cfg(feature = "tcp")]
    TCP(String, u16),
}

pub fn open(transport_type: &TransportType) -> Result<Box<dyn Transport>, TransportError> {
    match transport_type {
        #[cfg(feature = "hid")]
        TransportType::NativeHID(selector) => {
            let t = hid::HidTransport::open(selector)?;
            Ok(Box::new(t))
        }
        #[cfg(feature = "tcp")]
        TransportType::TCP(host, port) => {
            let t = tcp::TcpTransport::new(host, *port)?;
            Ok(Box::new(t))
        }
        #[allow(unreachable_patterns)]
        _ => Err(TransportError::Comm(
            "no transport enabled, enable the 'hid' or 'tcp' feature".into(),
        )),
    }
}
