//! APDU command and response framing.
//!
//! Every dongle command uses CLA `0xE0`. P1/P2 carry first/next block
//! markers for the streamed commands.

use std::fmt;

use crate::error::LedgerError;

pub const CLA: u8 = 0xE0;

/// Short APDU LC limit.
pub const MAX_DATA_LEN: usize = 255;

#[derive(Clone)]
pub struct ApduCommand {
    pub cla: u8,
    pub ins: u8,
    pub p1: u8,
    pub p2: u8,
    pub data: Vec<u8>,
    /// Payload carries a PIN or key material and must not be logged.
    pub sensitive: bool,
}

impl ApduCommand {
    pub fn new(ins: Instruction, p1: u8, p2: u8) -> Self {
        Self {
            cla: CLA,
            ins: ins as u8,
            p1,
            p2,
            data: Vec::new(),
            sensitive: false,
        }
    }

    pub fn with_data(ins: Instruction, p1: u8, p2: u8, data: Vec<u8>) -> Self {
        Self {
            data,
            ..Self::new(ins, p1, p2)
        }
    }

    #[must_use]
    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    /// Wire format: `[CLA][INS][P1][P2][LC][DATA]`
    ///
    /// # Panics
    ///
    /// Panics if `data` exceeds 255 bytes (short APDU LC limit).
    pub fn serialize(&self) -> Vec<u8> {
        assert!(
            self.data.len() <= MAX_DATA_LEN,
            "APDU data too long: {} bytes (max 255)",
            self.data.len()
        );
        let mut buf = Vec::with_capacity(5 + self.data.len());
        buf.push(self.cla);
        buf.push(self.ins);
        buf.push(self.p1);
        buf.push(self.p2);
        buf.push(self.data.len() as u8);
        buf.extend_from_slice(&self.data);
        buf
    }

    /// Hex dump for trace logs, with sensitive payloads blanked.
    pub fn log_hex(&self) -> String {
        if self.sensitive {
            format!(
                "{:02x}{:02x}{:02x}{:02x}{:02x}<redacted>",
                self.cla,
                self.ins,
                self.p1,
                self.p2,
                self.data.len()
            )
        } else {
            hex::encode(self.serialize())
        }
    }
}

impl fmt::Debug for ApduCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("ApduCommand");
        d.field("cla", &self.cla)
            .field("ins", &self.ins)
            .field("p1", &self.p1)
            .field("p2", &self.p2);
        if self.sensitive {
            d.field("data", &"<redacted>");
        } else {
            d.field("data", &hex::encode(&self.data));
        }
        d.finish()
    }
}

/// APDU response: payload followed by a big-endian status word.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApduAnswer {
    data: Vec<u8>,
    status: u16,
}

impl ApduAnswer {
    /// Split the trailing 2-byte status word off a raw response.
    pub fn from_raw(mut raw: Vec<u8>) -> Result<Self, LedgerError> {
        if raw.len() < 2 {
            return Err(LedgerError::MalformedResponse(raw.len()));
        }
        let len = raw.len();
        let status = ((raw[len - 2] as u16) << 8) | (raw[len - 1] as u16);
        raw.truncate(len - 2);
        Ok(Self { data: raw, status })
    }

    /// How a device puts a response on the wire.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.data.len() + 2);
        buf.extend_from_slice(&self.data);
        buf.extend_from_slice(&self.status.to_be_bytes());
        buf
    }

    pub fn new(data: Vec<u8>, status: u16) -> Self {
        Self { data, status }
    }

    pub fn retcode(&self) -> u16 {
        self.status
    }

    /// Payload only, without the status word.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Instruction {
    Setup = 0x20,
    VerifyPin = 0x22,
    GetOperationMode = 0x24,
    SetOperationMode = 0x26,
    GetWalletPublicKey = 0x40,
    GetTrustedInput = 0x42,
    HashInputStart = 0x44,
    HashSign = 0x48,
    HashInputFinalizeFull = 0x4A,
    GetFirmwareVersion = 0xC4,
}
