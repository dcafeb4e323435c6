//! Error types and dongle status word mapping.

use thiserror::Error;

/// Raw status words returned by the dongle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum StatusWord {
    Ok = 0x9000,
    ScreenLocked = 0x5515,
    WrongLength = 0x6700,
    SecurityStatusNotSatisfied = 0x6982,
    PinBlocked = 0x6983,
    ConditionsNotSatisfied = 0x6985,
    InvalidData = 0x6A80,
    FileNotFound = 0x6A82,
    IncorrectP1P2 = 0x6B00,
    InsNotSupported = 0x6D00,
    ClaNotSupported = 0x6E00,
    AppNotOpen = 0x6E01,
    Halted = 0x6FAA,
}

impl StatusWord {
    pub(crate) fn is_success(code: u16) -> bool {
        code == Self::Ok as u16
    }

    /// `0x63Cx`: PIN attempts left in the low nibble.
    pub fn pin_attempts(code: u16) -> Option<u8> {
        if code & 0xFFF0 == 0x63C0 {
            Some((code & 0x000F) as u8)
        } else {
            None
        }
    }

    /// `0x6Fxx` words carry a firmware-internal code in the low byte.
    pub fn internal_code(code: u16) -> Option<u8> {
        if code & 0xFF00 == 0x6F00 {
            Some((code & 0x00FF) as u8)
        } else {
            None
        }
    }

    pub fn describe(code: u16) -> &'static str {
        match code {
            0x9000 => "OK",
            0x5515 => "device screen locked",
            0x6700 => "incorrect length",
            0x6982 => "security status not satisfied",
            0x6983 => "authentication method blocked",
            0x6985 => "conditions of use not satisfied",
            0x6A80 => "invalid data",
            0x6A82 => "file not found",
            0x6B00 => "incorrect parameter P1 or P2",
            0x6D00 => "INS not supported",
            0x6E00 => "CLA not supported",
            0x6E01 => "app not open",
            0x6FAA => "device halted, replug required",
            c if c & 0xFFF0 == 0x63C0 => "wrong PIN",
            c if c & 0xFF00 == 0x6F00 => "internal error",
            _ => "unknown",
        }
    }
}

/// Errors returned by the library.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("malformed response: {0} bytes, need at least 2")]
    MalformedResponse(usize),

    #[error("device returned status 0x{status_word:04X}: {}", StatusWord::describe(*.status_word))]
    DeviceError { status_word: u16 },

    #[error("wrong PIN, {remaining_attempts} attempt(s) left")]
    WrongPin { remaining_attempts: u8 },

    #[error("device locked (status 0x{status_word:04X}: {})", StatusWord::describe(*.status_word))]
    DeviceLocked { status_word: u16 },

    #[error("PIN not verified (status 0x6982)")]
    NotAuthenticated,

    #[error("signing call out of order (status 0x{status_word:04X}), restart at hash input start")]
    SequencingFault { status_word: u16 },

    #[error("trusted input rejected (status 0x{status_word:04X}: {})", StatusWord::describe(*.status_word))]
    TrustedInputError { status_word: u16 },

    #[error("wrong app open on device (status 0x6E00), open the Bitcoin app")]
    WrongApp,

    #[error("Bitcoin app is not open, open it and try again")]
    AppNotOpen,

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("invalid BIP32 path: {0}")]
    InvalidPath(String),

    #[error("invalid signature from device: {0}")]
    InvalidSignature(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("device asks for second factor confirmation (mode 0x{0:02X})")]
    SecondFactorRequired(u8),
}

impl LedgerError {
    /// Generic mapping, used where no component-specific meaning applies.
    pub fn from_status(code: u16) -> Self {
        match code {
            c if c == StatusWord::ScreenLocked as u16
                || c == StatusWord::PinBlocked as u16
                || c == StatusWord::Halted as u16 =>
            {
                Self::DeviceLocked { status_word: code }
            }
            c if c == StatusWord::SecurityStatusNotSatisfied as u16 => Self::NotAuthenticated,
            c if c == StatusWord::ClaNotSupported as u16 => Self::WrongApp,
            c if c == StatusWord::AppNotOpen as u16 => Self::AppNotOpen,
            _ => Self::DeviceError { status_word: code },
        }
    }

    /// Raw status word behind this error, if the device sent one.
    pub fn status_word(&self) -> Option<u16> {
        match self {
            Self::DeviceError { status_word }
            | Self::DeviceLocked { status_word }
            | Self::SequencingFault { status_word }
            | Self::TrustedInputError { status_word } => Some(*status_word),
            Self::WrongPin { remaining_attempts } => Some(0x63C0 | *remaining_attempts as u16),
            Self::NotAuthenticated => Some(StatusWord::SecurityStatusNotSatisfied as u16),
            Self::WrongApp => Some(StatusWord::ClaNotSupported as u16),
            Self::AppNotOpen => Some(StatusWord::AppNotOpen as u16),
            _ => None,
        }
    }

    /// The device stays unusable until it is unplugged and plugged back in.
    pub fn requires_replug(&self) -> bool {
        matches!(self, Self::DeviceLocked { status_word } if *status_word == StatusWord::Halted as u16)
    }
}

/// Check a status word, mapping failures through `map`.
pub(crate) fn check_status(
    code: u16,
    map: impl FnOnce(u16) -> LedgerError,
) -> Result<(), LedgerError> {
    if StatusWord::is_success(code) {
        Ok(())
    } else {
        Err(map(code))
    }
}


/// Transport-level errors (USB, TCP, IO).
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no dongle found, is it plugged in?")]
    DeviceNotFound,

    #[error("channel already closed")]
    Closed,

    #[error("communication error: {0}")]
    Comm(String),

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("device timed out after {0}ms")]
    Timeout(u32),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
