//! Core types: BIP32 paths, PIN, firmware version, trusted inputs, device modes.

use bitcoin::hashes::Hash;
use bitcoin::{Amount, OutPoint, Txid};
use byteorder::{BigEndian, WriteBytesExt};
use zeroize::Zeroizing;

use crate::error::LedgerError;

const HARDENED: u32 = 0x8000_0000;

/// The dongle accepts at most 10 derivation levels.
const MAX_PATH_DEPTH: usize = 10;

/// BIP32 derivation path.
///
/// Unlike most Ledger apps the dongle takes non-hardened components too
/// (`m/1` is a valid signing path).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bip32Path(Vec<u32>);

impl Bip32Path {
    pub fn new(components: Vec<u32>) -> Result<Self, LedgerError> {
        let path = Self(components);
        path.validate()?;
        Ok(path)
    }

    /// Legacy P2PKH account path: `44'/0'/account'/change/index`
    #[must_use]
    pub fn bip44(account: u32, change: u32, index: u32) -> Self {
        Self(vec![
            44 | HARDENED,
            HARDENED,
            account | HARDENED,
            change,
            index,
        ])
    }

    /// Wire format: `[n: u8][path[0]: u32 BE]...[path[n-1]: u32 BE]`
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1 + self.0.len() * 4);
        buf.push(self.0.len() as u8);
        for &component in &self.0 {
            // writing into a Vec cannot fail
            let _ = buf.write_u32::<BigEndian>(component);
        }
        buf
    }

    pub fn components(&self) -> &[u32] {
        &self.0
    }

    fn validate(&self) -> Result<(), LedgerError> {
        if self.0.is_empty() {
            return Err(LedgerError::InvalidPath(
                "path must have at least 1 component".into(),
            ));
        }
        if self.0.len() > MAX_PATH_DEPTH {
            return Err(LedgerError::InvalidPath(format!(
                "path has {} components, the dongle supports at most {MAX_PATH_DEPTH}",
                self.0.len()
            )));
        }
        Ok(())
    }
}

impl std::str::FromStr for Bip32Path {
    type Err = LedgerError;

    /// Parses `m/44'/0'/0'/0/1` style paths (`h` works as hardened marker too).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('/');
        if parts.next() != Some("m") {
            return Err(LedgerError::InvalidPath(format!("{s}: must start with m/")));
        }
        let mut components = Vec::new();
        for part in parts {
            let (digits, hardened) = match part.strip_suffix(&['\'', 'h'][..]) {
                Some(d) => (d, true),
                None => (part, false),
            };
            let value: u32 = digits
                .parse()
                .map_err(|_| LedgerError::InvalidPath(format!("{s}: bad component {part:?}")))?;
            if value & HARDENED != 0 {
                return Err(LedgerError::InvalidPath(format!(
                    "{s}: component {value} out of range"
                )));
            }
            components.push(if hardened { value | HARDENED } else { value });
        }
        Self::new(components)
    }
}

impl std::fmt::Display for Bip32Path {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "m")?;
        for &c in &self.0 {
            let val = c & !HARDENED;
            let h = if c & HARDENED != 0 { "'" } else { "" };
            write!(f, "/{val}{h}")?;
        }
        Ok(())
    }
}

/// Longest PIN or second factor code the dongle stores.
pub const MAX_PIN_LEN: usize = 32;

/// User PIN or second factor code. Wiped on drop, never printed.
#[derive(Clone)]
pub struct Pin(Zeroizing<Vec<u8>>);

impl Pin {
    pub fn new(pin: impl AsRef<[u8]>) -> Self {
        Self(Zeroizing::new(pin.as_ref().to_vec()))
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Length check done before the PIN goes into an APDU.
    pub(crate) fn check_len(&self, what: &str) -> Result<(), LedgerError> {
        if self.is_empty() || self.len() > MAX_PIN_LEN {
            return Err(LedgerError::InvalidArgument(format!(
                "{what} must be 1..={MAX_PIN_LEN} bytes, got {}",
                self.len()
            )));
        }
        Ok(())
    }
}

impl From<&str> for Pin {
    fn from(pin: &str) -> Self {
        Self::new(pin)
    }
}

impl std::fmt::Debug for Pin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Pin(***)")
    }
}

/// Response of GET FIRMWARE VERSION:
/// `[features][architecture][major][minor][patch]([loader major][loader minor])`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareVersion {
    pub features: u8,
    pub architecture: u8,
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
    pub loader: Option<(u8, u8)>,
}

impl FirmwareVersion {
    pub fn compressed_keys(&self) -> bool {
        self.features & 0x01 != 0
    }

    /// Loader info is only reported by firmware that ships a bootloader
    /// (and by the bootloader itself).
    pub fn is_loader(&self) -> bool {
        self.loader.is_some()
    }
}

impl std::fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.architecture != 0 {
            write!(f, "Ledger ")?;
        }
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some((major, minor)) = self.loader {
            write!(f, " (Loader : {major}.{minor})")?;
        }
        Ok(())
    }
}

/// Device-authenticated reference to one funding output.
///
/// Opaque to the host: pass it back to the device byte for byte. The
/// accessors only read the documented layout
/// `[0x32][flags][rand:2][txid:32][index:u32 LE][amount:u64 LE][mac:8]`
/// so inputs can be matched to tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustedInput(Vec<u8>);

impl TrustedInput {
    const MAGIC: u8 = 0x32;
    const LEN: usize = 56;

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    fn well_formed(&self) -> bool {
        self.0.len() == Self::LEN && self.0[0] == Self::MAGIC
    }

    pub fn outpoint(&self) -> Option<OutPoint> {
        if !self.well_formed() {
            return None;
        }
        let mut txid = [0u8; 32];
        txid.copy_from_slice(&self.0[4..36]);
        let vout = u32::from_le_bytes([self.0[36], self.0[37], self.0[38], self.0[39]]);
        Some(OutPoint::new(Txid::from_byte_array(txid), vout))
    }

    pub fn amount(&self) -> Option<Amount> {
        if !self.well_formed() {
            return None;
        }
        let mut sats = [0u8; 8];
        sats.copy_from_slice(&self.0[40..48]);
        Some(Amount::from_sat(u64::from_le_bytes(sats)))
    }
}

impl AsRef<[u8]> for TrustedInput {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Display for TrustedInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationMode {
    Standard,
    Relaxed,
    Server,
    Developer,
    Unknown(u8),
}

impl OperationMode {
    pub fn from_byte(b: u8) -> Self {
        match b {
            0x01 => Self::Standard,
            0x02 => Self::Relaxed,
            0x04 => Self::Server,
            0x08 => Self::Developer,
            other => Self::Unknown(other),
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            Self::Standard => 0x01,
            Self::Relaxed => 0x02,
            Self::Server => 0x04,
            Self::Developer => 0x08,
            Self::Unknown(b) => b,
        }
    }
}

bitflags::bitflags! {
    /// Feature flags written during setup.
    pub struct DongleFeatures: u8 {
        const UNCOMPRESSED_PUBLIC_KEY = 0x01;
        const RFC6979 = 0x02;
        const ENABLE_ALL_SIGHASH = 0x04;
        const SKIP_SECOND_FACTOR = 0x08;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecondFactorMode {
    Keyboard,
    SecureScreenCard,
    SecureScreen,
    Unknown(u8),
}

impl SecondFactorMode {
    pub fn from_byte(b: u8) -> Self {
        match b {
            0x11 => Self::Keyboard,
            0x12 => Self::SecureScreenCard,
            0x13 => Self::SecureScreen,
            other => Self::Unknown(other),
        }
    }
}

/// First byte of the HASH INPUT FINALIZE FULL response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserConfirmation {
    None,
    Keyboard,
    KeycardScreen,
    Keycard,
    KeycardNfc,
    Unknown(u8),
}

impl UserConfirmation {
    pub fn from_byte(b: u8) -> Self {
        match b {
            0x00 => Self::None,
            0x01 => Self::Keyboard,
            0x02 => Self::KeycardScreen,
            0x03 => Self::Keycard,
            0x04 => Self::KeycardNfc,
            other => Self::Unknown(other),
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            Self::None => 0x00,
            Self::Keyboard => 0x01,
            Self::KeycardScreen => 0x02,
            Self::Keycard => 0x03,
            Self::KeycardNfc => 0x04,
            Self::Unknown(b) => b,
        }
    }

    pub fn is_required(self) -> bool {
        self != Self::None
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletPublicKey {
    /// As returned by the device (uncompressed on most firmware).
    pub public_key: bitcoin::PublicKey,
    /// Base58 address string computed by the device.
    pub address: String,
    pub chain_code: [u8; 32],
}

/// Parameters for first-time device setup.
#[derive(Debug, Clone)]
pub struct RegularSetup {
    pub operation_mode: OperationMode,
    pub features: DongleFeatures,
    pub key_version: u8,
    pub key_version_p2sh: u8,
    pub user_pin: Pin,
    pub wipe_pin: Option<Pin>,
    /// BIP32 seed to restore, 32..=64 bytes.
    pub restored_seed: Option<Vec<u8>>,
    /// 3DES-2 wrapping key to restore (developer mode).
    pub restored_wrapping_key: Option<[u8; 16]>,
}

impl RegularSetup {
    pub fn new(operation_mode: OperationMode, features: DongleFeatures, user_pin: Pin) -> Self {
        Self {
            operation_mode,
            features,
            key_version: 0x00,
            key_version_p2sh: 0x05,
            user_pin,
            wipe_pin: None,
            restored_seed: None,
            restored_wrapping_key: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupResponse {
    pub trusted_input_key: [u8; 16],
    pub wrapping_key: [u8; 16],
}

impl std::fmt::Display for SetupResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "wrapping key {}", hex::encode(self.wrapping_key))
    }
}
