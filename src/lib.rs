//! Rust client for BTChip-family Bitcoin signing dongles (HW.1 and the
//! legacy Ledger Bitcoin app).
//!
//! Talks to the dongle over USB HID or TCP (simulator). The private keys
//! never leave the device: the host proves funding outputs with trusted
//! inputs, streams the spending transaction into the device-side hash and
//! asks for one signature per input.
//!
//! # Quick start
//!
//! ```no_run
//! use ledger_btchip::{Bip32Path, DeviceSelector, LedgerBtc, Pin, TransportType};
//!
//! let ledger = LedgerBtc::new(&TransportType::NativeHID(DeviceSelector::Any))?;
//! println!("{}", ledger.get_firmware_version()?);
//!
//! ledger.verify_pin(&Pin::from("1234"))?;
//! let key = ledger.get_wallet_public_key(&"m/44'/0'/0'/0/0".parse::<Bip32Path>()?)?;
//! println!("address: {}", key.address);
//! # Ok::<(), ledger_btchip::LedgerError>(())
//! ```
//!
//! # Modules
//!
//! - [`api`] -- high-level [`LedgerBtc`] facade
//! - [`signing`] -- [`SigningSession`], the hash start / finalize / sign flow
//! - [`auth`] -- PIN verification and attempt tracking
//! - [`session`] -- exclusive access to one device
//! - [`transport`] -- device communication (USB HID, TCP)
//! - [`types`] -- [`Bip32Path`], [`Pin`], [`TrustedInput`], [`FirmwareVersion`], modes
//!
//! # Feature flags
//!
//! - `hid` (default) -- USB HID transport for real dongles
//! - `tcp` -- TCP transport for a simulator

pub mod apdu;
pub mod api;
pub mod auth;
pub mod commands;
pub mod error;
pub(crate) mod protocol;
pub mod session;
pub mod signing;
pub mod transport;
pub mod types;

pub use api::LedgerBtc;
pub use error::{LedgerError, StatusWord, TransportError};
pub use signing::{SigningSession, SigningState};
#[cfg(feature = "hid")]
pub use transport::hid::{DeviceInfo, DeviceType};
pub use transport::{DeviceSelector, Transport, TransportType};
pub use types::{
    Bip32Path, DongleFeatures, FirmwareVersion, OperationMode, Pin, RegularSetup,
    SecondFactorMode, SetupResponse, TrustedInput, UserConfirmation, WalletPublicKey,
};
