//! Individual command implementations, one module per APDU.
//!
//! You probably want [`LedgerBtc`](crate::api::LedgerBtc) instead: these
//! functions talk to a bare transport and keep no host-side state.

pub mod get_firmware_version;
pub mod get_wallet_pubkey;
pub mod hash_input_finalize;
pub mod hash_input_start;
pub mod hash_sign;
pub mod operation_mode;
pub mod setup;
pub mod trusted_input;
pub mod verify_pin;
