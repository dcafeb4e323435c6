//! High-level API - [`LedgerBtc`] wraps one dongle and exposes every
//! supported operation.

use bitcoin::ecdsa::Signature;
use bitcoin::{EcdsaSighashType, Transaction};

use crate::auth;
use crate::commands;
use crate::error::LedgerError;
use crate::session::DeviceSession;
use crate::signing::SigningSession;
use crate::transport::{self, Transport, TransportType};
use crate::types::{
    Bip32Path, FirmwareVersion, OperationMode, Pin, RegularSetup, SecondFactorMode,
    SetupResponse, TrustedInput, WalletPublicKey,
};

/// High-level interface to a BTChip-family dongle.
///
/// Every method takes the session gate for its duration, so a handle can
/// be shared between threads. Step-by-step signing goes through
/// [`signing_session`](Self::signing_session), which keeps other callers
/// out until the whole transaction is done.
pub struct LedgerBtc {
    session: DeviceSession,
}

impl LedgerBtc {
    /// Open the device and check that it answers.
    pub fn new(transport_type: &TransportType) -> Result<Self, LedgerError> {
        let transport = transport::open(transport_type)?;
        let ledger = Self::with_transport(transport);
        let version = ledger.get_firmware_version()?;
        log::info!("connected to dongle, firmware {version}");
        Ok(ledger)
    }

    /// Useful for testing or injecting a custom transport.
    pub fn with_transport(transport: Box<dyn Transport>) -> Self {
        Self {
            session: DeviceSession::new(transport),
        }
    }

    /// Enumerate attached dongles.
    #[cfg(feature = "hid")]
    pub fn list_devices() -> Result<Vec<transport::hid::DeviceInfo>, LedgerError> {
        Ok(transport::hid::HidTransport::list()?)
    }

    /// Release the device. Any exchange afterwards fails with
    /// [`TransportError::Closed`](crate::error::TransportError::Closed).
    pub fn close(&self) -> Result<(), LedgerError> {
        self.session.close()?;
        log::info!("dongle closed");
        Ok(())
    }

    /// Reopen the device after a replug. PIN status and any signing
    /// session are forgotten, as the device forgot them too.
    pub fn reconnect(&self) -> Result<(), LedgerError> {
        self.session.reconnect()?;
        log::info!("dongle reconnected");
        Ok(())
    }

    pub fn get_firmware_version(&self) -> Result<FirmwareVersion, LedgerError> {
        let channel = self.session.lock()?;
        commands::get_firmware_version::exec(channel.transport())
    }

    /// `Ok(true)` when accepted. A rejected PIN is
    /// [`LedgerError::WrongPin`] carrying the attempts left.
    pub fn verify_pin(&self, pin: &Pin) -> Result<bool, LedgerError> {
        let mut channel = self.session.lock()?;
        auth::verify_pin(&mut channel, pin)
    }

    /// Ask the device for the attempts left. Does not consume one.
    pub fn remaining_attempts(&self) -> Result<u8, LedgerError> {
        let mut channel = self.session.lock()?;
        auth::remaining_attempts(&mut channel)
    }

    /// Last attempt count seen, without talking to the device.
    pub fn cached_remaining_attempts(&self) -> Result<Option<u8>, LedgerError> {
        Ok(self.session.lock()?.auth().remaining_attempts())
    }

    pub fn is_verified(&self) -> Result<bool, LedgerError> {
        Ok(self.session.lock()?.auth().verified())
    }

    pub fn get_wallet_public_key(&self, path: &Bip32Path) -> Result<WalletPublicKey, LedgerError> {
        let channel = self.session.lock()?;
        commands::get_wallet_pubkey::exec(channel.transport(), path)
    }

    /// Have the device authenticate output `output_index` of `tx`.
    pub fn get_trusted_input(
        &self,
        tx: &Transaction,
        output_index: u32,
    ) -> Result<TrustedInput, LedgerError> {
        let channel = self.session.lock()?;
        commands::trusted_input::exec(channel.transport(), tx, output_index)
    }

    /// Hold the device for a whole signing flow: hash start, finalize and
    /// sign for every input, with no other caller in between.
    pub fn signing_session(&self) -> Result<SigningSession<'_>, LedgerError> {
        Ok(SigningSession::new(self.session.lock()?))
    }

    /// One signature per input of `tx`, all with the key at `path`.
    pub fn sign_transaction(
        &self,
        tx: &Transaction,
        trusted_inputs: &[TrustedInput],
        path: &Bip32Path,
        sighash: EcdsaSighashType,
    ) -> Result<Vec<Signature>, LedgerError> {
        self.signing_session()?
            .sign_transaction(tx, trusted_inputs, path, sighash)
    }

    pub fn get_operation_mode(&self) -> Result<OperationMode, LedgerError> {
        let channel = self.session.lock()?;
        commands::operation_mode::get(channel.transport())
    }

    /// Requires a verified PIN.
    pub fn set_operation_mode(&self, mode: OperationMode) -> Result<(), LedgerError> {
        let channel = self.session.lock()?;
        if !channel.auth().verified() {
            return Err(LedgerError::NotAuthenticated);
        }
        commands::operation_mode::set(channel.transport(), mode)?;
        log::info!("operation mode set to {mode:?}");
        Ok(())
    }

    pub fn get_second_factor_mode(&self) -> Result<SecondFactorMode, LedgerError> {
        let channel = self.session.lock()?;
        commands::operation_mode::second_factor(channel.transport())
    }

    /// Personalize a blank dongle.
    pub fn setup(&self, setup: &RegularSetup) -> Result<SetupResponse, LedgerError> {
        let channel = self.session.lock()?;
        let response = commands::setup::exec(channel.transport(), setup)?;
        log::info!("dongle set up in {:?} mode", setup.operation_mode);
        Ok(response)
    }
}
