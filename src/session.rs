//! Exclusive access to one dongle.
//!
//! The device has a single channel and a single hash accumulator, so every
//! operation runs under one gate: [`DeviceSession::lock`] hands out a
//! [`Channel`] that owns both the transport and the host-side cache of
//! device state until it is dropped.

use std::sync::{Mutex, MutexGuard};

use crate::apdu::{ApduAnswer, ApduCommand};
use crate::auth::AuthState;
use crate::error::{LedgerError, TransportError};
use crate::protocol;
use crate::signing::SigningContext;
use crate::transport::Transport;

/// Host-side mirror of volatile device state. Lost on replug.
#[derive(Debug, Default)]
pub(crate) struct SessionState {
    pub(crate) auth: AuthState,
    pub(crate) signing: SigningContext,
}

pub struct DeviceSession {
    transport: Box<dyn Transport>,
    state: Mutex<SessionState>,
}

impl DeviceSession {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            transport,
            state: Mutex::new(SessionState::default()),
        }
    }

    /// Wait for exclusive use of the device.
    pub fn lock(&self) -> Result<Channel<'_>, LedgerError> {
        let state = self
            .state
            .lock()
            .map_err(|e| TransportError::Comm(format!("session gate poisoned: {e}")))?;
        Ok(Channel {
            transport: self.transport.as_ref(),
            state,
        })
    }

    /// Release the device. Safe to call more than once.
    pub fn close(&self) -> Result<(), LedgerError> {
        let mut channel = self.lock()?;
        channel.forget_device_state();
        self.transport.close()?;
        Ok(())
    }

    /// Reopen the channel after the device was unplugged. Everything the
    /// host remembered about the device is dropped.
    pub fn reconnect(&self) -> Result<(), LedgerError> {
        let mut channel = self.lock()?;
        channel.forget_device_state();
        self.transport.reconnect()?;
        Ok(())
    }
}

/// Exclusive handle on the device, held for the duration of one operation
/// (or a whole signing session).
pub struct Channel<'a> {
    transport: &'a dyn Transport,
    state: MutexGuard<'a, SessionState>,
}

impl<'a> Channel<'a> {
    pub fn transport(&self) -> &'a dyn Transport {
        self.transport
    }

    pub fn exchange(&self, command: &ApduCommand) -> Result<ApduAnswer, LedgerError> {
        protocol::send(self.transport, command)
    }

    pub(crate) fn auth(&self) -> &AuthState {
        &self.state.auth
    }

    pub(crate) fn auth_mut(&mut self) -> &mut AuthState {
        &mut self.state.auth
    }

    pub(crate) fn signing(&self) -> &SigningContext {
        &self.state.signing
    }

    pub(crate) fn signing_mut(&mut self) -> &mut SigningContext {
        &mut self.state.signing
    }

    fn forget_device_state(&mut self) {
        *self.state = SessionState::default();
    }
}
