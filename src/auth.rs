//! PIN verification and attempt tracking.
//!
//! The attempt counter lives on the device. The host only caches the last
//! value it saw; a failed attempt, a lockout or a replug invalidates it.

use crate::commands::verify_pin;
use crate::error::{LedgerError, StatusWord};
use crate::session::Channel;
use crate::types::Pin;

/// Attempts granted after a successful verification.
pub const MAX_PIN_ATTEMPTS: u8 = 3;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthState {
    verified: bool,
    remaining_attempts: Option<u8>,
}

impl AuthState {
    pub fn verified(&self) -> bool {
        self.verified
    }

    pub fn remaining_attempts(&self) -> Option<u8> {
        self.remaining_attempts
    }

    pub(crate) fn record_verified(&mut self) {
        self.verified = true;
        self.remaining_attempts = Some(MAX_PIN_ATTEMPTS);
    }

    pub(crate) fn record_attempts(&mut self, remaining: u8) {
        self.remaining_attempts = Some(remaining);
    }

    pub(crate) fn record_wrong_pin(&mut self, remaining: u8) {
        self.verified = false;
        self.remaining_attempts = Some(remaining);
    }

    pub(crate) fn record_locked(&mut self, status_word: u16) {
        self.verified = false;
        // a halted device says nothing about the counter
        self.remaining_attempts = if status_word == StatusWord::Halted as u16 {
            None
        } else {
            Some(0)
        };
    }
}

/// Send `pin` to the device. `Ok(true)` when accepted; a rejected PIN is
/// [`LedgerError::WrongPin`] with the attempts the device still grants.
pub fn verify_pin(channel: &mut Channel<'_>, pin: &Pin) -> Result<bool, LedgerError> {
    match verify_pin::exec(channel.transport(), pin) {
        Ok(()) => {
            log::info!("PIN accepted");
            channel.auth_mut().record_verified();
            Ok(true)
        }
        Err(LedgerError::WrongPin { remaining_attempts }) => {
            log::warn!("PIN rejected, {remaining_attempts} attempt(s) left");
            channel.auth_mut().record_wrong_pin(remaining_attempts);
            Err(LedgerError::WrongPin { remaining_attempts })
        }
        Err(LedgerError::DeviceLocked { status_word }) => {
            log::warn!("PIN verification refused, device locked (0x{status_word:04X})");
            channel.auth_mut().record_locked(status_word);
            Err(LedgerError::DeviceLocked { status_word })
        }
        Err(e) => Err(e),
    }
}

/// Ask the device how many PIN attempts are left without spending one.
pub fn remaining_attempts(channel: &mut Channel<'_>) -> Result<u8, LedgerError> {
    match verify_pin::remaining_attempts(channel.transport()) {
        Ok(remaining) => {
            channel.auth_mut().record_attempts(remaining);
            Ok(remaining)
        }
        Err(LedgerError::DeviceLocked { status_word }) => {
            channel.auth_mut().record_locked(status_word);
            Err(LedgerError::DeviceLocked { status_word })
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::testing::ScriptedTransport;
    use crate::session::DeviceSession;

    fn session(responses: Vec<Vec<u8>>) -> DeviceSession {
        DeviceSession::new(Box::new(ScriptedTransport::new(responses)))
    }

    #[test]
    fn correct_pin_resets_counter() {
        let s = session(vec![vec![0x90, 0x00]]);
        let mut ch = s.lock().unwrap();
        assert!(verify_pin(&mut ch, &Pin::from("1234")).unwrap());
        assert!(ch.auth().verified());
        assert_eq!(ch.auth().remaining_attempts(), Some(MAX_PIN_ATTEMPTS));
    }

    #[test]
    fn wrong_pin_caches_remaining() {
        let s = session(vec![vec![0x63, 0xC2]]);
        let mut ch = s.lock().unwrap();
        let err = verify_pin(&mut ch, &Pin::from("1235")).unwrap_err();
        assert!(matches!(err, LedgerError::WrongPin { remaining_attempts: 2 }));
        assert!(!ch.auth().verified());
        assert_eq!(ch.auth().remaining_attempts(), Some(2));
    }

    #[test]
    fn zero_attempts_is_locked() {
        let s = session(vec![vec![0x63, 0xC0]]);
        let mut ch = s.lock().unwrap();
        let err = verify_pin(&mut ch, &Pin::from("0000")).unwrap_err();
        assert!(matches!(err, LedgerError::DeviceLocked { status_word: 0x63C0 }));
        assert_eq!(ch.auth().remaining_attempts(), Some(0));
    }

    #[test]
    fn halted_device_forgets_counter() {
        let s = session(vec![vec![0x63, 0xC2], vec![0x6F, 0xAA]]);
        let mut ch = s.lock().unwrap();
        let _ = verify_pin(&mut ch, &Pin::from("1235"));
        let err = remaining_attempts(&mut ch).unwrap_err();
        assert!(err.requires_replug());
        assert_eq!(ch.auth().remaining_attempts(), None);
    }

    #[test]
    fn attempts_query_is_cached() {
        let s = session(vec![vec![0x63, 0xC3]]);
        let mut ch = s.lock().unwrap();
        assert_eq!(remaining_attempts(&mut ch).unwrap(), 3);
        assert_eq!(ch.auth().remaining_attempts(), Some(3));
        assert!(!ch.auth().verified());
    }
}
