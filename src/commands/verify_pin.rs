use crate::apdu::{ApduCommand, Instruction};
use crate::error::{LedgerError, StatusWord};
use crate::protocol;
use crate::transport::Transport;
use crate::types::Pin;

const P1_VERIFY: u8 = 0x00;
const P1_QUERY_ATTEMPTS: u8 = 0x80;

/// `0x63Cx` carries the attempts left; zero, `0x6983` and `0x6FAA` mean
/// no further verification is possible.
pub(crate) fn map_pin_status(code: u16) -> LedgerError {
    match StatusWord::pin_attempts(code) {
        Some(0) => LedgerError::DeviceLocked { status_word: code },
        Some(remaining_attempts) => LedgerError::WrongPin { remaining_attempts },
        None => LedgerError::from_status(code),
    }
}

/// Data: the PIN as entered.
pub fn exec(transport: &dyn Transport, pin: &Pin) -> Result<(), LedgerError> {
    pin.check_len("PIN")?;
    let cmd = ApduCommand::with_data(
        Instruction::VerifyPin,
        P1_VERIFY,
        0x00,
        pin.as_bytes().to_vec(),
    )
    .sensitive();
    protocol::send_checked(transport, &cmd, map_pin_status)?;
    Ok(())
}

/// The query never succeeds with `9000`: the answer is the `0x63Cx` status.
pub fn remaining_attempts(transport: &dyn Transport) -> Result<u8, LedgerError> {
    let cmd = ApduCommand::with_data(Instruction::VerifyPin, P1_QUERY_ATTEMPTS, 0x00, vec![0x01]);
    let answer = protocol::send(transport, &cmd)?;
    let code = answer.retcode();
    match StatusWord::pin_attempts(code) {
        Some(0) => Err(LedgerError::DeviceLocked { status_word: code }),
        Some(remaining) => Ok(remaining),
        None if StatusWord::is_success(code) => Err(LedgerError::InvalidResponse(
            "attempts query answered 9000 without a counter".into(),
        )),
        None => Err(map_pin_status(code)),
    }
}
