use crate::apdu::{ApduCommand, Instruction};
use crate::error::LedgerError;
use crate::protocol;
use crate::transport::Transport;
use crate::types::{OperationMode, SecondFactorMode};

const P1_OPERATION_MODE: u8 = 0x00;
const P1_SECOND_FACTOR: u8 = 0x01;

fn first_byte(data: &[u8], what: &str) -> Result<u8, LedgerError> {
    data.first()
        .copied()
        .ok_or_else(|| LedgerError::InvalidResponse(format!("empty {what} response")))
}

pub fn get(transport: &dyn Transport) -> Result<OperationMode, LedgerError> {
    let cmd = ApduCommand::new(Instruction::GetOperationMode, P1_OPERATION_MODE, 0x00);
    let answer = protocol::send_checked(transport, &cmd, LedgerError::from_status)?;
    Ok(OperationMode::from_byte(first_byte(answer.data(), "operation mode")?))
}

/// Data: `[mode]`. The device answers `0x6982` until the PIN is verified.
pub fn set(transport: &dyn Transport, mode: OperationMode) -> Result<(), LedgerError> {
    let cmd = ApduCommand::with_data(
        Instruction::SetOperationMode,
        0x00,
        0x00,
        vec![mode.as_byte()],
    );
    protocol::send_checked(transport, &cmd, LedgerError::from_status)?;
    Ok(())
}

pub fn second_factor(transport: &dyn Transport) -> Result<SecondFactorMode, LedgerError> {
    let cmd = ApduCommand::new(Instruction::GetOperationMode, P1_SECOND_FACTOR, 0x00);
    let answer = protocol::send_checked(transport, &cmd, LedgerError::from_status)?;
    Ok(SecondFactorMode::from_byte(first_byte(
        answer.data(),
        "second factor mode",
    )?))
}
