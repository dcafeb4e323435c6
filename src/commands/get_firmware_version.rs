use crate::apdu::{ApduCommand, Instruction};
use crate::error::LedgerError;
use crate::protocol;
use crate::transport::Transport;
use crate::types::FirmwareVersion;

/// Response: `[features][arch][major][minor][patch]([loader major][loader minor])`
///
/// Works in every mode, including before setup and in the loader.
pub fn exec(transport: &dyn Transport) -> Result<FirmwareVersion, LedgerError> {
    let cmd = ApduCommand::new(Instruction::GetFirmwareVersion, 0x00, 0x00);
    let answer = protocol::send_checked(transport, &cmd, LedgerError::from_status)?;
    parse_version_response(answer.data())
}

pub(crate) fn parse_version_response(data: &[u8]) -> Result<FirmwareVersion, LedgerError> {
    if data.len() < 5 {
        return Err(LedgerError::InvalidResponse(format!(
            "firmware version response too short: {} bytes",
            data.len()
        )));
    }

    let loader = if data.len() >= 7 {
        Some((data[5], data[6]))
    } else {
        None
    };

    Ok(FirmwareVersion {
        features: data[0],
        architecture: data[1],
        major: data[2],
        minor: data[3],
        patch: data[4],
        loader,
    })
}
