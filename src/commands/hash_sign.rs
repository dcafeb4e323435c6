use bitcoin::absolute::LockTime;
use bitcoin::ecdsa::Signature;
use bitcoin::EcdsaSighashType;

use crate::apdu::{ApduCommand, Instruction};
use crate::commands::hash_input_start::map_status;
use crate::error::LedgerError;
use crate::protocol;
use crate::transport::Transport;
use crate::types::{Bip32Path, Pin};

/// Data: `path ‖ len(pin) ‖ pin ‖ locktime (u32 BE) ‖ sighash type`.
/// The PIN here is the second factor code, empty when none is needed.
pub fn exec(
    transport: &dyn Transport,
    path: &Bip32Path,
    second_factor: Option<&Pin>,
    lock_time: LockTime,
    sighash: EcdsaSighashType,
) -> Result<Signature, LedgerError> {
    if let Some(code) = second_factor {
        code.check_len("second factor code")?;
    }
    let pin = second_factor.map(Pin::as_bytes).unwrap_or_default();
    let mut data = path.serialize();
    data.push(pin.len() as u8);
    data.extend_from_slice(pin);
    data.extend_from_slice(&lock_time.to_consensus_u32().to_be_bytes());
    data.push(sighash.to_u32() as u8);

    let mut cmd = ApduCommand::with_data(Instruction::HashSign, 0x00, 0x00, data);
    if second_factor.is_some() {
        cmd = cmd.sensitive();
    }
    let answer = protocol::send_checked(transport, &cmd, map_status)?;
    parse_signature(answer.data())
}

/// The device answers `DER ‖ sighash`, with the parity of R folded into
/// the first byte (`0x31`).
pub(crate) fn parse_signature(data: &[u8]) -> Result<Signature, LedgerError> {
    if data.is_empty() {
        return Err(LedgerError::InvalidSignature("empty signature".into()));
    }
    let mut sig = data.to_vec();
    if sig[0] & 0xFE != 0x30 {
        return Err(LedgerError::InvalidSignature(format!(
            "not a DER sequence: leading byte 0x{:02X}",
            sig[0]
        )));
    }
    sig[0] = 0x30;
    Signature::from_slice(&sig).map_err(|e| LedgerError::InvalidSignature(e.to_string()))
}
