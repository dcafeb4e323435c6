use bitcoin::consensus::encode::{serialize, VarInt};
use bitcoin::TxOut;

use crate::apdu::Instruction;
use crate::commands::hash_input_start::map_status;
use crate::error::LedgerError;
use crate::protocol::{self, Frames};
use crate::transport::Transport;
use crate::types::UserConfirmation;

const P1_MORE: u8 = 0x00;
const P1_LAST: u8 = 0x80;

pub(crate) fn serialize_outputs(outputs: &[TxOut]) -> Vec<u8> {
    let mut data = serialize(&VarInt(outputs.len() as u64));
    for output in outputs {
        data.extend(serialize(output));
    }
    data
}

/// Streams `varint(#outputs) ‖ outputs` in 255-byte frames, P1 `0x80` on
/// the last one. The first byte of the final answer says which user
/// confirmation the device wants before signing.
pub fn exec(transport: &dyn Transport, outputs: &[TxOut]) -> Result<UserConfirmation, LedgerError> {
    let answer = protocol::stream(
        transport,
        Instruction::HashInputFinalizeFull,
        Frames::from_bytes(serialize_outputs(outputs)),
        |f| (if f.last { P1_LAST } else { P1_MORE }, 0x00),
        map_status,
    )?;

    match answer.data().first() {
        Some(&b) => Ok(UserConfirmation::from_byte(b)),
        None => Err(LedgerError::InvalidResponse(
            "finalize answer carries no confirmation byte".into(),
        )),
    }
}
