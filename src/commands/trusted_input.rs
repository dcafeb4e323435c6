use bitcoin::consensus::encode::{serialize, VarInt};
use bitcoin::Transaction;

use crate::apdu::Instruction;
use crate::error::{LedgerError, StatusWord};
use crate::protocol::{self, Frames, Segment};
use crate::transport::Transport;
use crate::types::TrustedInput;

const P1_FIRST: u8 = 0x00;
const P1_NEXT: u8 = 0x80;

/// Structural rejections of the funding transaction.
fn map_status(code: u16) -> LedgerError {
    match code {
        c if c == StatusWord::InvalidData as u16
            || c == StatusWord::WrongLength as u16
            || c == StatusWord::IncorrectP1P2 as u16 =>
        {
            LedgerError::TrustedInputError { status_word: code }
        }
        _ => LedgerError::from_status(code),
    }
}

/// Frame layout, in canonical serialization order:
///
/// 1. `output index (u32 BE) ‖ version ‖ varint(#inputs)`
/// 2. per input: `prevout ‖ varint(script len)`, then `script ‖ sequence`
/// 3. `varint(#outputs)`
/// 4. per output: `amount ‖ varint(script len)`, then `script`
/// 5. `locktime`
pub(crate) fn segments(tx: &Transaction, output_index: u32) -> Vec<Segment> {
    let mut segments = Vec::with_capacity(3 + 2 * (tx.input.len() + tx.output.len()));

    let mut header = Vec::with_capacity(13);
    header.extend_from_slice(&output_index.to_be_bytes());
    header.extend_from_slice(&tx.version.0.to_le_bytes());
    header.extend(serialize(&VarInt(tx.input.len() as u64)));
    segments.push(Segment::new(header));

    for input in &tx.input {
        let script = input.script_sig.as_bytes();
        let mut prefix = serialize(&input.previous_output);
        prefix.extend(serialize(&VarInt(script.len() as u64)));
        segments.push(Segment::new(prefix));
        segments.push(Segment::with_trailer(
            script.to_vec(),
            input.sequence.0.to_le_bytes().to_vec(),
        ));
    }

    segments.push(Segment::new(serialize(&VarInt(tx.output.len() as u64))));

    for output in &tx.output {
        let script = output.script_pubkey.as_bytes();
        let mut prefix = output.value.to_sat().to_le_bytes().to_vec();
        prefix.extend(serialize(&VarInt(script.len() as u64)));
        segments.push(Segment::new(prefix));
        segments.push(Segment::new(script.to_vec()));
    }

    segments.push(Segment::new(
        tx.lock_time.to_consensus_u32().to_le_bytes().to_vec(),
    ));
    segments
}

/// Streams the funding transaction; the device answers the final frame
/// with the token.
pub fn exec(
    transport: &dyn Transport,
    tx: &Transaction,
    output_index: u32,
) -> Result<TrustedInput, LedgerError> {
    let frames = Frames::new(segments(tx, output_index));
    log::debug!(
        "requesting trusted input for output {output_index} ({} frames)",
        frames.len()
    );
    let answer = protocol::stream(
        transport,
        Instruction::GetTrustedInput,
        frames,
        |f| (if f.first { P1_FIRST } else { P1_NEXT }, 0x00),
        map_status,
    )?;

    if answer.data().is_empty() {
        return Err(LedgerError::InvalidResponse(
            "device returned no trusted input".into(),
        ));
    }
    Ok(TrustedInput::from_bytes(answer.into_data()))
}
