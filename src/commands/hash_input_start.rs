use bitcoin::consensus::encode::{serialize, VarInt};
use bitcoin::{Transaction, TxIn};

use crate::apdu::{ApduCommand, Instruction};
use crate::error::{LedgerError, StatusWord};
use crate::protocol::{self, Frames, Segment};
use crate::transport::Transport;
use crate::types::TrustedInput;

const P1_FIRST: u8 = 0x00;
const P1_NEXT: u8 = 0x80;
const P2_NEW_TX: u8 = 0x00;
const P2_CONTINUE_TX: u8 = 0x80;

const TRUSTED_MARKER: u8 = 0x01;
const UNTRUSTED_MARKER: u8 = 0x00;

/// Status mapping shared by the hash commands: `0x6985` is the device
/// refusing a step out of order, `0x6A80` a token it cannot authenticate.
pub(crate) fn map_status(code: u16) -> LedgerError {
    match code {
        c if c == StatusWord::ConditionsNotSatisfied as u16 => {
            LedgerError::SequencingFault { status_word: code }
        }
        c if c == StatusWord::InvalidData as u16 => {
            LedgerError::TrustedInputError { status_word: code }
        }
        _ => LedgerError::from_status(code),
    }
}

/// Tokens are matched by outpoint. Tokens with an unknown layout fall back
/// to input position when one token was given per input.
fn token_for<'t>(
    position: usize,
    input: &TxIn,
    trusted_inputs: &'t [TrustedInput],
    total_inputs: usize,
) -> Option<&'t TrustedInput> {
    if let Some(t) = trusted_inputs
        .iter()
        .find(|t| t.outpoint() == Some(input.previous_output))
    {
        return Some(t);
    }
    if trusted_inputs.len() == total_inputs {
        let t = &trusted_inputs[position];
        if t.outpoint().is_none() {
            return Some(t);
        }
    }
    None
}

/// Input frames: `0x01 ‖ len ‖ token` or `0x00 ‖ prevout`, then
/// `varint(script len)`, then `script ‖ sequence`. Only the input being
/// signed carries its script; the others are blanked.
///
/// Tokens longer than the one-byte length prefix allows are refused.
pub(crate) fn input_segments(
    tx: &Transaction,
    input_index: usize,
    trusted_inputs: &[TrustedInput],
) -> Result<Vec<Segment>, LedgerError> {
    let mut segments = Vec::with_capacity(2 * tx.input.len());
    for (i, input) in tx.input.iter().enumerate() {
        let script: &[u8] = if i == input_index {
            input.script_sig.as_bytes()
        } else {
            &[]
        };

        let mut prefix = Vec::new();
        match token_for(i, input, trusted_inputs, tx.input.len()) {
            Some(token) => {
                let len = u8::try_from(token.as_bytes().len()).map_err(|_| {
                    LedgerError::InvalidArgument(format!(
                        "trusted input for input {i} is {} bytes, at most 255 fit",
                        token.as_bytes().len()
                    ))
                })?;
                prefix.push(TRUSTED_MARKER);
                prefix.push(len);
                prefix.extend_from_slice(token.as_bytes());
            }
            None => {
                prefix.push(UNTRUSTED_MARKER);
                prefix.extend(serialize(&input.previous_output));
            }
        }
        prefix.extend(serialize(&VarInt(script.len() as u64)));
        segments.push(Segment::new(prefix));
        segments.push(Segment::with_trailer(
            script.to_vec(),
            input.sequence.0.to_le_bytes().to_vec(),
        ));
    }
    Ok(segments)
}

/// First frame `version ‖ varint(#inputs)` with P2 selecting a fresh hash
/// context (`0x00`) or continuation of the previous one (`0x80`); every
/// input frame follows with P1 `0x80`.
pub fn exec(
    transport: &dyn Transport,
    new_transaction: bool,
    tx: &Transaction,
    input_index: usize,
    trusted_inputs: &[TrustedInput],
) -> Result<(), LedgerError> {
    let segments = input_segments(tx, input_index, trusted_inputs)?;
    let mut header = tx.version.0.to_le_bytes().to_vec();
    header.extend(serialize(&VarInt(tx.input.len() as u64)));
    let p2 = if new_transaction {
        P2_NEW_TX
    } else {
        P2_CONTINUE_TX
    };
    let first = ApduCommand::with_data(Instruction::HashInputStart, P1_FIRST, p2, header);
    protocol::send_checked(transport, &first, map_status)?;

    let frames = Frames::new(segments);
    if frames.len() > 0 {
        protocol::stream(
            transport,
            Instruction::HashInputStart,
            frames,
            |_| (P1_NEXT, 0x00),
            map_status,
        )?;
    }
    Ok(())
}
