//! Framing helpers shared by the commands.
//!
//! Large serializations (funding transactions, spending transactions,
//! output lists) are cut into ≤255-byte [`Frame`]s by [`Frames`] and sent
//! one APDU per frame. The device folds every frame into its own state, so
//! frames must arrive in serialization order and each status word is
//! checked before the next frame goes out.

pub mod chunks;

pub use chunks::{Frame, Frames, Segment};

use crate::apdu::{ApduAnswer, ApduCommand, Instruction};
use crate::error::{check_status, LedgerError};
use crate::transport::Transport;

/// Exchange one command and decode the response.
pub fn send(transport: &dyn Transport, command: &ApduCommand) -> Result<ApduAnswer, LedgerError> {
    log::trace!("=> {}", command.log_hex());
    let raw = transport.exchange(command)?;
    let answer = ApduAnswer::from_raw(raw)?;
    if command.sensitive {
        log::trace!("<= <redacted> {:04x}", answer.retcode());
    } else {
        log::trace!("<= {} {:04x}", hex::encode(answer.data()), answer.retcode());
    }
    Ok(answer)
}

/// Exchange one command and map a non-success status through `map`.
pub fn send_checked(
    transport: &dyn Transport,
    command: &ApduCommand,
    map: fn(u16) -> LedgerError,
) -> Result<ApduAnswer, LedgerError> {
    let answer = send(transport, command)?;
    check_status(answer.retcode(), map)?;
    Ok(answer)
}

/// Send every frame as one APDU, picking P1/P2 from the frame position.
/// Stops at the first failing status. Returns the last answer.
pub fn stream(
    transport: &dyn Transport,
    ins: Instruction,
    frames: Frames,
    params: impl Fn(&Frame) -> (u8, u8),
    map: fn(u16) -> LedgerError,
) -> Result<ApduAnswer, LedgerError> {
    let mut last = None;
    for frame in frames {
        let (p1, p2) = params(&frame);
        let cmd = ApduCommand::with_data(ins, p1, p2, frame.data);
        last = Some(send_checked(transport, &cmd, map)?);
    }
    last.ok_or_else(|| LedgerError::InvalidResponse("nothing to send".into()))
}
