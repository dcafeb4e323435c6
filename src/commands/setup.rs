use crate::apdu::{ApduCommand, Instruction};
use crate::error::LedgerError;
use crate::protocol;
use crate::transport::Transport;
use crate::types::{RegularSetup, SetupResponse};

const P1_REGULAR: u8 = 0x00;

const MIN_SEED_LEN: usize = 32;
const MAX_SEED_LEN: usize = 64;

/// `len ‖ bytes`, or a single zero when the field is absent.
fn push_field(data: &mut Vec<u8>, field: Option<&[u8]>) {
    match field {
        Some(bytes) => {
            data.push(bytes.len() as u8);
            data.extend_from_slice(bytes);
        }
        None => data.push(0x00),
    }
}

pub(crate) fn encode(setup: &RegularSetup) -> Result<Vec<u8>, LedgerError> {
    if let Some(seed) = &setup.restored_seed {
        if !(MIN_SEED_LEN..=MAX_SEED_LEN).contains(&seed.len()) {
            return Err(LedgerError::InvalidArgument(format!(
                "restored seed must be {MIN_SEED_LEN}..={MAX_SEED_LEN} bytes, got {}",
                seed.len()
            )));
        }
    }
    setup.user_pin.check_len("user PIN")?;
    if let Some(wipe_pin) = &setup.wipe_pin {
        wipe_pin.check_len("wipe PIN")?;
    }

    let mut data = vec![
        setup.operation_mode.as_byte(),
        setup.features.bits(),
        setup.key_version,
        setup.key_version_p2sh,
    ];
    push_field(&mut data, Some(setup.user_pin.as_bytes()));
    push_field(&mut data, setup.wipe_pin.as_ref().map(|p| p.as_bytes()));
    push_field(&mut data, setup.restored_seed.as_deref());
    push_field(
        &mut data,
        setup.restored_wrapping_key.as_ref().map(|k| &k[..]),
    );
    Ok(data)
}

/// Response: `[trusted input key (16)][wrapping key (16)]`.
pub(crate) fn parse_setup_response(data: &[u8]) -> Result<SetupResponse, LedgerError> {
    if data.len() < 32 {
        return Err(LedgerError::InvalidResponse(format!(
            "setup response too short: {} bytes",
            data.len()
        )));
    }
    let mut trusted_input_key = [0u8; 16];
    let mut wrapping_key = [0u8; 16];
    trusted_input_key.copy_from_slice(&data[..16]);
    wrapping_key.copy_from_slice(&data[16..32]);
    Ok(SetupResponse {
        trusted_input_key,
        wrapping_key,
    })
}

/// One-shot personalization of a blank dongle.
pub fn exec(transport: &dyn Transport, setup: &RegularSetup) -> Result<SetupResponse, LedgerError> {
    let cmd = ApduCommand::with_data(Instruction::Setup, P1_REGULAR, 0x00, encode(setup)?).sensitive();
    let answer = protocol::send_checked(transport, &cmd, LedgerError::from_status)?;
    parse_setup_response(answer.data())
}
