use crate::apdu::{ApduCommand, Instruction};
use crate::error::LedgerError;
use crate::protocol;
use crate::transport::Transport;
use crate::types::{Bip32Path, WalletPublicKey};

/// Response: `[pk_len][pubkey][addr_len][base58 address][chain code (32)]`
pub fn exec(transport: &dyn Transport, path: &Bip32Path) -> Result<WalletPublicKey, LedgerError> {
    let cmd = ApduCommand::with_data(Instruction::GetWalletPublicKey, 0x00, 0x00, path.serialize());
    let answer = protocol::send_checked(transport, &cmd, LedgerError::from_status)?;
    parse_pubkey_response(answer.data())
}

pub(crate) fn parse_pubkey_response(data: &[u8]) -> Result<WalletPublicKey, LedgerError> {
    if data.is_empty() {
        return Err(LedgerError::InvalidResponse("empty pubkey response".into()));
    }

    let pk_len = data[0] as usize;
    if data.len() < 2 + pk_len {
        return Err(LedgerError::InvalidResponse(format!(
            "pubkey response truncated at key ({} bytes)",
            data.len()
        )));
    }
    let public_key = bitcoin::PublicKey::from_slice(&data[1..1 + pk_len])
        .map_err(|e| LedgerError::InvalidResponse(format!("bad public key: {e}")))?;

    let addr_len = data[1 + pk_len] as usize;
    let addr_start = 2 + pk_len;
    if data.len() != addr_start + addr_len + 32 {
        return Err(LedgerError::InvalidResponse(format!(
            "unexpected pubkey response length: {}",
            data.len()
        )));
    }
    let address = String::from_utf8(data[addr_start..addr_start + addr_len].to_vec())
        .map_err(|_| LedgerError::InvalidResponse("address is not UTF-8".into()))?;

    let mut chain_code = [0u8; 32];
    chain_code.copy_from_slice(&data[addr_start + addr_len..]);

    Ok(WalletPublicKey {
        public_key,
        address,
        chain_code,
    })
}
