//! In-process stand-in for a BTChip dongle.
//!
//! Implements the subset of the firmware the integration tests drive:
//! PIN with attempt counter (a wrong PIN halts the device until replug),
//! trusted inputs MACed with HMAC-SHA256, the streaming legacy sighash,
//! RFC6979 signing on keys derived from a restored seed.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use bitcoin::bip32::{ChildNumber, DerivationPath, Xpriv};
use bitcoin::consensus::encode::deserialize_partial;
use bitcoin::secp256k1::{All, Message, Secp256k1};
use bitcoin::{Address, Network, Transaction};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use ledger_btchip::apdu::ApduCommand;
use ledger_btchip::{Transport, TransportError};

pub const PIN: &str = "1234";
pub const SEED_HEX: &str = "1c241d6e8e26990c8b913191d4c1b6cf5d42a63bbd5bffdd90dea34f34ff5a334542db021ae621c0f16cfc39c70e1c23ccbede464851cd5ceaf67266b151f0c2";
/// P2PKH address of `m/1` under [`SEED_HEX`].
pub const WALLET_ADDRESS: &str = "1PcLMBsvjkqvs9MaENqHNBpa91atjm89Lb";
pub const RECIPIENT: &str = "15sYbVpRh6dyWycZMwPdxJWD4xbfxReeHe";

const SW_OK: u16 = 0x9000;
const SW_NOT_AUTHENTICATED: u16 = 0x6982;
const SW_PIN_BLOCKED: u16 = 0x6983;
const SW_CONDITIONS: u16 = 0x6985;
const SW_INVALID_DATA: u16 = 0x6A80;
const SW_INS_NOT_SUPPORTED: u16 = 0x6D00;
const SW_CLA_NOT_SUPPORTED: u16 = 0x6E00;
const SW_HALTED: u16 = 0x6FAA;

const MODE_STANDARD: u8 = 0x01;
const FEATURE_SKIP_SECOND_FACTOR: u8 = 0x08;

pub fn seed() -> Vec<u8> {
    hex::decode(SEED_HEX).unwrap()
}

fn sha256d(data: &[u8]) -> [u8; 32] {
    Sha256::digest(Sha256::digest(data)).into()
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let out = self.data.get(self.pos..self.pos + n)?;
        self.pos += n;
        Some(out)
    }

    fn byte(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    fn varint(&mut self) -> Option<u64> {
        Some(match self.byte()? {
            0xFD => u16::from_le_bytes(self.take(2)?.try_into().ok()?) as u64,
            0xFE => u32::from_le_bytes(self.take(4)?.try_into().ok()?) as u64,
            0xFF => u64::from_le_bytes(self.take(8)?.try_into().ok()?),
            b => b as u64,
        })
    }
}

fn push_varint(out: &mut Vec<u8>, n: u64) {
    out.extend(bitcoin::consensus::encode::serialize(&bitcoin::consensus::encode::VarInt(n)));
}

enum Phase {
    /// Header received, inputs still arriving.
    Inputs {
        expected: u64,
        seen: u64,
        pending: Vec<u8>,
    },
    Outputs,
    Finalized,
    Signed,
}

struct HashContext {
    phase: Phase,
    preimage: Vec<u8>,
}

struct Device {
    secp: Secp256k1<All>,
    configured: bool,
    pin: Vec<u8>,
    attempts: u8,
    verified: bool,
    halted: bool,
    closed: bool,
    mode: u8,
    features: u8,
    master: Option<Xpriv>,
    trusted_input_key: [u8; 16],
    wrapping_key: [u8; 16],
    nonce: u16,
    trusted_buffer: Vec<u8>,
    /// A transaction was opened and may be continued.
    transaction_open: bool,
    hash: Option<HashContext>,
}

/// Shared handle: one clone goes into the client, the test keeps another
/// to replug or inspect the device.
#[derive(Clone)]
pub struct SimulatedDongle {
    device: Arc<Mutex<Device>>,
}

impl SimulatedDongle {
    /// A dongle set up in server mode with [`SEED_HEX`] and [`PIN`].
    pub fn new() -> Self {
        let dongle = Self::blank();
        {
            let mut d = dongle.device.lock().unwrap();
            d.configured = true;
            d.pin = PIN.as_bytes().to_vec();
            d.mode = 0x04;
            d.features = 0x02 | 0x04 | FEATURE_SKIP_SECOND_FACTOR;
            d.master = Some(Xpriv::new_master(Network::Bitcoin, &seed()).unwrap());
        }
        dongle
    }

    /// A dongle waiting for setup.
    pub fn blank() -> Self {
        Self {
            device: Arc::new(Mutex::new(Device {
                secp: Secp256k1::new(),
                configured: false,
                pin: Vec::new(),
                attempts: 3,
                verified: false,
                halted: false,
                closed: false,
                mode: MODE_STANDARD,
                features: 0,
                master: None,
                trusted_input_key: [0x5C; 16],
                wrapping_key: [0x3A; 16],
                nonce: 0,
                trusted_buffer: Vec::new(),
                transaction_open: false,
                hash: None,
            })),
        }
    }

    pub fn with_features(self, features: u8) -> Self {
        self.device.lock().unwrap().features = features;
        self
    }

    pub fn with_mode(self, mode: u8) -> Self {
        self.device.lock().unwrap().mode = mode;
        self
    }

    /// Power cycle: volatile state is lost, the attempt counter is not.
    pub fn replug(&self) {
        let mut d = self.device.lock().unwrap();
        d.verified = false;
        d.halted = false;
        d.trusted_buffer.clear();
        d.transaction_open = false;
        d.hash = None;
    }

    pub fn attempts(&self) -> u8 {
        self.device.lock().unwrap().attempts
    }

    pub fn is_halted(&self) -> bool {
        self.device.lock().unwrap().halted
    }

    pub fn is_closed(&self) -> bool {
        self.device.lock().unwrap().closed
    }

    /// Private key the device signs with at `path`.
    pub fn private_key(&self, path: &[u32]) -> bitcoin::secp256k1::SecretKey {
        let d = self.device.lock().unwrap();
        d.derive(path).unwrap().private_key
    }
}

impl Default for SimulatedDongle {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for SimulatedDongle {
    fn exchange(&self, command: &ApduCommand) -> Result<Vec<u8>, TransportError> {
        let mut d = self.device.lock().unwrap();
        if d.closed {
            return Err(TransportError::Closed);
        }
        let (mut data, status) = match d.dispatch(command) {
            Ok(data) => (data, SW_OK),
            Err(status) => (Vec::new(), status),
        };
        data.extend_from_slice(&status.to_be_bytes());
        Ok(data)
    }

    fn close(&self) -> Result<(), TransportError> {
        self.device.lock().unwrap().closed = true;
        Ok(())
    }

    fn reconnect(&self) -> Result<(), TransportError> {
        self.device.lock().unwrap().closed = false;
        Ok(())
    }
}

type Reply = Result<Vec<u8>, u16>;

impl Device {
    fn dispatch(&mut self, cmd: &ApduCommand) -> Reply {
        if cmd.cla != 0xE0 {
            return Err(SW_CLA_NOT_SUPPORTED);
        }
        if self.halted {
            return Err(SW_HALTED);
        }
        match cmd.ins {
            0xC4 => Ok(vec![0x00, 0x30, 1, 0, 2, 1, 4]),
            0x20 => self.setup(&cmd.data),
            0x22 => self.verify_pin(cmd),
            0x24 => self.get_operation_mode(cmd.p1),
            _ if !self.configured => Err(SW_CONDITIONS),
            _ if !self.verified => Err(SW_NOT_AUTHENTICATED),
            0x26 => self.set_operation_mode(&cmd.data),
            0x40 => self.wallet_public_key(&cmd.data),
            0x42 => self.trusted_input(cmd),
            0x44 => self.hash_input_start(cmd),
            0x4A => self.hash_input_finalize(cmd),
            0x48 => self.hash_sign(&cmd.data),
            _ => Err(SW_INS_NOT_SUPPORTED),
        }
    }

    fn derive(&self, path: &[u32]) -> Result<Xpriv, u16> {
        let master = self.master.as_ref().ok_or(SW_CONDITIONS)?;
        let path: DerivationPath = path.iter().map(|&c| ChildNumber::from(c)).collect::<Vec<_>>().into();
        master
            .derive_priv(&self.secp, &path)
            .map_err(|_| SW_INVALID_DATA)
    }

    fn read_path(c: &mut Cursor<'_>) -> Result<Vec<u32>, u16> {
        let n = c.byte().ok_or(SW_INVALID_DATA)?;
        if n == 0 || n > 10 {
            return Err(SW_INVALID_DATA);
        }
        (0..n)
            .map(|_| {
                c.take(4)
                    .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
                    .ok_or(SW_INVALID_DATA)
            })
            .collect()
    }

    fn setup(&mut self, data: &[u8]) -> Reply {
        if self.configured {
            return Err(SW_CONDITIONS);
        }
        let mut c = Cursor::new(data);
        let header = c.take(4).ok_or(SW_INVALID_DATA)?;
        let (mode, features) = (header[0], header[1]);
        let field = |c: &mut Cursor<'_>| -> Result<Vec<u8>, u16> {
            let len = c.byte().ok_or(SW_INVALID_DATA)? as usize;
            c.take(len).map(<[u8]>::to_vec).ok_or(SW_INVALID_DATA)
        };
        let user_pin = field(&mut c)?;
        let _wipe_pin = field(&mut c)?;
        let seed = field(&mut c)?;
        let wrapping = field(&mut c)?;
        if user_pin.is_empty() {
            return Err(SW_INVALID_DATA);
        }
        let seed = if seed.is_empty() { vec![0x5A; 32] } else { seed };
        if !wrapping.is_empty() {
            self.wrapping_key = wrapping.try_into().map_err(|_| SW_INVALID_DATA)?;
        }
        self.master = Some(Xpriv::new_master(Network::Bitcoin, &seed).map_err(|_| SW_INVALID_DATA)?);
        self.pin = user_pin;
        self.mode = mode;
        self.features = features;
        self.attempts = 3;
        self.configured = true;

        let mut out = self.trusted_input_key.to_vec();
        out.extend_from_slice(&self.wrapping_key);
        Ok(out)
    }

    fn verify_pin(&mut self, cmd: &ApduCommand) -> Reply {
        if cmd.p1 == 0x80 {
            return Err(0x63C0 | self.attempts as u16);
        }
        if self.attempts == 0 {
            return Err(SW_PIN_BLOCKED);
        }
        if cmd.data == self.pin {
            self.attempts = 3;
            self.verified = true;
            Ok(Vec::new())
        } else {
            self.attempts -= 1;
            self.verified = false;
            self.halted = true;
            Err(0x63C0 | self.attempts as u16)
        }
    }

    fn get_operation_mode(&self, p1: u8) -> Reply {
        match p1 {
            0x00 => Ok(vec![self.mode]),
            0x01 => Ok(vec![0x11]),
            _ => Err(0x6B00),
        }
    }

    fn set_operation_mode(&mut self, data: &[u8]) -> Reply {
        match data {
            [m @ (0x01 | 0x02 | 0x04 | 0x08)] => {
                self.mode = *m;
                Ok(Vec::new())
            }
            _ => Err(SW_INVALID_DATA),
        }
    }

    fn wallet_public_key(&self, data: &[u8]) -> Reply {
        let path = Self::read_path(&mut Cursor::new(data))?;
        let key = self.derive(&path)?;
        let inner = key.private_key.public_key(&self.secp);
        let address = Address::p2pkh(bitcoin::PublicKey::new(inner).pubkey_hash(), Network::Bitcoin)
            .to_string();

        let mut out = vec![65];
        out.extend_from_slice(&inner.serialize_uncompressed());
        out.push(address.len() as u8);
        out.extend_from_slice(address.as_bytes());
        out.extend_from_slice(&key.encode()[13..45]);
        Ok(out)
    }

    fn mac(&self, body: &[u8]) -> [u8; 8] {
        let mut mac = Hmac::<Sha256>::new_from_slice(&self.trusted_input_key).unwrap();
        mac.update(body);
        let tag = mac.finalize().into_bytes();
        let mut out = [0u8; 8];
        out.copy_from_slice(&tag[..8]);
        out
    }

    fn trusted_input(&mut self, cmd: &ApduCommand) -> Reply {
        if cmd.p1 == 0x00 {
            self.trusted_buffer.clear();
        } else if self.trusted_buffer.is_empty() {
            return Err(SW_CONDITIONS);
        }
        self.trusted_buffer.extend_from_slice(&cmd.data);
        if self.trusted_buffer.len() < 4 {
            return Ok(Vec::new());
        }
        let raw = &self.trusted_buffer[4..];
        let tx = match deserialize_partial::<Transaction>(raw) {
            Ok((tx, used)) if used == raw.len() => tx,
            _ => return Ok(Vec::new()),
        };
        let index = u32::from_be_bytes([
            self.trusted_buffer[0],
            self.trusted_buffer[1],
            self.trusted_buffer[2],
            self.trusted_buffer[3],
        ]);
        self.trusted_buffer.clear();
        let output = tx.output.get(index as usize).ok_or(SW_INVALID_DATA)?;

        self.nonce = self.nonce.wrapping_add(1);
        let mut token = vec![0x32, 0x00];
        token.extend_from_slice(&self.nonce.to_le_bytes());
        token.extend_from_slice(&bitcoin::hashes::Hash::to_byte_array(tx.compute_txid()));
        token.extend_from_slice(&index.to_le_bytes());
        token.extend_from_slice(&output.value.to_sat().to_le_bytes());
        let mac = self.mac(&token);
        token.extend_from_slice(&mac);
        Ok(token)
    }

    fn hash_input_start(&mut self, cmd: &ApduCommand) -> Reply {
        if cmd.p1 == 0x00 {
            let new_transaction = cmd.p2 == 0x00;
            if !new_transaction && !self.transaction_open {
                return Err(SW_CONDITIONS);
            }
            let mut c = Cursor::new(&cmd.data);
            let version = c.take(4).ok_or(SW_INVALID_DATA)?.to_vec();
            let expected = c.varint().ok_or(SW_INVALID_DATA)?;
            let mut preimage = version;
            push_varint(&mut preimage, expected);
            self.transaction_open = true;
            self.hash = Some(HashContext {
                phase: Phase::Inputs {
                    expected,
                    seen: 0,
                    pending: Vec::new(),
                },
                preimage,
            });
            return Ok(Vec::new());
        }

        let mut ctx = self.hash.take().ok_or(SW_CONDITIONS)?;
        let result = self.absorb_inputs(&mut ctx, &cmd.data);
        match result {
            Ok(()) => {
                self.hash = Some(ctx);
                Ok(Vec::new())
            }
            Err(sw) => {
                self.transaction_open = false;
                Err(sw)
            }
        }
    }

    fn absorb_inputs(&self, ctx: &mut HashContext, data: &[u8]) -> Result<(), u16> {
        let Phase::Inputs {
            expected,
            seen,
            pending,
        } = &mut ctx.phase
        else {
            return Err(SW_CONDITIONS);
        };
        pending.extend_from_slice(data);
        loop {
            if *seen == *expected {
                if !pending.is_empty() {
                    return Err(SW_INVALID_DATA);
                }
                ctx.phase = Phase::Outputs;
                return Ok(());
            }
            let mut c = Cursor::new(&pending[..]);
            let Some(parsed) = self.parse_input(&mut c)? else {
                return Ok(());
            };
            let used = c.pos;
            ctx.preimage.extend_from_slice(&parsed);
            pending.drain(..used);
            *seen += 1;
        }
    }

    /// One input: prevout (taken from the token when trusted), script,
    /// sequence. `None` until every byte has arrived.
    fn parse_input(&self, c: &mut Cursor<'_>) -> Result<Option<Vec<u8>>, u16> {
        let Some(marker) = c.byte() else {
            return Ok(None);
        };
        let prevout = match marker {
            0x01 => {
                let Some(len) = c.byte() else { return Ok(None) };
                let Some(token) = c.take(len as usize) else {
                    return Ok(None);
                };
                if token.len() != 56 || token[0] != 0x32 || self.mac(&token[..48]) != token[48..] {
                    return Err(SW_INVALID_DATA);
                }
                token[4..40].to_vec()
            }
            0x00 => {
                if self.mode == MODE_STANDARD {
                    return Err(SW_INVALID_DATA);
                }
                let Some(prevout) = c.take(36) else {
                    return Ok(None);
                };
                prevout.to_vec()
            }
            _ => return Err(SW_INVALID_DATA),
        };
        let Some(script_len) = c.varint() else {
            return Ok(None);
        };
        let Some(script) = c.take(script_len as usize) else {
            return Ok(None);
        };
        let Some(sequence) = c.take(4) else {
            return Ok(None);
        };
        let mut out = prevout;
        push_varint(&mut out, script_len);
        out.extend_from_slice(script);
        out.extend_from_slice(sequence);
        Ok(Some(out))
    }

    fn hash_input_finalize(&mut self, cmd: &ApduCommand) -> Reply {
        let Some(ctx) = self.hash.as_mut() else {
            return Err(SW_CONDITIONS);
        };
        if !matches!(ctx.phase, Phase::Outputs) {
            self.hash = None;
            return Err(SW_CONDITIONS);
        }
        ctx.preimage.extend_from_slice(&cmd.data);
        if cmd.p1 != 0x80 {
            return Ok(Vec::new());
        }
        ctx.phase = Phase::Finalized;
        if self.features & FEATURE_SKIP_SECOND_FACTOR != 0 {
            Ok(vec![0x00])
        } else {
            Ok(vec![0x01])
        }
    }

    fn hash_sign(&mut self, data: &[u8]) -> Reply {
        let Some(ctx) = self.hash.as_mut() else {
            return Err(SW_CONDITIONS);
        };
        if !matches!(ctx.phase, Phase::Finalized) {
            self.hash = None;
            return Err(SW_CONDITIONS);
        }
        let mut c = Cursor::new(data);
        let path = Self::read_path(&mut c)?;
        let pin_len = c.byte().ok_or(SW_INVALID_DATA)?;
        let _second_factor = c.take(pin_len as usize).ok_or(SW_INVALID_DATA)?;
        if pin_len == 0 && self.features & FEATURE_SKIP_SECOND_FACTOR == 0 {
            return Err(SW_NOT_AUTHENTICATED);
        }
        let lock_time = c.take(4).ok_or(SW_INVALID_DATA)?;
        let sighash = c.byte().ok_or(SW_INVALID_DATA)?;

        let mut preimage = std::mem::take(&mut ctx.preimage);
        preimage.extend_from_slice(&[lock_time[3], lock_time[2], lock_time[1], lock_time[0]]);
        preimage.extend_from_slice(&(sighash as u32).to_le_bytes());
        ctx.phase = Phase::Signed;

        let key = self.derive(&path)?;
        let msg = Message::from_digest(sha256d(&preimage));
        let sig = self.secp.sign_ecdsa(&msg, &key.private_key);
        let mut out = sig.serialize_der().to_vec();
        if sig.serialize_compact()[31] & 1 == 1 {
            out[0] = 0x31;
        }
        out.push(sighash);
        Ok(out)
    }
}
