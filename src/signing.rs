//! Device-side transaction hashing and signing.
//!
//! The dongle never sees a full transaction at once. For every input to
//! sign the host streams the transaction with that input's script in place
//! ([`SigningSession::hash_input_start`]), then the outputs
//! ([`SigningSession::hash_input_finalize_full`]), then asks for the
//! signature ([`SigningSession::hash_sign`]). The device keeps one hash
//! accumulator, so the whole flow runs under the session gate.
//!
//! ```text
//! Idle ──start──> HashStarted ──finalize──> Finalized ──sign──> Signed
//!   ^                  ^                                          │
//!   └──── error ───────┴───────────── start (next input) ─────────┘
//! ```

use bitcoin::absolute::LockTime;
use bitcoin::ecdsa::Signature;
use bitcoin::{EcdsaSighashType, Transaction, TxOut};

use crate::commands::{hash_input_finalize, hash_input_start, hash_sign};
use crate::error::LedgerError;
use crate::session::Channel;
use crate::types::{Bip32Path, Pin, TrustedInput, UserConfirmation};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SigningState {
    #[default]
    Idle,
    HashStarted,
    Finalized,
    Signed,
}

/// What the host believes the device hash context holds.
#[derive(Debug, Clone, Default)]
pub(crate) struct SigningContext {
    state: SigningState,
    /// Input whose script was streamed by the last hash start.
    input_index: Option<usize>,
    /// A transaction was opened with `new_transaction` and not discarded.
    first_input: bool,
    trusted_inputs: Vec<TrustedInput>,
    lock_time: Option<LockTime>,
    sighash: Option<EcdsaSighashType>,
}

impl SigningContext {
    fn discard(&mut self) {
        if self.state != SigningState::Idle || self.first_input {
            log::debug!("signing session discarded in state {:?}", self.state);
        }
        *self = Self::default();
    }

    fn transition(&mut self, to: SigningState) {
        log::debug!("signing state {:?} -> {to:?}", self.state);
        self.state = to;
    }
}

/// Exclusive signing access to the device. Holds the session gate until
/// dropped, so no other operation can clobber the hash context halfway.
///
/// Any error discards the session: the next call must be
/// [`hash_input_start`](Self::hash_input_start) with a new transaction.
pub struct SigningSession<'a> {
    channel: Channel<'a>,
}

impl<'a> SigningSession<'a> {
    pub(crate) fn new(channel: Channel<'a>) -> Self {
        Self { channel }
    }

    pub fn state(&self) -> SigningState {
        self.channel.signing().state
    }

    /// Input whose script went into the current hash, if any.
    pub fn input_index(&self) -> Option<usize> {
        self.channel.signing().input_index
    }

    /// Tokens presented when the current transaction was opened.
    pub fn trusted_inputs(&self) -> &[TrustedInput] {
        &self.channel.signing().trusted_inputs
    }

    /// Lock time and sighash type of the last signature produced.
    pub fn last_signed(&self) -> Option<(LockTime, EcdsaSighashType)> {
        let ctx = self.channel.signing();
        ctx.lock_time.zip(ctx.sighash)
    }

    fn guard<T>(&mut self, result: Result<T, LedgerError>) -> Result<T, LedgerError> {
        if result.is_err() {
            self.channel.signing_mut().discard();
        }
        result
    }

    /// Stream `tx` with the script of `input_index` in place.
    ///
    /// `tx.input[input_index].script_sig` must hold the script of the
    /// output being spent; the other inputs' scripts are blanked. Inputs are
    /// matched to `trusted_inputs` by outpoint; unmatched inputs go out as
    /// bare prevouts, which the device only accepts in relaxed modes.
    pub fn hash_input_start(
        &mut self,
        new_transaction: bool,
        tx: &Transaction,
        input_index: usize,
        trusted_inputs: &[TrustedInput],
    ) -> Result<(), LedgerError> {
        let result = self.start(new_transaction, tx, input_index, trusted_inputs);
        self.guard(result)
    }

    fn start(
        &mut self,
        new_transaction: bool,
        tx: &Transaction,
        input_index: usize,
        trusted_inputs: &[TrustedInput],
    ) -> Result<(), LedgerError> {
        if input_index >= tx.input.len() {
            return Err(LedgerError::InvalidArgument(format!(
                "input index {input_index} out of range ({} inputs)",
                tx.input.len()
            )));
        }
        let ctx = self.channel.signing();
        if !new_transaction && !ctx.first_input {
            log::warn!("continuing a transaction that was never started, the device will refuse");
        } else if matches!(ctx.state, SigningState::HashStarted | SigningState::Finalized) {
            log::warn!(
                "hash start in state {:?}, the previous input is abandoned",
                ctx.state
            );
        }

        hash_input_start::exec(
            self.channel.transport(),
            new_transaction,
            tx,
            input_index,
            trusted_inputs,
        )?;

        let ctx = self.channel.signing_mut();
        if new_transaction {
            ctx.first_input = true;
            ctx.trusted_inputs = trusted_inputs.to_vec();
        }
        ctx.input_index = Some(input_index);
        ctx.transition(SigningState::HashStarted);
        Ok(())
    }

    /// Stream the outputs. The result says which user confirmation the
    /// device requires before [`hash_sign`](Self::hash_sign).
    pub fn hash_input_finalize_full(
        &mut self,
        outputs: &[TxOut],
    ) -> Result<UserConfirmation, LedgerError> {
        let state = self.state();
        if state != SigningState::HashStarted {
            log::warn!("finalize in state {state:?}");
        }
        let result = hash_input_finalize::exec(self.channel.transport(), outputs);
        let confirmation = self.guard(result)?;
        if confirmation.is_required() {
            log::info!("device requests user confirmation ({confirmation:?})");
        }
        self.channel
            .signing_mut()
            .transition(SigningState::Finalized);
        Ok(confirmation)
    }

    /// Sign the hashed input with the key at `path`. `second_factor` is the
    /// confirmation code when finalize asked for one.
    pub fn hash_sign(
        &mut self,
        path: &Bip32Path,
        second_factor: Option<&Pin>,
        lock_time: LockTime,
        sighash: EcdsaSighashType,
    ) -> Result<Signature, LedgerError> {
        let state = self.state();
        if state != SigningState::Finalized {
            log::warn!("hash sign in state {state:?}");
        }
        let result = hash_sign::exec(
            self.channel.transport(),
            path,
            second_factor,
            lock_time,
            sighash,
        );
        let signature = self.guard(result)?;
        let ctx = self.channel.signing_mut();
        ctx.lock_time = Some(lock_time);
        ctx.sighash = Some(sighash);
        ctx.transition(SigningState::Signed);
        Ok(signature)
    }

    /// Sign every input of `tx` with the key at `path`.
    ///
    /// Each input's `script_sig` must hold the script of the output it
    /// spends. Fails with [`LedgerError::SecondFactorRequired`] when the
    /// device wants a confirmation code; drive the steps by hand then.
    pub fn sign_transaction(
        &mut self,
        tx: &Transaction,
        trusted_inputs: &[TrustedInput],
        path: &Bip32Path,
        sighash: EcdsaSighashType,
    ) -> Result<Vec<Signature>, LedgerError> {
        let mut signatures = Vec::with_capacity(tx.input.len());
        for index in 0..tx.input.len() {
            self.hash_input_start(index == 0, tx, index, trusted_inputs)?;
            let confirmation = self.hash_input_finalize_full(&tx.output)?;
            if confirmation.is_required() {
                self.channel.signing_mut().discard();
                return Err(LedgerError::SecondFactorRequired(confirmation.as_byte()));
            }
            signatures.push(self.hash_sign(path, None, tx.lock_time, sighash)?);
            log::debug!("signed input {index}/{}", tx.input.len());
        }
        Ok(signatures)
    }
}
