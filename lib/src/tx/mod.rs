// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Transaction APIs
//!
//! A [TransactionHandle] drives the device through a single signing
//! session. Steps must be issued in order:
//!
//! 1. [TransactionHandle::collect_trusted_inputs] (possibly for no inputs)
//! 2. [TransactionHandle::hash_input] for each input in order
//! 3. [TransactionHandle::hash_outputs] once
//! 4. [TransactionHandle::sign] for each input in order
//!
//! Out of order calls fail with [Error::ProtocolSequence] without device
//! I/O, and any failure leaves the session [TxState::Failed].
//! [DeviceHandle::sign_transaction] runs a complete session.

use std::fmt::Display;

use bitcoin::{sighash::EcdsaSighashType, Transaction};
use log::debug;
use tokio::sync::OwnedMutexGuard;

use ledger_btc_apdu::{prelude::*, DecodeOwned};

use crate::{transport::Transport, DeviceHandle, Error};

pub mod chunks;

mod request;
pub use request::{Coin, SignOptions, SignatureRequest};

mod script;
pub use script::SpendKind;

mod sign;

/// Signing session state
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TxState {
    /// Session created, trusted inputs not yet collected
    Init,
    /// Trusted inputs collected, ready to hash inputs
    TrustedInputsCollected,
    /// Hashing inputs, next input index
    HashingInputs(usize),
    /// Inputs hashed, ready to hash outputs
    HashingOutputs,
    /// Signing inputs, next input index
    Signing(usize),
    /// All inputs signed
    Done,
    /// Session failed, no further operations are possible
    Failed,
}

impl Display for TxState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TxState::Init => write!(f, "Init"),
            TxState::TrustedInputsCollected => write!(f, "TrustedInputsCollected"),
            TxState::HashingInputs(i) => write!(f, "HashingInputs({i})"),
            TxState::HashingOutputs => write!(f, "HashingOutputs"),
            TxState::Signing(i) => write!(f, "Signing({i})"),
            TxState::Done => write!(f, "Done"),
            TxState::Failed => write!(f, "Failed"),
        }
    }
}

/// Handle to a hardware wallet configured for transaction signing
///
/// See [DeviceHandle::transaction] to create a [TransactionHandle].
/// The handle holds exclusive use of the device transaction context
/// until dropped, other commands may still interleave.
pub struct TransactionHandle<T: Transport> {
    handle: DeviceHandle<T>,
    _session: OwnedMutexGuard<()>,

    /// Spending transaction
    tx: Transaction,
    /// Use segwit hashing
    segwit: bool,

    state: TxState,
    signatures: Vec<Option<DeviceSignature>>,
}

impl<T: Transport> DeviceHandle<T> {
    /// Start a signing session for the provided spending transaction,
    /// waiting for any other session on this device to complete
    pub async fn transaction(&self, tx: &Transaction, segwit: bool) -> TransactionHandle<T> {
        let session = self.session().await;

        debug!(
            "Starting {} transaction session ({} inputs, {} outputs)",
            if segwit { "segwit" } else { "legacy" },
            tx.input.len(),
            tx.output.len()
        );

        TransactionHandle {
            handle: self.clone(),
            _session: session,
            tx: tx.clone(),
            segwit,
            state: TxState::Init,
            signatures: vec![None; tx.input.len()],
        }
    }

    /// Fetch a trusted input for output `output_index` of a previous transaction
    pub async fn trusted_input(
        &self,
        tx: &Transaction,
        output_index: u32,
    ) -> Result<TrustedInput, Error> {
        let _session = self.session().await;

        self.trusted_input_unlocked(tx, output_index).await
    }

    /// Stream a previous transaction, the trusted input is returned by the final block only
    async fn trusted_input_unlocked(
        &self,
        tx: &Transaction,
        output_index: u32,
    ) -> Result<TrustedInput, Error> {
        if output_index as usize >= tx.output.len() {
            return Err(Error::MissingOutput(output_index));
        }

        debug!(
            "Requesting trusted input for {}:{}",
            tx.compute_txid(),
            output_index
        );

        let mut reqs = chunks::trusted_input_blocks(tx, output_index, self.config().chunk_size);
        let last = reqs.pop().ok_or(Error::Apdu(ApduError::InvalidLength))?;

        for r in reqs {
            self.request::<EmptyResp, _>(r).await?;
        }

        self.request::<TrustedInput, _>(last).await
    }
}

impl<T: Transport> TransactionHandle<T> {
    /// Fetch current session state
    pub fn state(&self) -> TxState {
        self.state
    }

    /// Whether this session hashes inputs in segwit mode
    pub fn is_segwit(&self) -> bool {
        self.segwit
    }

    /// Collect trusted inputs for the provided previous transactions and output
    /// indices, in order
    pub async fn collect_trusted_inputs(
        &mut self,
        previous: &[(&Transaction, u32)],
    ) -> Result<Vec<TrustedInput>, Error> {
        self.check_state(TxState::Init)?;

        let mut trusted = Vec::with_capacity(previous.len());
        for (tx, output_index) in previous {
            let r = self.handle.trusted_input_unlocked(tx, *output_index).await;
            trusted.push(self.update(r)?);
        }

        debug!("Collected {} trusted inputs", trusted.len());
        self.state = TxState::TrustedInputsCollected;

        Ok(trusted)
    }

    /// Hash spending input `index`, committing to `script`.
    ///
    /// The first input also resets the device context and sends the
    /// transaction version and input count.
    pub async fn hash_input(
        &mut self,
        index: usize,
        record: InputRecord,
        script: &[u8],
    ) -> Result<(), Error> {
        let expected = match index {
            0 => TxState::TrustedInputsCollected,
            i => TxState::HashingInputs(i),
        };
        self.check_state(expected)?;

        let r = self.hash_input_inner(index, record, script).await;
        self.update(r)?;

        self.state = match index + 1 {
            n if n < self.tx.input.len() => TxState::HashingInputs(n),
            _ => TxState::HashingOutputs,
        };

        Ok(())
    }

    async fn hash_input_inner(
        &self,
        index: usize,
        record: InputRecord,
        script: &[u8],
    ) -> Result<(), Error> {
        let txin = self.tx.input.get(index).ok_or(Error::MissingSignatureRequest(index))?;
        let chunk_size = self.handle.config().chunk_size;

        debug!("Hashing input {} ({} byte script)", index, script.len());

        if index == 0 {
            let mode = match self.segwit {
                true => StartMode::NewSegwit,
                false => StartMode::NewLegacy,
            };
            let version = self.tx.version.0.to_le_bytes();

            let req = HashInputStartReq::header(mode, &version, self.tx.input.len() as u64);
            self.handle.request::<EmptyResp, _>(req).await?;
        }

        for req in chunks::input_blocks(record, script, txin.sequence.0, chunk_size)? {
            self.handle.request::<EmptyResp, _>(req).await?;
        }

        Ok(())
    }

    /// Hash spending transaction outputs, with an optional change path.
    ///
    /// The final block may block on user confirmation of outputs.
    pub async fn hash_outputs(
        &mut self,
        change_path: Option<&KeyPath>,
    ) -> Result<FinalizeStatus, Error> {
        self.check_state(TxState::HashingOutputs)?;

        let r = self.hash_outputs_inner(change_path).await;
        let status = self.update(r)?;

        self.state = TxState::Signing(0);

        Ok(status)
    }

    async fn hash_outputs_inner(
        &self,
        change_path: Option<&KeyPath>,
    ) -> Result<FinalizeStatus, Error> {
        let reqs = chunks::output_blocks(&self.tx, change_path, self.handle.config().chunk_size)?;

        debug!("Hashing {} outputs ({} blocks)", self.tx.output.len(), reqs.len());

        let mut status = FinalizeStatus::Ready;
        for r in reqs {
            let last = r.block == FinalizeBlock::Last;
            let resp = self.handle.request::<HashInputFinalizeResp, _>(r).await?;

            if last {
                status = resp.status;
            }
        }

        debug!("Outputs hashed (status: {:?})", status);

        Ok(status)
    }

    /// Sign spending input `index` with the key at `path`
    pub async fn sign(
        &mut self,
        index: usize,
        path: &KeyPath,
        sighash: EcdsaSighashType,
    ) -> Result<DeviceSignature, Error> {
        self.check_state(TxState::Signing(index))?;

        debug!("Signing input {} with path: {}", index, path);

        let req = HashSignReq::new(
            path.clone(),
            self.tx.lock_time.to_consensus_u32(),
            sighash.to_u32() as u8,
        );
        let r = self.handle.request::<DeviceSignature, _>(req).await;
        let signature = self.update(r)?;

        if let Some(s) = self.signatures.get_mut(index) {
            *s = Some(signature.clone());
        }

        self.state = match index + 1 {
            n if n < self.tx.input.len() => TxState::Signing(n),
            _ => TxState::Done,
        };

        Ok(signature)
    }

    /// Complete the session, returning signatures in input order
    pub fn finish(mut self) -> Result<Vec<DeviceSignature>, Error> {
        self.check_state(TxState::Done)?;

        let expected = self.signatures.len();
        let signed = self.signatures.iter().filter(|s| s.is_some()).count();

        self.signatures
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or(Error::IncompleteSigning { signed, expected })
    }

    /// Helper to check state when executing transactions, failing the session on mismatch
    fn check_state(&mut self, expected: TxState) -> Result<(), Error> {
        let r = check_state(self.state, expected);
        self.update(r)
    }

    /// Move to the failed state on error
    fn update<V>(&mut self, r: Result<V, Error>) -> Result<V, Error> {
        if let Err(e) = &r {
            debug!("Transaction session failed in state {}: {}", self.state, e);
            self.state = TxState::Failed;
        }
        r
    }
}

/// Helper to check state when executing transactions
pub(crate) fn check_state(actual: TxState, expected: TxState) -> Result<(), Error> {
    if actual != expected {
        Err(Error::ProtocolSequence { actual, expected })
    } else {
        Ok(())
    }
}

/// Empty response for intermediate blocks
struct EmptyResp;

impl DecodeOwned for EmptyResp {
    type Output = ();
    type Error = ApduError;

    fn decode_owned(buff: &[u8]) -> Result<(Self::Output, usize), Self::Error> {
        Ok(((), buff.len()))
    }
}
