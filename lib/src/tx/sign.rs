// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Transaction signing, running a complete [TransactionHandle] session

use std::collections::HashMap;

use bitcoin::{consensus::serialize, ecdsa, secp256k1, OutPoint, Transaction};
use log::{debug, info};

use ledger_btc_apdu::prelude::*;

use super::{
    script::{apply_signature, p2pkh_script_code, SpendKind},
    Coin, SignOptions, SignatureRequest, TransactionHandle,
};
use crate::{transport::Transport, DeviceHandle, Error};

impl<T: Transport> DeviceHandle<T> {
    /// Sign a spending transaction, returning a signed copy.
    ///
    /// Each input of `spending` requires exactly one matching request.
    /// Requests with a previous transaction are signed using trusted inputs,
    /// if any request lacks one the session hashes inputs in segwit mode.
    /// `spending` is never modified, on failure no signatures are returned.
    pub async fn sign_transaction(
        &self,
        requests: &[SignatureRequest],
        spending: &Transaction,
        change_path: Option<&KeyPath>,
        opts: &SignOptions,
    ) -> Result<Transaction, Error> {
        // Resolve requests prior to any device interaction
        let plan = match_requests(requests, spending)?;

        if spending.input.is_empty() {
            return Ok(spending.clone());
        }

        if let Some(coin) = opts.expected_coin {
            self.check_coin(coin).await?;
        }

        // Public keys are fetched once per derivation path
        let mut keys = HashMap::<KeyPath, secp256k1::PublicKey>::new();
        for r in requests {
            if !keys.contains_key(&r.key_path) {
                let k = self.public_key(&r.key_path).await?;
                keys.insert(r.key_path.clone(), k);
            }
        }

        let segwit = requests.iter().any(|r| r.input_transaction.is_none());

        let session = self.transaction(spending, segwit).await;

        let signatures = run_session(session, requests, &plan, &keys, change_path, opts).await?;

        // Assemble on a copy once every input is signed
        let mut signed = spending.clone();
        for (i, (r, s)) in plan.iter().map(|n| &requests[*n]).zip(signatures).enumerate() {
            let signature = ecdsa::Signature {
                signature: secp256k1::ecdsa::Signature::from_der(&s.der)
                    .map_err(|_| Error::InvalidSignature)?,
                sighash_type: opts.sighash,
            };
            let public_key = keys.get(&r.key_path).ok_or(Error::InvalidPublicKey)?;
            let kind = SpendKind::from_script(&r.input_coin.txout.script_pubkey);

            debug!("Applying {} signature to input {}", kind, i);

            apply_signature(&mut signed.input[i], kind, &signature, public_key)?;
        }

        info!(
            "Signed transaction {} ({} inputs)",
            signed.compute_txid(),
            signed.input.len()
        );

        Ok(signed)
    }

    /// Sign a spending transaction where every input is controlled by the key at `key_path`.
    ///
    /// Coins with a matching funding transaction are signed as legacy inputs,
    /// others as segwit inputs.
    pub async fn sign_transaction_with_coins(
        &self,
        key_path: &KeyPath,
        coins: &[Coin],
        funding: &[Transaction],
        spending: &Transaction,
        change_path: Option<&KeyPath>,
        opts: &SignOptions,
    ) -> Result<Transaction, Error> {
        let requests: Vec<_> = coins
            .iter()
            .map(|c| SignatureRequest {
                input_coin: c.clone(),
                input_transaction: funding
                    .iter()
                    .find(|t| t.compute_txid() == c.outpoint.txid)
                    .cloned(),
                key_path: key_path.clone(),
            })
            .collect();

        self.sign_transaction(&requests, spending, change_path, opts).await
    }
}

/// Drive a session through hashing and signing, returning signatures in input order
async fn run_session<T: Transport>(
    mut session: TransactionHandle<T>,
    requests: &[SignatureRequest],
    plan: &[usize],
    keys: &HashMap<KeyPath, secp256k1::PublicKey>,
    change_path: Option<&KeyPath>,
    opts: &SignOptions,
) -> Result<Vec<DeviceSignature>, Error> {
    // Trusted inputs in request order
    let previous: Vec<_> = requests
        .iter()
        .filter_map(|r| {
            r.input_transaction
                .as_ref()
                .map(|t| (t, r.input_coin.outpoint.vout))
        })
        .collect();
    let mut trusted = session.collect_trusted_inputs(&previous).await?.into_iter();

    let mut records: Vec<Option<TrustedInput>> = requests
        .iter()
        .map(|r| match r.input_transaction {
            Some(_) => trusted.next(),
            None => None,
        })
        .collect();

    for (i, n) in plan.iter().enumerate() {
        let r = &requests[*n];
        let k = keys.get(&r.key_path).ok_or(Error::InvalidPublicKey)?;

        let record = match records[*n].take() {
            Some(t) => InputRecord::Trusted(t.as_bytes().to_vec()),
            None => InputRecord::Segwit {
                outpoint: outpoint_bytes(&r.input_coin.outpoint),
                amount: r.input_coin.txout.value.to_sat(),
            },
        };

        // Segwit digests commit to the P2PKH script code for the signing key
        let script = match session.is_segwit() {
            true => p2pkh_script_code(k),
            false => r.input_coin.txout.script_pubkey.clone(),
        };

        session.hash_input(i, record, script.as_bytes()).await?;
    }

    session.hash_outputs(change_path).await?;

    for (i, n) in plan.iter().enumerate() {
        session.sign(i, &requests[*n].key_path, opts.sighash).await?;
    }

    session.finish()
}

/// Match each spending input to its request, returning request indices in input order
pub(crate) fn match_requests(
    requests: &[SignatureRequest],
    spending: &Transaction,
) -> Result<Vec<usize>, Error> {
    let mut by_outpoint = HashMap::<OutPoint, usize>::new();

    for (i, r) in requests.iter().enumerate() {
        if let Some(t) = &r.input_transaction {
            if t.compute_txid() != r.input_coin.outpoint.txid {
                return Err(Error::PreviousTransactionMismatch(i));
            }
        }

        if by_outpoint.insert(r.input_coin.outpoint, i).is_some() {
            return Err(Error::UnknownSignatureRequest(i));
        }
    }

    let plan = spending
        .input
        .iter()
        .enumerate()
        .map(|(i, txin)| {
            by_outpoint
                .remove(&txin.previous_output)
                .ok_or(Error::MissingSignatureRequest(i))
        })
        .collect::<Result<Vec<_>, _>>()?;

    // Requests not consumed by an input
    if let Some(i) = by_outpoint.into_values().min() {
        return Err(Error::UnknownSignatureRequest(i));
    }

    Ok(plan)
}

fn outpoint_bytes(o: &OutPoint) -> [u8; 36] {
    let mut b = [0u8; 36];
    b.copy_from_slice(&serialize(o));
    b
}

#[cfg(test)]
mod test {
    use bitcoin::{
        absolute::LockTime, transaction::Version, Amount, ScriptBuf, Sequence, TxIn, TxOut,
        Witness,
    };

    use super::*;

    fn funding() -> Transaction {
        Transaction {
            version: Version::ONE,
            lock_time: LockTime::ZERO,
            input: vec![TxIn::default()],
            output: (1..=3)
                .map(|i| TxOut {
                    value: Amount::from_sat(i * 100_000),
                    script_pubkey: ScriptBuf::new(),
                })
                .collect(),
        }
    }

    fn spending(f: &Transaction, vouts: &[u32]) -> Transaction {
        Transaction {
            version: Version::ONE,
            lock_time: LockTime::from_consensus(1),
            input: vouts
                .iter()
                .map(|v| TxIn {
                    previous_output: OutPoint::new(f.compute_txid(), *v),
                    script_sig: ScriptBuf::new(),
                    sequence: Sequence::MAX,
                    witness: Witness::new(),
                })
                .collect(),
            output: vec![],
        }
    }

    fn requests(f: &Transaction, vouts: &[u32]) -> Vec<SignatureRequest> {
        vouts
            .iter()
            .map(|v| SignatureRequest::legacy(f, *v, KeyPath::try_from("1'/0").unwrap()).unwrap())
            .collect()
    }

    #[test]
    fn match_in_input_order() {
        let f = funding();

        let plan = match_requests(&requests(&f, &[2, 0, 1]), &spending(&f, &[0, 1, 2])).unwrap();
        assert_eq!(plan, vec![1, 2, 0]);
    }

    #[test]
    fn missing_request() {
        let f = funding();

        assert!(matches!(
            match_requests(&requests(&f, &[0, 2]), &spending(&f, &[0, 1, 2])),
            Err(Error::MissingSignatureRequest(1))
        ));
    }

    #[test]
    fn unknown_request() {
        let f = funding();

        assert!(matches!(
            match_requests(&requests(&f, &[0, 1, 2]), &spending(&f, &[0, 2])),
            Err(Error::UnknownSignatureRequest(1))
        ));

        // Duplicate requests for a single input
        assert!(matches!(
            match_requests(&requests(&f, &[0, 0]), &spending(&f, &[0])),
            Err(Error::UnknownSignatureRequest(1))
        ));
    }

    #[test]
    fn previous_transaction_mismatch() {
        let f = funding();
        let mut r = requests(&f, &[0]);
        r[0].input_transaction = Some(spending(&f, &[1]));

        assert!(matches!(
            match_requests(&r, &spending(&f, &[0])),
            Err(Error::PreviousTransactionMismatch(0))
        ));
    }
}
