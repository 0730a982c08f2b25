// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Signing request types

use bitcoin::{sighash::EcdsaSighashType, OutPoint, Transaction, TxOut};

use ledger_btc_apdu::prelude::{CoinId, KeyPath};

use crate::Error;

/// Previous output being spent
#[derive(Clone, Debug, PartialEq)]
pub struct Coin {
    pub outpoint: OutPoint,
    pub txout: TxOut,
}

impl Coin {
    pub fn new(outpoint: OutPoint, txout: TxOut) -> Self {
        Self { outpoint, txout }
    }

    /// Fetch the coin for output `vout` of a funding transaction
    pub fn from_tx(tx: &Transaction, vout: u32) -> Result<Self, Error> {
        let txout = tx
            .output
            .get(vout as usize)
            .ok_or(Error::MissingOutput(vout))?;

        Ok(Self {
            outpoint: OutPoint::new(tx.compute_txid(), vout),
            txout: txout.clone(),
        })
    }
}

/// Request to sign a single input of a spending transaction.
///
/// Requests carrying the previous transaction are signed via device-attested
/// trusted inputs, requests without one are signed as segwit inputs from the
/// coin amount alone.
#[derive(Clone, Debug, PartialEq)]
pub struct SignatureRequest {
    /// Output being spent
    pub input_coin: Coin,
    /// Transaction containing `input_coin`, required for legacy inputs
    pub input_transaction: Option<Transaction>,
    /// Derivation path of the key controlling `input_coin`
    pub key_path: KeyPath,
}

impl SignatureRequest {
    /// Create a legacy signing request for output `vout` of `tx`
    pub fn legacy(tx: &Transaction, vout: u32, key_path: KeyPath) -> Result<Self, Error> {
        Ok(Self {
            input_coin: Coin::from_tx(tx, vout)?,
            input_transaction: Some(tx.clone()),
            key_path,
        })
    }

    /// Create a segwit signing request for a coin
    pub fn segwit(input_coin: Coin, key_path: KeyPath) -> Self {
        Self {
            input_coin,
            input_transaction: None,
            key_path,
        }
    }
}

/// Transaction signing options
#[derive(Clone, Debug, PartialEq)]
pub struct SignOptions {
    /// Signature hash type requested for every input
    pub sighash: EcdsaSighashType,

    /// Check the device is configured for this coin prior to signing
    pub expected_coin: Option<CoinId>,
}

impl Default for SignOptions {
    fn default() -> Self {
        Self {
            sighash: EcdsaSighashType::All,
            expected_coin: None,
        }
    }
}
