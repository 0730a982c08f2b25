// Copyright (c) 2022-2023 The MobileCoin Foundation

use bitcoin::{consensus::deserialize, Transaction};

use ledger_btc::apdu::prelude::KeyPath;

/// Parse a BIP-0032 derivation path (eg. `44'/0'/0'/0/0`)
pub fn parse_path(s: &str) -> Result<KeyPath, String> {
    s.parse::<KeyPath>()
        .map_err(|e| format!("invalid derivation path '{s}': {e}"))
}

/// Parse a hex encoded transaction
pub fn parse_tx(s: &str) -> Result<Transaction, String> {
    let b = hex::decode(s.trim()).map_err(|e| format!("invalid hex: {e}"))?;

    deserialize::<Transaction>(&b).map_err(|e| format!("invalid transaction: {e}"))
}
