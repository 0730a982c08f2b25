// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Signature script and witness assembly

use bitcoin::{
    ecdsa,
    script::{Builder, PushBytesBuf},
    secp256k1, CompressedPublicKey, PublicKey, Script, ScriptBuf, TxIn, Witness,
};

use crate::Error;

/// Output type of a spent coin, selecting signature placement
#[derive(Copy, Clone, Debug, PartialEq, Eq, strum::Display)]
pub enum SpendKind {
    /// Pay to public key hash, signature in the input script
    Legacy,
    /// Pay to witness public key hash nested in pay to script hash
    NestedSegwit,
    /// Pay to witness public key hash
    NativeSegwit,
}

impl SpendKind {
    /// Classify a previous output script
    pub fn from_script(script_pubkey: &Script) -> Self {
        if script_pubkey.is_p2wpkh() {
            SpendKind::NativeSegwit
        } else if script_pubkey.is_p2sh() {
            SpendKind::NestedSegwit
        } else {
            SpendKind::Legacy
        }
    }
}

/// Script code committed to when hashing segwit inputs
pub fn p2pkh_script_code(public_key: &secp256k1::PublicKey) -> ScriptBuf {
    ScriptBuf::new_p2pkh(&PublicKey::new(*public_key).pubkey_hash())
}

/// Place a signature and public key into an input of the spending transaction
pub fn apply_signature(
    txin: &mut TxIn,
    kind: SpendKind,
    signature: &ecdsa::Signature,
    public_key: &secp256k1::PublicKey,
) -> Result<(), Error> {
    let sig = signature.to_vec();
    let key = CompressedPublicKey(*public_key);

    match kind {
        SpendKind::Legacy => {
            txin.script_sig = Builder::new()
                .push_slice(push_bytes(sig)?)
                .push_key(&PublicKey::new(*public_key))
                .into_script();
        }
        SpendKind::NestedSegwit => {
            let redeem_script = ScriptBuf::new_p2wpkh(&key.wpubkey_hash());

            txin.script_sig = Builder::new()
                .push_slice(push_bytes(redeem_script.into_bytes())?)
                .into_script();
            txin.witness = Witness::from_slice(&[sig, key.to_bytes().to_vec()]);
        }
        SpendKind::NativeSegwit => {
            txin.script_sig = ScriptBuf::new();
            txin.witness = Witness::from_slice(&[sig, key.to_bytes().to_vec()]);
        }
    }

    Ok(())
}

fn push_bytes(b: Vec<u8>) -> Result<PushBytesBuf, Error> {
    PushBytesBuf::try_from(b).map_err(|_| Error::Script)
}
