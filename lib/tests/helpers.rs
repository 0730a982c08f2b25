// Copyright (c) 2022-2023 The MobileCoin Foundation

#![allow(dead_code)]

use std::str::FromStr;

use bitcoin::{
    absolute::LockTime,
    ecdsa,
    hashes::Hash,
    script::Instruction as ScriptInstruction,
    secp256k1::{self, Message, Secp256k1},
    sighash::SighashCache,
    transaction::Version,
    Amount, CompressedPublicKey, OutPoint, PubkeyHash, PublicKey, Script, ScriptBuf, Sequence,
    Transaction, TxIn, TxOut, Txid, Witness,
};
use log::LevelFilter;
use simplelog::SimpleLogger;

use ledger_btc::{apdu::prelude::*, DeviceHandle, HandleConfig};
use ledger_btc_sim::{SimConfig, SimDevice};

/// Setup logging and a simulated device, returning the device and a handle to it
pub fn setup(cfg: SimConfig) -> (SimDevice, DeviceHandle<SimDevice>) {
    setup_with_config(cfg, HandleConfig::default())
}

/// Setup logging and a simulated device with the provided handle configuration
pub fn setup_with_config(
    cfg: SimConfig,
    handle_cfg: HandleConfig,
) -> (SimDevice, DeviceHandle<SimDevice>) {
    // Setup logging
    let log_level = match std::env::var("LOG_LEVEL").map(|v| LevelFilter::from_str(&v)) {
        Ok(Ok(l)) => l,
        _ => LevelFilter::Debug,
    };

    let _ = SimpleLogger::init(log_level, simplelog::Config::default());

    let sim = SimDevice::new(cfg);
    let handle = DeviceHandle::with_config(sim.clone(), handle_cfg);

    (sim, handle)
}

pub fn path(s: &str) -> KeyPath {
    KeyPath::try_from(s).expect("invalid key path")
}

pub fn p2pkh(pk: &secp256k1::PublicKey) -> ScriptBuf {
    ScriptBuf::new_p2pkh(&PublicKey::new(*pk).pubkey_hash())
}

pub fn p2wpkh(pk: &secp256k1::PublicKey) -> ScriptBuf {
    ScriptBuf::new_p2wpkh(&CompressedPublicKey(*pk).wpubkey_hash())
}

pub fn p2sh_p2wpkh(pk: &secp256k1::PublicKey) -> ScriptBuf {
    ScriptBuf::new_p2sh(&p2wpkh(pk).script_hash())
}

/// Build a funding transaction paying each `(amount, script)` output
pub fn funding(tag: u8, outputs: &[(u64, ScriptBuf)]) -> Transaction {
    Transaction {
        version: Version::ONE,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint::new(Txid::from_byte_array([tag; 32]), 1),
            // Long enough to span multiple blocks
            script_sig: ScriptBuf::from_bytes(vec![tag; 300]),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        }],
        output: outputs
            .iter()
            .map(|(v, s)| TxOut {
                value: Amount::from_sat(*v),
                script_pubkey: s.clone(),
            })
            .collect(),
    }
}

/// Build a spending transaction for the provided outpoints
pub fn spending(inputs: &[OutPoint], outputs: &[u64]) -> Transaction {
    Transaction {
        version: Version::TWO,
        lock_time: LockTime::from_consensus(800_000),
        input: inputs
            .iter()
            .map(|o| TxIn {
                previous_output: *o,
                script_sig: ScriptBuf::new(),
                sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
                witness: Witness::new(),
            })
            .collect(),
        output: outputs
            .iter()
            .enumerate()
            .map(|(i, v)| TxOut {
                value: Amount::from_sat(*v),
                script_pubkey: ScriptBuf::new_p2pkh(&PubkeyHash::from_byte_array([i as u8; 20])),
            })
            .collect(),
    }
}

/// Verify a P2PKH input signature against the legacy sighash
pub fn verify_legacy(
    tx: &Transaction,
    index: usize,
    script_pubkey: &Script,
    pk: &secp256k1::PublicKey,
) {
    let pushes: Vec<_> = tx.input[index]
        .script_sig
        .instructions()
        .map(|i| match i {
            Ok(ScriptInstruction::PushBytes(b)) => b.as_bytes().to_vec(),
            _ => panic!("unexpected script instruction"),
        })
        .collect();

    assert_eq!(pushes.len(), 2, "expected signature and public key pushes");
    assert_eq!(&pushes[1], &pk.serialize().to_vec());
    assert!(tx.input[index].witness.is_empty());

    let sig = ecdsa::Signature::from_slice(&pushes[0]).expect("invalid signature encoding");
    let h = SighashCache::new(tx)
        .legacy_signature_hash(index, script_pubkey, sig.sighash_type.to_u32())
        .unwrap();

    Secp256k1::verification_only()
        .verify_ecdsa(&Message::from_digest(h.to_byte_array()), &sig.signature, pk)
        .expect("signature verification failed");
}

/// Verify a P2WPKH (native or nested) input signature against the BIP-0143 sighash
pub fn verify_segwit(tx: &Transaction, index: usize, amount: u64, pk: &secp256k1::PublicKey) {
    let w = &tx.input[index].witness;
    assert_eq!(w.len(), 2, "expected signature and public key witness");
    assert_eq!(w.nth(1), Some(&pk.serialize()[..]));

    let sig = ecdsa::Signature::from_slice(w.nth(0).unwrap()).expect("invalid signature encoding");
    let h = SighashCache::new(tx)
        .p2wpkh_signature_hash(index, &p2wpkh(pk), Amount::from_sat(amount), sig.sighash_type)
        .unwrap();

    Secp256k1::verification_only()
        .verify_ecdsa(&Message::from_digest(h.to_byte_array()), &sig.signature, pk)
        .expect("signature verification failed");
}

/// Collapse consecutive repeated instructions, giving the command phases
pub fn phases(instructions: &[u8]) -> Vec<u8> {
    let mut p = instructions.to_vec();
    p.dedup();
    p
}

/// Count commands with the provided instruction
pub fn count(instructions: &[u8], ins: Instruction) -> usize {
    instructions.iter().filter(|i| **i == ins as u8).count()
}
