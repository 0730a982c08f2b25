// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Deterministic key material for the simulated device
//!
//! Keys are derived by hashing the device seed with the derivation path,
//! this is NOT BIP-0032 and is only suitable for testing.

use bitcoin::{
    hashes::{sha256, Hash, HashEngine},
    secp256k1::{ecdsa::Signature, All, Message, PublicKey, Secp256k1, SecretKey},
};

/// Trusted input length
pub const TRUSTED_INPUT_LEN: usize = 56;

/// Trusted input magic
const TRUSTED_INPUT_MAGIC: [u8; 4] = [0x32, 0x00, 0x00, 0x00];

/// Authentication tag length
const TAG_LEN: usize = 8;

/// Seeded key source
pub struct Keys {
    seed: [u8; 32],
    secp: Secp256k1<All>,
}

impl Keys {
    pub fn new(seed: [u8; 32]) -> Self {
        Self {
            seed,
            secp: Secp256k1::new(),
        }
    }

    /// Derive the secret key for a path
    pub fn secret_key(&self, path: &[u32]) -> SecretKey {
        let mut e = sha256::Hash::engine();
        e.input(&self.seed);
        for i in path {
            e.input(&i.to_be_bytes());
        }

        // Rehash until the digest is a valid scalar
        let mut d = sha256::Hash::from_engine(e);
        loop {
            match SecretKey::from_slice(d.as_byte_array()) {
                Ok(k) => return k,
                Err(_) => d = sha256::Hash::hash(d.as_byte_array()),
            }
        }
    }

    /// Derive the public key for a path
    pub fn public_key(&self, path: &[u32]) -> PublicKey {
        PublicKey::from_secret_key(&self.secp, &self.secret_key(path))
    }

    /// Chain code for a path
    pub fn chain_code(&self, path: &[u32]) -> [u8; 32] {
        sha256::Hash::hash(&self.secret_key(path).secret_bytes()).to_byte_array()
    }

    /// Sign a digest with the key for a path
    pub fn sign(&self, path: &[u32], digest: [u8; 32]) -> Signature {
        let m = Message::from_digest(digest);
        self.secp.sign_ecdsa(&m, &self.secret_key(path))
    }

    /// Build an authenticated trusted input for a previous output
    pub fn trusted_input(&self, txid: &[u8; 32], index: u32, amount: u64) -> Vec<u8> {
        let mut b = Vec::with_capacity(TRUSTED_INPUT_LEN);
        b.extend_from_slice(&TRUSTED_INPUT_MAGIC);
        b.extend_from_slice(txid);
        b.extend_from_slice(&index.to_le_bytes());
        b.extend_from_slice(&amount.to_le_bytes());

        let tag = self.tag(&b);
        b.extend_from_slice(&tag);

        b
    }

    /// Check a trusted input was issued by this device, returning the
    /// outpoint (txid, index) and amount
    pub fn open_trusted_input(&self, b: &[u8]) -> Option<([u8; 32], u32, u64)> {
        if b.len() != TRUSTED_INPUT_LEN || b[..4] != TRUSTED_INPUT_MAGIC[..] {
            return None;
        }

        let (body, tag) = b.split_at(TRUSTED_INPUT_LEN - TAG_LEN);
        if self.tag(body).as_slice() != tag {
            return None;
        }

        let mut txid = [0u8; 32];
        txid.copy_from_slice(&body[4..36]);

        let mut index = [0u8; 4];
        index.copy_from_slice(&body[36..40]);

        let mut amount = [0u8; 8];
        amount.copy_from_slice(&body[40..48]);

        Some((txid, u32::from_le_bytes(index), u64::from_le_bytes(amount)))
    }

    fn tag(&self, body: &[u8]) -> [u8; TAG_LEN] {
        let mut e = sha256::Hash::engine();
        e.input(&self.seed);
        e.input(body);

        let h = sha256::Hash::from_engine(e).to_byte_array();

        let mut tag = [0u8; TAG_LEN];
        tag.copy_from_slice(&h[..TAG_LEN]);
        tag
    }
}
