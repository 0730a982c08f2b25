// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Protocol / APDU definitions for Bitcoin hardware wallet communication
//!
//! This crate provides typed builders and parsers for each command understood by
//! the Bitcoin application on Ledger-style devices (the `btchip` command set).
//! Each request implements [ApduReq] (header parameters + [Encode] payload) and
//! each response implements [DecodeOwned], so the same definitions are shared by
//! the host library and the simulated device.
//!
//! Unlike most of the rest of the world these encodings are big-endian for
//! header fields and derivation indices, and little-endian wherever raw
//! transaction fields (amounts, versions, sequences) are embedded.
//!

#![no_std]

extern crate alloc;

use core::fmt::Debug;

pub use encdec::{DecodeOwned, Encode};

pub mod coin_version;
pub mod command;
pub mod firmware;
pub mod hash_input;
pub mod hash_sign;
pub mod path;
pub mod prelude;
pub mod trusted_input;
pub mod wallet_keys;

mod helpers;
pub use helpers::{read_varint, varint_len, write_varint};

/// Bitcoin APDU class
pub const BTC_APDU_CLA: u8 = 0xe0;

/// Maximum APDU payload length (single byte `Lc`)
pub const MAX_APDU_DATA: usize = 255;

/// Bitcoin application instruction codes
#[derive(Copy, Clone, Debug, PartialEq, Eq, num_enum::TryFromPrimitive, strum::Display)]
#[repr(u8)]
pub enum Instruction {
    /// Fetch coin version / family configured in the application
    GetCoinVersion = 0x16,

    /// Fetch the public key (and address, chain code) for a derivation path
    GetWalletPublicKey = 0x40,

    /// Stream a previous transaction to obtain a trusted input
    GetTrustedInput = 0x42,

    /// Start (or continue) hashing transaction inputs
    HashInputStart = 0x44,

    /// Request a signature for the active input
    HashSign = 0x48,

    /// Stream transaction outputs, finalising the input hash
    HashInputFinalizeFull = 0x4a,

    /// Fetch firmware version information
    GetFirmwareVersion = 0xc4,
}

/// APDU encoding / decoding errors
#[derive(Copy, Clone, Debug, PartialEq, Eq, strum::Display)]
pub enum ApduError {
    /// Buffer too short or payload exceeds limits
    InvalidLength,

    /// Invalid field encoding
    InvalidEncoding,

    /// Invalid UTF8 string
    InvalidUtf8,

    /// Unexpected instruction for this request type
    InvalidInstruction,

    /// Unrecognised header parameter
    InvalidParameter,

    /// Malformed derivation path
    InvalidKeyPath,
}

impl From<encdec::Error> for ApduError {
    fn from(e: encdec::Error) -> Self {
        match e {
            encdec::Error::Length => ApduError::InvalidLength,
            #[allow(unreachable_patterns)]
            _ => ApduError::InvalidEncoding,
        }
    }
}

/// Request APDU, combining header parameters and an encodable payload
pub trait ApduReq: Encode<Error = ApduError> + Debug + Sized {
    /// Instruction code for this request
    const INS: Instruction;

    /// Set where the device may prompt the user (and the user may refuse)
    const CONFIRMABLE: bool = false;

    /// First header parameter
    fn p1(&self) -> u8 {
        0x00
    }

    /// Second header parameter
    fn p2(&self) -> u8 {
        0x00
    }

    /// Rebuild a request from header parameters and payload
    fn decode_req(p1: u8, p2: u8, data: &[u8]) -> Result<Self, ApduError>;
}
