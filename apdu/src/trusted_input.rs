// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Trusted input APDUs
//!
//! A previous transaction is streamed to the device in blocks, the final
//! block (carrying the lock time) returns an opaque device-attested
//! [TrustedInput] for the selected output. Block boundaries follow the
//! transaction structure, see `ledger_btc::tx::chunks` for the host side.

use alloc::vec::Vec;

use encdec::{DecodeOwned, Encode};

use super::{ApduError, ApduReq, Instruction};

/// Position of a block within a streamed transaction
#[derive(Copy, Clone, PartialEq, Eq, Debug, num_enum::TryFromPrimitive)]
#[repr(u8)]
pub enum BlockKind {
    /// First block, resets device state
    First = 0x00,
    /// Subsequent block
    Next = 0x80,
}

/// Trusted input request block
///
/// ## Encoding (first block)
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                     OUTPUT_INDEX (u32 BE)                     |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// /                 TRANSACTION DATA (raw, LE fields)             /
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// Subsequent blocks carry transaction data only.
#[derive(Clone, PartialEq, Debug)]
pub struct TrustedInputReq {
    pub block: BlockKind,
    pub data: Vec<u8>,
}

impl TrustedInputReq {
    /// Create the first block for the provided output index
    pub fn first(output_index: u32, tx_data: &[u8]) -> Self {
        let mut data = Vec::with_capacity(4 + tx_data.len());
        data.extend_from_slice(&output_index.to_be_bytes());
        data.extend_from_slice(tx_data);

        Self {
            block: BlockKind::First,
            data,
        }
    }

    /// Create a subsequent block
    pub fn next(tx_data: &[u8]) -> Self {
        Self {
            block: BlockKind::Next,
            data: tx_data.to_vec(),
        }
    }

    /// Output index, for first blocks
    pub fn output_index(&self) -> Option<u32> {
        match (self.block, self.data.get(..4)) {
            (BlockKind::First, Some(b)) => Some(u32::from_be_bytes([b[0], b[1], b[2], b[3]])),
            _ => None,
        }
    }

    /// Transaction data carried by this block
    pub fn tx_data(&self) -> &[u8] {
        match self.block {
            BlockKind::First => self.data.get(4..).unwrap_or(&[]),
            BlockKind::Next => &self.data,
        }
    }
}

impl ApduReq for TrustedInputReq {
    const INS: Instruction = Instruction::GetTrustedInput;

    fn p1(&self) -> u8 {
        self.block as u8
    }

    fn decode_req(p1: u8, _p2: u8, data: &[u8]) -> Result<Self, ApduError> {
        let block = BlockKind::try_from(p1).map_err(|_| ApduError::InvalidParameter)?;
        if block == BlockKind::First && data.len() < 4 {
            return Err(ApduError::InvalidLength);
        }

        Ok(Self {
            block,
            data: data.to_vec(),
        })
    }
}

impl Encode for TrustedInputReq {
    type Error = ApduError;

    fn encode_len(&self) -> Result<usize, Self::Error> {
        Ok(self.data.len())
    }

    fn encode(&self, buff: &mut [u8]) -> Result<usize, Self::Error> {
        if buff.len() < self.data.len() {
            return Err(ApduError::InvalidLength);
        }

        buff[..self.data.len()].copy_from_slice(&self.data);

        Ok(self.data.len())
    }
}

/// Opaque device-attested reference to a previous output.
///
/// This is replayed verbatim to the device and must never be interpreted by the host.
#[derive(Clone, PartialEq, Eq)]
pub struct TrustedInput(Vec<u8>);

impl TrustedInput {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for TrustedInput {
    fn from(v: Vec<u8>) -> Self {
        Self(v)
    }
}

impl AsRef<[u8]> for TrustedInput {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl core::fmt::Debug for TrustedInput {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "TrustedInput({:02x?})", self.0)
    }
}

impl Encode for TrustedInput {
    type Error = ApduError;

    fn encode_len(&self) -> Result<usize, Self::Error> {
        Ok(self.0.len())
    }

    fn encode(&self, buff: &mut [u8]) -> Result<usize, Self::Error> {
        if buff.len() < self.0.len() {
            return Err(ApduError::InvalidLength);
        }

        buff[..self.0.len()].copy_from_slice(&self.0);

        Ok(self.0.len())
    }
}

/// Intermediate blocks return an empty payload, the final block the [TrustedInput]
impl DecodeOwned for TrustedInput {
    type Output = Self;
    type Error = ApduError;

    fn decode_owned(buff: &[u8]) -> Result<(Self::Output, usize), Self::Error> {
        Ok((Self(buff.to_vec()), buff.len()))
    }
}

#[cfg(test)]
mod test {
    use alloc::vec;

    use super::*;
    use crate::test::encode_decode_req;

    #[test]
    fn trusted_input_first_block() {
        let req = TrustedInputReq::first(2, &[0x01, 0x00, 0x00, 0x00, 0x01]);

        let c = encode_decode_req(&req);
        assert_eq!(c.p1, 0x00);
        assert_eq!(&c.data[..4], &[0, 0, 0, 2]);

        assert_eq!(req.output_index(), Some(2));
        assert_eq!(req.tx_data(), &[0x01, 0x00, 0x00, 0x00, 0x01]);
    }

    #[test]
    fn trusted_input_next_block() {
        let req = TrustedInputReq::next(&[0xaa; 40]);

        let c = encode_decode_req(&req);
        assert_eq!(c.p1, 0x80);
        assert_eq!(req.output_index(), None);
        assert_eq!(req.tx_data().len(), 40);
    }

    #[test]
    fn trusted_input_opaque() {
        let blob = vec![0x32, 0x00, 0xde, 0xad];
        let (t, n) = TrustedInput::decode_owned(&blob).unwrap();

        assert_eq!(n, 4);
        assert_eq!(t.as_bytes(), &blob[..]);
    }
}
