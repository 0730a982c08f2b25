// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Transaction hashing APDUs
//!
//! Inputs of the spending transaction are streamed with [HashInputStartReq],
//! outputs with [HashInputFinalizeReq]. The device maintains a running hash
//! across these calls that is consumed by [HashSignReq][crate::hash_sign::HashSignReq].

use alloc::vec::Vec;

use encdec::{DecodeOwned, Encode};

use super::{
    helpers::{read_varint, varint_len, write_varint},
    trusted_input::BlockKind,
    ApduError, ApduReq, Instruction,
};

/// Transaction context selection for [HashInputStartReq]
#[derive(Copy, Clone, PartialEq, Eq, Debug, num_enum::TryFromPrimitive)]
#[repr(u8)]
pub enum StartMode {
    /// Start a new (legacy) transaction, resetting the hash context
    NewLegacy = 0x00,
    /// Start a new segwit transaction, resetting the hash context
    NewSegwit = 0x02,
    /// Continue the current transaction
    Continue = 0x80,
}

/// Hash input start request block
///
/// The first block (`P1 = 0x00`) carries the transaction version and input count,
/// subsequent blocks (`P1 = 0x80`) carry an [InputHeader] followed by blocks of
/// script and sequence data.
#[derive(Clone, PartialEq, Debug)]
pub struct HashInputStartReq {
    pub block: BlockKind,
    pub mode: StartMode,
    pub data: Vec<u8>,
}

impl HashInputStartReq {
    /// Transaction header block (version and input count)
    pub fn header(mode: StartMode, version: &[u8; 4], input_count: u64) -> Self {
        let mut data = Vec::with_capacity(4 + varint_len(input_count));
        data.extend_from_slice(version);
        write_varint(&mut data, input_count);

        Self {
            block: BlockKind::First,
            mode,
            data,
        }
    }

    /// Input header or script data block, these always carry `P2 = 0x00`
    pub fn next(data: Vec<u8>) -> Self {
        Self {
            block: BlockKind::Next,
            mode: StartMode::Continue,
            data,
        }
    }
}

impl ApduReq for HashInputStartReq {
    const INS: Instruction = Instruction::HashInputStart;

    fn p1(&self) -> u8 {
        self.block as u8
    }

    fn p2(&self) -> u8 {
        match self.block {
            BlockKind::First => self.mode as u8,
            BlockKind::Next => 0x00,
        }
    }

    fn decode_req(p1: u8, p2: u8, data: &[u8]) -> Result<Self, ApduError> {
        let block = BlockKind::try_from(p1).map_err(|_| ApduError::InvalidParameter)?;

        let mode = match block {
            BlockKind::First => StartMode::try_from(p2).map_err(|_| ApduError::InvalidParameter)?,
            BlockKind::Next => StartMode::Continue,
        };

        Ok(Self {
            block,
            mode,
            data: data.to_vec(),
        })
    }
}

impl Encode for HashInputStartReq {
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

/// Input reference supplied to the device while hashing
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum InputRecord {
    /// Trusted input blob, as returned by the device
    Trusted(Vec<u8>),
    /// Raw previous output (segwit), outpoint and amount
    Segwit { outpoint: [u8; 36], amount: u64 },
}

impl InputRecord {
    const TRUSTED: u8 = 0x01;
    const SEGWIT: u8 = 0x02;
}

/// Input header block, an [InputRecord] followed by the script length
///
/// ## Encoding
/// ```text
/// Trusted:  | 0x01 | BLOB_LEN (u8) | BLOB ... | SCRIPT_LEN (varint) |
/// Segwit:   | 0x02 | OUTPOINT (36) | AMOUNT (u64 LE) | SCRIPT_LEN (varint) |
/// ```
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct InputHeader {
    pub record: InputRecord,
    pub script_len: u64,
}

impl Encode for InputHeader {
    type Error = ApduError;

    fn encode_len(&self) -> Result<usize, Self::Error> {
        let n = match &self.record {
            InputRecord::Trusted(t) => 2 + t.len(),
            InputRecord::Segwit { .. } => 1 + 36 + 8,
        };

        Ok(n + varint_len(self.script_len))
    }

    fn encode(&self, buff: &mut [u8]) -> Result<usize, Self::Error> {
        let mut b = Vec::with_capacity(self.encode_len()?);

        match &self.record {
            InputRecord::Trusted(t) => {
                if t.len() > 0xff {
                    return Err(ApduError::InvalidLength);
                }
                b.push(InputRecord::TRUSTED);
                b.push(t.len() as u8);
                b.extend_from_slice(t);
            }
            InputRecord::Segwit { outpoint, amount } => {
                b.push(InputRecord::SEGWIT);
                b.extend_from_slice(outpoint);
                b.extend_from_slice(&amount.to_le_bytes());
            }
        }
        write_varint(&mut b, self.script_len);

        if buff.len() < b.len() {
            return Err(ApduError::InvalidLength);
        }
        buff[..b.len()].copy_from_slice(&b);

        Ok(b.len())
    }
}

impl DecodeOwned for InputHeader {
    type Output = Self;
    type Error = ApduError;

    fn decode_owned(buff: &[u8]) -> Result<(Self::Output, usize), Self::Error> {
        let (record, n) = match buff.first() {
            Some(&InputRecord::TRUSTED) => {
                let len = *buff.get(1).ok_or(ApduError::InvalidLength)? as usize;
                let t = buff.get(2..2 + len).ok_or(ApduError::InvalidLength)?;
                (InputRecord::Trusted(t.to_vec()), 2 + len)
            }
            Some(&InputRecord::SEGWIT) => {
                let b = buff.get(1..45).ok_or(ApduError::InvalidLength)?;

                let mut outpoint = [0u8; 36];
                outpoint.copy_from_slice(&b[..36]);

                let mut amount = [0u8; 8];
                amount.copy_from_slice(&b[36..]);

                let amount = u64::from_le_bytes(amount);
                (InputRecord::Segwit { outpoint, amount }, 45)
            }
            Some(_) => return Err(ApduError::InvalidEncoding),
            None => return Err(ApduError::InvalidLength),
        };

        let (script_len, m) = read_varint(&buff[n..])?;

        Ok((Self { record, script_len }, n + m))
    }
}

/// Output block kind for [HashInputFinalizeReq]
#[derive(Copy, Clone, PartialEq, Eq, Debug, num_enum::TryFromPrimitive)]
#[repr(u8)]
pub enum FinalizeBlock {
    /// More output data follows
    More = 0x00,
    /// Final block of output data
    Last = 0x80,
    /// Change derivation path, sent prior to output data
    ChangePath = 0xff,
}

/// Hash input finalize request block, streaming serialised outputs
#[derive(Clone, PartialEq, Debug)]
pub struct HashInputFinalizeReq {
    pub block: FinalizeBlock,
    pub data: Vec<u8>,
}

impl HashInputFinalizeReq {
    pub fn new(block: FinalizeBlock, data: Vec<u8>) -> Self {
        Self { block, data }
    }
}

impl ApduReq for HashInputFinalizeReq {
    const INS: Instruction = Instruction::HashInputFinalizeFull;

    /// The final block may await on-device confirmation of outputs
    const CONFIRMABLE: bool = true;

    fn p1(&self) -> u8 {
        self.block as u8
    }

    fn decode_req(p1: u8, _p2: u8, data: &[u8]) -> Result<Self, ApduError> {
        Ok(Self {
            block: FinalizeBlock::try_from(p1).map_err(|_| ApduError::InvalidParameter)?,
            data: data.to_vec(),
        })
    }
}

impl Encode for HashInputFinalizeReq {
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

/// Continuation signal from the final [HashInputFinalizeReq] block
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum FinalizeStatus {
    /// Device is ready to sign
    Ready,
    /// Device requests further user confirmation before signing
    ConfirmationRequested,
}

/// Hash input finalize response
///
/// Intermediate blocks return an empty payload (decoded as [FinalizeStatus::Ready]),
/// the last block returns `| CONFIRMATION (u8) | RESERVED (u8) |`.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct HashInputFinalizeResp {
    pub status: FinalizeStatus,
}

impl Encode for HashInputFinalizeResp {
    type Error = ApduError;

    fn encode_len(&self) -> Result<usize, Self::Error> {
        Ok(2)
    }

    fn encode(&self, buff: &mut [u8]) -> Result<usize, Self::Error> {
        if buff.len() < 2 {
            return Err(ApduError::InvalidLength);
        }

        buff[0] = match self.status {
            FinalizeStatus::Ready => 0x00,
            FinalizeStatus::ConfirmationRequested => 0x01,
        };
        buff[1] = 0x00;

        Ok(2)
    }
}

impl DecodeOwned for HashInputFinalizeResp {
    type Output = Self;
    type Error = ApduError;

    fn decode_owned(buff: &[u8]) -> Result<(Self::Output, usize), Self::Error> {
        let status = match buff.first() {
            None | Some(0x00) => FinalizeStatus::Ready,
            Some(_) => FinalizeStatus::ConfirmationRequested,
        };

        Ok((Self { status }, buff.len()))
    }
}

#[cfg(test)]
mod test {
    use alloc::vec;

    use super::*;
    use crate::test::{encode_decode_req, encode_decode_resp};

    #[test]
    fn hash_input_header_block() {
        let req = HashInputStartReq::header(StartMode::NewSegwit, &[2, 0, 0, 0], 3);

        let c = encode_decode_req(&req);
        assert_eq!((c.p1, c.p2), (0x00, 0x02));
        assert_eq!(&c.data, &[2, 0, 0, 0, 3]);
    }

    #[test]
    fn hash_input_record_block() {
        let req = HashInputStartReq::next(vec![0x76, 0xa9, 0xff, 0xff, 0xff, 0xff]);

        let c = encode_decode_req(&req);
        assert_eq!((c.p1, c.p2), (0x80, 0x00));
    }

    #[test]
    fn trusted_input_header() {
        let h = InputHeader {
            record: InputRecord::Trusted(vec![0x32; 56]),
            script_len: 25,
        };

        let mut buff = [0u8; 64];
        let n = h.encode(&mut buff).unwrap();

        assert_eq!(n, 1 + 1 + 56 + 1);
        assert_eq!(&buff[..2], &[0x01, 56]);
        assert_eq!(InputHeader::decode_owned(&buff[..n]), Ok((h, n)));
    }

    #[test]
    fn segwit_input_header() {
        let h = InputHeader {
            record: InputRecord::Segwit {
                outpoint: [0xab; 36],
                amount: 110_000_000,
            },
            script_len: 0x1_0000,
        };

        let mut buff = [0u8; 64];
        let n = h.encode(&mut buff).unwrap();

        assert_eq!(n, 45 + 5);
        assert_eq!(buff[0], 0x02);
        assert_eq!(&buff[37..45], &110_000_000u64.to_le_bytes());
        assert_eq!(InputHeader::decode_owned(&buff[..n]), Ok((h, n)));
    }

    #[test]
    fn unknown_input_marker() {
        assert_eq!(
            InputHeader::decode_owned(&[0x07, 0x00]),
            Err(ApduError::InvalidEncoding)
        );
    }

    #[test]
    fn finalize_blocks() {
        let c = encode_decode_req(&HashInputFinalizeReq::new(FinalizeBlock::Last, vec![1, 2]));
        assert_eq!(c.p1, 0x80);

        let c = encode_decode_req(&HashInputFinalizeReq::new(FinalizeBlock::ChangePath, vec![]));
        assert_eq!(c.p1, 0xff);
    }

    #[test]
    fn finalize_status() {
        let r = HashInputFinalizeResp {
            status: FinalizeStatus::ConfirmationRequested,
        };
        encode_decode_resp(&r);

        assert_eq!(
            HashInputFinalizeResp::decode_owned(&[]).unwrap().0.status,
            FinalizeStatus::Ready
        );
    }
}
