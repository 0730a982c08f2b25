// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Bitcoin `CompactSize` helpers for payloads that embed raw transaction fields

use alloc::vec::Vec;

use crate::ApduError;

/// Append a `CompactSize` encoded value to the provided buffer
pub fn write_varint(buff: &mut Vec<u8>, v: u64) {
    match v {
        0..=0xfc => buff.push(v as u8),
        0xfd..=0xffff => {
            buff.push(0xfd);
            buff.extend_from_slice(&(v as u16).to_le_bytes());
        }
        0x1_0000..=0xffff_ffff => {
            buff.push(0xfe);
            buff.extend_from_slice(&(v as u32).to_le_bytes());
        }
        _ => {
            buff.push(0xff);
            buff.extend_from_slice(&v.to_le_bytes());
        }
    }
}

/// Compute the encoded length of a `CompactSize` value
pub fn varint_len(v: u64) -> usize {
    match v {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}

/// Read a `CompactSize` value, returning the value and bytes consumed
pub fn read_varint(buff: &[u8]) -> Result<(u64, usize), ApduError> {
    let first = *buff.first().ok_or(ApduError::InvalidLength)?;

    let n = match first {
        0xfd => 2,
        0xfe => 4,
        0xff => 8,
        v => return Ok((v as u64, 1)),
    };

    if buff.len() < 1 + n {
        return Err(ApduError::InvalidLength);
    }

    let mut b = [0u8; 8];
    b[..n].copy_from_slice(&buff[1..][..n]);

    Ok((u64::from_le_bytes(b), 1 + n))
}
