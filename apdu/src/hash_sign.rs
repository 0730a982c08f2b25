// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Hash sign APDUs, requesting a signature over the active input

use alloc::vec::Vec;

use encdec::{DecodeOwned, Encode};

use super::{path::KeyPath, ApduError, ApduReq, Instruction};

/// Hash sign request APDU
///
/// ## Encoding
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// /                     KEY_PATH (see [KeyPath])                  /
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// | USER_PIN_LEN  |               LOCK_TIME (u32 BE)              |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |   SIGHASH     |
/// +-+-+-+-+-+-+-+-+
/// ```
///
/// `USER_PIN_LEN` is always zero (second factor validation is not supported).
#[derive(Clone, PartialEq, Debug)]
pub struct HashSignReq {
    pub path: KeyPath,
    pub lock_time: u32,
    pub sighash: u8,
}

impl HashSignReq {
    pub fn new(path: KeyPath, lock_time: u32, sighash: u8) -> Self {
        Self {
            path,
            lock_time,
            sighash,
        }
    }
}

impl ApduReq for HashSignReq {
    const INS: Instruction = Instruction::HashSign;
    const CONFIRMABLE: bool = true;

    fn decode_req(_p1: u8, _p2: u8, data: &[u8]) -> Result<Self, ApduError> {
        let (path, n) = KeyPath::decode_owned(data)?;

        let b = data.get(n..n + 6).ok_or(ApduError::InvalidLength)?;
        if b[0] != 0 {
            return Err(ApduError::InvalidEncoding);
        }

        Ok(Self {
            path,
            lock_time: u32::from_be_bytes([b[1], b[2], b[3], b[4]]),
            sighash: b[5],
        })
    }
}

impl Encode for HashSignReq {
    type Error = ApduError;

    fn encode_len(&self) -> Result<usize, Self::Error> {
        Ok(self.path.encode_len()? + 6)
    }

    fn encode(&self, buff: &mut [u8]) -> Result<usize, Self::Error> {
        if buff.len() < self.encode_len()? {
            return Err(ApduError::InvalidLength);
        }

        let mut index = self.path.encode(buff)?;

        buff[index] = 0x00;
        buff[index + 1..][..4].copy_from_slice(&self.lock_time.to_be_bytes());
        buff[index + 5] = self.sighash;
        index += 6;

        Ok(index)
    }
}

/// Signature returned by the device
///
/// Firmware variants differ in the returned form: some set the first byte to
/// `0x31` to signal the parity of `R`, most append the sighash type. Decoding
/// normalises both so [DeviceSignature::der] is always a plain DER signature.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct DeviceSignature {
    /// DER encoded signature
    pub der: Vec<u8>,
    /// Trailing sighash type, where returned
    pub sighash: Option<u8>,
}

impl Encode for DeviceSignature {
    type Error = ApduError;

    fn encode_len(&self) -> Result<usize, Self::Error> {
        Ok(self.der.len() + self.sighash.map(|_| 1).unwrap_or(0))
    }

    fn encode(&self, buff: &mut [u8]) -> Result<usize, Self::Error> {
        let n = self.encode_len()?;
        if buff.len() < n {
            return Err(ApduError::InvalidLength);
        }

        buff[..self.der.len()].copy_from_slice(&self.der);
        if let Some(s) = self.sighash {
            buff[self.der.len()] = s;
        }

        Ok(n)
    }
}

impl DecodeOwned for DeviceSignature {
    type Output = Self;
    type Error = ApduError;

    fn decode_owned(buff: &[u8]) -> Result<(Self::Output, usize), Self::Error> {
        if buff.len() < 2 {
            return Err(ApduError::InvalidLength);
        }

        let mut der = buff.to_vec();
        if der[0] == 0x31 {
            der[0] = 0x30;
        }
        if der[0] != 0x30 {
            return Err(ApduError::InvalidEncoding);
        }

        // Sequence length determines whether a sighash byte trails
        let n = der[1] as usize + 2;
        let sighash = match der.len() {
            l if l == n => None,
            l if l == n + 1 => der.pop(),
            _ => return Err(ApduError::InvalidLength),
        };

        Ok((Self { der, sighash }, buff.len()))
    }
}

#[cfg(test)]
mod test {
    use alloc::vec;
    use core::str::FromStr;

    use super::*;
    use crate::test::encode_decode_req;

    fn der() -> Vec<u8> {
        let mut d = vec![0x30, 0x06, 0x02, 0x01, 0x01, 0x02, 0x01, 0x02];
        d[1] = (d.len() - 2) as u8;
        d
    }

    #[test]
    fn hash_sign_req_apdu() {
        let req = HashSignReq::new(KeyPath::from_str("1'/0").unwrap(), 1, 0x01);

        let c = encode_decode_req(&req);
        assert_eq!(&c.data[9..], &[0x00, 0, 0, 0, 1, 0x01]);
    }

    #[test]
    fn signature_with_sighash() {
        let mut b = der();
        b.push(0x01);

        let (s, _) = DeviceSignature::decode_owned(&b).unwrap();
        assert_eq!(s.der, der());
        assert_eq!(s.sighash, Some(0x01));
    }

    #[test]
    fn signature_parity_variant() {
        let mut b = der();
        b[0] = 0x31;

        let (s, _) = DeviceSignature::decode_owned(&b).unwrap();
        assert_eq!(s.der, der());
        assert_eq!(s.sighash, None);
    }

    #[test]
    fn signature_malformed() {
        assert_eq!(
            DeviceSignature::decode_owned(&[0x02, 0x00]),
            Err(ApduError::InvalidEncoding)
        );

        let mut b = der();
        b.extend_from_slice(&[0x01, 0x01]);
        assert_eq!(
            DeviceSignature::decode_owned(&b),
            Err(ApduError::InvalidLength)
        );
    }
}
