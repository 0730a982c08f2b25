// Copyright (c) 2022-2023 The MobileCoin Foundation

//! BIP-0032 derivation paths as sent to the device
//!
//! ## Encoding
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |  PATH_LEN     |          INDEX_0 (u32 BE) ...                 |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! /                     INDEX_N (u32 BE)                          /
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use alloc::{string::String, vec::Vec};
use core::{fmt, str::FromStr};

use byteorder::{BigEndian, ByteOrder};
use encdec::{DecodeOwned, Encode};

use crate::ApduError;

/// Hardened derivation flag
pub const HARDENED: u32 = 0x8000_0000;

/// Maximum number of path components accepted by the device
pub const MAX_KEY_PATH_LEN: usize = 10;

/// Immutable derivation path
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct KeyPath(Vec<u32>);

impl KeyPath {
    /// Create a key path from raw indices (hardened indices include [HARDENED])
    pub fn new(indices: &[u32]) -> Result<Self, ApduError> {
        if indices.len() > MAX_KEY_PATH_LEN {
            return Err(ApduError::InvalidKeyPath);
        }

        Ok(Self(indices.to_vec()))
    }

    /// Raw derivation indices
    pub fn indices(&self) -> &[u32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Path of the parent key, `None` for the master key
    pub fn parent(&self) -> Option<KeyPath> {
        match self.0.split_last() {
            Some((_, p)) => Some(Self(p.to_vec())),
            None => None,
        }
    }

    /// Last derivation index, `None` for the master key
    pub fn last(&self) -> Option<u32> {
        self.0.last().copied()
    }

    /// Extend this path by one index
    pub fn child(&self, index: u32) -> Result<KeyPath, ApduError> {
        let mut p = self.0.clone();
        p.push(index);
        Self::new(&p)
    }
}

impl FromStr for KeyPath {
    type Err = ApduError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let s = s
            .strip_prefix("m/")
            .or_else(|| s.strip_prefix('m'))
            .unwrap_or(s);

        let mut indices = Vec::new();
        for c in s.split('/').filter(|c| !c.is_empty()) {
            let (n, hardened) = match c.strip_suffix(['\'', 'h', 'H']) {
                Some(n) => (n, true),
                None => (c, false),
            };

            let i = n.parse::<u32>().map_err(|_| ApduError::InvalidKeyPath)?;
            if i >= HARDENED {
                return Err(ApduError::InvalidKeyPath);
            }

            indices.push(if hardened { i | HARDENED } else { i });
        }

        Self::new(&indices)
    }
}

impl TryFrom<&str> for KeyPath {
    type Error = ApduError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Self::from_str(s)
    }
}

impl TryFrom<String> for KeyPath {
    type Error = ApduError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::from_str(&s)
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (n, i) in self.0.iter().enumerate() {
            if n > 0 {
                write!(f, "/")?;
            }

            match i & HARDENED != 0 {
                true => write!(f, "{}'", i & !HARDENED)?,
                false => write!(f, "{i}")?,
            }
        }
        Ok(())
    }
}

impl fmt::Debug for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyPath({self})")
    }
}

impl Encode for KeyPath {
    type Error = ApduError;

    fn encode_len(&self) -> Result<usize, Self::Error> {
        Ok(1 + 4 * self.0.len())
    }

    fn encode(&self, buff: &mut [u8]) -> Result<usize, Self::Error> {
        let n = self.encode_len()?;
        if buff.len() < n {
            return Err(ApduError::InvalidLength);
        }

        buff[0] = self.0.len() as u8;
        for (i, v) in self.0.iter().enumerate() {
            BigEndian::write_u32(&mut buff[1 + i * 4..], *v);
        }

        Ok(n)
    }
}

impl DecodeOwned for KeyPath {
    type Output = Self;
    type Error = ApduError;

    fn decode_owned(buff: &[u8]) -> Result<(Self::Output, usize), Self::Error> {
        let len = *buff.first().ok_or(ApduError::InvalidLength)? as usize;
        if len > MAX_KEY_PATH_LEN {
            return Err(ApduError::InvalidKeyPath);
        }

        let n = 1 + len * 4;
        if buff.len() < n {
            return Err(ApduError::InvalidLength);
        }

        let indices = buff[1..n].chunks(4).map(BigEndian::read_u32).collect();

        Ok((Self(indices), n))
    }
}

#[cfg(test)]
mod test {
    use alloc::string::ToString;

    use super::*;

    #[test]
    fn parse_key_path() {
        let p = KeyPath::from_str("1'/0").unwrap();
        assert_eq!(p.indices(), &[1 | HARDENED, 0]);
        assert_eq!(p.to_string(), "1'/0");

        let q = KeyPath::from_str("m/44h/0H/0'/1/7").unwrap();
        assert_eq!(q.indices(), &[44 | HARDENED, HARDENED, HARDENED, 1, 7]);
        assert_eq!(q.to_string(), "44'/0'/0'/1/7");

        assert!(KeyPath::from_str("m").unwrap().is_empty());
    }

    #[test]
    fn reject_bad_paths() {
        assert_eq!(KeyPath::from_str("1'/x"), Err(ApduError::InvalidKeyPath));
        assert_eq!(
            KeyPath::from_str("2147483648"),
            Err(ApduError::InvalidKeyPath)
        );
        assert_eq!(
            KeyPath::from_str("0/1/2/3/4/5/6/7/8/9/10"),
            Err(ApduError::InvalidKeyPath)
        );
    }

    #[test]
    fn key_path_equality() {
        assert_eq!(
            KeyPath::from_str("44'/0").unwrap(),
            KeyPath::from_str("m/44h/0").unwrap()
        );
        assert_ne!(
            KeyPath::from_str("44'/0").unwrap(),
            KeyPath::from_str("44/0").unwrap()
        );
    }

    #[test]
    fn key_path_parent() {
        let p = KeyPath::from_str("1'/0").unwrap();
        assert_eq!(p.parent(), Some(KeyPath::from_str("1'").unwrap()));
        assert_eq!(p.last(), Some(0));
        assert_eq!(KeyPath::default().parent(), None);
    }

    #[test]
    fn key_path_encoding() {
        let p = KeyPath::from_str("1'/0").unwrap();

        let mut buff = [0u8; 16];
        let n = p.encode(&mut buff).unwrap();

        assert_eq!(&buff[..n], &[2, 0x80, 0, 0, 1, 0, 0, 0, 0]);
        assert_eq!(KeyPath::decode_owned(&buff[..n]), Ok((p, n)));
    }
}
