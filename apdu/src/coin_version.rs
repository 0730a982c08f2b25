// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Coin version APDUs, identifying the chain the application is configured for

use alloc::string::String;

use encdec::{DecodeOwned, Encode};

use super::{ApduError, ApduReq, Instruction};

/// Fetch coin version APDU
#[derive(Copy, Clone, PartialEq, Debug, Default)]
pub struct CoinVersionReq;

impl ApduReq for CoinVersionReq {
    const INS: Instruction = Instruction::GetCoinVersion;

    fn decode_req(_p1: u8, _p2: u8, _data: &[u8]) -> Result<Self, ApduError> {
        Ok(Self)
    }
}

impl Encode for CoinVersionReq {
    type Error = ApduError;

    fn encode_len(&self) -> Result<usize, Self::Error> {
        Ok(0)
    }

    fn encode(&self, _buff: &mut [u8]) -> Result<usize, Self::Error> {
        Ok(0)
    }
}

/// Opaque coin identifier used for compatibility checks
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct CoinId {
    /// P2PKH address version
    pub p2pkh: u16,
    /// P2SH address version
    pub p2sh: u16,
    /// Coin family
    pub family: u8,
}

impl CoinId {
    /// Bitcoin mainnet
    pub const BITCOIN: CoinId = CoinId {
        p2pkh: 0x00,
        p2sh: 0x05,
        family: 0x01,
    };

    /// Bitcoin testnet / regtest
    pub const BITCOIN_TESTNET: CoinId = CoinId {
        p2pkh: 0x6f,
        p2sh: 0xc4,
        family: 0x01,
    };
}

impl core::fmt::Display for CoinId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "family: {:#04x}, p2pkh: {:#06x}, p2sh: {:#06x}",
            self.family, self.p2pkh, self.p2sh
        )
    }
}

/// Coin version response APDU
///
/// ## Encoding
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |     P2PKH_VERSION (u16 BE)    |     P2SH_VERSION (u16 BE)     |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |    FAMILY     |   NAME_LEN    |          NAME ...             /
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |  TICKER_LEN   |                   TICKER ...                  /
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Clone, PartialEq, Debug)]
pub struct CoinVersion {
    pub id: CoinId,
    /// Coin name (eg. `Bitcoin`)
    pub name: String,
    /// Coin ticker (eg. `BTC`)
    pub ticker: String,
}

impl Encode for CoinVersion {
    type Error = ApduError;

    fn encode_len(&self) -> Result<usize, Self::Error> {
        Ok(7 + self.name.len() + self.ticker.len())
    }

    fn encode(&self, buff: &mut [u8]) -> Result<usize, Self::Error> {
        let n = self.encode_len()?;
        if buff.len() < n || self.name.len() > 0xff || self.ticker.len() > 0xff {
            return Err(ApduError::InvalidLength);
        }

        buff[..2].copy_from_slice(&self.id.p2pkh.to_be_bytes());
        buff[2..4].copy_from_slice(&self.id.p2sh.to_be_bytes());
        buff[4] = self.id.family;
        let mut index = 5;

        for s in [&self.name, &self.ticker] {
            buff[index] = s.len() as u8;
            buff[index + 1..][..s.len()].copy_from_slice(s.as_bytes());
            index += 1 + s.len();
        }

        Ok(index)
    }
}

impl DecodeOwned for CoinVersion {
    type Output = Self;
    type Error = ApduError;

    fn decode_owned(buff: &[u8]) -> Result<(Self::Output, usize), Self::Error> {
        if buff.len() < 6 {
            return Err(ApduError::InvalidLength);
        }

        let id = CoinId {
            p2pkh: u16::from_be_bytes([buff[0], buff[1]]),
            p2sh: u16::from_be_bytes([buff[2], buff[3]]),
            family: buff[4],
        };
        let mut index = 5;

        let (name, n) = decode_str(&buff[index..])?;
        index += n;

        let (ticker, n) = decode_str(&buff[index..])?;
        index += n;

        Ok((Self { id, name, ticker }, index))
    }
}

/// Decode a length-prefixed string
fn decode_str(buff: &[u8]) -> Result<(String, usize), ApduError> {
    let len = *buff.first().ok_or(ApduError::InvalidLength)? as usize;
    if buff.len() < 1 + len {
        return Err(ApduError::InvalidLength);
    }

    let s = core::str::from_utf8(&buff[1..][..len]).map_err(|_| ApduError::InvalidUtf8)?;

    Ok((s.into(), 1 + len))
}
