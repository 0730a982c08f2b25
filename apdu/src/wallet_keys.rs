// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Wallet public key APDUs, for fetching derived public keys and addresses

use alloc::{string::String, vec::Vec};

use encdec::{DecodeOwned, Encode};

use super::{path::KeyPath, ApduError, ApduReq, Instruction};

/// Address encoding requested from (and displayed by) the device
#[derive(
    Copy,
    Clone,
    PartialEq,
    Eq,
    Debug,
    Default,
    num_enum::TryFromPrimitive,
    strum::Display,
    strum::EnumString,
)]
#[repr(u8)]
#[strum(serialize_all = "kebab-case")]
pub enum AddressType {
    /// Base58 P2PKH
    #[default]
    Legacy = 0x00,
    /// P2SH wrapped P2WPKH
    Segwit = 0x01,
    /// Bech32 P2WPKH
    NativeSegwit = 0x02,
}

/// Wallet public key request APDU.
///
/// `P1` selects on-device display / confirmation, `P2` the [AddressType].
///
/// ## Encoding:
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// /                        KEY_PATH (see [KeyPath])               /
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Clone, PartialEq, Debug)]
pub struct WalletPublicKeyReq {
    /// Derivation path
    pub path: KeyPath,
    /// Display the address and await user confirmation
    pub display: bool,
    /// Address type to derive / display
    pub address_type: AddressType,
}

impl WalletPublicKeyReq {
    /// Create a new [WalletPublicKeyReq] APDU
    pub fn new(path: KeyPath, address_type: AddressType, display: bool) -> Self {
        Self {
            path,
            display,
            address_type,
        }
    }
}

impl ApduReq for WalletPublicKeyReq {
    const INS: Instruction = Instruction::GetWalletPublicKey;
    const CONFIRMABLE: bool = true;

    fn p1(&self) -> u8 {
        self.display as u8
    }

    fn p2(&self) -> u8 {
        self.address_type as u8
    }

    fn decode_req(p1: u8, p2: u8, data: &[u8]) -> Result<Self, ApduError> {
        let display = match p1 {
            0x00 => false,
            0x01 => true,
            _ => return Err(ApduError::InvalidParameter),
        };
        let address_type = AddressType::try_from(p2).map_err(|_| ApduError::InvalidParameter)?;
        let (path, _n) = KeyPath::decode_owned(data)?;

        Ok(Self {
            path,
            display,
            address_type,
        })
    }
}

impl Encode for WalletPublicKeyReq {
    type Error = ApduError;

    fn encode_len(&self) -> Result<usize, Self::Error> {
        self.path.encode_len()
    }

    fn encode(&self, buff: &mut [u8]) -> Result<usize, Self::Error> {
        self.path.encode(buff)
    }
}

/// Wallet public key response APDU
///
/// ## Encoding:
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |    PUB_LEN    |                                               |
/// +-+-+-+-+-+-+-+-+                                               |
/// /                PUBLIC_KEY (65-byte uncompressed)              /
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |   ADDR_LEN    |             ADDRESS (ASCII) ...               /
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// /                     CHAIN_CODE (32 bytes)                     /
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Clone, PartialEq, Debug)]
pub struct WalletPublicKey {
    /// Public key as returned by the device (usually uncompressed)
    pub public_key: Vec<u8>,
    /// Address string for the requested [AddressType]
    pub address: String,
    /// BIP-0032 chain code
    pub chain_code: [u8; 32],
}

impl Encode for WalletPublicKey {
    type Error = ApduError;

    fn encode_len(&self) -> Result<usize, Self::Error> {
        Ok(2 + self.public_key.len() + self.address.len() + 32)
    }

    fn encode(&self, buff: &mut [u8]) -> Result<usize, Self::Error> {
        let n = self.encode_len()?;
        if buff.len() < n || self.public_key.len() > 0xff || self.address.len() > 0xff {
            return Err(ApduError::InvalidLength);
        }

        let mut index = 0;

        buff[index] = self.public_key.len() as u8;
        buff[index + 1..][..self.public_key.len()].copy_from_slice(&self.public_key);
        index += 1 + self.public_key.len();

        buff[index] = self.address.len() as u8;
        buff[index + 1..][..self.address.len()].copy_from_slice(self.address.as_bytes());
        index += 1 + self.address.len();

        buff[index..][..32].copy_from_slice(&self.chain_code);
        index += 32;

        Ok(index)
    }
}

impl DecodeOwned for WalletPublicKey {
    type Output = Self;
    type Error = ApduError;

    fn decode_owned(buff: &[u8]) -> Result<(Self::Output, usize), Self::Error> {
        let pk_len = *buff.first().ok_or(ApduError::InvalidLength)? as usize;
        if buff.len() < 2 + pk_len {
            return Err(ApduError::InvalidLength);
        }
        let public_key = buff[1..][..pk_len].to_vec();
        let mut index = 1 + pk_len;

        let addr_len = buff[index] as usize;
        index += 1;
        if buff.len() < index + addr_len + 32 {
            return Err(ApduError::InvalidLength);
        }

        let address = core::str::from_utf8(&buff[index..][..addr_len])
            .map_err(|_| ApduError::InvalidUtf8)?
            .into();
        index += addr_len;

        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(&buff[index..][..32]);
        index += 32;

        Ok((
            Self {
                public_key,
                address,
                chain_code,
            },
            index,
        ))
    }
}
