// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Firmware version APDUs

use encdec::{DecodeOwned, Encode};

use super::{ApduError, ApduReq, Instruction};

/// Fetch firmware version APDU
#[derive(Copy, Clone, PartialEq, Debug, Default)]
pub struct FirmwareVersionReq;

impl ApduReq for FirmwareVersionReq {
    const INS: Instruction = Instruction::GetFirmwareVersion;

    fn decode_req(_p1: u8, _p2: u8, _data: &[u8]) -> Result<Self, ApduError> {
        Ok(Self)
    }
}

impl Encode for FirmwareVersionReq {
    type Error = ApduError;

    fn encode_len(&self) -> Result<usize, Self::Error> {
        Ok(0)
    }

    fn encode(&self, _buff: &mut [u8]) -> Result<usize, Self::Error> {
        Ok(0)
    }
}

bitflags::bitflags! {
    /// Firmware feature flags
    pub struct FirmwareFlags: u8 {
        /// Public keys are returned compressed
        const COMPRESSED_KEYS = 1 << 0;
        /// Device has its own screen and buttons
        const SCREEN_AND_BUTTONS = 1 << 1;
        /// Device takes user input externally
        const EXTERNAL_SCREEN_AND_BUTTONS = 1 << 2;
        /// NFC / payment extensions
        const NFC_PAYMENT = 1 << 3;
        /// BLE / low power extensions
        const BLE_LOW_POWER = 1 << 4;
        /// Running in a trusted execution environment
        const TEE = 1 << 5;
    }
}

/// Firmware version response APDU
///
/// ## Encoding
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |     FLAGS     |  ARCHITECTURE |     MAJOR     |     MINOR     |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |     PATCH     | LOADER_MAJOR  | LOADER_MINOR  |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// Loader fields are optional, and some devices append a single vestigial byte.
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct FirmwareVersion {
    pub flags: FirmwareFlags,
    pub architecture: u8,
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
    pub loader: Option<(u8, u8)>,
}

impl FirmwareVersion {
    /// Create a firmware version without loader information
    pub fn new(flags: FirmwareFlags, architecture: u8, version: (u8, u8, u8)) -> Self {
        Self {
            flags,
            architecture,
            major: version.0,
            minor: version.1,
            patch: version.2,
            loader: None,
        }
    }

    /// Check whether firmware is at least the provided version
    pub fn at_least(&self, major: u8, minor: u8, patch: u8) -> bool {
        (self.major, self.minor, self.patch) >= (major, minor, patch)
    }
}

impl core::fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl Encode for FirmwareVersion {
    type Error = ApduError;

    fn encode_len(&self) -> Result<usize, Self::Error> {
        Ok(match self.loader {
            Some(_) => 7,
            None => 5,
        })
    }

    fn encode(&self, buff: &mut [u8]) -> Result<usize, Self::Error> {
        let n = self.encode_len()?;
        if buff.len() < n {
            return Err(ApduError::InvalidLength);
        }

        buff[0] = self.flags.bits();
        buff[1] = self.architecture;
        buff[2] = self.major;
        buff[3] = self.minor;
        buff[4] = self.patch;

        if let Some((major, minor)) = self.loader {
            buff[5] = major;
            buff[6] = minor;
        }

        Ok(n)
    }
}

impl DecodeOwned for FirmwareVersion {
    type Output = Self;
    type Error = ApduError;

    fn decode_owned(buff: &[u8]) -> Result<(Self::Output, usize), Self::Error> {
        if buff.len() < 5 || buff.len() > 8 {
            return Err(ApduError::InvalidLength);
        }

        let loader = match buff.len() >= 7 {
            true => Some((buff[5], buff[6])),
            false => None,
        };

        Ok((
            Self {
                flags: FirmwareFlags::from_bits_truncate(buff[0]),
                architecture: buff[1],
                major: buff[2],
                minor: buff[3],
                patch: buff[4],
                loader,
            },
            buff.len(),
        ))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test::{encode_decode_req, encode_decode_resp};

    #[test]
    fn firmware_version_req_apdu() {
        let c = encode_decode_req(&FirmwareVersionReq);
        assert_eq!(c.ins, 0xc4);
        assert!(c.data.is_empty());
    }

    #[test]
    fn firmware_version_resp_apdu() {
        let mut v = FirmwareVersion::new(FirmwareFlags::COMPRESSED_KEYS, 0x30, (2, 1, 0));
        assert_eq!(encode_decode_resp(&v), 5);

        v.loader = Some((1, 6));
        assert_eq!(encode_decode_resp(&v), 7);
    }

    #[test]
    fn firmware_version_vestigial_byte() {
        let (v, n) = FirmwareVersion::decode_owned(&[0x01, 0x30, 1, 4, 2, 1, 6, 0]).unwrap();

        assert_eq!(n, 8);
        assert_eq!(v.loader, Some((1, 6)));
        assert!(v.at_least(1, 4, 0));
        assert!(!v.at_least(1, 5, 0));

        assert_eq!(
            FirmwareVersion::decode_owned(&[0x01, 0x30]),
            Err(ApduError::InvalidLength)
        );
    }
}
