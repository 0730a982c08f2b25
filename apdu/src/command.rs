// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Owned APDU command and response envelopes
//!
//! These are the logical units exchanged with the device, prior to framing
//! into physical packets by the transport layer.

use alloc::{vec, vec::Vec};

use crate::{ApduError, ApduReq, DecodeOwned, BTC_APDU_CLA, MAX_APDU_DATA};

/// APDU command header length (`CLA INS P1 P2 Lc`)
pub const APDU_HEADER_LEN: usize = 5;

/// Logical command APDU
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ApduCommand {
    pub cla: u8,
    pub ins: u8,
    pub p1: u8,
    pub p2: u8,
    pub data: Vec<u8>,
}

impl ApduCommand {
    /// Build a command from a typed request
    pub fn from_req<R: ApduReq>(req: &R) -> Result<Self, ApduError> {
        let mut data = vec![0u8; req.encode_len()?];
        let n = req.encode(&mut data)?;
        data.truncate(n);

        if data.len() > MAX_APDU_DATA {
            return Err(ApduError::InvalidLength);
        }

        Ok(Self {
            cla: BTC_APDU_CLA,
            ins: R::INS as u8,
            p1: req.p1(),
            p2: req.p2(),
            data,
        })
    }

    /// Rebuild a typed request from this command
    pub fn to_req<R: ApduReq>(&self) -> Result<R, ApduError> {
        if self.ins != R::INS as u8 {
            return Err(ApduError::InvalidInstruction);
        }

        R::decode_req(self.p1, self.p2, &self.data)
    }

    /// Serialise command (header, length, payload)
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut b = Vec::with_capacity(APDU_HEADER_LEN + self.data.len());

        b.extend_from_slice(&[self.cla, self.ins, self.p1, self.p2, self.data.len() as u8]);
        b.extend_from_slice(&self.data);

        b
    }

    /// Parse a serialised command
    pub fn parse(buff: &[u8]) -> Result<Self, ApduError> {
        if buff.len() < APDU_HEADER_LEN {
            return Err(ApduError::InvalidLength);
        }

        let n = buff[4] as usize;
        if buff.len() != APDU_HEADER_LEN + n {
            return Err(ApduError::InvalidLength);
        }

        Ok(Self {
            cla: buff[0],
            ins: buff[1],
            p1: buff[2],
            p2: buff[3],
            data: buff[APDU_HEADER_LEN..].to_vec(),
        })
    }
}

/// Logical response APDU
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ApduResponse {
    /// Raw status word
    pub status: u16,
    /// Response payload (excluding status word)
    pub data: Vec<u8>,
}

impl ApduResponse {
    /// Create a response with the provided status and payload
    pub fn new(status: u16, data: Vec<u8>) -> Self {
        Self { status, data }
    }

    /// Create an empty response with the provided status
    pub fn status(status: StatusWord) -> Self {
        Self {
            status: status as u16,
            data: vec![],
        }
    }

    /// Check whether the status word indicates success
    pub fn is_ok(&self) -> bool {
        self.status == StatusWord::Ok as u16
    }

    /// Split a reassembled response into payload and trailing status word
    pub fn parse(buff: &[u8]) -> Result<Self, ApduError> {
        if buff.len() < 2 {
            return Err(ApduError::InvalidLength);
        }

        let (data, sw) = buff.split_at(buff.len() - 2);

        Ok(Self {
            status: u16::from_be_bytes([sw[0], sw[1]]),
            data: data.to_vec(),
        })
    }

    /// Serialise response (payload followed by status word)
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut b = Vec::with_capacity(self.data.len() + 2);

        b.extend_from_slice(&self.data);
        b.extend_from_slice(&self.status.to_be_bytes());

        b
    }

    /// Decode the response payload
    pub fn decode<R: DecodeOwned<Error = ApduError>>(&self) -> Result<R::Output, ApduError> {
        let (v, _n) = R::decode_owned(&self.data)?;
        Ok(v)
    }
}

/// Known status words
#[derive(Copy, Clone, PartialEq, Eq, Debug, num_enum::TryFromPrimitive, strum::Display)]
#[repr(u16)]
pub enum StatusWord {
    /// Success
    Ok = 0x9000,
    /// Incorrect payload length
    WrongLength = 0x6700,
    /// Device locked / PIN required
    SecurityStatusNotSatisfied = 0x6982,
    /// Operation refused (user rejection or invalid state)
    ConditionsNotSatisfied = 0x6985,
    /// Invalid payload data
    InvalidData = 0x6a80,
    /// Referenced data not found
    NotFound = 0x6a82,
    /// Incorrect P1 / P2 parameters
    IncorrectParameters = 0x6b00,
    /// Instruction not supported
    InsNotSupported = 0x6d00,
    /// Class not supported (wrong app open)
    ClaNotSupported = 0x6e00,
    /// Internal device error
    TechnicalProblem = 0x6f00,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn command_bytes() {
        let c = ApduCommand {
            cla: 0xe0,
            ins: 0x40,
            p1: 0x01,
            p2: 0x02,
            data: vec![0xaa, 0xbb],
        };

        let b = c.to_bytes();
        assert_eq!(&b, &[0xe0, 0x40, 0x01, 0x02, 0x02, 0xaa, 0xbb]);
        assert_eq!(ApduCommand::parse(&b), Ok(c));

        assert_eq!(
            ApduCommand::parse(&[0xe0, 0x40, 0x00, 0x00, 0x03, 0x01]),
            Err(ApduError::InvalidLength)
        );
    }

    #[test]
    fn response_status() {
        let r = ApduResponse::parse(&[0x01, 0x02, 0x69, 0x85]).unwrap();

        assert_eq!(r.data, vec![0x01, 0x02]);
        assert_eq!(r.status, StatusWord::ConditionsNotSatisfied as u16);
        assert!(!r.is_ok());

        assert!(ApduResponse::parse(&[0x90, 0x00]).unwrap().is_ok());
        assert_eq!(ApduResponse::parse(&[0x90]), Err(ApduError::InvalidLength));
    }
}
