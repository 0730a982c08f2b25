// Copyright (c) 2022-2023 The MobileCoin Foundation

//! APDU framing over fixed size packets
//!
//! ## Packet encoding
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |        CHANNEL (u16 BE)       |  TAG (0x05)   |  SEQUENCE ... |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! | ... (u16 BE)  |   TOTAL_LEN (u16 BE, seq 0)   |    DATA ...   /
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Packets are zero padded to the transport packet length. Responses use
//! the same framing, with the status word as the final two message bytes.

use log::trace;

use ledger_btc_apdu::command::{ApduCommand, ApduResponse};

use super::Transport;
use crate::Error;

/// Default HID packet length
pub const HID_PACKET_LEN: usize = 64;

/// Default channel identifier
pub const DEFAULT_CHANNEL: u16 = 0x0101;

/// APDU packet tag
const TAG_APDU: u8 = 0x05;

/// Channel, tag and sequence
const HEADER_LEN: usize = 5;

/// Message length prefix on the first packet
const LENGTH_LEN: usize = 2;

/// Framing errors, a channel that has produced one of these cannot be trusted for reassembly
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum FramingError {
    #[error("short packet ({0} bytes)")]
    ShortPacket(usize),

    #[error("channel mismatch (expected: {expected:#06x}, actual: {actual:#06x})")]
    ChannelMismatch { expected: u16, actual: u16 },

    #[error("unexpected tag {0:#04x}")]
    UnexpectedTag(u8),

    #[error("unexpected sequence (expected: {expected}, actual: {actual})")]
    UnexpectedSequence { expected: u16, actual: u16 },

    #[error("invalid message length ({0} bytes)")]
    InvalidLength(usize),

    #[error("invalid packet length ({0} bytes)")]
    InvalidPacketLength(usize),
}

/// Packet framer for a single channel
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Framer {
    channel: u16,
    packet_len: usize,
}

impl Default for Framer {
    fn default() -> Self {
        Self {
            channel: DEFAULT_CHANNEL,
            packet_len: HID_PACKET_LEN,
        }
    }
}

impl Framer {
    /// Create a new framer for the provided channel and packet length
    pub fn new(channel: u16, packet_len: usize) -> Self {
        Self {
            channel,
            packet_len,
        }
    }

    pub fn channel(&self) -> u16 {
        self.channel
    }

    pub fn packet_len(&self) -> usize {
        self.packet_len
    }

    /// Split a message into zero padded packets
    pub fn encode(&self, message: &[u8]) -> Result<Vec<Vec<u8>>, FramingError> {
        if self.packet_len <= HEADER_LEN + LENGTH_LEN {
            return Err(FramingError::InvalidPacketLength(self.packet_len));
        }
        if message.len() > u16::MAX as usize {
            return Err(FramingError::InvalidLength(message.len()));
        }

        let mut packets = vec![];
        let mut offset = 0;
        let mut seq = 0u16;

        loop {
            let mut p = Vec::with_capacity(self.packet_len);
            p.extend_from_slice(&self.channel.to_be_bytes());
            p.push(TAG_APDU);
            p.extend_from_slice(&seq.to_be_bytes());

            if seq == 0 {
                p.extend_from_slice(&(message.len() as u16).to_be_bytes());
            }

            let n = (self.packet_len - p.len()).min(message.len() - offset);
            p.extend_from_slice(&message[offset..][..n]);
            p.resize(self.packet_len, 0);

            packets.push(p);
            offset += n;

            if offset >= message.len() {
                break;
            }

            seq = seq
                .checked_add(1)
                .ok_or(FramingError::InvalidLength(message.len()))?;
        }

        Ok(packets)
    }

    /// Create a reassembler for messages on this channel
    pub fn reassembler(&self) -> Reassembler {
        Reassembler::new(self.channel, self.packet_len)
    }

    /// Write a command and read the matching response.
    ///
    /// Errors are not retried, a partially consumed exchange leaves the
    /// channel in an unknown state.
    pub async fn exchange<T: Transport + ?Sized>(
        &self,
        t: &mut T,
        cmd: &ApduCommand,
    ) -> Result<ApduResponse, Error> {
        let packets = self.encode(&cmd.to_bytes())?;

        trace!(
            "write {:02x}:{:02x} ({} bytes, {} packets)",
            cmd.cla,
            cmd.ins,
            cmd.data.len(),
            packets.len()
        );

        for p in &packets {
            t.write_packet(p).await?;
        }

        let mut r = self.reassembler();
        let message = loop {
            let p = t.read_packet().await?;
            if let Some(m) = r.push(&p)? {
                break m;
            }
        };

        if message.len() < 2 {
            return Err(FramingError::InvalidLength(message.len()).into());
        }

        let resp = ApduResponse::parse(&message)?;

        trace!("read {:04x} ({} bytes)", resp.status, resp.data.len());

        Ok(resp)
    }
}

/// Reassembles a message from a stream of packets
#[derive(Clone, Debug)]
pub struct Reassembler {
    channel: u16,
    packet_len: usize,
    seq: u16,
    total: usize,
    buff: Vec<u8>,
}

impl Reassembler {
    pub fn new(channel: u16, packet_len: usize) -> Self {
        Self {
            channel,
            packet_len,
            seq: 0,
            total: 0,
            buff: vec![],
        }
    }

    /// Check whether a message is partially received
    pub fn in_progress(&self) -> bool {
        self.seq != 0
    }

    /// Push a packet, returning the message once complete.
    ///
    /// Packets must be exactly the transport packet length.
    pub fn push(&mut self, packet: &[u8]) -> Result<Option<Vec<u8>>, FramingError> {
        if packet.len() < HEADER_LEN.max(self.packet_len) {
            return Err(FramingError::ShortPacket(packet.len()));
        }
        if packet.len() != self.packet_len {
            return Err(FramingError::InvalidPacketLength(packet.len()));
        }

        let channel = u16::from_be_bytes([packet[0], packet[1]]);
        if channel != self.channel {
            return Err(FramingError::ChannelMismatch {
                expected: self.channel,
                actual: channel,
            });
        }

        if packet[2] != TAG_APDU {
            return Err(FramingError::UnexpectedTag(packet[2]));
        }

        let seq = u16::from_be_bytes([packet[3], packet[4]]);
        if seq != self.seq {
            return Err(FramingError::UnexpectedSequence {
                expected: self.seq,
                actual: seq,
            });
        }

        let mut data = &packet[HEADER_LEN..];
        if seq == 0 {
            if data.len() < LENGTH_LEN {
                return Err(FramingError::ShortPacket(packet.len()));
            }

            self.total = u16::from_be_bytes([data[0], data[1]]) as usize;
            self.buff = Vec::with_capacity(self.total);
            data = &data[LENGTH_LEN..];
        }

        let n = (self.total - self.buff.len()).min(data.len());
        self.buff.extend_from_slice(&data[..n]);

        if self.buff.len() == self.total {
            self.seq = 0;
            return Ok(Some(std::mem::take(&mut self.buff)));
        }

        self.seq = self
            .seq
            .checked_add(1)
            .ok_or(FramingError::InvalidLength(self.total))?;

        Ok(None)
    }
}
