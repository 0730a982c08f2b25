//! Packet transport abstraction and APDU framing
//!
// Copyright (c) 2022-2023 The MobileCoin Foundation

use async_trait::async_trait;

mod framer;
pub use framer::{Framer, FramingError, Reassembler, DEFAULT_CHANNEL, HID_PACKET_LEN};

#[cfg(feature = "transport_hid")]
mod hid;
#[cfg(feature = "transport_hid")]
pub use hid::{HidTransport, LEDGER_USAGE_PAGE, LEDGER_VID};

/// Fixed size packet transport for a single device.
///
/// Implementations move raw packets only and have no knowledge of APDU framing.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Physical packet length
    fn packet_len(&self) -> usize {
        HID_PACKET_LEN
    }

    /// Write a single packet (exactly [Transport::packet_len] bytes)
    async fn write_packet(&mut self, packet: &[u8]) -> Result<(), TransportError>;

    /// Read a single packet, blocking until one is available
    async fn read_packet(&mut self) -> Result<Vec<u8>, TransportError>;
}

/// Packet transport errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Device is no longer connected
    #[error("device disconnected")]
    Disconnected,

    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HID library failure
    #[cfg(feature = "transport_hid")]
    #[error("HID error: {0}")]
    Hid(hidapi::HidError),
}

/// Boxed transports, for consumers abstracting over transport types
#[async_trait]
impl Transport for Box<dyn Transport> {
    fn packet_len(&self) -> usize {
        self.as_ref().packet_len()
    }

    async fn write_packet(&mut self, packet: &[u8]) -> Result<(), TransportError> {
        self.as_mut().write_packet(packet).await
    }

    async fn read_packet(&mut self) -> Result<Vec<u8>, TransportError> {
        self.as_mut().read_packet().await
    }
}
