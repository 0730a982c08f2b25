// Copyright (c) 2022-2023 The MobileCoin Foundation

//! USB HID packet transport

use async_trait::async_trait;
use hidapi::{DeviceInfo, HidApi, HidDevice};
use log::{debug, trace};

use super::{Transport, TransportError, HID_PACKET_LEN};

/// Ledger USB vendor identifier
pub const LEDGER_VID: u16 = 0x2c97;

/// Ledger HID usage page
pub const LEDGER_USAGE_PAGE: u16 = 0xffa0;

/// HID transport for a single connected device
pub struct HidTransport {
    device: HidDevice,
}

impl HidTransport {
    /// List connected devices matching the ledger vendor and usage page
    pub fn list_ledgers(api: &HidApi) -> impl Iterator<Item = &DeviceInfo> {
        api.device_list().filter(|d| {
            // Usage page is not reported by every backend, fall back to the first interface
            d.vendor_id() == LEDGER_VID
                && (d.usage_page() == LEDGER_USAGE_PAGE || d.interface_number() == 0)
        })
    }

    /// Open the provided device
    pub fn open_device(api: &HidApi, info: &DeviceInfo) -> Result<Self, TransportError> {
        let device = info.open_device(api).map_err(TransportError::Hid)?;

        debug!(
            "Opened HID device {:04x}:{:04x}",
            info.vendor_id(),
            info.product_id()
        );

        Ok(Self { device })
    }
}

#[async_trait]
impl Transport for HidTransport {
    async fn write_packet(&mut self, packet: &[u8]) -> Result<(), TransportError> {
        // Report ID prefix
        let mut buff = [0u8; HID_PACKET_LEN + 1];
        let n = packet.len().min(HID_PACKET_LEN);
        buff[1..][..n].copy_from_slice(&packet[..n]);

        trace!("HID write: {:02x?}", &buff[1..]);

        match self.device.write(&buff) {
            Ok(_) => Ok(()),
            Err(e) => {
                debug!("HID write failed: {:?}", e);
                Err(TransportError::Disconnected)
            }
        }
    }

    async fn read_packet(&mut self) -> Result<Vec<u8>, TransportError> {
        let mut buff = [0u8; HID_PACKET_LEN];

        // Blocks until the device responds, responses may await user confirmation
        let n = match self.device.read_timeout(&mut buff, -1) {
            Ok(n) => n,
            Err(e) => {
                debug!("HID read failed: {:?}", e);
                return Err(TransportError::Disconnected);
            }
        };

        trace!("HID read: {:02x?}", &buff[..n]);

        Ok(buff[..n].to_vec())
    }
}
