// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Device discovery and connection

use std::fmt::Debug;

use async_trait::async_trait;
use hidapi::HidApi;

use crate::{transport::HidTransport, DeviceHandle, Error, HandleConfig};

/// Ledger provider manages ledger devices and connections
pub struct LedgerProvider {
    hid_api: HidApi,
}

/// Ledger device information for listing, used by connect
#[derive(Debug, Clone)]
pub struct LedgerInfo(hidapi::DeviceInfo);

impl LedgerProvider {
    /// Create a new ledger provider
    /// NOTE: only one provider may exist at a time (workaround for global HID context errors on macos/m1)
    pub fn new() -> Result<Self, Error> {
        let hid_api = HidApi::new().map_err(|_| Error::HidInit)?;

        Ok(Self { hid_api })
    }

    /// List available ledger devices
    pub fn list_devices(&self) -> Vec<LedgerInfo> {
        let devices: Vec<_> = HidTransport::list_ledgers(&self.hid_api)
            .cloned()
            .map(LedgerInfo)
            .collect();

        log::debug!("Found {} devices: {:?}", devices.len(), devices);

        devices
    }
}

impl std::fmt::Display for LedgerInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:16} (USB, {:04x}:{:04x}, {})",
            self.0.product_string().unwrap_or("UNKNOWN"),
            self.0.vendor_id(),
            self.0.product_id(),
            self.0.serial_number().unwrap_or("UNKNOWN"),
        )
    }
}

/// Connect trait for supported transports
#[async_trait]
pub trait Connect {
    type Options: Debug;

    /// Connect to the specified device
    async fn connect(
        &self,
        opts: &Self::Options,
        cfg: HandleConfig,
    ) -> Result<DeviceHandle<HidTransport>, Error>;
}

/// Connect implementation for HID devices
#[async_trait]
impl Connect for LedgerProvider {
    type Options = LedgerInfo;

    async fn connect(
        &self,
        opts: &Self::Options,
        cfg: HandleConfig,
    ) -> Result<DeviceHandle<HidTransport>, Error> {
        // Connect to device
        let t = HidTransport::open_device(&self.hid_api, &opts.0)?;

        // Create handle
        Ok(DeviceHandle::with_config(t, cfg))
    }
}
