// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Ledger Bitcoin API Library (and CLI)
//!
//! Host side driver for the Bitcoin application on Ledger-style USB HID
//! hardware wallets. A [DeviceHandle] serialises commands to a connected
//! device, with [DeviceHandle::sign_transaction] driving the multi-step
//! signing protocol.
//!

/// Packet transports and APDU framing
pub mod transport;

/// Re-export `ledger-btc-apdu` for consumers
pub use ledger_btc_apdu::{self as apdu};

mod handle;
pub use handle::{DeviceHandle, HandleConfig};

mod error;
pub use error::Error;

pub mod tx;

#[cfg(feature = "transport_hid")]
mod provider;
#[cfg(feature = "transport_hid")]
pub use provider::{Connect, LedgerInfo, LedgerProvider};
