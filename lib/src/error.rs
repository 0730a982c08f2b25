// Copyright (c) 2022-2023 The MobileCoin Foundation

use ledger_btc_apdu::{coin_version::CoinId, ApduError};
use tokio::time::error::Elapsed;

use crate::{
    transport::{FramingError, TransportError},
    tx::TxState,
};

/// Ledger Bitcoin API Error Type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// HID Init Error
    #[error("could not create HidApi instance")]
    HidInit,

    /// No matching device
    #[error("No device found")]
    NoDevice,

    /// Malformed or out-of-sequence physical packets
    #[error("Framing error: {0}")]
    Framing(#[from] FramingError),

    /// Device disconnected, the handle is no longer usable
    #[error("Device disconnected")]
    DeviceDisconnected,

    /// Transport failure (other than disconnection)
    #[error("Transport error: {0}")]
    Transport(TransportError),

    /// Device returned a non-success status word
    #[error("Device command failed (status: {0:#06x})")]
    DeviceCommandFailed(u16),

    /// User denied operation on the device
    #[error("Operation rejected by user")]
    UserRejected,

    /// Device application is configured for a different coin
    #[error("Unsupported coin (expected: {expected}, actual: {actual})")]
    UnsupportedCoin { expected: CoinId, actual: CoinId },

    /// Signing step invoked out of order
    #[error("Invalid transaction state (actual: {actual}, expected: {expected})")]
    ProtocolSequence { actual: TxState, expected: TxState },

    /// APDU encoding or decoding failed
    #[error("APDU error: {0}")]
    Apdu(ApduError),

    /// Request timeout
    #[error("Timeout waiting for device response")]
    RequestTimeout,

    /// Device command task failed to complete
    #[error("Device task aborted")]
    TaskAborted,

    /// Invalid public key in response
    #[error("Invalid public key object")]
    InvalidPublicKey,

    /// Invalid signature in response
    #[error("Invalid signature object")]
    InvalidSignature,

    /// Spending transaction input has no matching signature request
    #[error("No signature request for input {0}")]
    MissingSignatureRequest(usize),

    /// Signature request does not match a spending transaction input
    #[error("Signature request {0} does not match any input")]
    UnknownSignatureRequest(usize),

    /// Previous transaction does not match the request outpoint
    #[error("Previous transaction for request {0} does not match outpoint")]
    PreviousTransactionMismatch(usize),

    /// Previous transaction does not contain the requested output
    #[error("Previous transaction has no output {0}")]
    MissingOutput(u32),

    /// Not every input was signed
    #[error("Signing incomplete ({signed} of {expected} inputs)")]
    IncompleteSigning { signed: usize, expected: usize },

    /// Script construction failed
    #[error("Script construction failed")]
    Script,
}

impl From<ApduError> for Error {
    fn from(e: ApduError) -> Self {
        Error::Apdu(e)
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Disconnected => Error::DeviceDisconnected,
            e => Error::Transport(e),
        }
    }
}

impl From<Elapsed> for Error {
    fn from(_: Elapsed) -> Self {
        Error::RequestTimeout
    }
}

#[cfg(feature = "transport_hid")]
impl From<hidapi::HidError> for Error {
    fn from(e: hidapi::HidError) -> Self {
        Error::Transport(TransportError::Hid(e))
    }
}
