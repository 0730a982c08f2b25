//! Prelude to simplify downstream use of APDU objects
//!

pub use crate::{
    coin_version::{CoinId, CoinVersion, CoinVersionReq},
    command::{ApduCommand, ApduResponse, StatusWord},
    firmware::{FirmwareFlags, FirmwareVersion, FirmwareVersionReq},
    hash_input::{
        FinalizeBlock, FinalizeStatus, HashInputFinalizeReq, HashInputFinalizeResp,
        HashInputStartReq, InputHeader, InputRecord, StartMode,
    },
    hash_sign::{DeviceSignature, HashSignReq},
    path::{KeyPath, HARDENED},
    trusted_input::{BlockKind, TrustedInput, TrustedInputReq},
    wallet_keys::{AddressType, WalletPublicKey, WalletPublicKeyReq},
    ApduError, ApduReq, Instruction,
};
