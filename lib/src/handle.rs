// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Handle for connected ledger devices
//!
//! This provides methods for interacting with the device
//! and is generic over [Transport] types. All exchanges pass
//! through a single gate so concurrent callers never interleave
//! packets on the wire.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use bitcoin::{
    bip32::{ChainCode, ChildNumber, Fingerprint, Xpub},
    hashes::{hash160, Hash},
    secp256k1, NetworkKind,
};
use log::{debug, warn};
use tokio::sync::{Mutex, OwnedMutexGuard};

use ledger_btc_apdu::{prelude::*, DecodeOwned, MAX_APDU_DATA};

use crate::{
    transport::{Framer, Transport, DEFAULT_CHANNEL},
    Error,
};

/// Minimum streamed block size
const MIN_CHUNK_SIZE: usize = 8;

/// Device handle configuration
#[derive(Clone, Debug, PartialEq)]
pub struct HandleConfig {
    /// HID channel identifier
    pub channel: u16,

    /// Maximum payload per streamed block (transaction data, outputs)
    pub chunk_size: usize,

    /// Optional per-request timeout, no timeout is applied by default
    /// as requests may await user confirmation indefinitely
    pub request_timeout: Option<Duration>,
}

impl Default for HandleConfig {
    fn default() -> Self {
        Self {
            channel: DEFAULT_CHANNEL,
            chunk_size: MAX_APDU_DATA,
            request_timeout: None,
        }
    }
}

/// Bitcoin handle for a connected ledger device.
///
/// This is generic over [Transport] types to support different
/// underlying transports / simulators. Handles are cheap to clone,
/// clones share the underlying device and disconnection state.
pub struct DeviceHandle<T: Transport> {
    /// Device transport, one exchange in flight at a time
    t: Arc<Mutex<T>>,
    /// Set once the device has disconnected, never cleared
    disconnected: Arc<AtomicBool>,
    /// Held for the duration of multi-command operations that use
    /// the device transaction context
    session: Arc<Mutex<()>>,
    framer: Framer,
    cfg: HandleConfig,
}

impl<T: Transport> Clone for DeviceHandle<T> {
    fn clone(&self) -> Self {
        Self {
            t: self.t.clone(),
            disconnected: self.disconnected.clone(),
            session: self.session.clone(),
            framer: self.framer,
            cfg: self.cfg.clone(),
        }
    }
}

/// Create a [DeviceHandle] wrapper from a type implementing [Transport]
impl<T: Transport> From<T> for DeviceHandle<T> {
    fn from(t: T) -> Self {
        Self::with_config(t, HandleConfig::default())
    }
}

impl<T: Transport> DeviceHandle<T> {
    /// Create a handle with the provided configuration
    pub fn with_config(t: T, mut cfg: HandleConfig) -> Self {
        let framer = Framer::new(cfg.channel, t.packet_len());

        // Blocks must fit a sequence number alongside script data
        cfg.chunk_size = cfg.chunk_size.clamp(MIN_CHUNK_SIZE, MAX_APDU_DATA);

        Self {
            t: Arc::new(Mutex::new(t)),
            disconnected: Arc::new(AtomicBool::new(false)),
            session: Arc::new(Mutex::new(())),
            framer,
            cfg,
        }
    }

    pub fn config(&self) -> &HandleConfig {
        &self.cfg
    }

    /// Check whether the device has been disconnected
    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    /// Acquire exclusive use of the device transaction context
    pub(crate) async fn session(&self) -> OwnedMutexGuard<()> {
        self.session.clone().lock_owned().await
    }

    /// Execute a single command, returning the device response.
    ///
    /// The exchange runs on a spawned task owning the device gate, so dropping
    /// this future once the gate is acquired does not abandon a partially
    /// written command. Dropping it while queued issues nothing.
    pub async fn execute(&self, cmd: ApduCommand) -> Result<ApduResponse, Error> {
        if self.is_disconnected() {
            return Err(Error::DeviceDisconnected);
        }

        let mut guard = self.t.clone().lock_owned().await;

        // Disconnection may have been observed while queued
        if self.is_disconnected() {
            return Err(Error::DeviceDisconnected);
        }

        let framer = self.framer;
        let disconnected = self.disconnected.clone();

        let task = tokio::spawn(async move {
            let r = framer.exchange(&mut *guard, &cmd).await;

            if let Err(Error::DeviceDisconnected) = &r {
                warn!("Device disconnected during {:02x} exchange", cmd.ins);
                disconnected.store(true, Ordering::SeqCst);
            }

            r
        });

        let r = match self.cfg.request_timeout {
            Some(d) => tokio::time::timeout(d, task).await?,
            None => task.await,
        };

        r.map_err(|_| Error::TaskAborted)?
    }

    /// Issue a typed request, checking the response status and decoding the payload
    pub async fn request<A, R>(&self, req: R) -> Result<A::Output, Error>
    where
        A: DecodeOwned<Error = ApduError>,
        R: ApduReq + Send,
    {
        let cmd = ApduCommand::from_req(&req)?;

        debug!("{} request ({} bytes)", R::INS, cmd.data.len());

        let resp = self.execute(cmd).await?;

        check_status::<R>(resp.status)?;

        let v = resp.decode::<A>()?;

        Ok(v)
    }

    /// Fetch device firmware version
    pub async fn firmware_version(&self) -> Result<FirmwareVersion, Error> {
        debug!("Requesting firmware version");

        self.request::<FirmwareVersion, _>(FirmwareVersionReq).await
    }

    /// Fetch the coin configured in the device application
    pub async fn coin_version(&self) -> Result<CoinVersion, Error> {
        debug!("Requesting coin version");

        self.request::<CoinVersion, _>(CoinVersionReq).await
    }

    /// Check the device application is configured for the expected coin
    pub async fn check_coin(&self, expected: CoinId) -> Result<CoinVersion, Error> {
        let v = self.coin_version().await?;

        if v.id != expected {
            return Err(Error::UnsupportedCoin {
                expected,
                actual: v.id,
            });
        }

        Ok(v)
    }

    /// Fetch the public key, address and chain code for a derivation path.
    ///
    /// With `confirm` set the device displays the address and this call
    /// blocks until the user approves or rejects it.
    pub async fn wallet_public_key(
        &self,
        path: &KeyPath,
        address_type: AddressType,
        confirm: bool,
    ) -> Result<WalletPublicKey, Error> {
        debug!(
            "Requesting public key for path: {} ({}, confirm: {})",
            path, address_type, confirm
        );

        let req = WalletPublicKeyReq::new(path.clone(), address_type, confirm);

        self.request::<WalletPublicKey, _>(req).await
    }

    /// Fetch the compressed public key for a derivation path
    pub async fn public_key(&self, path: &KeyPath) -> Result<secp256k1::PublicKey, Error> {
        let k = self
            .wallet_public_key(path, AddressType::Legacy, false)
            .await?;

        secp256k1::PublicKey::from_slice(&k.public_key).map_err(|_| Error::InvalidPublicKey)
    }

    /// Fetch the BIP-0032 extended public key for a derivation path
    pub async fn extended_public_key(
        &self,
        path: &KeyPath,
        network: NetworkKind,
    ) -> Result<Xpub, Error> {
        let k = self
            .wallet_public_key(path, AddressType::Legacy, false)
            .await?;
        let public_key =
            secp256k1::PublicKey::from_slice(&k.public_key).map_err(|_| Error::InvalidPublicKey)?;

        // Parent fingerprint is the first four bytes of HASH160(parent key)
        let parent_fingerprint = match path.parent() {
            Some(p) => {
                let parent = self.public_key(&p).await?;
                let h = hash160::Hash::hash(&parent.serialize()).to_byte_array();
                Fingerprint::from([h[0], h[1], h[2], h[3]])
            }
            None => Fingerprint::from([0u8; 4]),
        };

        Ok(Xpub {
            network,
            depth: path.len() as u8,
            parent_fingerprint,
            child_number: ChildNumber::from(path.last().unwrap_or(0)),
            public_key,
            chain_code: ChainCode::from(k.chain_code),
        })
    }
}

/// Map response status words to errors
pub(crate) fn check_status<R: ApduReq>(status: u16) -> Result<(), Error> {
    match StatusWord::try_from(status) {
        Ok(StatusWord::Ok) => Ok(()),
        Ok(StatusWord::ConditionsNotSatisfied) if R::CONFIRMABLE => Err(Error::UserRejected),
        _ => Err(Error::DeviceCommandFailed(status)),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn status_mapping() {
        assert!(check_status::<FirmwareVersionReq>(0x9000).is_ok());

        assert!(matches!(
            check_status::<WalletPublicKeyReq>(0x6985),
            Err(Error::UserRejected)
        ));
        assert!(matches!(
            check_status::<HashSignReq>(0x6985),
            Err(Error::UserRejected)
        ));

        // Not a confirmation prompt, so not a rejection
        assert!(matches!(
            check_status::<CoinVersionReq>(0x6985),
            Err(Error::DeviceCommandFailed(0x6985))
        ));
        assert!(matches!(
            check_status::<WalletPublicKeyReq>(0x6d00),
            Err(Error::DeviceCommandFailed(0x6d00))
        ));
        assert!(matches!(
            check_status::<FirmwareVersionReq>(0x1234),
            Err(Error::DeviceCommandFailed(0x1234))
        ));
    }

    #[test]
    fn default_config() {
        let c = HandleConfig::default();
        assert_eq!(c.channel, 0x0101);
        assert_eq!(c.chunk_size, 255);
        assert_eq!(c.request_timeout, None);
    }
}
