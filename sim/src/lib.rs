// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Simulated Bitcoin ledger device
//!
//! [SimDevice] implements [Transport] in-process, reassembling framed
//! commands and answering them from a seeded key set. Clones share the
//! same device, so tests can hand one to a
//! [DeviceHandle][ledger_btc::DeviceHandle] and inspect the command log,
//! protocol violations and transport activity through another.
//!
//! ```no_run
//! # async fn example() -> anyhow::Result<()> {
//! use ledger_btc::{apdu::prelude::KeyPath, DeviceHandle};
//! use ledger_btc_sim::{SimConfig, SimDevice};
//!
//! let sim = SimDevice::new(SimConfig::default());
//! let h = DeviceHandle::from(sim.clone());
//!
//! let path = KeyPath::try_from("44'/0'/0'/0/0").unwrap();
//! assert_eq!(h.public_key(&path).await?, sim.public_key(&path));
//! # Ok(())
//! # }
//! ```

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use async_trait::async_trait;
use bitcoin::{secp256k1::PublicKey, Network};
use log::{trace, warn};

use ledger_btc::transport::{
    Framer, FramingError, Reassembler, Transport, TransportError, DEFAULT_CHANNEL, HID_PACKET_LEN,
};
use ledger_btc_apdu::prelude::*;

mod app;
use app::App;

mod keys;
pub use keys::TRUSTED_INPUT_LEN;

/// Simulated device configuration
#[derive(Clone, Debug)]
pub struct SimConfig {
    /// Seed for key derivation and trusted input authentication
    pub seed: [u8; 32],
    /// Network for displayed addresses
    pub network: Network,
    /// Coin reported by the application
    pub coin: CoinVersion,
    /// Firmware reported by the device
    pub firmware: FirmwareVersion,
    /// Scripted user rejection
    pub reject: Option<Rejection>,
    /// Disconnect once this many commands have been answered
    pub disconnect_after: Option<usize>,
    /// Delay prior to each packet read
    pub response_delay: Option<Duration>,
    /// Return signatures with the `0x31` parity prefix
    pub parity_signatures: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: [0x42; 32],
            network: Network::Bitcoin,
            coin: CoinVersion {
                id: CoinId::BITCOIN,
                name: "Bitcoin".to_string(),
                ticker: "BTC".to_string(),
            },
            firmware: FirmwareVersion::new(FirmwareFlags::SCREEN_AND_BUTTONS, 0x30, (2, 1, 0)),
            reject: None,
            disconnect_after: None,
            response_delay: None,
            parity_signatures: false,
        }
    }
}

/// User prompt to reject
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Rejection {
    /// Address display for [WalletPublicKeyReq] with display set
    WalletPublicKey,
    /// Output confirmation on the final [HashInputFinalizeReq] block
    Outputs,
    /// Signature approval for [HashSignReq]
    Sign,
}

/// Protocol violations observed by the device
#[derive(Clone, Debug, PartialEq)]
pub enum Violation {
    /// Command packet written before the previous response was read
    WriteWhileResponsePending,
    /// Packet read with no response pending
    ReadWithoutResponse,
    /// Malformed command packet
    Framing(FramingError),
}

/// Simulated device, see [module docs][crate]
#[derive(Clone)]
pub struct SimDevice {
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    app: App,
    framer: Framer,
    reassembler: Reassembler,
    pending: VecDeque<Vec<u8>>,

    log: Vec<ApduCommand>,
    violations: Vec<Violation>,
    io_attempts: usize,
    io_count: usize,

    answered: usize,
    disconnect_after: Option<usize>,
    response_delay: Option<Duration>,
    disconnected: bool,
}

impl SimDevice {
    pub fn new(cfg: SimConfig) -> Self {
        let framer = Framer::new(DEFAULT_CHANNEL, HID_PACKET_LEN);

        let inner = Inner {
            framer,
            reassembler: framer.reassembler(),
            pending: VecDeque::new(),
            log: vec![],
            violations: vec![],
            io_attempts: 0,
            io_count: 0,
            answered: 0,
            disconnect_after: cfg.disconnect_after,
            response_delay: cfg.response_delay,
            disconnected: false,
            app: App::new(cfg),
        };

        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Commands received, in order
    pub fn log(&self) -> Vec<ApduCommand> {
        self.inner().log.clone()
    }

    /// Instruction codes received, in order
    pub fn instructions(&self) -> Vec<u8> {
        self.inner().log.iter().map(|c| c.ins).collect()
    }

    /// Clear the command log
    pub fn clear_log(&self) {
        self.inner().log.clear()
    }

    pub fn violations(&self) -> Vec<Violation> {
        self.inner().violations.clone()
    }

    /// Packet reads and writes attempted, including those failed by disconnection
    pub fn io_attempts(&self) -> usize {
        self.inner().io_attempts
    }

    /// Packet reads and writes completed
    pub fn io_count(&self) -> usize {
        self.inner().io_count
    }

    /// Disconnect the device, failing all further packet I/O
    pub fn disconnect(&self) {
        self.inner().disconnected = true;
    }

    pub fn is_disconnected(&self) -> bool {
        self.inner().disconnected
    }

    /// Trusted inputs returned to the host, in order
    pub fn issued_trusted_inputs(&self) -> Vec<Vec<u8>> {
        self.inner().app.issued().to_vec()
    }

    /// Input records received while hashing, in order
    pub fn hashed_records(&self) -> Vec<InputRecord> {
        self.inner().app.hashed().to_vec()
    }

    /// Paths used for signatures, in order
    pub fn signed_paths(&self) -> Vec<KeyPath> {
        self.inner().app.signed().to_vec()
    }

    /// Public key the device derives for a path
    pub fn public_key(&self, path: &KeyPath) -> PublicKey {
        self.inner().app.keys().public_key(path.indices())
    }
}

#[async_trait]
impl Transport for SimDevice {
    async fn write_packet(&mut self, packet: &[u8]) -> Result<(), TransportError> {
        tokio::task::yield_now().await;

        self.inner().write(packet)
    }

    async fn read_packet(&mut self) -> Result<Vec<u8>, TransportError> {
        let delay = self.inner().response_delay;
        match delay {
            Some(d) => tokio::time::sleep(d).await,
            None => tokio::task::yield_now().await,
        }

        self.inner().read()
    }
}

impl Inner {
    fn write(&mut self, packet: &[u8]) -> Result<(), TransportError> {
        self.io_attempts += 1;

        if let Some(n) = self.disconnect_after {
            if self.answered >= n && !self.disconnected {
                warn!("Disconnecting after {} commands", n);
                self.disconnected = true;
            }
        }
        if self.disconnected {
            return Err(TransportError::Disconnected);
        }

        self.io_count += 1;

        if !self.pending.is_empty() {
            warn!("Command written with response pending");
            self.violations.push(Violation::WriteWhileResponsePending);
        }

        let message = match self.reassembler.push(packet) {
            Ok(Some(m)) => m,
            Ok(None) => return Ok(()),
            Err(e) => {
                warn!("Command framing error: {}", e);
                self.violations.push(Violation::Framing(e));
                self.reassembler = self.framer.reassembler();
                return Ok(());
            }
        };

        let resp = match ApduCommand::parse(&message) {
            Ok(cmd) => {
                trace!("command {:02x} ({} bytes)", cmd.ins, cmd.data.len());

                let resp = self.app.handle(&cmd);
                self.log.push(cmd);
                resp
            }
            Err(_) => ApduResponse::status(StatusWord::WrongLength),
        };

        match self.framer.encode(&resp.to_bytes()) {
            Ok(p) => self.pending.extend(p),
            Err(e) => self.violations.push(Violation::Framing(e)),
        }
        self.answered += 1;

        Ok(())
    }

    fn read(&mut self) -> Result<Vec<u8>, TransportError> {
        self.io_attempts += 1;

        if self.disconnected {
            return Err(TransportError::Disconnected);
        }

        self.io_count += 1;

        match self.pending.pop_front() {
            Some(p) => Ok(p),
            None => {
                warn!("Read with no response pending");
                self.violations.push(Violation::ReadWithoutResponse);

                Err(TransportError::Io(std::io::Error::new(
                    std::io::ErrorKind::WouldBlock,
                    "no response pending",
                )))
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn firmware_exchange() {
        let mut sim = SimDevice::new(SimConfig::default());
        let framer = Framer::default();

        let cmd = ApduCommand::from_req(&FirmwareVersionReq).unwrap();
        let resp = framer.exchange(&mut sim, &cmd).await.unwrap();

        assert!(resp.is_ok());
        assert_eq!(resp.decode::<FirmwareVersion>().unwrap().major, 2);
        assert_eq!(sim.instructions(), vec![0xc4]);
        assert!(sim.violations().is_empty());
    }

    #[tokio::test]
    async fn read_without_command() {
        let mut sim = SimDevice::new(SimConfig::default());

        assert!(matches!(sim.read_packet().await, Err(TransportError::Io(_))));
        assert_eq!(sim.violations(), vec![Violation::ReadWithoutResponse]);
    }

    #[tokio::test]
    async fn disconnect_after_commands() {
        let mut sim = SimDevice::new(SimConfig {
            disconnect_after: Some(1),
            ..Default::default()
        });
        let framer = Framer::default();
        let cmd = ApduCommand::from_req(&CoinVersionReq).unwrap();

        assert!(framer.exchange(&mut sim, &cmd).await.is_ok());
        assert!(framer.exchange(&mut sim, &cmd).await.is_err());

        assert!(sim.is_disconnected());
        assert_eq!(sim.log().len(), 1);
    }
}
