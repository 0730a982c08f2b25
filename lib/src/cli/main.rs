// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Command line utility for interacting with the Ledger Bitcoin application

use std::time::Duration;

use bitcoin::{
    bip32::Xpub, consensus::serialize, sighash::EcdsaSighashType, NetworkKind, Transaction,
};
use clap::Parser;
use log::{debug, error, info, LevelFilter};

use ledger_btc::{
    apdu::prelude::*,
    transport::HidTransport,
    tx::{Coin, SignOptions},
    Connect, DeviceHandle, Error, HandleConfig, LedgerProvider,
};

mod helpers;
use helpers::*;

/// Ledger command line utility
#[derive(Clone, PartialEq, Debug, Parser)]
struct Options {
    /// Device index (where more than one device is available)
    #[clap(long, default_value = "0")]
    device_index: usize,

    /// Per-request timeout in seconds, requests awaiting confirmation wait indefinitely by default
    #[clap(long)]
    timeout: Option<u64>,

    /// Subcommand to execute
    #[clap(subcommand)]
    cmd: Actions,

    /// Enable verbose logging
    #[clap(long, default_value = "info")]
    log_level: LevelFilter,
}

#[derive(Clone, PartialEq, Debug, Parser)]
#[non_exhaustive]
enum Actions {
    /// List available devices
    List,

    /// Fetch device firmware version
    Firmware,

    /// Fetch the coin configured in the device application
    CoinVersion,

    /// Fetch the public key and address for a derivation path
    PublicKey {
        /// BIP-0032 derivation path
        #[clap(long, value_parser = parse_path)]
        path: KeyPath,

        /// Address type to derive
        #[clap(long, default_value = "native-segwit")]
        address_type: AddressType,

        /// Display the address on the device and await confirmation
        #[clap(long)]
        confirm: bool,
    },

    /// Fetch the extended public key for a derivation path
    Xpub {
        /// BIP-0032 derivation path
        #[clap(long, value_parser = parse_path)]
        path: KeyPath,

        /// Encode for test networks
        #[clap(long)]
        testnet: bool,
    },

    /// Fetch a trusted input for an output of a previous transaction
    TrustedInput {
        /// Hex encoded previous transaction
        #[clap(long, value_parser = parse_tx)]
        tx: Transaction,

        /// Output index
        #[clap(long)]
        output_index: u32,
    },

    /// Sign a transaction spending outputs controlled by a single key
    Sign {
        /// Hex encoded spending transaction
        #[clap(long, value_parser = parse_tx)]
        tx: Transaction,

        /// Hex encoded funding transactions, one per spent transaction
        #[clap(long, value_parser = parse_tx)]
        funding: Vec<Transaction>,

        /// BIP-0032 derivation path for the spending key
        #[clap(long, value_parser = parse_path)]
        path: KeyPath,

        /// Derivation path for the change output
        #[clap(long, value_parser = parse_path)]
        change_path: Option<KeyPath>,

        /// Sign segwit outputs using BIP-0143 digests (without trusted inputs)
        #[clap(long)]
        segwit: bool,

        /// Check the device is configured for testnet prior to signing
        #[clap(long)]
        testnet: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let args = Options::parse();

    // Setup logging
    simplelog::SimpleLogger::init(args.log_level, simplelog::Config::default())?;

    // Connect to ledger device
    let p = LedgerProvider::new()?;

    // List available devices
    let devices = p.list_devices();
    if devices.is_empty() {
        return Err(Error::NoDevice.into());
    }

    // Handle list command
    if args.cmd == Actions::List {
        info!("Devices:");
        for (i, d) in devices.iter().enumerate() {
            info!("  {}: {}", i, d);
        }

        return Ok(());
    }

    // Select device by index
    let info = devices.get(args.device_index).ok_or_else(|| {
        anyhow::anyhow!(
            "Invalid device index: {} (max: {})",
            args.device_index,
            devices.len() - 1
        )
    })?;

    debug!("Using device {}: {}", args.device_index, info);

    let cfg = HandleConfig {
        request_timeout: args.timeout.map(Duration::from_secs),
        ..Default::default()
    };

    // Connect to device
    let t = match p.connect(info, cfg).await {
        Ok(v) => v,
        Err(e) => {
            error!("Failed to connect to device: {}", info);
            return Err(e.into());
        }
    };

    // Execute command
    execute(t, args.cmd).await?;

    Ok(())
}

/// Execute a command with the provided device handle
async fn execute(t: DeviceHandle<HidTransport>, cmd: Actions) -> anyhow::Result<()> {
    debug!("Executing command: {:?}", cmd);

    match cmd {
        Actions::Firmware => {
            let f = t.firmware_version().await?;

            info!("firmware: {:#?}", f);
        }
        Actions::CoinVersion => {
            let c = t.coin_version().await?;

            info!("coin: {} ({})", c.name, c.ticker);
            info!("address versions: p2pkh {:02x} p2sh {:02x}", c.id.p2pkh, c.id.p2sh);
        }
        Actions::PublicKey {
            path,
            address_type,
            confirm,
        } => {
            if confirm {
                info!("Confirm address on device");
            }

            let k = t.wallet_public_key(&path, address_type, confirm).await?;

            info!("public key: {}", hex::encode(&k.public_key));
            info!("address: {}", k.address);
            info!("chain code: {}", hex::encode(k.chain_code));
        }
        Actions::Xpub { path, testnet } => {
            let network = match testnet {
                true => NetworkKind::Test,
                false => NetworkKind::Main,
            };

            let xpub: Xpub = t.extended_public_key(&path, network).await?;

            info!("xpub: {}", xpub);
        }
        Actions::TrustedInput { tx, output_index } => {
            info!(
                "requesting trusted input for {}:{}",
                tx.compute_txid(),
                output_index
            );

            let r = t.trusted_input(&tx, output_index).await?;

            info!("trusted input: {}", hex::encode(r.as_bytes()));
        }
        Actions::Sign {
            tx,
            funding,
            path,
            change_path,
            segwit,
            testnet,
        } => {
            // Resolve spent coins from funding transactions
            let mut coins = Vec::with_capacity(tx.input.len());
            for i in &tx.input {
                let o = i.previous_output;
                let f = funding
                    .iter()
                    .find(|f| f.compute_txid() == o.txid)
                    .ok_or_else(|| anyhow::anyhow!("Missing funding transaction for {}", o))?;

                coins.push(Coin::from_tx(f, o.vout)?);
            }

            let opts = SignOptions {
                sighash: EcdsaSighashType::All,
                expected_coin: Some(match testnet {
                    true => CoinId::BITCOIN_TESTNET,
                    false => CoinId::BITCOIN,
                }),
            };

            // Segwit coins are hashed with their amounts rather than funding transactions
            let funding = match segwit {
                true => vec![],
                false => funding,
            };

            info!("Confirm outputs and signing on device");

            let signed = t
                .sign_transaction_with_coins(
                    &path,
                    &coins,
                    &funding,
                    &tx,
                    change_path.as_ref(),
                    &opts,
                )
                .await?;

            info!("txid: {}", signed.compute_txid());
            info!("signed: {}", hex::encode(serialize(&signed)));
        }
        _ => unreachable!(),
    }

    Ok(())
}
