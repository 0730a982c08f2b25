// Copyright (c) 2022-2023 The MobileCoin Foundation

use std::time::Duration;

use bitcoin::hashes::Hash;
use log::info;

use ledger_btc::{
    apdu::prelude::*,
    transport::{FramingError, Transport},
    DeviceHandle, Error, HandleConfig,
};
use ledger_btc_sim::{SimConfig, SimDevice, Violation};

mod helpers;
use helpers::*;

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_requests() -> anyhow::Result<()> {
    let (sim, h) = setup(SimConfig::default());

    // Fifty requests from independent tasks, mixing commands
    let tasks: Vec<_> = (0..50)
        .map(|i| {
            let h = h.clone();
            let p = path(&format!("44'/0'/0'/0/{i}"));

            tokio::spawn(async move {
                match i % 5 {
                    0 => h.firmware_version().await.map(|_| None),
                    _ => h.public_key(&p).await.map(|k| Some((p.clone(), k))),
                }
            })
        })
        .collect();

    let results = futures::future::try_join_all(tasks).await?;

    // Every response matches its request
    let mut keys = 0;
    for r in results {
        if let Some((p, k)) = r? {
            assert_eq!(k, sim.public_key(&p), "response mismatch for {p}");
            keys += 1;
        }
    }
    assert_eq!(keys, 40);

    // Exactly one command per request, never interleaved on the wire
    let instructions = sim.instructions();
    assert_eq!(instructions.len(), 50);
    assert_eq!(count(&instructions, Instruction::GetFirmwareVersion), 10);
    assert_eq!(count(&instructions, Instruction::GetWalletPublicKey), 40);
    assert_eq!(sim.violations(), vec![]);

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_futures_single_task() -> anyhow::Result<()> {
    let (sim, h) = setup(SimConfig::default());

    let paths: Vec<_> = (0..20)
        .map(|i| path(&format!("84'/0'/{i}'/0/0")))
        .collect();

    let keys = futures::future::try_join_all(paths.iter().map(|p| h.public_key(p))).await?;

    for (p, k) in paths.iter().zip(keys) {
        assert_eq!(k, sim.public_key(p));
    }
    assert_eq!(sim.violations(), vec![]);

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn extended_public_key() -> anyhow::Result<()> {
    let (sim, h) = setup(SimConfig::default());

    let p = path("m/44'/0'/0'");
    let xpub = h
        .extended_public_key(&p, bitcoin::NetworkKind::Main)
        .await?;

    info!("xpub: {}", xpub);

    assert_eq!(xpub.public_key, sim.public_key(&p));
    assert_eq!(xpub.depth, 3);
    assert_eq!(
        xpub.child_number,
        bitcoin::bip32::ChildNumber::from_hardened_idx(0)?
    );

    // Parent fingerprint from the parent key
    let parent = bitcoin::PublicKey::new(sim.public_key(&path("44'/0'")));
    assert_eq!(
        xpub.parent_fingerprint.as_bytes(),
        &parent.pubkey_hash().as_byte_array()[..4]
    );

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn wallet_public_key_addresses() -> anyhow::Result<()> {
    let (sim, h) = setup(SimConfig::default());

    let p = path("84'/0'/0'/0/7");
    let k = bitcoin::CompressedPublicKey(sim.public_key(&p));

    let r = h
        .wallet_public_key(&p, AddressType::NativeSegwit, false)
        .await?;
    assert_eq!(
        r.address,
        bitcoin::Address::p2wpkh(&k, bitcoin::Network::Bitcoin).to_string()
    );
    assert_eq!(r.public_key.len(), 65);

    let r = h.wallet_public_key(&p, AddressType::Legacy, false).await?;
    assert!(r.address.starts_with('1'));

    let r = h.wallet_public_key(&p, AddressType::Segwit, false).await?;
    assert!(r.address.starts_with('3'));

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn coin_and_firmware() -> anyhow::Result<()> {
    let (_sim, h) = setup(SimConfig::default());

    let f = h.firmware_version().await?;
    assert!(f.at_least(2, 0, 0));

    let c = h.check_coin(CoinId::BITCOIN).await?;
    assert_eq!(c.ticker, "BTC");

    assert!(matches!(
        h.check_coin(CoinId::BITCOIN_TESTNET).await,
        Err(Error::UnsupportedCoin { .. })
    ));

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn boxed_transport() -> anyhow::Result<()> {
    let sim = SimDevice::new(SimConfig::default());
    let h = DeviceHandle::from(Box::new(sim.clone()) as Box<dyn Transport>);

    let v = h.coin_version().await?;
    assert_eq!(v.id, CoinId::BITCOIN);
    assert_eq!(sim.instructions(), vec![Instruction::GetCoinVersion as u8]);

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn channel_mismatch() -> anyhow::Result<()> {
    let (sim, h) = setup_with_config(
        SimConfig::default(),
        HandleConfig {
            channel: 0x0202,
            ..Default::default()
        },
    );

    // Device drops the command, leaving nothing to read
    assert!(matches!(
        h.firmware_version().await,
        Err(Error::Transport(_))
    ));
    assert_eq!(
        sim.violations(),
        vec![
            Violation::Framing(FramingError::ChannelMismatch {
                expected: 0x0101,
                actual: 0x0202
            }),
            Violation::ReadWithoutResponse,
        ]
    );
    assert!(!h.is_disconnected());

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn request_timeout() -> anyhow::Result<()> {
    let (sim, h) = setup_with_config(
        SimConfig {
            response_delay: Some(Duration::from_millis(200)),
            ..Default::default()
        },
        HandleConfig {
            request_timeout: Some(Duration::from_millis(20)),
            ..Default::default()
        },
    );

    assert!(matches!(
        h.firmware_version().await,
        Err(Error::RequestTimeout)
    ));

    // The abandoned exchange still completes on the wire
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(sim.log().len(), 1);
    assert_eq!(sim.io_attempts(), sim.io_count());
    assert_eq!(sim.violations(), vec![]);
    assert!(!h.is_disconnected());

    Ok(())
}
