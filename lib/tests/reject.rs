// Copyright (c) 2022-2023 The MobileCoin Foundation

use bitcoin::{OutPoint, Transaction};

use ledger_btc::{
    apdu::prelude::*,
    tx::{Coin, SignOptions, SignatureRequest},
    DeviceHandle, Error,
};
use ledger_btc_sim::{Rejection, SimConfig, SimDevice};

mod helpers;
use helpers::*;

/// Single input legacy signing requests and spending transaction
fn legacy_tx(sim: &SimDevice) -> (Vec<SignatureRequest>, Transaction) {
    let p = path("44'/0'/0'/0/0");
    let funding = funding(0x21, &[(60_000, p2pkh(&sim.public_key(&p)))]);
    let spending = spending(&[OutPoint::new(funding.compute_txid(), 0)], &[55_000]);

    let requests = vec![SignatureRequest::legacy(&funding, 0, p).expect("missing output")];

    (requests, spending)
}

async fn sign_rejected(
    sim: &SimDevice,
    h: &DeviceHandle<SimDevice>,
) -> anyhow::Result<Vec<u8>> {
    let (requests, spending) = legacy_tx(sim);
    let original = spending.clone();

    let r = h
        .sign_transaction(&requests, &spending, None, &SignOptions::default())
        .await;

    assert!(matches!(r, Err(Error::UserRejected)), "unexpected result: {r:?}");

    // Caller transaction is untouched
    assert_eq!(spending, original);
    assert!(spending.input.iter().all(|i| i.script_sig.is_empty()));

    // Handle remains usable
    assert!(!h.is_disconnected());
    h.firmware_version().await?;

    Ok(sim.instructions())
}

#[tokio::test(flavor = "multi_thread")]
async fn reject_outputs() -> anyhow::Result<()> {
    let (sim, h) = setup(SimConfig {
        reject: Some(Rejection::Outputs),
        ..Default::default()
    });

    let instructions = sign_rejected(&sim, &h).await?;

    assert_eq!(count(&instructions, Instruction::HashSign), 0);
    assert!(sim.signed_paths().is_empty());

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn reject_sign() -> anyhow::Result<()> {
    let (sim, h) = setup(SimConfig {
        reject: Some(Rejection::Sign),
        ..Default::default()
    });

    let instructions = sign_rejected(&sim, &h).await?;

    // Stops at the first refused signature
    assert_eq!(count(&instructions, Instruction::HashSign), 1);
    assert!(sim.signed_paths().is_empty());

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn reject_segwit_partial() -> anyhow::Result<()> {
    let (sim, h) = setup(SimConfig {
        reject: Some(Rejection::Sign),
        ..Default::default()
    });

    let p = path("84'/0'/0'/0/0");
    let k = sim.public_key(&p);

    let funding = funding(0x22, &[(10_000, p2wpkh(&k)), (20_000, p2wpkh(&k))]);
    let coins = [Coin::from_tx(&funding, 0)?, Coin::from_tx(&funding, 1)?];
    let spending = spending(&[coins[0].outpoint, coins[1].outpoint], &[29_000]);

    let requests: Vec<_> = coins
        .iter()
        .map(|c| SignatureRequest::segwit(c.clone(), p.clone()))
        .collect();

    let r = h
        .sign_transaction(&requests, &spending, None, &SignOptions::default())
        .await;

    assert!(matches!(r, Err(Error::UserRejected)));
    assert!(spending.input.iter().all(|i| i.witness.is_empty()));

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn reject_address_display() -> anyhow::Result<()> {
    let (sim, h) = setup(SimConfig {
        reject: Some(Rejection::WalletPublicKey),
        ..Default::default()
    });

    let p = path("84'/0'/0'/0/3");

    assert!(matches!(
        h.wallet_public_key(&p, AddressType::NativeSegwit, true)
            .await,
        Err(Error::UserRejected)
    ));

    // Keys without display require no confirmation
    let k = h
        .wallet_public_key(&p, AddressType::NativeSegwit, false)
        .await?;
    assert_eq!(k.public_key, sim.public_key(&p).serialize_uncompressed().to_vec());

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn device_errors() -> anyhow::Result<()> {
    let (_sim, h) = setup(SimConfig::default());

    // Signing without an active transaction is refused, but is not a rejection
    let req = HashSignReq::new(path("44'/0'/0'/0/0"), 0, 0x01);
    let cmd = ApduCommand::from_req(&req).map_err(Error::from)?;
    let resp = h.execute(cmd).await?;
    assert_eq!(resp.status, StatusWord::InvalidData as u16);

    // Unknown instruction
    let cmd = ApduCommand {
        cla: 0xe0,
        ins: 0x02,
        p1: 0,
        p2: 0,
        data: vec![],
    };
    let resp = h.execute(cmd).await?;
    assert_eq!(resp.status, StatusWord::InsNotSupported as u16);

    Ok(())
}
