// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Block builders for streamed transaction data
//!
//! Previous transactions, spending inputs and spending outputs are too large
//! for a single APDU so are split on structural boundaries, with variable
//! length scripts further split to the configured chunk size.

use bitcoin::{consensus::serialize, Transaction};

use ledger_btc_apdu::{prelude::*, varint_len, write_varint, Encode};

use crate::Error;

/// Split a script into blocks, appending the sequence to the final block
/// where it fits. Empty scripts produce a single sequence block.
pub(crate) fn script_blocks(script: &[u8], sequence: u32, chunk_size: usize) -> Vec<Vec<u8>> {
    let sequence = sequence.to_le_bytes();

    let mut blocks: Vec<Vec<u8>> = script.chunks(chunk_size).map(|c| c.to_vec()).collect();

    match blocks.last_mut() {
        Some(b) if b.len() + sequence.len() <= chunk_size => b.extend_from_slice(&sequence),
        _ => blocks.push(sequence.to_vec()),
    }

    blocks
}

/// Build [TrustedInputReq] blocks streaming `tx` for output `output_index`.
///
/// Blocks are: version and input count, then per input the outpoint and
/// script length followed by script and sequence blocks, then the output
/// count, then per output the amount and script length followed by script
/// blocks, and finally the lock time.
pub fn trusted_input_blocks(
    tx: &Transaction,
    output_index: u32,
    chunk_size: usize,
) -> Vec<TrustedInputReq> {
    // First block includes a four byte output index
    let mut header = serialize(&tx.version);
    write_varint(&mut header, tx.input.len() as u64);

    let mut reqs = vec![TrustedInputReq::first(output_index, &header)];

    for txin in &tx.input {
        let script = txin.script_sig.as_bytes();

        let mut b = serialize(&txin.previous_output);
        write_varint(&mut b, script.len() as u64);
        reqs.push(TrustedInputReq::next(&b));

        for b in script_blocks(script, txin.sequence.0, chunk_size) {
            reqs.push(TrustedInputReq::next(&b));
        }
    }

    let mut b = Vec::with_capacity(varint_len(tx.output.len() as u64));
    write_varint(&mut b, tx.output.len() as u64);
    reqs.push(TrustedInputReq::next(&b));

    for txout in &tx.output {
        let script = txout.script_pubkey.as_bytes();

        let mut b = txout.value.to_sat().to_le_bytes().to_vec();
        write_varint(&mut b, script.len() as u64);
        reqs.push(TrustedInputReq::next(&b));

        for c in script.chunks(chunk_size) {
            reqs.push(TrustedInputReq::next(c));
        }
    }

    reqs.push(TrustedInputReq::next(
        &tx.lock_time.to_consensus_u32().to_le_bytes(),
    ));

    reqs
}

/// Build [HashInputStartReq] blocks for a single input, the input header
/// followed by script and sequence blocks
pub fn input_blocks(
    record: InputRecord,
    script: &[u8],
    sequence: u32,
    chunk_size: usize,
) -> Result<Vec<HashInputStartReq>, Error> {
    let header = InputHeader {
        record,
        script_len: script.len() as u64,
    };

    let mut b = vec![0u8; header.encode_len()?];
    let n = header.encode(&mut b)?;
    b.truncate(n);

    let mut reqs = vec![HashInputStartReq::next(b)];
    for b in script_blocks(script, sequence, chunk_size) {
        reqs.push(HashInputStartReq::next(b));
    }

    Ok(reqs)
}

/// Build [HashInputFinalizeReq] blocks streaming the outputs of `tx`,
/// preceded by the change path where provided
pub fn output_blocks(
    tx: &Transaction,
    change_path: Option<&KeyPath>,
    chunk_size: usize,
) -> Result<Vec<HashInputFinalizeReq>, Error> {
    let mut reqs = vec![];

    if let Some(p) = change_path {
        let mut b = vec![0u8; p.encode_len()?];
        let n = p.encode(&mut b)?;
        b.truncate(n);

        reqs.push(HashInputFinalizeReq::new(FinalizeBlock::ChangePath, b));
    }

    // Output count followed by consensus encoded outputs
    let outputs = serialize(&tx.output);

    let chunks: Vec<_> = outputs.chunks(chunk_size).collect();
    for (i, c) in chunks.iter().enumerate() {
        let block = match i + 1 == chunks.len() {
            true => FinalizeBlock::Last,
            false => FinalizeBlock::More,
        };
        reqs.push(HashInputFinalizeReq::new(block, c.to_vec()));
    }

    Ok(reqs)
}

#[cfg(test)]
mod test {
    use bitcoin::{
        absolute::LockTime, transaction::Version, Amount, OutPoint, ScriptBuf, Sequence, TxIn,
        TxOut, Witness,
    };

    use super::*;

    fn tx(script_len: usize, outputs: usize) -> Transaction {
        Transaction {
            version: Version::ONE,
            lock_time: LockTime::from_consensus(1),
            input: vec![TxIn {
                previous_output: OutPoint::null(),
                script_sig: ScriptBuf::from_bytes(vec![0x51; script_len]),
                sequence: Sequence(0xfffffffe),
                witness: Witness::new(),
            }],
            output: (0..outputs)
                .map(|i| TxOut {
                    value: Amount::from_sat(1000 * (i as u64 + 1)),
                    script_pubkey: ScriptBuf::from_bytes(vec![0x6a; 25]),
                })
                .collect(),
        }
    }

    #[test]
    fn sequence_appended_to_script() {
        let b = script_blocks(&[0x01, 0x02], 0xfffffffe, 255);
        assert_eq!(b, vec![vec![0x01, 0x02, 0xfe, 0xff, 0xff, 0xff]]);

        let b = script_blocks(&[], 0xffffffff, 255);
        assert_eq!(b, vec![vec![0xff; 4]]);
    }

    #[test]
    fn sequence_split_from_full_block() {
        let b = script_blocks(&[0xaa; 254], 1, 255);

        assert_eq!(b.len(), 2);
        assert_eq!(b[0].len(), 254);
        assert_eq!(b[1], vec![1, 0, 0, 0]);
    }

    #[test]
    fn trusted_input_blocks_reassemble() {
        let t = tx(300, 3);
        let reqs = trusted_input_blocks(&t, 2, 255);

        assert_eq!(reqs[0].block, BlockKind::First);
        assert_eq!(reqs[0].output_index(), Some(2));
        assert!(reqs[1..].iter().all(|r| r.block == BlockKind::Next));
        assert!(reqs.iter().all(|r| r.data.len() <= 255));

        // Streamed data is the legacy serialisation of the transaction
        let data: Vec<u8> = reqs.iter().flat_map(|r| r.tx_data().to_vec()).collect();
        assert_eq!(data, serialize(&t));

        // Lock time is carried alone in the final block
        assert_eq!(reqs.last().unwrap().tx_data(), &[1, 0, 0, 0]);
    }

    #[test]
    fn input_block_layout() {
        let reqs = input_blocks(InputRecord::Trusted(vec![0x32; 56]), &[0x76; 25], 1, 255).unwrap();

        assert_eq!(reqs.len(), 2);
        assert_eq!(&reqs[0].data[..2], &[0x01, 56]);
        assert_eq!(reqs[0].data[58], 25);
        assert_eq!(reqs[1].data.len(), 25 + 4);
    }

    #[test]
    fn output_blocks_mark_last() {
        let t = tx(0, 12);
        let change = KeyPath::try_from("1'/1").unwrap();

        let reqs = output_blocks(&t, Some(&change), 255).unwrap();

        assert_eq!(reqs[0].block, FinalizeBlock::ChangePath);
        assert_eq!(reqs.last().unwrap().block, FinalizeBlock::Last);
        assert!(reqs[1..reqs.len() - 1]
            .iter()
            .all(|r| r.block == FinalizeBlock::More));

        let data: Vec<u8> = reqs[1..].iter().flat_map(|r| r.data.clone()).collect();
        assert_eq!(data, serialize(&t.output));
    }

    #[test]
    fn single_output_block() {
        let reqs = output_blocks(&tx(0, 1), None, 255).unwrap();

        assert_eq!(reqs.len(), 1);
        assert_eq!(reqs[0].block, FinalizeBlock::Last);
    }
}
