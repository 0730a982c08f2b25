// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Simulated Bitcoin application
//!
//! [App] handles decoded APDU commands, tracking trusted input and
//! transaction hashing state the way the device application does.
//! Protocol misuse resets any hashing context and returns
//! [StatusWord::InvalidData], only scripted rejections return
//! [StatusWord::ConditionsNotSatisfied].

use std::mem;

use bitcoin::{
    absolute::LockTime,
    consensus::deserialize,
    hashes::Hash,
    sighash::{EcdsaSighashType, SighashCache},
    transaction::Version,
    Address, Amount, CompressedPublicKey, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut,
    Txid, Witness,
};
use log::{debug, warn};

use ledger_btc_apdu::{prelude::*, read_varint, DecodeOwned, Encode, BTC_APDU_CLA};

use crate::{keys::Keys, Rejection, SimConfig};

/// Simulated application state
pub struct App {
    cfg: SimConfig,
    keys: Keys,

    /// Previous transaction being streamed for a trusted input
    trusted: Option<TrustedInputState>,
    /// Active transaction hashing context
    ctx: Option<HashContext>,

    issued: Vec<Vec<u8>>,
    hashed: Vec<InputRecord>,
    signed: Vec<KeyPath>,
}

struct TrustedInputState {
    output_index: u32,
    data: Vec<u8>,
}

struct HashContext {
    segwit: bool,
    version: i32,
    input_count: usize,
    inputs: Vec<HashedInput>,
    parse: ParseState,
    change_path: Option<KeyPath>,
    outputs: Vec<u8>,
    tx_outputs: Option<Vec<TxOut>>,
    signed: usize,
}

struct HashedInput {
    outpoint: OutPoint,
    amount: Amount,
    script: ScriptBuf,
    sequence: Sequence,
}

enum ParseState {
    /// Awaiting an input header
    Record,
    /// Awaiting script and sequence bytes
    Script {
        outpoint: OutPoint,
        amount: Amount,
        remaining: usize,
        buff: Vec<u8>,
    },
}

impl HashContext {
    fn inputs_complete(&self) -> bool {
        self.inputs.len() == self.input_count && matches!(self.parse, ParseState::Record)
    }
}

impl App {
    pub fn new(cfg: SimConfig) -> Self {
        Self {
            keys: Keys::new(cfg.seed),
            cfg,
            trusted: None,
            ctx: None,
            issued: vec![],
            hashed: vec![],
            signed: vec![],
        }
    }

    pub fn keys(&self) -> &Keys {
        &self.keys
    }

    /// Trusted inputs returned to the host, in order
    pub fn issued(&self) -> &[Vec<u8>] {
        &self.issued
    }

    /// Input records received while hashing, in order
    pub fn hashed(&self) -> &[InputRecord] {
        &self.hashed
    }

    /// Paths used for signatures, in order
    pub fn signed(&self) -> &[KeyPath] {
        &self.signed
    }

    /// Handle a single command, returning the response
    pub fn handle(&mut self, cmd: &ApduCommand) -> ApduResponse {
        if cmd.cla != BTC_APDU_CLA {
            return ApduResponse::status(StatusWord::ClaNotSupported);
        }

        let ins = match Instruction::try_from(cmd.ins) {
            Ok(i) => i,
            Err(_) => return ApduResponse::status(StatusWord::InsNotSupported),
        };

        let r = match ins {
            Instruction::GetFirmwareVersion => encode(&self.cfg.firmware),
            Instruction::GetCoinVersion => encode(&self.cfg.coin),
            Instruction::GetWalletPublicKey => self.wallet_public_key(cmd),
            Instruction::GetTrustedInput => self.trusted_input(cmd),
            Instruction::HashInputStart => self.hash_input_start(cmd),
            Instruction::HashInputFinalizeFull => self.hash_input_finalize(cmd),
            Instruction::HashSign => self.hash_sign(cmd),
        };

        match r {
            Ok(data) => ApduResponse::new(StatusWord::Ok as u16, data),
            Err(sw) => {
                debug!("{} failed: {}", ins, sw);
                ApduResponse::status(sw)
            }
        }
    }

    fn wallet_public_key(&mut self, cmd: &ApduCommand) -> Result<Vec<u8>, StatusWord> {
        let req: WalletPublicKeyReq = cmd.to_req().map_err(status)?;

        if req.display && self.cfg.reject == Some(Rejection::WalletPublicKey) {
            debug!("Rejecting address display for {}", req.path);
            return Err(StatusWord::ConditionsNotSatisfied);
        }

        let path = req.path.indices();
        let public_key = self.keys.public_key(path);

        let k = CompressedPublicKey(public_key);
        let network = self.cfg.network;
        let address = match req.address_type {
            AddressType::Legacy => Address::p2pkh(k.pubkey_hash(), network),
            AddressType::Segwit => Address::p2shwpkh(&k, network),
            AddressType::NativeSegwit => Address::p2wpkh(&k, network),
        };

        encode(&WalletPublicKey {
            public_key: public_key.serialize_uncompressed().to_vec(),
            address: address.to_string(),
            chain_code: self.keys.chain_code(path),
        })
    }

    fn trusted_input(&mut self, cmd: &ApduCommand) -> Result<Vec<u8>, StatusWord> {
        let req: TrustedInputReq = cmd.to_req().map_err(status)?;

        let mut state = match (req.block, self.trusted.take()) {
            (BlockKind::First, _) => TrustedInputState {
                output_index: req.output_index().ok_or(StatusWord::WrongLength)?,
                data: vec![],
            },
            (BlockKind::Next, Some(s)) => s,
            (BlockKind::Next, None) => return Err(StatusWord::InvalidData),
        };

        state.data.extend_from_slice(req.tx_data());

        // Intermediate blocks return no data
        let tx = match deserialize::<Transaction>(&state.data) {
            Ok(tx) => tx,
            Err(_) => {
                self.trusted = Some(state);
                return Ok(vec![]);
            }
        };

        let txout = tx
            .output
            .get(state.output_index as usize)
            .ok_or(StatusWord::InvalidData)?;
        let txid = tx.compute_txid();

        debug!("Issuing trusted input for {}:{}", txid, state.output_index);

        let t = self.keys.trusted_input(
            txid.as_byte_array(),
            state.output_index,
            txout.value.to_sat(),
        );
        self.issued.push(t.clone());

        Ok(t)
    }

    fn hash_input_start(&mut self, cmd: &ApduCommand) -> Result<Vec<u8>, StatusWord> {
        let req: HashInputStartReq = cmd.to_req().map_err(status)?;

        let r = match req.block {
            BlockKind::First => self.start_transaction(&req),
            BlockKind::Next => self.hash_input_block(&req.data),
        };

        if r.is_err() {
            self.ctx = None;
        }

        r.map(|_| vec![])
    }

    fn start_transaction(&mut self, req: &HashInputStartReq) -> Result<(), StatusWord> {
        self.ctx = None;

        let segwit = match req.mode {
            StartMode::NewLegacy => false,
            StartMode::NewSegwit => true,
            StartMode::Continue => return Err(StatusWord::IncorrectParameters),
        };

        let v = req.data.get(..4).ok_or(StatusWord::WrongLength)?;
        let version = i32::from_le_bytes([v[0], v[1], v[2], v[3]]);
        let (input_count, _n) = read_varint(&req.data[4..]).map_err(status)?;

        debug!(
            "Starting {} transaction ({} inputs)",
            if segwit { "segwit" } else { "legacy" },
            input_count
        );

        self.ctx = Some(HashContext {
            segwit,
            version,
            input_count: input_count as usize,
            inputs: vec![],
            parse: ParseState::Record,
            change_path: None,
            outputs: vec![],
            tx_outputs: None,
            signed: 0,
        });

        Ok(())
    }

    fn hash_input_block(&mut self, mut data: &[u8]) -> Result<(), StatusWord> {
        let ctx = self.ctx.as_mut().ok_or(StatusWord::InvalidData)?;

        if let ParseState::Record = ctx.parse {
            if ctx.inputs.len() >= ctx.input_count || ctx.tx_outputs.is_some() {
                return Err(StatusWord::InvalidData);
            }

            let (header, n) = InputHeader::decode_owned(data).map_err(status)?;

            let (outpoint, amount) = match &header.record {
                InputRecord::Trusted(t) => {
                    let (txid, index, amount) = self.keys.open_trusted_input(t).ok_or_else(|| {
                        warn!("Rejecting unauthenticated trusted input");
                        StatusWord::InvalidData
                    })?;
                    (OutPoint::new(Txid::from_byte_array(txid), index), amount)
                }
                // Raw outpoints are only accepted for segwit digests
                InputRecord::Segwit { .. } if !ctx.segwit => {
                    return Err(StatusWord::InvalidData);
                }
                InputRecord::Segwit { outpoint, amount } => {
                    let o = deserialize::<OutPoint>(outpoint).map_err(|_| StatusWord::InvalidData)?;
                    (o, *amount)
                }
            };

            self.hashed.push(header.record);

            ctx.parse = ParseState::Script {
                outpoint,
                amount: Amount::from_sat(amount),
                remaining: header.script_len as usize + 4,
                buff: vec![],
            };
            data = &data[n..];
        }

        let done = match &mut ctx.parse {
            ParseState::Script {
                remaining, buff, ..
            } => {
                if data.len() > *remaining {
                    return Err(StatusWord::InvalidData);
                }

                buff.extend_from_slice(data);
                *remaining -= data.len();
                *remaining == 0
            }
            ParseState::Record => false,
        };

        if !done {
            return Ok(());
        }

        // Script is followed by the four byte sequence
        if let ParseState::Script {
            outpoint,
            amount,
            mut buff,
            ..
        } = mem::replace(&mut ctx.parse, ParseState::Record)
        {
            let s = buff.split_off(buff.len() - 4);

            ctx.inputs.push(HashedInput {
                outpoint,
                amount,
                script: ScriptBuf::from_bytes(buff),
                sequence: Sequence(u32::from_le_bytes([s[0], s[1], s[2], s[3]])),
            });
        }

        Ok(())
    }

    fn hash_input_finalize(&mut self, cmd: &ApduCommand) -> Result<Vec<u8>, StatusWord> {
        let req: HashInputFinalizeReq = cmd.to_req().map_err(status)?;

        let r = self.hash_outputs(req);
        if r.is_err() {
            self.ctx = None;
        }

        r
    }

    fn hash_outputs(&mut self, req: HashInputFinalizeReq) -> Result<Vec<u8>, StatusWord> {
        let ctx = self.ctx.as_mut().ok_or(StatusWord::InvalidData)?;

        if !ctx.inputs_complete() || ctx.tx_outputs.is_some() {
            return Err(StatusWord::InvalidData);
        }

        match req.block {
            FinalizeBlock::ChangePath => {
                if !ctx.outputs.is_empty() {
                    return Err(StatusWord::InvalidData);
                }

                let (p, _n) = KeyPath::decode_owned(&req.data).map_err(status)?;
                ctx.change_path = Some(p);

                Ok(vec![])
            }
            FinalizeBlock::More => {
                ctx.outputs.extend_from_slice(&req.data);
                Ok(vec![])
            }
            FinalizeBlock::Last => {
                ctx.outputs.extend_from_slice(&req.data);

                let outputs: Vec<TxOut> =
                    deserialize(&ctx.outputs).map_err(|_| StatusWord::InvalidData)?;

                if self.cfg.reject == Some(Rejection::Outputs) {
                    debug!("Rejecting {} outputs", outputs.len());
                    return Err(StatusWord::ConditionsNotSatisfied);
                }

                debug!(
                    "Outputs confirmed ({} outputs, change: {:?})",
                    outputs.len(),
                    ctx.change_path
                );
                ctx.tx_outputs = Some(outputs);

                encode(&HashInputFinalizeResp {
                    status: FinalizeStatus::Ready,
                })
            }
        }
    }

    fn hash_sign(&mut self, cmd: &ApduCommand) -> Result<Vec<u8>, StatusWord> {
        let req: HashSignReq = cmd.to_req().map_err(status)?;

        let r = self.sign_input(req);
        if r.is_err() {
            self.ctx = None;
        }

        r
    }

    fn sign_input(&mut self, req: HashSignReq) -> Result<Vec<u8>, StatusWord> {
        let ctx = self.ctx.as_mut().ok_or(StatusWord::InvalidData)?;

        let index = ctx.signed;
        let (outputs, input) = match (&ctx.tx_outputs, ctx.inputs.get(index)) {
            (Some(o), Some(i)) => (o.clone(), i),
            _ => return Err(StatusWord::InvalidData),
        };

        if self.cfg.reject == Some(Rejection::Sign) {
            debug!("Rejecting signature for input {}", index);
            return Err(StatusWord::ConditionsNotSatisfied);
        }

        let tx = Transaction {
            version: Version(ctx.version),
            lock_time: LockTime::from_consensus(req.lock_time),
            input: ctx
                .inputs
                .iter()
                .map(|i| TxIn {
                    previous_output: i.outpoint,
                    script_sig: ScriptBuf::new(),
                    sequence: i.sequence,
                    witness: Witness::new(),
                })
                .collect(),
            output: outputs,
        };

        let mut cache = SighashCache::new(&tx);
        let digest = match ctx.segwit {
            // Hashed script is the BIP-0143 script code
            true => {
                let sighash = EcdsaSighashType::from_standard(req.sighash as u32)
                    .map_err(|_| StatusWord::IncorrectParameters)?;
                cache
                    .p2wsh_signature_hash(index, &input.script, input.amount, sighash)
                    .map_err(|_| StatusWord::InvalidData)?
                    .to_byte_array()
            }
            false => cache
                .legacy_signature_hash(index, &input.script, req.sighash as u32)
                .map_err(|_| StatusWord::InvalidData)?
                .to_byte_array(),
        };

        let signature = self.keys.sign(req.path.indices(), digest);

        let mut der = signature.serialize_der().to_vec();
        if self.cfg.parity_signatures {
            der[0] = 0x31;
        }

        debug!("Signed input {} with path: {}", index, req.path);

        ctx.signed += 1;
        self.signed.push(req.path);

        encode(&DeviceSignature {
            der,
            sighash: Some(req.sighash),
        })
    }
}

/// Encode a response payload
fn encode<E: Encode<Error = ApduError>>(v: &E) -> Result<Vec<u8>, StatusWord> {
    let mut buff = vec![0u8; v.encode_len().map_err(status)?];
    let n = v.encode(&mut buff).map_err(status)?;
    buff.truncate(n);

    Ok(buff)
}

/// Map decode errors to status words
fn status(e: ApduError) -> StatusWord {
    match e {
        ApduError::InvalidLength => StatusWord::WrongLength,
        ApduError::InvalidParameter => StatusWord::IncorrectParameters,
        ApduError::InvalidInstruction => StatusWord::InsNotSupported,
        _ => StatusWord::InvalidData,
    }
}
