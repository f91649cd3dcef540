// Wallet-level libraries for bitcoin protocol by LNP/BP Association
//
// Written in 2020-2022 by
//     Dr. Maxim Orlovsky <orlovsky@lnp-bp.org>
//
// This software is distributed without any warranty.
//
// You should have received a copy of the Apache-2.0 License
// along with this software.
// If not, see <https://opensource.org/licenses/Apache-2.0>.

//! BIP-174/PSET key-value wire codec. Containers are parsed into the
//! version-2 field model; unknown keys are preserved verbatim so that
//! re-serialization round-trips bit-exactly.

use std::collections::BTreeMap;
use std::io::{Cursor, Read};

use bitcoin::consensus::encode::{Decodable, Encodable, VarInt};
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::PublicKey;
use bitcoin::util::bip32::{ChildNumber, DerivationPath, Fingerprint, KeySource};
use bitcoin::{Script, Txid};

use crate::{
    FieldMap, Input, Output, Psbt, PsbtError, PsbtVersion, RawKey, Tx, TxOutExt, WireError,
    PSET_OUT_BLINDER_INDEX,
};

const PSBT_MAGIC: [u8; 5] = *b"psbt\xff";
const PSET_MAGIC: [u8; 5] = *b"pset\xff";

const PROPRIETARY_TYPE: u64 = 0xfc;
const PSET_IDENTIFIER: &[u8] = b"pset";

const GLOBAL_UNSIGNED_TX: u64 = 0x00;
const GLOBAL_TX_VERSION: u64 = 0x02;
const GLOBAL_FALLBACK_LOCKTIME: u64 = 0x03;
const GLOBAL_INPUT_COUNT: u64 = 0x04;
const GLOBAL_OUTPUT_COUNT: u64 = 0x05;
const GLOBAL_VERSION: u64 = 0xfb;

const IN_NON_WITNESS_UTXO: u64 = 0x00;
const IN_WITNESS_UTXO: u64 = 0x01;
const IN_SIGHASH_TYPE: u64 = 0x03;
const IN_BIP32_DERIVATION: u64 = 0x06;
const IN_FINAL_SCRIPTSIG: u64 = 0x07;
const IN_FINAL_SCRIPTWITNESS: u64 = 0x08;
const IN_PREVIOUS_TXID: u64 = 0x0e;
const IN_OUTPUT_INDEX: u64 = 0x0f;
const IN_SEQUENCE: u64 = 0x10;

/// PSET proprietary subtag carrying the input explicit value.
const PSET_IN_EXPLICIT_VALUE: u8 = 0x11;

const OUT_BIP32_DERIVATION: u64 = 0x02;
const OUT_AMOUNT: u64 = 0x03;
const OUT_SCRIPT: u64 = 0x04;

// The two BIP-174 input script tags routed into `psbt_fields`
const IN_REDEEM_SCRIPT: u64 = crate::PSBT_IN_REDEEM_SCRIPT as u64;
const IN_WITNESS_SCRIPT: u64 = crate::PSBT_IN_WITNESS_SCRIPT as u64;

struct Reader<'data> {
    cursor: Cursor<&'data [u8]>,
}

impl<'data> Reader<'data> {
    fn new(data: &'data [u8]) -> Self {
        Reader {
            cursor: Cursor::new(data),
        }
    }

    fn is_empty(&self) -> bool {
        self.cursor.position() >= self.cursor.get_ref().len() as u64
    }

    fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>, WireError> {
        let mut buf = vec![0u8; len];
        self.cursor
            .read_exact(&mut buf)
            .map_err(|_| WireError::UnexpectedEof)?;
        Ok(buf)
    }

    fn read_varint(&mut self) -> Result<u64, WireError> {
        VarInt::consensus_decode(&mut self.cursor)
            .map(|v| v.0)
            .map_err(|_| WireError::UnexpectedEof)
    }

    /// Reads one key-value pair; `None` denotes the 0x00 map separator.
    fn read_kv(&mut self) -> Result<Option<(u64, Vec<u8>, Vec<u8>)>, WireError> {
        let key_len = self.read_varint()? as usize;
        if key_len == 0 {
            return Ok(None);
        }
        let key = self.read_bytes(key_len)?;
        let mut key_reader = Reader::new(&key);
        let type_value = key_reader.read_varint()?;
        let key_data = key[key_reader.cursor.position() as usize..].to_vec();

        let value_len = self.read_varint()? as usize;
        let value = self.read_bytes(value_len)?;
        Ok(Some((type_value, key_data, value)))
    }
}

fn write_varint(buf: &mut Vec<u8>, n: u64) {
    VarInt(n)
        .consensus_encode(buf)
        .expect("in-memory writes are infallible");
}

fn write_kv(buf: &mut Vec<u8>, type_value: u64, key_data: &[u8], value: &[u8]) {
    let mut key = Vec::with_capacity(9 + key_data.len());
    write_varint(&mut key, type_value);
    key.extend_from_slice(key_data);
    write_varint(buf, key.len() as u64);
    buf.extend_from_slice(&key);
    write_varint(buf, value.len() as u64);
    buf.extend_from_slice(value);
}

fn pset_key_data(subtag: u8) -> Vec<u8> {
    let mut key_data = Vec::with_capacity(PSET_IDENTIFIER.len() + 2);
    write_varint(&mut key_data, PSET_IDENTIFIER.len() as u64);
    key_data.extend_from_slice(PSET_IDENTIFIER);
    write_varint(&mut key_data, subtag as u64);
    key_data
}

/// Splits a proprietary key into its identifier and subtag; `None` when the
/// identifier is not `pset` (or the subtag carries extra key data).
fn parse_pset_subtag(key_data: &[u8]) -> Option<u8> {
    let mut reader = Reader::new(key_data);
    let ident_len = reader.read_varint().ok()? as usize;
    let ident = reader.read_bytes(ident_len).ok()?;
    if ident != PSET_IDENTIFIER {
        return None;
    }
    let subtag = reader.read_varint().ok()?;
    if !reader.is_empty() || subtag > u8::MAX as u64 {
        return None;
    }
    Some(subtag as u8)
}

fn parse_u32(field: &'static str, value: &[u8]) -> Result<u32, WireError> {
    let bytes: [u8; 4] = value
        .try_into()
        .map_err(|_| WireError::InvalidFieldLength(field, value.len()))?;
    Ok(u32::from_le_bytes(bytes))
}

fn parse_u64(field: &'static str, value: &[u8]) -> Result<u64, WireError> {
    let bytes: [u8; 8] = value
        .try_into()
        .map_err(|_| WireError::InvalidFieldLength(field, value.len()))?;
    Ok(u64::from_le_bytes(bytes))
}

fn parse_varint_value(field: &'static str, value: &[u8]) -> Result<u64, WireError> {
    let mut reader = Reader::new(value);
    let n = reader.read_varint()?;
    if !reader.is_empty() {
        return Err(WireError::InvalidFieldLength(field, value.len()));
    }
    Ok(n)
}

fn serialize_key_source(source: &KeySource) -> Vec<u8> {
    let (fingerprint, path) = source;
    let mut value = fingerprint.as_bytes().to_vec();
    for child in path {
        value.extend_from_slice(&u32::from(*child).to_le_bytes());
    }
    value
}

fn parse_keypath(key_data: &[u8], value: &[u8]) -> Result<(PublicKey, KeySource), WireError> {
    let pubkey = PublicKey::from_slice(key_data).map_err(|_| WireError::InvalidPublicKey)?;
    if value.len() < 4 || value.len() % 4 != 0 {
        return Err(WireError::InvalidKeypath);
    }
    let fingerprint = Fingerprint::from(&value[..4]);
    let path: DerivationPath = value[4..]
        .chunks(4)
        .map(|chunk| {
            ChildNumber::from(u32::from_le_bytes(
                chunk.try_into().expect("chunks of four bytes"),
            ))
        })
        .collect::<Vec<_>>()
        .into();
    Ok((pubkey, (fingerprint, path)))
}

fn serialize_witness_stack(stack: &[Vec<u8>]) -> Vec<u8> {
    let mut buf = Vec::new();
    write_varint(&mut buf, stack.len() as u64);
    for item in stack {
        write_varint(&mut buf, item.len() as u64);
        buf.extend_from_slice(item);
    }
    buf
}

fn parse_witness_stack(value: &[u8]) -> Result<Vec<Vec<u8>>, WireError> {
    let mut reader = Reader::new(value);
    let count = reader.read_varint()? as usize;
    let mut stack = Vec::with_capacity(count);
    for _ in 0..count {
        let len = reader.read_varint()? as usize;
        stack.push(reader.read_bytes(len)?);
    }
    if !reader.is_empty() {
        return Err(WireError::InvalidFieldLength("final script witness", value.len()));
    }
    Ok(stack)
}

fn insert_unknown(
    map_name: &'static str,
    unknown: &mut BTreeMap<RawKey, Vec<u8>>,
    type_value: u64,
    key_data: Vec<u8>,
    value: Vec<u8>,
) -> Result<(), WireError> {
    let key = RawKey {
        type_value,
        key_data,
    };
    if unknown.insert(key, value).is_some() {
        return Err(WireError::DuplicateKey(map_name, type_value));
    }
    Ok(())
}

struct Globals {
    is_liquid: bool,
    version: u32,
    unsigned_tx: Option<Tx>,
    tx_version: Option<u32>,
    fallback_locktime: Option<u32>,
    input_count: Option<usize>,
    output_count: Option<usize>,
    unknown: BTreeMap<RawKey, Vec<u8>>,
}

fn parse_globals(reader: &mut Reader, is_liquid: bool) -> Result<Globals, PsbtError> {
    let mut globals = Globals {
        is_liquid,
        version: 0,
        unsigned_tx: None,
        tx_version: None,
        fallback_locktime: None,
        input_count: None,
        output_count: None,
        unknown: bmap! {},
    };
    let mut version = None;

    while let Some((type_value, key_data, value)) = reader.read_kv()? {
        match type_value {
            GLOBAL_UNSIGNED_TX if key_data.is_empty() => {
                if is_liquid {
                    return Err(WireError::UnsignedTxInV2.into());
                }
                if globals.unsigned_tx.is_some() {
                    return Err(WireError::DuplicateKey("global", type_value).into());
                }
                globals.unsigned_tx = Some(Tx::from_bytes(&value, false)?);
            }
            GLOBAL_TX_VERSION if key_data.is_empty() => {
                if globals.tx_version.is_some() {
                    return Err(WireError::DuplicateKey("global", type_value).into());
                }
                globals.tx_version = Some(parse_u32("global tx version", &value)?);
            }
            GLOBAL_FALLBACK_LOCKTIME if key_data.is_empty() => {
                if globals.fallback_locktime.is_some() {
                    return Err(WireError::DuplicateKey("global", type_value).into());
                }
                globals.fallback_locktime = Some(parse_u32("fallback locktime", &value)?);
            }
            GLOBAL_INPUT_COUNT if key_data.is_empty() => {
                if globals.input_count.is_some() {
                    return Err(WireError::DuplicateKey("global", type_value).into());
                }
                globals.input_count = Some(parse_varint_value("input count", &value)? as usize);
            }
            GLOBAL_OUTPUT_COUNT if key_data.is_empty() => {
                if globals.output_count.is_some() {
                    return Err(WireError::DuplicateKey("global", type_value).into());
                }
                globals.output_count =
                    Some(parse_varint_value("output count", &value)? as usize);
            }
            GLOBAL_VERSION if key_data.is_empty() => {
                if version.is_some() {
                    return Err(WireError::DuplicateKey("global", type_value).into());
                }
                version = Some(parse_u32("psbt version", &value)?);
            }
            _ => insert_unknown("global", &mut globals.unknown, type_value, key_data, value)?,
        }
    }
    globals.version = version.unwrap_or(0);
    Ok(globals)
}

/// Txid, vout and sequence of a global-transaction input (version 0).
type TxinFields = (Txid, u32, u32);

fn parse_input(
    reader: &mut Reader,
    index: usize,
    is_liquid: bool,
    v0_txin: Option<TxinFields>,
) -> Result<Input, PsbtError> {
    let is_v0 = v0_txin.is_some();
    let mut previous_txid = None;
    let mut previous_vout = None;
    let mut sequence = None;
    let mut input = Input::new(index, Txid::all_zeros(), 0);

    while let Some((type_value, key_data, value)) = reader.read_kv()? {
        match type_value {
            IN_NON_WITNESS_UTXO if key_data.is_empty() => {
                if input.non_witness_utxo.is_some() {
                    return Err(WireError::DuplicateKey("input", type_value).into());
                }
                input.non_witness_utxo = Some(Tx::from_bytes(&value, is_liquid)?);
            }
            IN_WITNESS_UTXO if key_data.is_empty() => {
                if input.witness_utxo.is_some() {
                    return Err(WireError::DuplicateKey("input", type_value).into());
                }
                input.witness_utxo = Some(TxOutExt::from_bytes(&value, is_liquid)?);
            }
            IN_SIGHASH_TYPE if key_data.is_empty() => {
                if input.sighash.is_some() {
                    return Err(WireError::DuplicateKey("input", type_value).into());
                }
                input.sighash = Some(parse_u32("sighash type", &value)?);
            }
            IN_REDEEM_SCRIPT | IN_WITNESS_SCRIPT if key_data.is_empty() => {
                if input
                    .psbt_fields
                    .insert(type_value as u8, value)
                    .is_some()
                {
                    return Err(WireError::DuplicateKey("input", type_value).into());
                }
            }
            IN_BIP32_DERIVATION => {
                let (pubkey, source) = parse_keypath(&key_data, &value)?;
                if input.keypaths.insert(pubkey, source).is_some() {
                    return Err(WireError::DuplicateKey("input", type_value).into());
                }
            }
            IN_FINAL_SCRIPTSIG if key_data.is_empty() => {
                if input.final_script_sig.is_some() {
                    return Err(WireError::DuplicateKey("input", type_value).into());
                }
                input.final_script_sig = Some(Script::from(value));
            }
            IN_FINAL_SCRIPTWITNESS if key_data.is_empty() => {
                if input.final_script_witness.is_some() {
                    return Err(WireError::DuplicateKey("input", type_value).into());
                }
                input.final_script_witness = Some(parse_witness_stack(&value)?);
            }
            IN_PREVIOUS_TXID if key_data.is_empty() && !is_v0 => {
                if previous_txid.is_some() {
                    return Err(WireError::DuplicateKey("input", type_value).into());
                }
                previous_txid =
                    Some(Txid::from_slice(&value).map_err(PsbtError::Hashes)?);
            }
            IN_OUTPUT_INDEX if key_data.is_empty() && !is_v0 => {
                if previous_vout.is_some() {
                    return Err(WireError::DuplicateKey("input", type_value).into());
                }
                previous_vout = Some(parse_u32("previous output index", &value)?);
            }
            IN_SEQUENCE if key_data.is_empty() && !is_v0 => {
                if sequence.is_some() {
                    return Err(WireError::DuplicateKey("input", type_value).into());
                }
                sequence = Some(parse_u32("sequence", &value)?);
            }
            PROPRIETARY_TYPE if is_liquid => match parse_pset_subtag(&key_data) {
                Some(PSET_IN_EXPLICIT_VALUE) => {
                    if input.amount.is_some() {
                        return Err(WireError::DuplicateKey("input", type_value).into());
                    }
                    input.amount = Some(parse_u64("explicit value", &value)?);
                }
                Some(subtag) => {
                    if input.pset_fields.insert(subtag, value).is_some() {
                        return Err(WireError::DuplicateKey("input", type_value).into());
                    }
                }
                None => {
                    insert_unknown("input", &mut input.unknown, type_value, key_data, value)?
                }
            },
            _ => insert_unknown("input", &mut input.unknown, type_value, key_data, value)?,
        }
    }

    match v0_txin {
        Some((txid, vout, seq)) => {
            input.previous_txid = txid;
            input.previous_vout = vout;
            if seq != u32::MAX {
                input.sequence = Some(seq);
            }
        }
        None => {
            input.previous_txid =
                previous_txid.ok_or(WireError::MissingField("input previous txid"))?;
            input.previous_vout =
                previous_vout.ok_or(WireError::MissingField("input previous index"))?;
            input.sequence = sequence;
        }
    }
    Ok(input)
}

fn parse_output(
    reader: &mut Reader,
    index: usize,
    is_liquid: bool,
    v0_txout: Option<(u64, Script)>,
) -> Result<Output, PsbtError> {
    let is_v0 = v0_txout.is_some();
    let mut amount = None;
    let mut script = None;
    let mut output = Output::new(index, None, Script::new());

    while let Some((type_value, key_data, value)) = reader.read_kv()? {
        match type_value {
            OUT_BIP32_DERIVATION => {
                let (pubkey, source) = parse_keypath(&key_data, &value)?;
                if output.keypaths.insert(pubkey, source).is_some() {
                    return Err(WireError::DuplicateKey("output", type_value).into());
                }
            }
            OUT_AMOUNT if key_data.is_empty() && !is_v0 => {
                if amount.is_some() {
                    return Err(WireError::DuplicateKey("output", type_value).into());
                }
                amount = Some(parse_u64("output amount", &value)?);
            }
            OUT_SCRIPT if key_data.is_empty() && !is_v0 => {
                if script.is_some() {
                    return Err(WireError::DuplicateKey("output", type_value).into());
                }
                script = Some(Script::from(value));
            }
            PROPRIETARY_TYPE if is_liquid => match parse_pset_subtag(&key_data) {
                Some(PSET_OUT_BLINDER_INDEX) => {
                    if output.blinder_index.is_some() {
                        return Err(WireError::DuplicateKey("output", type_value).into());
                    }
                    output.blinder_index = Some(parse_u32("blinder index", &value)?);
                }
                Some(subtag) => {
                    if output.pset_fields.insert(subtag, value).is_some() {
                        return Err(WireError::DuplicateKey("output", type_value).into());
                    }
                }
                None => {
                    insert_unknown("output", &mut output.unknown, type_value, key_data, value)?
                }
            },
            _ => insert_unknown("output", &mut output.unknown, type_value, key_data, value)?,
        }
    }

    match v0_txout {
        Some((value, script_pubkey)) => {
            output.amount = Some(value);
            output.script = script_pubkey;
        }
        None => {
            output.script = script.ok_or(WireError::MissingField("output script"))?;
            output.amount = amount;
            if !is_liquid && output.amount.is_none() {
                return Err(WireError::MissingField("output amount").into());
            }
        }
    }
    Ok(output)
}

pub(crate) fn deserialize_psbt(bytes: &[u8]) -> Result<Psbt, PsbtError> {
    if bytes.len() < 5 {
        return Err(WireError::UnexpectedEof.into());
    }
    let is_liquid = match <[u8; 5]>::try_from(&bytes[..5]).expect("five bytes") {
        PSBT_MAGIC => false,
        PSET_MAGIC => true,
        _ => return Err(WireError::InvalidMagic.into()),
    };
    let mut reader = Reader::new(&bytes[5..]);

    let globals = parse_globals(&mut reader, is_liquid)?;
    let psbt = match globals.version {
        0 if !is_liquid => parse_v0(&mut reader, globals)?,
        2 => parse_v2(&mut reader, globals)?,
        other => return Err(WireError::UnsupportedVersion(other).into()),
    };
    if !reader.is_empty() {
        return Err(WireError::TrailingData.into());
    }
    Ok(psbt)
}

fn parse_v0(reader: &mut Reader, globals: Globals) -> Result<Psbt, PsbtError> {
    if globals.tx_version.is_some()
        || globals.input_count.is_some()
        || globals.output_count.is_some()
    {
        return Err(WireError::UnsupportedVersion(0).into());
    }
    let tx = globals
        .unsigned_tx
        .ok_or(WireError::MissingField("global unsigned transaction"))?;

    let mut inputs = Vec::with_capacity(tx.num_inputs());
    for index in 0..tx.num_inputs() {
        let (txid, vout) = tx.input_prev_outpoint(index);
        let sequence = tx.input_sequence(index);
        inputs.push(parse_input(
            reader,
            index,
            false,
            Some((txid, vout, sequence)),
        )?);
    }

    let mut outputs = Vec::with_capacity(tx.num_outputs());
    for index in 0..tx.num_outputs() {
        let txout = tx.output(index as u32).expect("output within count");
        let amount = txout.value().expect("bitcoin outputs are explicit");
        let script = Script::from(txout.script_pubkey());
        outputs.push(parse_output(reader, index, false, Some((amount, script)))?);
    }

    Ok(Psbt {
        original_version: PsbtVersion::V0,
        is_liquid: false,
        tx_version: tx.version(),
        fallback_locktime: match tx.lock_time() {
            0 => None,
            other => Some(other),
        },
        inputs,
        outputs,
        global_unknown: globals.unknown,
    })
}

fn parse_v2(reader: &mut Reader, globals: Globals) -> Result<Psbt, PsbtError> {
    if globals.unsigned_tx.is_some() {
        return Err(WireError::UnsignedTxInV2.into());
    }
    let tx_version = globals
        .tx_version
        .ok_or(WireError::MissingField("global tx version"))?;
    let input_count = globals
        .input_count
        .ok_or(WireError::MissingField("global input count"))?;
    let output_count = globals
        .output_count
        .ok_or(WireError::MissingField("global output count"))?;

    let mut inputs = Vec::with_capacity(input_count);
    for index in 0..input_count {
        inputs.push(parse_input(reader, index, globals.is_liquid, None)?);
    }
    let mut outputs = Vec::with_capacity(output_count);
    for index in 0..output_count {
        outputs.push(parse_output(reader, index, globals.is_liquid, None)?);
    }

    Ok(Psbt {
        original_version: PsbtVersion::V2,
        is_liquid: globals.is_liquid,
        tx_version,
        fallback_locktime: globals.fallback_locktime,
        inputs,
        outputs,
        global_unknown: globals.unknown,
    })
}

pub(crate) fn serialize_psbt(psbt: &Psbt, include_redundant: bool) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(if psbt.is_liquid { &PSET_MAGIC } else { &PSBT_MAGIC });

    match psbt.original_version {
        PsbtVersion::V0 => serialize_v0(&mut buf, psbt, include_redundant),
        PsbtVersion::V2 => serialize_v2(&mut buf, psbt, include_redundant),
    }
    buf
}

fn write_unknown(buf: &mut Vec<u8>, unknown: &BTreeMap<RawKey, Vec<u8>>) {
    for (key, value) in unknown {
        write_kv(buf, key.type_value, &key.key_data, value);
    }
}

fn write_input_common(buf: &mut Vec<u8>, input: &Input, include_redundant: bool) {
    if let Some(tx) = &input.non_witness_utxo {
        write_kv(buf, IN_NON_WITNESS_UTXO, &[], &tx.to_bytes());
    }
    if let Some(txout) = &input.witness_utxo {
        if include_redundant || input.non_witness_utxo.is_none() {
            write_kv(buf, IN_WITNESS_UTXO, &[], &txout.to_bytes());
        }
    }
    if let Some(sighash) = input.sighash {
        write_kv(buf, IN_SIGHASH_TYPE, &[], &sighash.to_le_bytes());
    }
    for (tag, value) in &input.psbt_fields {
        write_kv(buf, *tag as u64, &[], value);
    }
    for (pubkey, source) in &input.keypaths {
        write_kv(
            buf,
            IN_BIP32_DERIVATION,
            &pubkey.serialize(),
            &serialize_key_source(source),
        );
    }
    if let Some(script_sig) = &input.final_script_sig {
        write_kv(buf, IN_FINAL_SCRIPTSIG, &[], script_sig.as_bytes());
    }
    if let Some(witness) = &input.final_script_witness {
        write_kv(
            buf,
            IN_FINAL_SCRIPTWITNESS,
            &[],
            &serialize_witness_stack(witness),
        );
    }
}

fn write_input_pset(buf: &mut Vec<u8>, input: &Input) {
    let mut fields: FieldMap = input.pset_fields.clone();
    if let Some(amount) = input.amount {
        fields.insert(PSET_IN_EXPLICIT_VALUE, amount.to_le_bytes().to_vec());
    }
    for (subtag, value) in &fields {
        write_kv(buf, PROPRIETARY_TYPE, &pset_key_data(*subtag), value);
    }
}

fn write_output_pset(buf: &mut Vec<u8>, output: &Output) {
    let mut fields: FieldMap = output.pset_fields.clone();
    if let Some(blinder_index) = output.blinder_index {
        fields.insert(PSET_OUT_BLINDER_INDEX, blinder_index.to_le_bytes().to_vec());
    }
    for (subtag, value) in &fields {
        write_kv(buf, PROPRIETARY_TYPE, &pset_key_data(*subtag), value);
    }
}

fn write_output_keypaths(buf: &mut Vec<u8>, output: &Output) {
    for (pubkey, source) in &output.keypaths {
        write_kv(
            buf,
            OUT_BIP32_DERIVATION,
            &pubkey.serialize(),
            &serialize_key_source(source),
        );
    }
}

fn serialize_v0(buf: &mut Vec<u8>, psbt: &Psbt, include_redundant: bool) {
    let unsigned_tx = psbt.unsigned_bitcoin_tx();
    write_kv(
        buf,
        GLOBAL_UNSIGNED_TX,
        &[],
        &bitcoin::consensus::encode::serialize(&unsigned_tx),
    );
    write_unknown(buf, &psbt.global_unknown);
    buf.push(0x00);

    for input in &psbt.inputs {
        write_input_common(buf, input, include_redundant);
        write_unknown(buf, &input.unknown);
        buf.push(0x00);
    }
    for output in &psbt.outputs {
        write_output_keypaths(buf, output);
        write_unknown(buf, &output.unknown);
        buf.push(0x00);
    }
}

fn serialize_v2(buf: &mut Vec<u8>, psbt: &Psbt, include_redundant: bool) {
    write_kv(buf, GLOBAL_TX_VERSION, &[], &psbt.tx_version.to_le_bytes());
    if let Some(locktime) = psbt.fallback_locktime {
        write_kv(buf, GLOBAL_FALLBACK_LOCKTIME, &[], &locktime.to_le_bytes());
    }
    let mut count = Vec::with_capacity(9);
    write_varint(&mut count, psbt.inputs.len() as u64);
    write_kv(buf, GLOBAL_INPUT_COUNT, &[], &count);
    count.clear();
    write_varint(&mut count, psbt.outputs.len() as u64);
    write_kv(buf, GLOBAL_OUTPUT_COUNT, &[], &count);
    write_kv(buf, GLOBAL_VERSION, &[], &2u32.to_le_bytes());
    write_unknown(buf, &psbt.global_unknown);
    buf.push(0x00);

    for input in &psbt.inputs {
        write_input_common(buf, input, include_redundant);
        write_kv(
            buf,
            IN_PREVIOUS_TXID,
            &[],
            &input.previous_txid.into_inner(),
        );
        write_kv(
            buf,
            IN_OUTPUT_INDEX,
            &[],
            &input.previous_vout.to_le_bytes(),
        );
        if let Some(sequence) = input.sequence {
            write_kv(buf, IN_SEQUENCE, &[], &sequence.to_le_bytes());
        }
        if psbt.is_liquid {
            write_input_pset(buf, input);
        }
        write_unknown(buf, &input.unknown);
        buf.push(0x00);
    }

    for output in &psbt.outputs {
        write_output_keypaths(buf, output);
        if let Some(amount) = output.amount {
            write_kv(buf, OUT_AMOUNT, &[], &amount.to_le_bytes());
        }
        write_kv(buf, OUT_SCRIPT, &[], output.script.as_bytes());
        if psbt.is_liquid {
            write_output_pset(buf, output);
        }
        write_unknown(buf, &output.unknown);
        buf.push(0x00);
    }
}
