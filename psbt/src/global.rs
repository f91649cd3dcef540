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

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bitcoin::hashes::Hash;
use bitcoin::{PackedLockTime, Script, Sequence};
use elements::confidential;
use elements::secp256k1_zkp::{RangeProof, SurjectionProof};
#[cfg(feature = "serde")]
use serde_with::{hex::Hex, As, Same};

use crate::serialize::{deserialize_psbt, serialize_psbt};
use crate::{
    Input, Output, PsbtError, RawKey, Tx, PSET_OUT_ASSET, PSET_OUT_ASSET_COMMITMENT,
    PSET_OUT_ASSET_SURJECTION_PROOF, PSET_OUT_ECDH_PUBKEY, PSET_OUT_VALUE_COMMITMENT,
    PSET_OUT_VALUE_RANGEPROOF,
};

/// Serialization version of a PSBT container.
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u32)]
pub enum PsbtVersion {
    /// BIP-174 version 0 with a global unsigned transaction.
    #[display("v0")]
    V0 = 0,

    /// BIP-370 version 2 with per-input and per-output transaction fields.
    #[display("v2")]
    V2 = 2,
}

/// A partially signed bitcoin or elements transaction, held in the
/// version-2 field model regardless of the version it was parsed from.
///
/// The version seen on input is preserved and restored when serializing, so
/// that peers which only accept version 0 receive version 0 back.
#[derive(Clone, Eq, PartialEq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Psbt {
    pub(crate) original_version: PsbtVersion,
    pub(crate) is_liquid: bool,

    /// Version of the underlying transaction.
    pub tx_version: u32,

    /// Fallback locktime (used if none of the inputs specifies their
    /// locktime).
    pub fallback_locktime: Option<u32>,

    pub(crate) inputs: Vec<Input>,
    pub(crate) outputs: Vec<Output>,

    /// Unknown global key-value pairs.
    #[cfg_attr(feature = "serde", serde(with = "As::<BTreeMap<Same, Hex>>"))]
    pub global_unknown: BTreeMap<RawKey, Vec<u8>>,
}

impl Psbt {
    /// Decodes a base64 PSBT/PSET, verifying that the container kind
    /// matches `is_liquid`. Version-0 containers are upgraded to the
    /// version-2 field model in memory; the original version is preserved
    /// for serialization.
    pub fn from_base64(base64: &str, is_liquid: bool) -> Result<Psbt, PsbtError> {
        let bytes = BASE64.decode(base64)?;
        let psbt = deserialize_psbt(&bytes)?;
        if psbt.is_liquid != is_liquid {
            return Err(PsbtError::LiquidMismatch);
        }
        Ok(psbt)
    }

    /// Serializes back to base64, downgrading to the original version when
    /// it was not 2. With `include_redundant` unset, a witness UTXO that
    /// duplicates an attached non-witness UTXO is omitted.
    pub fn to_base64(&self, include_redundant: bool) -> String {
        BASE64.encode(serialize_psbt(self, include_redundant))
    }

    /// Builds a PSBT skeleton from an unsigned raw transaction. The
    /// serialization version follows the transaction version (`< 2` maps
    /// to version 0); elements transactions always use version 2 and the
    /// PSET container, with output commitments copied into the PSET
    /// fields.
    pub fn from_tx(tx: &Tx) -> Result<Psbt, PsbtError> {
        let is_liquid = tx.is_liquid();
        let original_version = if !is_liquid && tx.version() < 2 {
            PsbtVersion::V0
        } else {
            PsbtVersion::V2
        };

        let mut inputs = Vec::with_capacity(tx.num_inputs());
        for index in 0..tx.num_inputs() {
            if tx.input_has_script_sig(index) || tx.input_has_witness(index) {
                return Err(PsbtError::SignedInput(index));
            }
            let (txid, vout) = tx.input_prev_outpoint(index);
            let mut input = Input::new(index, txid, vout);
            let sequence = tx.input_sequence(index);
            if sequence != u32::MAX {
                input.sequence = Some(sequence);
            }
            inputs.push(input);
        }

        let mut outputs = Vec::with_capacity(tx.num_outputs());
        for index in 0..tx.num_outputs() {
            let txout = tx
                .output(index as u32)
                .expect("output index within num_outputs");
            let mut output = Output::new(
                index,
                txout.value(),
                Script::from(txout.script_pubkey()),
            );
            if is_liquid {
                if let Some(commitment) = txout.value_commitment() {
                    output
                        .pset_fields
                        .insert(PSET_OUT_VALUE_COMMITMENT, commitment);
                }
                if let Some(asset) = txout.asset_id_le() {
                    output.pset_fields.insert(PSET_OUT_ASSET, asset.to_vec());
                }
                if let Some(commitment) = txout.asset_commitment() {
                    output
                        .pset_fields
                        .insert(PSET_OUT_ASSET_COMMITMENT, commitment);
                }
                if let Some(nonce) = txout.nonce_commitment() {
                    output.pset_fields.insert(PSET_OUT_ECDH_PUBKEY, nonce);
                }
                if let Some(elements_out) = txout.as_elements() {
                    if let Some(rangeproof) = &elements_out.witness.rangeproof {
                        output
                            .pset_fields
                            .insert(PSET_OUT_VALUE_RANGEPROOF, rangeproof.serialize());
                    }
                    if let Some(surjection) = &elements_out.witness.surjection_proof {
                        output
                            .pset_fields
                            .insert(PSET_OUT_ASSET_SURJECTION_PROOF, surjection.serialize());
                    }
                }
            }
            outputs.push(output);
        }

        Ok(Psbt {
            original_version,
            is_liquid,
            tx_version: tx.version(),
            fallback_locktime: match tx.lock_time() {
                0 => None,
                other => Some(other),
            },
            inputs,
            outputs,
            global_unknown: bmap! {},
        })
    }

    /// Whether this is a PSET (confidential) container.
    #[inline]
    pub fn is_liquid(&self) -> bool { self.is_liquid }

    /// The version the container was parsed from or will serialize to.
    #[inline]
    pub fn original_version(&self) -> PsbtVersion { self.original_version }

    /// Number of inputs.
    #[inline]
    pub fn num_inputs(&self) -> usize { self.inputs.len() }

    /// Number of outputs.
    #[inline]
    pub fn num_outputs(&self) -> usize { self.outputs.len() }

    /// Input at `index`.
    ///
    /// # Panics
    ///
    /// If `index` is out of range.
    #[inline]
    pub fn input(&self, index: usize) -> &Input { &self.inputs[index] }

    /// Mutable input at `index`.
    ///
    /// # Panics
    ///
    /// If `index` is out of range.
    #[inline]
    pub fn input_mut(&mut self, index: usize) -> &mut Input { &mut self.inputs[index] }

    /// Output at `index`.
    ///
    /// # Panics
    ///
    /// If `index` is out of range.
    #[inline]
    pub fn output(&self, index: usize) -> &Output { &self.outputs[index] }

    /// Mutable output at `index`.
    ///
    /// # Panics
    ///
    /// If `index` is out of range.
    #[inline]
    pub fn output_mut(&mut self, index: usize) -> &mut Output { &mut self.outputs[index] }

    /// Iterates the inputs.
    pub fn inputs(&self) -> impl Iterator<Item = &Input> { self.inputs.iter() }

    /// Iterates the outputs.
    pub fn outputs(&self) -> impl Iterator<Item = &Output> { self.outputs.iter() }

    /// Attaches finalization data to input `index`. Empty values clear the
    /// corresponding field.
    ///
    /// # Panics
    ///
    /// If `index` is out of range.
    pub fn set_input_final(&mut self, index: usize, witness: Vec<Vec<u8>>, script_sig: &[u8]) {
        let input = &mut self.inputs[index];
        input.final_script_witness = if witness.is_empty() { None } else { Some(witness) };
        input.final_script_sig = if script_sig.is_empty() {
            None
        } else {
            Some(Script::from(script_sig.to_vec()))
        };
    }

    /// Reconstructs the underlying transaction, carrying any final
    /// witness/scriptSig already attached.
    pub fn extract(&self) -> Result<Tx, PsbtError> {
        if self.is_liquid {
            self.extract_elements().map(Tx::Elements)
        } else {
            self.extract_bitcoin().map(Tx::Bitcoin)
        }
    }

    /// Rebuilds the unsigned bitcoin transaction for the version-0 global
    /// field.
    ///
    /// # Panics
    ///
    /// If an output lacks its amount, which parsing and construction
    /// guarantee for bitcoin containers.
    pub(crate) fn unsigned_bitcoin_tx(&self) -> bitcoin::Transaction {
        let input = self
            .inputs
            .iter()
            .map(|psbt_in| bitcoin::TxIn {
                previous_output: bitcoin::OutPoint {
                    txid: psbt_in.previous_txid,
                    vout: psbt_in.previous_vout,
                },
                script_sig: Script::new(),
                sequence: Sequence::from_consensus(psbt_in.sequence.unwrap_or(u32::MAX)),
                witness: bitcoin::Witness::default(),
            })
            .collect();

        let output = self
            .outputs
            .iter()
            .map(|psbt_out| bitcoin::TxOut {
                value: psbt_out.amount.expect("bitcoin outputs carry an amount"),
                script_pubkey: psbt_out.script.clone(),
            })
            .collect();

        bitcoin::Transaction {
            version: i32::from_be_bytes(self.tx_version.to_be_bytes()),
            lock_time: PackedLockTime(self.fallback_locktime.unwrap_or(0)),
            input,
            output,
        }
    }

    fn extract_bitcoin(&self) -> Result<bitcoin::Transaction, PsbtError> {
        let input = self
            .inputs
            .iter()
            .map(|psbt_in| bitcoin::TxIn {
                previous_output: bitcoin::OutPoint {
                    txid: psbt_in.previous_txid,
                    vout: psbt_in.previous_vout,
                },
                script_sig: psbt_in.final_script_sig.clone().unwrap_or_default(),
                sequence: Sequence::from_consensus(psbt_in.sequence.unwrap_or(u32::MAX)),
                witness: psbt_in
                    .final_script_witness
                    .clone()
                    .map(bitcoin::Witness::from_vec)
                    .unwrap_or_default(),
            })
            .collect();

        let output = self
            .outputs
            .iter()
            .map(|psbt_out| {
                let value = psbt_out
                    .amount
                    .ok_or(PsbtError::IncompleteOutput(psbt_out.index))?;
                Ok(bitcoin::TxOut {
                    value,
                    script_pubkey: psbt_out.script.clone(),
                })
            })
            .collect::<Result<_, PsbtError>>()?;

        Ok(bitcoin::Transaction {
            version: i32::from_be_bytes(self.tx_version.to_be_bytes()),
            lock_time: PackedLockTime(self.fallback_locktime.unwrap_or(0)),
            input,
            output,
        })
    }

    fn extract_elements(&self) -> Result<elements::Transaction, PsbtError> {
        let input = self
            .inputs
            .iter()
            .map(|psbt_in| elements::TxIn {
                previous_output: elements::OutPoint::new(
                    elements::Txid::from_inner(psbt_in.previous_txid.into_inner()),
                    psbt_in.previous_vout,
                ),
                is_pegin: false,
                script_sig: psbt_in
                    .final_script_sig
                    .as_ref()
                    .map(|script| elements::Script::from(script.to_bytes()))
                    .unwrap_or_default(),
                sequence: elements::Sequence::from_consensus(
                    psbt_in.sequence.unwrap_or(u32::MAX),
                ),
                asset_issuance: elements::AssetIssuance::default(),
                witness: elements::TxInWitness {
                    script_witness: psbt_in.final_script_witness.clone().unwrap_or_default(),
                    ..Default::default()
                },
            })
            .collect();

        let output = self
            .outputs
            .iter()
            .map(|psbt_out| self.extract_elements_output(psbt_out))
            .collect::<Result<_, PsbtError>>()?;

        Ok(elements::Transaction {
            version: self.tx_version,
            lock_time: elements::PackedLockTime(self.fallback_locktime.unwrap_or(0)),
            input,
            output,
        })
    }

    fn extract_elements_output(
        &self,
        psbt_out: &Output,
    ) -> Result<elements::TxOut, PsbtError> {
        let index = psbt_out.index;

        let value = match psbt_out.pset_fields.get(&PSET_OUT_VALUE_COMMITMENT) {
            Some(commitment) => confidential::Value::from_commitment(commitment)?,
            None => confidential::Value::Explicit(
                psbt_out.amount.ok_or(PsbtError::IncompleteOutput(index))?,
            ),
        };

        let asset = match psbt_out.pset_fields.get(&PSET_OUT_ASSET_COMMITMENT) {
            Some(commitment) => confidential::Asset::from_commitment(commitment)?,
            None => {
                let explicit = psbt_out
                    .pset_fields
                    .get(&PSET_OUT_ASSET)
                    .ok_or(PsbtError::IncompleteOutput(index))?;
                confidential::Asset::Explicit(elements::AssetId::from_slice(explicit)?)
            }
        };

        let nonce = match psbt_out.pset_fields.get(&PSET_OUT_ECDH_PUBKEY) {
            Some(commitment) => confidential::Nonce::from_commitment(commitment)?,
            None => confidential::Nonce::Null,
        };

        let witness = elements::TxOutWitness {
            surjection_proof: psbt_out
                .pset_fields
                .get(&PSET_OUT_ASSET_SURJECTION_PROOF)
                .map(|bytes| SurjectionProof::from_slice(bytes).map(Box::new))
                .transpose()?,
            rangeproof: psbt_out
                .pset_fields
                .get(&PSET_OUT_VALUE_RANGEPROOF)
                .map(|bytes| RangeProof::from_slice(bytes).map(Box::new))
                .transpose()?,
        };

        Ok(elements::TxOut {
            asset,
            value,
            nonce,
            script_pubkey: elements::Script::from(psbt_out.script.to_bytes()),
            witness,
        })
    }
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use bitcoin::secp256k1::PublicKey;
    use bitcoin::util::bip32::{ChildNumber, DerivationPath, Fingerprint};
    use bitcoin::Txid;
    use elements::confidential;

    use super::*;
    use crate::{TxOutExt, PSET_IN_EXPLICIT_ASSET, PSET_IN_VALUE_PROOF};

    fn test_pubkey() -> PublicKey {
        PublicKey::from_str(
            "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798",
        )
        .unwrap()
    }

    fn test_keysource() -> (Fingerprint, DerivationPath) {
        (
            Fingerprint::from(&[0xde, 0xad, 0xbe, 0xef][..]),
            DerivationPath::from(vec![ChildNumber::from(1), ChildNumber::from(5)]),
        )
    }

    fn prev_tx() -> bitcoin::Transaction {
        bitcoin::Transaction {
            version: 1,
            lock_time: PackedLockTime(0),
            input: vec![bitcoin::TxIn {
                previous_output: bitcoin::OutPoint::default(),
                script_sig: Script::new(),
                sequence: Sequence::from_consensus(u32::MAX),
                witness: bitcoin::Witness::default(),
            }],
            output: vec![bitcoin::TxOut {
                value: 100_000,
                script_pubkey: Script::from(vec![0x00, 0x14, 0x42]),
            }],
        }
    }

    fn unsigned_tx(version: i32) -> (bitcoin::Transaction, Txid) {
        let prev = prev_tx();
        let prev_txid = prev.txid();
        let tx = bitcoin::Transaction {
            version,
            lock_time: PackedLockTime(0),
            input: vec![bitcoin::TxIn {
                previous_output: bitcoin::OutPoint {
                    txid: prev_txid,
                    vout: 0,
                },
                script_sig: Script::new(),
                sequence: Sequence::from_consensus(0xffff_fffd),
                witness: bitcoin::Witness::default(),
            }],
            output: vec![bitcoin::TxOut {
                value: 90_000,
                script_pubkey: Script::from(vec![0x00, 0x14, 0x43]),
            }],
        };
        (tx, prev_txid)
    }

    #[test]
    fn v0_roundtrip_is_stable() {
        let (tx, _) = unsigned_tx(1);
        let mut psbt = Psbt::from_tx(&Tx::Bitcoin(tx)).unwrap();
        assert_eq!(psbt.original_version(), PsbtVersion::V0);

        psbt.input_mut(0).non_witness_utxo = Some(Tx::Bitcoin(prev_tx()));
        psbt.input_mut(0)
            .keypaths
            .insert(test_pubkey(), test_keysource());
        psbt.input_mut(0).sighash = Some(0x01);

        let base64 = psbt.to_base64(false);
        let parsed = Psbt::from_base64(&base64, false).unwrap();
        assert_eq!(parsed, psbt);
        assert_eq!(parsed.original_version(), PsbtVersion::V0);
        // Serialization is deterministic
        assert_eq!(parsed.to_base64(false), base64);
    }

    #[test]
    fn v2_roundtrip_is_stable() {
        let (tx, _) = unsigned_tx(2);
        let mut psbt = Psbt::from_tx(&Tx::Bitcoin(tx)).unwrap();
        assert_eq!(psbt.original_version(), PsbtVersion::V2);
        psbt.output_mut(0)
            .keypaths
            .insert(test_pubkey(), test_keysource());

        let base64 = psbt.to_base64(true);
        let parsed = Psbt::from_base64(&base64, false).unwrap();
        assert_eq!(parsed, psbt);
        assert_eq!(parsed.to_base64(true), base64);
    }

    #[test]
    fn container_kind_is_checked() {
        let (tx, _) = unsigned_tx(2);
        let psbt = Psbt::from_tx(&Tx::Bitcoin(tx)).unwrap();
        let base64 = psbt.to_base64(false);
        assert!(matches!(
            Psbt::from_base64(&base64, true),
            Err(PsbtError::LiquidMismatch)
        ));
    }

    #[test]
    fn redundant_witness_utxo_is_dropped() {
        let (tx, _) = unsigned_tx(1);
        let mut psbt = Psbt::from_tx(&Tx::Bitcoin(tx)).unwrap();
        let prev = prev_tx();
        psbt.input_mut(0).non_witness_utxo = Some(Tx::Bitcoin(prev.clone()));
        psbt.input_mut(0).witness_utxo = Some(TxOutExt::Bitcoin(prev.output[0].clone()));

        let trimmed = Psbt::from_base64(&psbt.to_base64(false), false).unwrap();
        assert!(trimmed.input(0).witness_utxo.is_none());
        assert!(trimmed.input(0).non_witness_utxo.is_some());

        let full = Psbt::from_base64(&psbt.to_base64(true), false).unwrap();
        assert!(full.input(0).witness_utxo.is_some());
        assert_eq!(full, psbt);
    }

    #[test]
    fn unknown_fields_are_preserved() {
        let (tx, _) = unsigned_tx(2);
        let mut psbt = Psbt::from_tx(&Tx::Bitcoin(tx)).unwrap();
        psbt.input_mut(0).unknown.insert(
            RawKey {
                type_value: 0xf0,
                key_data: vec![0x01, 0x02],
            },
            vec![0xaa, 0xbb],
        );
        psbt.global_unknown.insert(
            RawKey {
                type_value: 0xf1,
                key_data: vec![],
            },
            vec![0xcc],
        );

        let parsed = Psbt::from_base64(&psbt.to_base64(false), false).unwrap();
        assert_eq!(parsed, psbt);
    }

    #[test]
    fn extract_carries_finalization() {
        let (tx, prev_txid) = unsigned_tx(2);
        let mut psbt = Psbt::from_tx(&Tx::Bitcoin(tx)).unwrap();
        psbt.set_input_final(0, vec![vec![0x30; 71], vec![0x02; 33]], &[]);

        let extracted = psbt.extract().unwrap();
        assert!(extracted.input_has_witness(0));
        assert!(!extracted.input_has_script_sig(0));
        assert_eq!(extracted.input_prev_outpoint(0), (prev_txid, 0));
    }

    #[test]
    #[should_panic]
    fn input_index_is_bounds_checked() {
        let (tx, _) = unsigned_tx(2);
        let psbt = Psbt::from_tx(&Tx::Bitcoin(tx)).unwrap();
        psbt.input(5);
    }

    fn elements_tx() -> elements::Transaction {
        let asset_id = elements::AssetId::from_slice(&[0x33u8; 32]).unwrap();
        elements::Transaction {
            version: 2,
            lock_time: elements::PackedLockTime(0),
            input: vec![elements::TxIn {
                previous_output: elements::OutPoint::new(
                    elements::Txid::from_inner([0x44u8; 32]),
                    1,
                ),
                is_pegin: false,
                script_sig: elements::Script::new(),
                sequence: elements::Sequence::from_consensus(u32::MAX),
                asset_issuance: elements::AssetIssuance::default(),
                witness: elements::TxInWitness::default(),
            }],
            output: vec![
                elements::TxOut {
                    asset: confidential::Asset::Explicit(asset_id),
                    value: confidential::Value::Explicit(9_000),
                    nonce: confidential::Nonce::Null,
                    script_pubkey: elements::Script::from(vec![0x00, 0x14, 0x55]),
                    witness: elements::TxOutWitness::default(),
                },
                elements::TxOut {
                    asset: confidential::Asset::Explicit(asset_id),
                    value: confidential::Value::Explicit(1_000),
                    nonce: confidential::Nonce::Null,
                    script_pubkey: elements::Script::new(),
                    witness: elements::TxOutWitness::default(),
                },
            ],
        }
    }

    #[test]
    fn pset_roundtrip_with_proprietary_fields() {
        let mut psbt = Psbt::from_tx(&Tx::Elements(elements_tx())).unwrap();
        assert!(psbt.is_liquid());
        assert_eq!(psbt.original_version(), PsbtVersion::V2);

        psbt.input_mut(0).amount = Some(10_000);
        psbt.input_mut(0)
            .pset_fields
            .insert(PSET_IN_EXPLICIT_ASSET, vec![0x33; 32]);
        psbt.input_mut(0)
            .pset_fields
            .insert(PSET_IN_VALUE_PROOF, vec![0x77; 73]);
        psbt.output_mut(0).blinder_index = Some(0);

        let base64 = psbt.to_base64(false);
        let parsed = Psbt::from_base64(&base64, true).unwrap();
        assert_eq!(parsed, psbt);
        assert_eq!(parsed.input(0).amount, Some(10_000));
        assert_eq!(parsed.output(0).blinder_index, Some(0));
        assert_eq!(parsed.output(0).amount, Some(9_000));

        // The fee output keeps its empty script
        assert!(parsed.output(1).script.is_empty());
    }
}

