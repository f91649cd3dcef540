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

//! The enrichment engine: `to_details` walks a parsed PSBT/PSET and
//! correlates it with wallet state into structured transaction details;
//! `from_details` builds a signable container from a raw transaction and
//! the wallet's blinding and derivation data.

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use bitcoin::hashes::hex::{FromHex, ToHex};
use elements::{BlindAssetProofs, BlindValueProofs};
use elements::confidential::{AssetBlindingFactor, ValueBlindingFactor};
use elements::secp256k1_zkp::{
    All, Generator, PedersenCommitment, RangeProof, Secp256k1, SurjectionProof,
};
use elements::{AssetId, TxOutSecrets};
use wallet_psbt::{
    BlindingStatus, FieldMap, Psbt, Tx, PSET_IN_ASSET_PROOF,
    PSET_IN_EXPLICIT_ASSET, PSET_IN_VALUE_PROOF, PSET_OUT_ASSET, PSET_OUT_ASSET_COMMITMENT,
    PSET_OUT_ASSET_SURJECTION_PROOF, PSET_OUT_BLINDING_PUBKEY, PSET_OUT_BLIND_ASSET_PROOF,
    PSET_OUT_BLIND_VALUE_PROOF, PSET_OUT_ECDH_PUBKEY, PSET_OUT_VALUE_COMMITMENT,
    PSET_OUT_VALUE_RANGEPROOF,
};

use crate::details::{DetailsResult, PsbtDetails, TxInput, TxOutput, UtxoSet};
use crate::session::OutputInfo;
use crate::{change, dummy_sig, keypaths, scripts, EngineError, Session};

/// Sighash `ALL`, assumed when a PSBT input carries no explicit value.
const SIGHASH_ALL: u32 = 0x01;

/// Asset label used for change grouping on non-liquid networks.
const BTC_ASSET: &str = "btc";

/// The enrichment engine binding PSBT/PSET containers to a wallet
/// [`Session`].
pub struct Engine<'sess> {
    session: &'sess dyn Session,
    secp: Secp256k1<All>,
}

impl<'sess> Engine<'sess> {
    /// Creates an engine working against the given session.
    pub fn new(session: &'sess dyn Session) -> Self {
        Engine {
            session,
            secp: Secp256k1::new(),
        }
    }

    /// Produces the structured details of a parsed container, correlating
    /// its inputs with the offered wallet UTXOs. Missing previous
    /// transactions are fetched and attached to the container; unsigned
    /// wallet inputs receive dummy signatures on the reported transaction
    /// for fee-rate estimation.
    pub fn to_details(
        &self,
        psbt: &mut Psbt,
        utxos: UtxoSet,
    ) -> Result<DetailsResult, EngineError> {
        let is_liquid = psbt.is_liquid();
        let policy_asset = self.session.net_params().policy_asset.clone();
        let mut tx = psbt.extract()?;

        let (inputs, wallet_assets) = self.inputs_to_details(psbt, &mut tx, utxos)?;
        let outputs = self.outputs_to_details(psbt, &tx, &wallet_assets)?;

        let mut sum: i64 = 0;
        let mut explicit_fee: i64 = 0;
        let mut error = String::new();
        let mut use_error = false;
        for input in &inputs {
            if let Some(txin_error) = &input.error {
                error = txin_error.clone();
                if !input.skip_signing {
                    // The input will be signed, so the results cannot be
                    // trusted
                    use_error = true;
                }
                continue;
            }
            if !is_liquid || input.asset_id == policy_asset {
                sum += input.satoshi as i64;
            }
        }
        for output in &outputs {
            if !is_liquid || output.asset_id == policy_asset {
                if is_liquid && output.scriptpubkey.is_empty() {
                    explicit_fee += output.satoshi as i64;
                } else {
                    sum -= output.satoshi as i64;
                }
            }
        }
        // Calculated fee must match the fee output for Liquid unless an
        // input error occurred
        assert!(
            !is_liquid || sum == explicit_fee || !error.is_empty(),
            "policy asset flow does not balance against the fee output"
        );
        let fee = if is_liquid { explicit_fee } else { sum };
        assert!(fee >= 0, "transaction outputs exceed its inputs");
        let fee = fee as u64;
        let fee_rate = fee * 1000 / (tx.vsize() as u64).max(1);

        let num_wallet_inputs = inputs.iter().filter(|input| input.is_wallet()).count();
        let is_partial = num_wallet_inputs != inputs.len();

        Ok(DetailsResult {
            transaction: tx.to_hex(),
            txhash: tx.txid().to_string(),
            fee,
            network_fee: 0,
            fee_rate,
            utxo_strategy: s!("manual"),
            // Only blinded PSETs are supported, so this can be hard coded
            is_blinded: if is_liquid { Some(true) } else { None },
            is_partial,
            error: if use_error { Some(error) } else { None },
            transaction_inputs: inputs,
            transaction_outputs: outputs,
        })
    }

    fn inputs_to_details(
        &self,
        psbt: &mut Psbt,
        tx: &mut Tx,
        mut utxos: UtxoSet,
    ) -> Result<(Vec<TxInput>, BTreeSet<String>), EngineError> {
        let is_liquid = psbt.is_liquid();
        let mut wallet_assets = BTreeSet::new();
        let mut inputs = Vec::with_capacity(psbt.num_inputs());

        for index in 0..psbt.num_inputs() {
            let txhash = psbt.input(index).previous_txid.to_string();
            let vout = psbt.input(index).previous_vout;

            let matched = utxos.take_matching(&txhash, vout);
            let belongs_to_wallet = matched.is_some();
            let mut input = matched.unwrap_or_default();
            input.txhash = txhash.clone();
            input.pt_idx = vout;
            input.sequence = Some(tx.input_sequence(index));

            if psbt.input(index).best_utxo().is_none() {
                let prev_tx = self.session.fetch_raw_transaction(&txhash)?;
                psbt.input_mut(index).non_witness_utxo = Some(prev_tx);
            }
            let txin_utxo = psbt
                .input(index)
                .best_utxo()
                .ok_or_else(|| EngineError::PrevoutMissing(txhash.clone(), vout))?;

            if belongs_to_wallet {
                let asset_ref = if is_liquid {
                    input.asset_id.clone().ok_or_else(|| {
                        EngineError::InvalidDetails(s!("wallet utxo lacks asset_id"))
                    })?
                } else {
                    String::from(BTC_ASSET)
                };
                wallet_assets.insert(asset_ref);

                if let Some(sighash) = psbt.input(index).sighash {
                    if sighash != SIGHASH_ALL {
                        input.user_sighash = Some(sighash);
                    }
                }
                for key in ["user_status", "witness", "script_sig"] {
                    input.extra.remove(key);
                }

                let coords = input.coords().ok_or_else(|| {
                    EngineError::InvalidDetails(s!("wallet utxo lacks coordinates"))
                })?;
                let (user_path, service_path) = keypaths::utxo_paths(self.session, &coords);
                input.user_path = Some(user_path);
                input.service_path = service_path;

                if !tx.input_has_script_sig(index) && !tx.input_has_witness(index) {
                    // Size the unsigned input with placeholder signatures;
                    // over-estimates the final fee rate slightly
                    let keys = self.session.keys_from_utxo(&coords)?;
                    let (script_sig, witness) = dummy_sig::scriptsig_and_witness(
                        &coords,
                        input.prevout_script.as_deref(),
                        &keys,
                    )?;
                    if !script_sig.is_empty() {
                        tx.set_input_script_sig(index, &script_sig);
                    }
                    if !witness.is_empty() {
                        tx.set_input_witness(index, witness);
                    }
                }
            } else {
                input.skip_signing = true;
                if !is_liquid {
                    input.satoshi = txin_utxo
                        .value()
                        .expect("bitcoin outputs are always explicit");
                } else if psbt.input(index).has_amount() {
                    // An explicit value/asset, along with its proofs
                    input.satoshi = psbt.input(index).amount.unwrap_or_default();
                    let fields = &psbt.input(index).pset_fields;
                    input.asset_id = Some(hex_rev(pset_field(
                        fields,
                        PSET_IN_EXPLICIT_ASSET,
                        "asset_id",
                    )?));
                    input.value_blind_proof = Some(
                        pset_field(fields, PSET_IN_VALUE_PROOF, "value_blind_proof")?.to_hex(),
                    );
                    input.asset_blind_proof = Some(
                        pset_field(fields, PSET_IN_ASSET_PROOF, "asset_blind_proof")?.to_hex(),
                    );
                } else {
                    input.error = Some(s!("failed to unblind utxo"));
                }
                if let Some(redeem_script) = psbt.input(index).redeem_script() {
                    input.redeem_script = Some(redeem_script.to_hex());
                }
            }
            inputs.push(input);
        }
        Ok((inputs, wallet_assets))
    }

    fn outputs_to_details(
        &self,
        psbt: &Psbt,
        tx: &Tx,
        wallet_assets: &BTreeSet<String>,
    ) -> Result<Vec<TxOutput>, EngineError> {
        let is_liquid = psbt.is_liquid();
        let is_electrum = self.session.net_params().is_electrum;
        let mut spent_assets = BTreeSet::new();
        let mut asset_outputs: BTreeMap<String, Vec<usize>> = bmap! {};
        let mut outputs = Vec::with_capacity(psbt.num_outputs());

        for index in 0..psbt.num_outputs() {
            let txout = psbt.output(index);
            let script = txout.script.clone();
            let mut jsonout = TxOutput::default();

            if !is_liquid {
                assert!(!script.is_empty(), "bitcoin output {} lacks a script", index);
                jsonout.satoshi = txout.amount.expect("bitcoin outputs carry an amount");
                jsonout.scriptpubkey = script.to_bytes().to_hex();
            } else {
                // Even if blinded, the PSET must have an explicit
                // value/asset
                jsonout.asset_id = Some(hex_rev(pset_field(
                    &txout.pset_fields,
                    PSET_OUT_ASSET,
                    "asset_id",
                )?));
                jsonout.satoshi = txout
                    .amount
                    .ok_or(EngineError::MissingPsetField("explicit amount"))?;

                match txout.blinding_status() {
                    BlindingStatus::None => {
                        // An unblinded output must be the fee
                        assert!(
                            script.is_empty(),
                            "unblinded non-fee output {} is not supported",
                            index
                        );
                        outputs.push(jsonout);
                        continue;
                    }
                    BlindingStatus::Partial => {
                        panic!("non-standard blinding status on output {}", index)
                    }
                    BlindingStatus::Full => {}
                }

                let fields = &txout.pset_fields;
                jsonout.commitment =
                    Some(pset_field(fields, PSET_OUT_VALUE_COMMITMENT, "commitment")?.to_hex());
                jsonout.asset_tag =
                    Some(pset_field(fields, PSET_OUT_ASSET_COMMITMENT, "asset_tag")?.to_hex());
                jsonout.range_proof =
                    Some(pset_field(fields, PSET_OUT_VALUE_RANGEPROOF, "range_proof")?.to_hex());
                jsonout.surj_proof = Some(
                    pset_field(fields, PSET_OUT_ASSET_SURJECTION_PROOF, "surj_proof")?.to_hex(),
                );
                jsonout.blinding_key =
                    Some(pset_field(fields, PSET_OUT_BLINDING_PUBKEY, "blinding_key")?.to_hex());
                jsonout.eph_public_key =
                    Some(pset_field(fields, PSET_OUT_ECDH_PUBKEY, "eph_public_key")?.to_hex());
                jsonout.value_blind_proof = Some(
                    pset_field(fields, PSET_OUT_BLIND_VALUE_PROOF, "value_blind_proof")?
                        .to_hex(),
                );
                jsonout.asset_blind_proof = Some(
                    pset_field(fields, PSET_OUT_BLIND_ASSET_PROOF, "asset_blind_proof")?
                        .to_hex(),
                );

                assert!(!script.is_empty(), "blinded output {} lacks a script", index);
                jsonout.scriptpubkey = script.to_bytes().to_hex();
            }

            let output_data = self.session.scriptpubkey_data(script.as_bytes());
            let is_wallet_output = output_data.is_some();
            match output_data {
                None => {
                    jsonout.address =
                        self.address_from_script(&script, jsonout.blinding_key.as_deref());
                }
                Some(info) => {
                    if is_liquid {
                        match self.unblind_output(tx, index) {
                            Ok(secrets) => {
                                jsonout.satoshi = secrets.value;
                                jsonout.asset_id = Some(secrets.asset.to_string());
                                jsonout.assetblinder =
                                    Some(hex_rev(secrets.asset_bf.into_inner().as_ref()));
                                jsonout.amountblinder =
                                    Some(hex_rev(secrets.value_bf.into_inner().as_ref()));
                            }
                            Err(err) => {
                                log::warn!("output {}: {}", index, err);
                                outputs.push(jsonout);
                                continue;
                            }
                        }
                    }
                    apply_output_info(&mut jsonout, &info);
                    jsonout.address =
                        self.address_from_script(&script, jsonout.blinding_key.as_deref());
                    if is_liquid {
                        jsonout.is_confidential =
                            Some(jsonout.address.is_some() && jsonout.blinding_key.is_some());
                    }
                    if let Some(coords) = jsonout.coords() {
                        let (user_path, service_path) =
                            keypaths::utxo_paths(self.session, &coords);
                        jsonout.user_path = Some(user_path);
                        jsonout.service_path = service_path;
                    }
                    if is_electrum {
                        // Singlesig: outputs on the internal chain are
                        // change
                        jsonout.is_change = jsonout.is_internal.take();
                        jsonout.branch = None;
                        jsonout.subtype = None;
                    }
                }
            }

            if !is_electrum {
                let asset_ref = if is_liquid {
                    jsonout.asset_id.clone().unwrap_or_default()
                } else {
                    String::from(BTC_ASSET)
                };
                if wallet_assets.contains(&asset_ref) {
                    if is_wallet_output {
                        asset_outputs.entry(asset_ref).or_default().push(index);
                    } else {
                        spent_assets.insert(asset_ref);
                    }
                }
            }
            outputs.push(jsonout);
        }

        if !is_electrum {
            change::mark_change(&mut outputs, wallet_assets, &spent_assets, &asset_outputs);
        }
        Ok(outputs)
    }

    /// Builds a signable container from transaction details: keypaths and
    /// scripts for wallet inputs and outputs, explicit asset/value fields
    /// and the explicit proofs binding them to the confidential
    /// commitments.
    ///
    /// Any failure drops the partially built container.
    ///
    /// # Panics
    ///
    /// If a confidential output of the supplied transaction lacks its
    /// value or asset commitment.
    pub fn from_details(&self, details: &PsbtDetails) -> Result<Psbt, EngineError> {
        if let Some(error) = details.error.as_deref().filter(|e| !e.is_empty()) {
            return Err(EngineError::InvalidDetails(error.to_owned()));
        }
        let is_liquid = self.session.net_params().is_liquid;
        let tx = Tx::from_hex(&details.transaction, is_liquid)?;
        let mut psbt = Psbt::from_tx(&tx)?;

        for index in 0..tx.num_inputs() {
            let input = details
                .transaction_inputs
                .get(index)
                .ok_or(EngineError::LengthMismatch)?;
            self.build_input(&mut psbt, index, input)?;
        }
        for index in 0..tx.num_outputs() {
            let output = details
                .transaction_outputs
                .get(index)
                .ok_or(EngineError::LengthMismatch)?;
            self.build_output(&mut psbt, index, output)?;
        }
        Ok(psbt)
    }

    fn build_input(
        &self,
        psbt: &mut Psbt,
        index: usize,
        input: &TxInput,
    ) -> Result<(), EngineError> {
        let is_liquid = psbt.is_liquid();

        if let Some(coords) = input.coords() {
            // Wallet UTXO: add the relevant keypaths and scripts
            let psbt_input = psbt.input_mut(index);
            let keys =
                keypaths::add_utxo_keypaths(self.session, &mut psbt_input.keypaths, &coords)?;
            scripts::add_input_scripts(
                psbt_input,
                &coords,
                input.prevout_script.as_deref(),
                &keys,
            )?;
        }

        let mut asset = None;
        if is_liquid {
            let asset_id = parse_asset(input.asset_id.as_deref(), "input asset_id")?;
            psbt.input_mut(index)
                .pset_fields
                .insert(PSET_IN_EXPLICIT_ASSET, asset_id.into_inner().0.to_vec());
            psbt.input_mut(index).amount = Some(input.satoshi);
            asset = Some(asset_id);
        }

        if psbt.input(index).best_utxo().is_none() {
            let prev_tx = self.session.fetch_raw_transaction(&input.txhash)?;
            let txout = prev_tx.output(input.pt_idx).ok_or_else(|| {
                EngineError::PrevoutMissing(input.txhash.clone(), input.pt_idx)
            })?;
            psbt.input_mut(index).witness_utxo = Some(txout);
        }

        if is_liquid {
            // Create asset and value explicit proofs over the spent
            // output's commitments
            let utxo = psbt
                .input(index)
                .best_utxo()
                .expect("utxo attached above");
            if let (Some(value_commitment), Some(asset_commitment)) =
                (utxo.value_commitment(), utxo.asset_commitment())
            {
                let value_commit = PedersenCommitment::from_slice(&value_commitment)?;
                let asset_gen = Generator::from_slice(&asset_commitment)?;
                let vbf = blinder_from_hex(input.amountblinder.as_deref(), "amountblinder")?;
                let abf = asset_blinder_from_hex(input.assetblinder.as_deref(), "assetblinder")?;

                let value_proof = RangeProof::blind_value_proof(
                    &mut rand::thread_rng(),
                    &self.secp,
                    input.satoshi,
                    value_commit,
                    asset_gen,
                    vbf,
                )?;
                let asset_proof = SurjectionProof::blind_asset_proof(
                    &mut rand::thread_rng(),
                    &self.secp,
                    asset.expect("liquid asset parsed above"),
                    abf,
                )?;
                let fields = &mut psbt.input_mut(index).pset_fields;
                fields.insert(PSET_IN_VALUE_PROOF, value_proof.serialize());
                fields.insert(PSET_IN_ASSET_PROOF, asset_proof.serialize());
            }
        }
        Ok(())
    }

    fn build_output(
        &self,
        psbt: &mut Psbt,
        index: usize,
        output: &TxOutput,
    ) -> Result<(), EngineError> {
        if let Some(coords) = output.coords() {
            // Wallet output: add the relevant keypaths
            keypaths::add_utxo_keypaths(
                self.session,
                &mut psbt.output_mut(index).keypaths,
                &coords,
            )?;
        }

        if !psbt.is_liquid() {
            return Ok(());
        }

        let asset = parse_asset(output.asset_id.as_deref(), "output asset_id")?;
        psbt.output_mut(index)
            .pset_fields
            .insert(PSET_OUT_ASSET, asset.into_inner().0.to_vec());
        psbt.output_mut(index).amount = Some(output.satoshi);

        if output.scriptpubkey.is_empty() {
            // Skip the remaining fields for fee outputs
            return Ok(());
        }

        // Assume the blinder index is 1:1; swap transactions will need
        // their own assignment
        psbt.output_mut(index).blinder_index = Some(index as u32);

        let blinding_key = output.blinding_key.as_deref().ok_or_else(|| {
            EngineError::InvalidDetails(s!("blinded output lacks blinding_key"))
        })?;
        psbt.output_mut(index)
            .pset_fields
            .insert(PSET_OUT_BLINDING_PUBKEY, Vec::<u8>::from_hex(blinding_key)?);

        let asset_commitment = psbt
            .output(index)
            .pset_fields
            .get(&PSET_OUT_ASSET_COMMITMENT)
            .cloned()
            .unwrap_or_else(|| panic!("output {} lacks an asset commitment", index));
        let value_commitment = psbt
            .output(index)
            .pset_fields
            .get(&PSET_OUT_VALUE_COMMITMENT)
            .cloned()
            .unwrap_or_else(|| panic!("output {} lacks a value commitment", index));

        let abf = asset_blinder_from_hex(output.assetblinder.as_deref(), "assetblinder")?;
        let asset_proof =
            SurjectionProof::blind_asset_proof(&mut rand::thread_rng(), &self.secp, asset, abf)?;

        let vbf = blinder_from_hex(output.amountblinder.as_deref(), "amountblinder")?;
        let value_commit = PedersenCommitment::from_slice(&value_commitment)?;
        let asset_gen = Generator::from_slice(&asset_commitment)?;
        let value_proof = RangeProof::blind_value_proof(
            &mut rand::thread_rng(),
            &self.secp,
            output.satoshi,
            value_commit,
            asset_gen,
            vbf,
        )?;

        let fields = &mut psbt.output_mut(index).pset_fields;
        fields.insert(PSET_OUT_BLIND_ASSET_PROOF, asset_proof.serialize());
        fields.insert(PSET_OUT_BLIND_VALUE_PROOF, value_proof.serialize());
        Ok(())
    }

    fn unblind_output(&self, tx: &Tx, vout: usize) -> Result<TxOutSecrets, EngineError> {
        let txout = tx
            .output(vout as u32)
            .and_then(|txout| txout.as_elements().cloned())
            .ok_or_else(|| EngineError::Upstream(s!("missing confidential output")))?;
        let blinding_key = self
            .session
            .signer()
            .get_blinding_key_from_script(txout.script_pubkey.as_bytes())?;
        txout
            .unblind(&self.secp, blinding_key)
            .map_err(|err| EngineError::Upstream(err.to_string()))
    }

    fn address_from_script(
        &self,
        script: &bitcoin::Script,
        blinding_key: Option<&str>,
    ) -> Option<String> {
        let net = self.session.net_params();
        if net.is_liquid {
            let script = elements::Script::from(script.to_bytes());
            let blinder = blinding_key
                .and_then(|hex| Vec::<u8>::from_hex(hex).ok())
                .and_then(|bytes| elements::secp256k1_zkp::PublicKey::from_slice(&bytes).ok());
            elements::Address::from_script(&script, blinder, net.elements_params())
                .map(|address| address.to_string())
        } else {
            bitcoin::Address::from_script(script, net.bitcoin_network())
                .ok()
                .map(|address| address.to_string())
        }
    }
}

fn apply_output_info(jsonout: &mut TxOutput, info: &OutputInfo) {
    jsonout.subaccount = Some(info.subaccount);
    jsonout.pointer = Some(info.pointer);
    jsonout.is_internal = Some(info.is_internal);
    jsonout.address_type = Some(info.address_type);
    jsonout.branch = info.branch;
    jsonout.subtype = info.subtype;
}

fn pset_field<'fields>(
    fields: &'fields FieldMap,
    tag: u8,
    name: &'static str,
) -> Result<&'fields [u8], EngineError> {
    fields
        .get(&tag)
        .map(Vec::as_slice)
        .ok_or(EngineError::MissingPsetField(name))
}

/// Hex of `bytes` in reversed (display) order.
fn hex_rev(bytes: &[u8]) -> String {
    bytes.iter().rev().copied().collect::<Vec<_>>().to_hex()
}

/// Blinding factors travel as display (reversed) hex in the details JSON.
fn blinder_bytes(hex: Option<&str>, field: &'static str) -> Result<Vec<u8>, EngineError> {
    let hex = hex.ok_or_else(|| {
        EngineError::InvalidDetails(format!("missing blinding factor {}", field))
    })?;
    let mut bytes = Vec::<u8>::from_hex(hex)?;
    bytes.reverse();
    Ok(bytes)
}

fn blinder_from_hex(
    hex: Option<&str>,
    field: &'static str,
) -> Result<ValueBlindingFactor, EngineError> {
    Ok(ValueBlindingFactor::from_slice(&blinder_bytes(hex, field)?)?)
}

fn asset_blinder_from_hex(
    hex: Option<&str>,
    field: &'static str,
) -> Result<AssetBlindingFactor, EngineError> {
    Ok(AssetBlindingFactor::from_slice(&blinder_bytes(hex, field)?)?)
}

fn parse_asset(hex: Option<&str>, field: &'static str) -> Result<AssetId, EngineError> {
    let hex =
        hex.ok_or_else(|| EngineError::InvalidDetails(format!("missing {}", field)))?;
    AssetId::from_str(hex)
        .map_err(|err| EngineError::InvalidDetails(format!("invalid {}: {}", field, err)))
}
