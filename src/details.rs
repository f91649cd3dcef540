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

//! Typed surface of the transaction-details JSON exchanged with wallet
//! front-ends. The engine consumes and produces these structures; only the
//! outer API layer re-serialises them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Wallet address types the engine can attach scripts for.
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Display)]
#[derive(Serialize, Deserialize)]
pub enum AddressType {
    /// Singlesig P2WPKH nested in P2SH.
    #[serde(rename = "p2sh-p2wpkh")]
    #[display("p2sh-p2wpkh")]
    P2shP2wpkh,

    /// Singlesig native segwit.
    #[serde(rename = "p2wpkh")]
    #[display("p2wpkh")]
    P2wpkh,

    /// Singlesig legacy.
    #[serde(rename = "p2pkh")]
    #[display("p2pkh")]
    P2pkh,

    /// Multisig 2of2/2of3 P2WSH nested in P2SH.
    #[serde(rename = "p2wsh")]
    #[display("p2wsh")]
    P2wsh,

    /// Multisig 2of2 with a CSV recovery branch, nested in P2SH.
    #[serde(rename = "csv")]
    #[display("csv")]
    Csv,
}

/// Wallet coordinate of a UTXO or owned output.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct WalletCoords {
    /// Owning subaccount.
    pub subaccount: u32,

    /// Address pointer within the subaccount.
    pub pointer: u32,

    /// Whether the address sits on the internal chain.
    pub is_internal: bool,

    /// Address type of the owning subaccount.
    pub address_type: AddressType,
}

/// One transaction input: either a wallet UTXO (with its coordinates and
/// blinding data) or a non-wallet input described from the PSBT alone.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TxInput {
    /// Display (reversed) hex txid of the spent transaction.
    pub txhash: String,

    /// Output index of the spent transaction.
    pub pt_idx: u32,

    /// Input sequence number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u32>,

    /// Owning subaccount, for wallet UTXOs.
    #[serde(default)]
    pub subaccount: u32,

    /// Address pointer, for wallet UTXOs.
    #[serde(default)]
    pub pointer: u32,

    /// Whether the address sits on the internal chain.
    #[serde(default)]
    pub is_internal: bool,

    /// Address type; its presence marks the input as a wallet UTXO.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_type: Option<AddressType>,

    /// Input amount in satoshi.
    #[serde(default)]
    pub satoshi: u64,

    /// Asset id in display hex (Liquid).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_id: Option<String>,

    /// Asset blinding factor in display hex (Liquid wallet UTXOs).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assetblinder: Option<String>,

    /// Value blinding factor in display hex (Liquid wallet UTXOs).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amountblinder: Option<String>,

    /// Previous output script hex for multisig UTXOs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prevout_script: Option<String>,

    /// Whether signing should skip this input.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub skip_signing: bool,

    /// Non-default sighash requested by the PSBT.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_sighash: Option<u32>,

    /// Redeem script surfaced from non-wallet PSBT inputs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redeem_script: Option<String>,

    /// Explicit value proof surfaced from non-wallet PSET inputs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_blind_proof: Option<String>,

    /// Explicit asset proof surfaced from non-wallet PSET inputs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_blind_proof: Option<String>,

    /// User key derivation path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_path: Option<Vec<u32>>,

    /// Service co-signer derivation path (multisig).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_path: Option<Vec<u32>>,

    /// Per-input error (e.g. a confidential input that cannot be
    /// unblinded).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Any further wallet-store fields, passed through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TxInput {
    /// Wallet coordinates, present only for wallet UTXOs.
    pub fn coords(&self) -> Option<WalletCoords> {
        self.address_type.map(|address_type| WalletCoords {
            subaccount: self.subaccount,
            pointer: self.pointer,
            is_internal: self.is_internal,
            address_type,
        })
    }

    /// Whether this input spends a wallet UTXO.
    pub fn is_wallet(&self) -> bool { self.address_type.is_some() }
}

/// One transaction output, enriched with wallet ownership, blinding data
/// and addresses.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TxOutput {
    /// Output script hex; empty for a Liquid fee output.
    #[serde(default)]
    pub scriptpubkey: String,

    /// Output amount in satoshi.
    #[serde(default)]
    pub satoshi: u64,

    /// Asset id in display hex (Liquid).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_id: Option<String>,

    /// Blinding public key hex for confidential outputs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blinding_key: Option<String>,

    /// Asset blinding factor in display hex.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assetblinder: Option<String>,

    /// Value blinding factor in display hex.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amountblinder: Option<String>,

    /// Value commitment hex.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commitment: Option<String>,

    /// Asset commitment hex.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_tag: Option<String>,

    /// Value rangeproof hex.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range_proof: Option<String>,

    /// Asset surjection proof hex.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub surj_proof: Option<String>,

    /// ECDH ephemeral public key hex.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eph_public_key: Option<String>,

    /// Explicit value proof hex.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_blind_proof: Option<String>,

    /// Explicit asset proof hex.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_blind_proof: Option<String>,

    /// Address for the output, confidential where applicable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    /// Owning subaccount, for wallet outputs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subaccount: Option<u32>,

    /// Address pointer, for wallet outputs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pointer: Option<u32>,

    /// Whether the address sits on the internal chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_internal: Option<bool>,

    /// Address type, for wallet outputs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_type: Option<AddressType>,

    /// Multisig branch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<u32>,

    /// Multisig subtype.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<u32>,

    /// Whether this output returns funds to the wallet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_change: Option<bool>,

    /// Whether the attached address is confidential.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_confidential: Option<bool>,

    /// User key derivation path, for wallet outputs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_path: Option<Vec<u32>>,

    /// Service co-signer derivation path (multisig wallet outputs).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_path: Option<Vec<u32>>,

    /// Any further fields, passed through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TxOutput {
    /// Wallet coordinates, present only for wallet outputs.
    pub fn coords(&self) -> Option<WalletCoords> {
        match (self.address_type, self.subaccount, self.pointer) {
            (Some(address_type), Some(subaccount), Some(pointer)) => Some(WalletCoords {
                subaccount,
                pointer,
                is_internal: self.is_internal.unwrap_or(false),
                address_type,
            }),
            _ => None,
        }
    }

    /// Whether this output pays to the wallet.
    pub fn is_wallet(&self) -> bool { self.coords().is_some() }
}

/// Transaction details consumed by the build pipeline.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PsbtDetails {
    /// Raw transaction hex.
    pub transaction: String,

    /// Per-input details, 1:1 with the raw transaction inputs.
    #[serde(default)]
    pub transaction_inputs: Vec<TxInput>,

    /// Per-output details, 1:1 with the raw transaction outputs.
    #[serde(default)]
    pub transaction_outputs: Vec<TxOutput>,

    /// Error state; a non-empty error forbids building.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of the parse pipeline: enriched details plus fee and signing
/// summary data.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DetailsResult {
    /// Raw transaction hex, with dummy signatures on unsigned wallet
    /// inputs for size estimation.
    pub transaction: String,

    /// Enriched per-input details.
    pub transaction_inputs: Vec<TxInput>,

    /// Enriched per-output details.
    pub transaction_outputs: Vec<TxOutput>,

    /// Fee in satoshi of the policy asset.
    pub fee: u64,

    /// Service fee component; always zero here.
    pub network_fee: u64,

    /// Fee rate in satoshi per 1000 vbytes.
    pub fee_rate: u64,

    /// Display (reversed) hex txid.
    pub txhash: String,

    /// UTXO selection strategy; externally supplied inputs are never
    /// re-selected.
    pub utxo_strategy: String,

    /// Whether the transaction is blinded (Liquid; always true).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_blinded: Option<bool>,

    /// Whether inputs outside the wallet are present.
    pub is_partial: bool,

    /// Error elevated from inputs which are not skipped for signing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Wallet UTXOs offered to the parse pipeline, either grouped by asset
/// (standard) or as a flat array (deprecated).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UtxoSet {
    /// Standard form: `asset id → utxos`.
    ByAsset(BTreeMap<String, Vec<TxInput>>),

    /// Deprecated flat form.
    Flat(Vec<TxInput>),
}

impl Default for UtxoSet {
    fn default() -> Self { UtxoSet::Flat(vec![]) }
}

impl UtxoSet {
    /// Moves out the UTXO matching `txhash:vout`, if present.
    pub fn take_matching(&mut self, txhash: &str, vout: u32) -> Option<TxInput> {
        let take = |utxos: &mut Vec<TxInput>| {
            utxos
                .iter()
                .position(|utxo| utxo.pt_idx == vout && utxo.txhash == txhash)
                .map(|pos| utxos.remove(pos))
        };
        match self {
            UtxoSet::Flat(utxos) => take(utxos),
            UtxoSet::ByAsset(by_asset) => by_asset.values_mut().find_map(take),
        }
    }
}
