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

use bitcoin::secp256k1;
use bitcoin::util::bip32::KeySource;
use bitcoin::{Script, Txid};
#[cfg(feature = "serde")]
use serde_with::{hex::Hex, As, Same};

use crate::{FieldMap, RawKey, Tx, TxOutExt, PSBT_IN_REDEEM_SCRIPT, PSBT_IN_WITNESS_SCRIPT};

/// Sighash value assumed when an input does not carry one.
pub const SIGHASH_ALL: u32 = 0x01;

/// A single PSBT/PSET input in the version-2 field model.
#[derive(Clone, Eq, PartialEq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Input {
    /// The index of this input. Used in error reporting.
    pub(crate) index: usize,

    /// Txid of the previous transaction being spent.
    pub previous_txid: Txid,

    /// Output index of the previous transaction being spent.
    pub previous_vout: u32,

    /// Sequence number; assumed final (0xffffffff) when absent.
    pub sequence: Option<u32>,

    /// The full transaction this input spends from.
    pub non_witness_utxo: Option<Tx>,

    /// The single output this input spends from.
    pub witness_utxo: Option<TxOutExt>,

    /// Public keys needed to sign this input mapped to their master key
    /// fingerprints and derivation paths.
    pub keypaths: BTreeMap<secp256k1::PublicKey, KeySource>,

    /// BIP-174 byte fields keyed by input tag (redeem script, witness
    /// script).
    #[cfg_attr(feature = "serde", serde(with = "As::<BTreeMap<Same, Hex>>"))]
    pub psbt_fields: FieldMap,

    /// PSET proprietary byte fields keyed by subtag (explicit asset and
    /// value/asset proofs).
    #[cfg_attr(feature = "serde", serde(with = "As::<BTreeMap<Same, Hex>>"))]
    pub pset_fields: FieldMap,

    /// PSET explicit value in satoshi.
    pub amount: Option<u64>,

    /// Requested sighash type.
    pub sighash: Option<u32>,

    /// Finalized scriptSig.
    pub final_script_sig: Option<Script>,

    /// Finalized script witness stack.
    pub final_script_witness: Option<Vec<Vec<u8>>>,

    /// Unrecognised key-value pairs, preserved for round-tripping.
    #[cfg_attr(feature = "serde", serde(with = "As::<BTreeMap<Same, Hex>>"))]
    pub unknown: BTreeMap<RawKey, Vec<u8>>,
}

impl Input {
    /// Constructs an input spending `previous_txid:previous_vout`.
    pub fn new(index: usize, previous_txid: Txid, previous_vout: u32) -> Input {
        Input {
            index,
            previous_txid,
            previous_vout,
            sequence: None,
            non_witness_utxo: None,
            witness_utxo: None,
            keypaths: bmap! {},
            psbt_fields: bmap! {},
            pset_fields: bmap! {},
            amount: None,
            sighash: None,
            final_script_sig: None,
            final_script_witness: None,
            unknown: bmap! {},
        }
    }

    /// The index of this input within its PSBT.
    #[inline]
    pub fn index(&self) -> usize { self.index }

    /// Whether a PSET explicit value is present.
    #[inline]
    pub fn has_amount(&self) -> bool { self.amount.is_some() }

    /// The sighash to sign with; `SIGHASH_ALL` when unset.
    #[inline]
    pub fn sighash_or_default(&self) -> u32 { self.sighash.unwrap_or(SIGHASH_ALL) }

    /// The redeem script field, when set.
    pub fn redeem_script(&self) -> Option<&[u8]> {
        self.psbt_fields
            .get(&PSBT_IN_REDEEM_SCRIPT)
            .map(Vec::as_slice)
    }

    /// The witness script field, when set.
    pub fn witness_script(&self) -> Option<&[u8]> {
        self.psbt_fields
            .get(&PSBT_IN_WITNESS_SCRIPT)
            .map(Vec::as_slice)
    }

    /// The best known previous output for this input: the witness UTXO when
    /// present, otherwise the spent output of the non-witness transaction.
    /// The non-witness transaction id is cross-checked against the input's
    /// previous txid.
    pub fn best_utxo(&self) -> Option<TxOutExt> {
        if let Some(txout) = &self.witness_utxo {
            return Some(txout.clone());
        }
        let tx = self.non_witness_utxo.as_ref()?;
        if tx.txid() != self.previous_txid {
            return None;
        }
        tx.output(self.previous_vout)
    }
}

#[cfg(test)]
mod test {
    use bitcoin::hashes::Hash;

    use super::*;

    #[test]
    fn best_utxo_prefers_witness() {
        let txid = Txid::all_zeros();
        let mut input = Input::new(0, txid, 0);
        assert!(input.best_utxo().is_none());

        input.witness_utxo = Some(TxOutExt::Bitcoin(bitcoin::TxOut {
            value: 1234,
            script_pubkey: Script::new(),
        }));
        assert_eq!(input.best_utxo().unwrap().value(), Some(1234));
    }

    #[test]
    fn best_utxo_checks_non_witness_txid() {
        let tx = bitcoin::Transaction {
            version: 2,
            lock_time: bitcoin::PackedLockTime(0),
            input: vec![],
            output: vec![bitcoin::TxOut {
                value: 555,
                script_pubkey: Script::new(),
            }],
        };
        let txid = tx.txid();

        let mut input = Input::new(0, txid, 0);
        input.non_witness_utxo = Some(Tx::Bitcoin(tx.clone()));
        assert_eq!(input.best_utxo().unwrap().value(), Some(555));

        // Wrong txid is not silently accepted
        let mut wrong = Input::new(0, Txid::all_zeros(), 0);
        wrong.non_witness_utxo = Some(Tx::Bitcoin(tx));
        assert!(wrong.best_utxo().is_none());
    }

    #[test]
    fn default_sighash_is_all() {
        let mut input = Input::new(0, Txid::all_zeros(), 1);
        assert_eq!(input.sighash_or_default(), SIGHASH_ALL);
        input.sighash = Some(0x83);
        assert_eq!(input.sighash_or_default(), 0x83);
    }
}
