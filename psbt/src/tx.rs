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

use bitcoin::consensus::encode as btc_encode;
use bitcoin::hashes::hex::{FromHex, ToHex};
use bitcoin::hashes::Hash;
use bitcoin::Txid;
use elements::encode as elm_encode;

use crate::PsbtError;

/// A raw transaction of either supported chain, presenting a uniform
/// accessor surface to the PSBT machinery and the enrichment engine.
#[derive(Clone, Eq, PartialEq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Tx {
    /// A bitcoin transaction.
    Bitcoin(bitcoin::Transaction),

    /// An Elements/Liquid transaction.
    Elements(elements::Transaction),
}

/// A transaction output of either supported chain, as attached to PSBT
/// inputs (witness UTXO) and inspected for amounts and commitments.
#[derive(Clone, Eq, PartialEq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TxOutExt {
    /// A bitcoin output.
    Bitcoin(bitcoin::TxOut),

    /// An Elements/Liquid output, possibly confidential.
    Elements(elements::TxOut),
}

impl Tx {
    /// Decodes a raw transaction from consensus bytes.
    pub fn from_bytes(bytes: &[u8], is_liquid: bool) -> Result<Tx, PsbtError> {
        if is_liquid {
            Ok(Tx::Elements(elm_encode::deserialize(bytes)?))
        } else {
            Ok(Tx::Bitcoin(btc_encode::deserialize(bytes)?))
        }
    }

    /// Decodes a raw transaction from hex.
    pub fn from_hex(hex: &str, is_liquid: bool) -> Result<Tx, PsbtError> {
        Tx::from_bytes(&Vec::<u8>::from_hex(hex)?, is_liquid)
    }

    /// Consensus serialization of the transaction.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Tx::Bitcoin(tx) => btc_encode::serialize(tx),
            Tx::Elements(tx) => elm_encode::serialize(tx),
        }
    }

    /// Hex form of the consensus serialization.
    pub fn to_hex(&self) -> String { self.to_bytes().to_hex() }

    /// Whether this is an Elements transaction.
    pub fn is_liquid(&self) -> bool { matches!(self, Tx::Elements(_)) }

    /// Transaction id, as a chain-independent 32-byte hash.
    pub fn txid(&self) -> Txid {
        match self {
            Tx::Bitcoin(tx) => tx.txid(),
            Tx::Elements(tx) => {
                Txid::from_inner(tx.txid().into_inner())
            }
        }
    }

    /// Transaction version.
    pub fn version(&self) -> u32 {
        match self {
            Tx::Bitcoin(tx) => u32::from_be_bytes(tx.version.to_be_bytes()),
            Tx::Elements(tx) => tx.version,
        }
    }

    /// Transaction locktime in consensus form.
    pub fn lock_time(&self) -> u32 {
        match self {
            Tx::Bitcoin(tx) => tx.lock_time.0,
            Tx::Elements(tx) => tx.lock_time.0,
        }
    }

    /// Number of transaction inputs.
    pub fn num_inputs(&self) -> usize {
        match self {
            Tx::Bitcoin(tx) => tx.input.len(),
            Tx::Elements(tx) => tx.input.len(),
        }
    }

    /// Number of transaction outputs.
    pub fn num_outputs(&self) -> usize {
        match self {
            Tx::Bitcoin(tx) => tx.output.len(),
            Tx::Elements(tx) => tx.output.len(),
        }
    }

    /// Previous outpoint of input `index`.
    ///
    /// # Panics
    ///
    /// If `index` is out of range.
    pub fn input_prev_outpoint(&self, index: usize) -> (Txid, u32) {
        match self {
            Tx::Bitcoin(tx) => {
                let outpoint = tx.input[index].previous_output;
                (outpoint.txid, outpoint.vout)
            }
            Tx::Elements(tx) => {
                let outpoint = tx.input[index].previous_output;
                (Txid::from_inner(outpoint.txid.into_inner()), outpoint.vout)
            }
        }
    }

    /// Sequence number of input `index` in consensus form.
    ///
    /// # Panics
    ///
    /// If `index` is out of range.
    pub fn input_sequence(&self, index: usize) -> u32 {
        match self {
            Tx::Bitcoin(tx) => tx.input[index].sequence.to_consensus_u32(),
            Tx::Elements(tx) => tx.input[index].sequence.to_consensus_u32(),
        }
    }

    /// Whether input `index` carries a scriptSig.
    pub fn input_has_script_sig(&self, index: usize) -> bool {
        match self {
            Tx::Bitcoin(tx) => !tx.input[index].script_sig.is_empty(),
            Tx::Elements(tx) => !tx.input[index].script_sig.is_empty(),
        }
    }

    /// Whether input `index` carries witness data.
    pub fn input_has_witness(&self, index: usize) -> bool {
        match self {
            Tx::Bitcoin(tx) => !tx.input[index].witness.is_empty(),
            Tx::Elements(tx) => !tx.input[index].witness.script_witness.is_empty(),
        }
    }

    /// Overwrites the scriptSig of input `index`.
    ///
    /// # Panics
    ///
    /// If `index` is out of range.
    pub fn set_input_script_sig(&mut self, index: usize, script: &[u8]) {
        match self {
            Tx::Bitcoin(tx) => tx.input[index].script_sig = script.to_vec().into(),
            Tx::Elements(tx) => tx.input[index].script_sig = script.to_vec().into(),
        }
    }

    /// Overwrites the script witness stack of input `index`.
    ///
    /// # Panics
    ///
    /// If `index` is out of range.
    pub fn set_input_witness(&mut self, index: usize, witness: Vec<Vec<u8>>) {
        match self {
            Tx::Bitcoin(tx) => tx.input[index].witness = bitcoin::Witness::from_vec(witness),
            Tx::Elements(tx) => tx.input[index].witness.script_witness = witness,
        }
    }

    /// Output at `vout`, if present.
    pub fn output(&self, vout: u32) -> Option<TxOutExt> {
        match self {
            Tx::Bitcoin(tx) => tx.output.get(vout as usize).cloned().map(TxOutExt::Bitcoin),
            Tx::Elements(tx) => tx.output.get(vout as usize).cloned().map(TxOutExt::Elements),
        }
    }

    /// Virtual size of the transaction in vbytes, rounded up.
    pub fn vsize(&self) -> usize {
        let weight = match self {
            Tx::Bitcoin(tx) => tx.weight(),
            Tx::Elements(tx) => tx.weight(),
        };
        (weight + 3) / 4
    }
}

impl TxOutExt {
    /// Decodes an output from its consensus serialization.
    pub fn from_bytes(bytes: &[u8], is_liquid: bool) -> Result<TxOutExt, PsbtError> {
        if is_liquid {
            Ok(TxOutExt::Elements(elm_encode::deserialize(bytes)?))
        } else {
            Ok(TxOutExt::Bitcoin(btc_encode::deserialize(bytes)?))
        }
    }

    /// Consensus serialization of the output.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            TxOutExt::Bitcoin(txout) => btc_encode::serialize(txout),
            TxOutExt::Elements(txout) => elm_encode::serialize(txout),
        }
    }

    /// Explicit output value, when known.
    pub fn value(&self) -> Option<u64> {
        match self {
            TxOutExt::Bitcoin(txout) => Some(txout.value),
            TxOutExt::Elements(txout) => txout.value.explicit(),
        }
    }

    /// 33-byte pedersen commitment of a confidential value.
    pub fn value_commitment(&self) -> Option<Vec<u8>> {
        match self {
            TxOutExt::Bitcoin(_) => None,
            TxOutExt::Elements(txout) => {
                txout.value.commitment().map(|c| c.serialize().to_vec())
            }
        }
    }

    /// Explicit asset id in wire (little-endian) byte order.
    pub fn asset_id_le(&self) -> Option<[u8; 32]> {
        match self {
            TxOutExt::Bitcoin(_) => None,
            TxOutExt::Elements(txout) => txout.asset.explicit().map(|id| id.into_inner().0),
        }
    }

    /// 33-byte generator commitment of a confidential asset.
    pub fn asset_commitment(&self) -> Option<Vec<u8>> {
        match self {
            TxOutExt::Bitcoin(_) => None,
            TxOutExt::Elements(txout) => {
                txout.asset.commitment().map(|c| c.serialize().to_vec())
            }
        }
    }

    /// ECDH nonce commitment bytes, when present.
    pub fn nonce_commitment(&self) -> Option<Vec<u8>> {
        match self {
            TxOutExt::Bitcoin(_) => None,
            TxOutExt::Elements(txout) => {
                txout.nonce.commitment().map(|pk| pk.serialize().to_vec())
            }
        }
    }

    /// Raw scriptpubkey bytes.
    pub fn script_pubkey(&self) -> Vec<u8> {
        match self {
            TxOutExt::Bitcoin(txout) => txout.script_pubkey.to_bytes(),
            TxOutExt::Elements(txout) => txout.script_pubkey.to_bytes(),
        }
    }

    /// The elements output, for unblinding on liquid.
    pub fn as_elements(&self) -> Option<&elements::TxOut> {
        match self {
            TxOutExt::Bitcoin(_) => None,
            TxOutExt::Elements(txout) => Some(txout),
        }
    }
}
