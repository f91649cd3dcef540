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
use bitcoin::Script;
#[cfg(feature = "serde")]
use serde_with::{hex::Hex, As, Same};

use crate::{
    FieldMap, RawKey, PSET_OUT_ASSET_COMMITMENT, PSET_OUT_ASSET_SURJECTION_PROOF,
    PSET_OUT_BLINDING_PUBKEY, PSET_OUT_BLIND_ASSET_PROOF, PSET_OUT_BLIND_VALUE_PROOF,
    PSET_OUT_ECDH_PUBKEY, PSET_OUT_VALUE_COMMITMENT, PSET_OUT_VALUE_RANGEPROOF,
};

/// Blinding state of a PSET output.
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Display)]
pub enum BlindingStatus {
    /// No blinding data at all; on a well-formed PSET this is the fee
    /// output.
    #[display("none")]
    None,

    /// Some but not all blinding fields are present; not supported.
    #[display("partial")]
    Partial,

    /// Commitments and both proofs are present.
    #[display("full")]
    Full,
}

/// A single PSBT/PSET output in the version-2 field model.
#[derive(Clone, Eq, PartialEq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Output {
    /// The index of this output. Used in error reporting.
    pub(crate) index: usize,

    /// Explicit output value in satoshi. Always present for bitcoin
    /// outputs; present alongside commitments on PSET.
    pub amount: Option<u64>,

    /// The scriptPubKey; empty for a Liquid fee output.
    pub script: Script,

    /// Public keys needed to spend this output mapped to their master key
    /// fingerprints and derivation paths.
    pub keypaths: BTreeMap<secp256k1::PublicKey, KeySource>,

    /// PSET proprietary byte fields keyed by subtag (commitments, proofs
    /// and blinding keys).
    #[cfg_attr(feature = "serde", serde(with = "As::<BTreeMap<Same, Hex>>"))]
    pub pset_fields: FieldMap,

    /// PSET blinder index; locked to the output's own index when produced
    /// by this library.
    pub blinder_index: Option<u32>,

    /// Unrecognised key-value pairs, preserved for round-tripping.
    #[cfg_attr(feature = "serde", serde(with = "As::<BTreeMap<Same, Hex>>"))]
    pub unknown: BTreeMap<RawKey, Vec<u8>>,
}

impl Output {
    /// Constructs an output paying `amount` to `script`.
    pub fn new(index: usize, amount: Option<u64>, script: Script) -> Output {
        Output {
            index,
            amount,
            script,
            keypaths: bmap! {},
            pset_fields: bmap! {},
            blinder_index: None,
            unknown: bmap! {},
        }
    }

    /// The index of this output within its PSBT.
    #[inline]
    pub fn index(&self) -> usize { self.index }

    /// Classifies the blinding state from the present PSET fields.
    ///
    /// `Full` requires the value and asset commitments along with the
    /// rangeproof and surjection proof; `None` requires that no blinding
    /// field is present at all. Anything in between is `Partial` and is
    /// rejected by consumers.
    pub fn blinding_status(&self) -> BlindingStatus {
        const REQUIRED: [u8; 4] = [
            PSET_OUT_VALUE_COMMITMENT,
            PSET_OUT_ASSET_COMMITMENT,
            PSET_OUT_VALUE_RANGEPROOF,
            PSET_OUT_ASSET_SURJECTION_PROOF,
        ];
        const BLINDING: [u8; 8] = [
            PSET_OUT_VALUE_COMMITMENT,
            PSET_OUT_ASSET_COMMITMENT,
            PSET_OUT_VALUE_RANGEPROOF,
            PSET_OUT_ASSET_SURJECTION_PROOF,
            PSET_OUT_BLINDING_PUBKEY,
            PSET_OUT_ECDH_PUBKEY,
            PSET_OUT_BLIND_VALUE_PROOF,
            PSET_OUT_BLIND_ASSET_PROOF,
        ];

        let present = BLINDING
            .iter()
            .filter(|tag| self.pset_fields.contains_key(*tag))
            .count();
        if present == 0 {
            BlindingStatus::None
        } else if REQUIRED
            .iter()
            .all(|tag| self.pset_fields.contains_key(tag))
        {
            BlindingStatus::Full
        } else {
            BlindingStatus::Partial
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn blinding_status_classification() {
        let mut output = Output::new(0, Some(1000), Script::new());
        assert_eq!(output.blinding_status(), BlindingStatus::None);

        output
            .pset_fields
            .insert(PSET_OUT_VALUE_COMMITMENT, vec![0x08; 33]);
        assert_eq!(output.blinding_status(), BlindingStatus::Partial);

        output
            .pset_fields
            .insert(PSET_OUT_ASSET_COMMITMENT, vec![0x0a; 33]);
        output
            .pset_fields
            .insert(PSET_OUT_VALUE_RANGEPROOF, vec![0x01; 100]);
        output
            .pset_fields
            .insert(PSET_OUT_ASSET_SURJECTION_PROOF, vec![0x02; 67]);
        assert_eq!(output.blinding_status(), BlindingStatus::Full);
    }
}
