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

//! Partially signed bitcoin and elements transactions, normalised to the
//! version-2 field model in memory and restored to their original version on
//! serialization. Confidential (PSET) fields are carried as tagged byte maps
//! so that unknown data survives round-trips bit-exactly.

// Coding conventions
#![deny(
    non_upper_case_globals,
    non_camel_case_types,
    non_snake_case,
    unused_mut,
    unused_imports,
    dead_code,
    missing_docs
)]

#[macro_use]
extern crate amplify;

mod errors;
mod global;
mod input;
mod output;
mod serialize;
mod tx;

pub use errors::{PsbtError, WireError};
pub use global::{Psbt, PsbtVersion};
pub use input::Input;
pub use output::{BlindingStatus, Output};
pub use tx::{Tx, TxOutExt};

/// Tagged byte map carried by PSBT/PSET inputs and outputs.
pub type FieldMap = std::collections::BTreeMap<u8, Vec<u8>>;

/// An unrecognised wire key: raw key type and key data.
#[derive(Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RawKey {
    /// Key type discriminant.
    pub type_value: u64,

    /// Raw key data following the type.
    pub key_data: Vec<u8>,
}

/// PSBT input field tag for the redeem script.
pub const PSBT_IN_REDEEM_SCRIPT: u8 = 0x04;
/// PSBT input field tag for the witness script.
pub const PSBT_IN_WITNESS_SCRIPT: u8 = 0x05;

/// PSET input tag for the explicit value proof.
pub const PSET_IN_VALUE_PROOF: u8 = 0x12;
/// PSET input tag for the explicit asset id.
pub const PSET_IN_EXPLICIT_ASSET: u8 = 0x13;
/// PSET input tag for the explicit asset proof.
pub const PSET_IN_ASSET_PROOF: u8 = 0x14;

/// PSET output tag for the value commitment.
pub const PSET_OUT_VALUE_COMMITMENT: u8 = 0x01;
/// PSET output tag for the explicit asset id.
pub const PSET_OUT_ASSET: u8 = 0x02;
/// PSET output tag for the asset commitment.
pub const PSET_OUT_ASSET_COMMITMENT: u8 = 0x03;
/// PSET output tag for the value rangeproof.
pub const PSET_OUT_VALUE_RANGEPROOF: u8 = 0x04;
/// PSET output tag for the asset surjection proof.
pub const PSET_OUT_ASSET_SURJECTION_PROOF: u8 = 0x05;
/// PSET output tag for the blinding pubkey.
pub const PSET_OUT_BLINDING_PUBKEY: u8 = 0x06;
/// PSET output tag for the ECDH pubkey.
pub const PSET_OUT_ECDH_PUBKEY: u8 = 0x07;
/// PSET output tag for the blinder index (accepted but unused).
pub const PSET_OUT_BLINDER_INDEX: u8 = 0x08;
/// PSET output tag for the blind value proof.
pub const PSET_OUT_BLIND_VALUE_PROOF: u8 = 0x09;
/// PSET output tag for the blind asset proof.
pub const PSET_OUT_BLIND_ASSET_PROOF: u8 = 0x0a;
