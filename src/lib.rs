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

//! Wallet session core: maps between PSBT/PSET containers and the
//! structured transaction details consumed by wallet front-ends, attaching
//! keypaths, scripts and confidential proofs along the way.
//!
//! The heavy lifting is split over member crates: [`wallet_psbt`] owns the
//! containers and their wire format, [`wallet_signer`] the credentials and
//! key material, [`wallet_hd`] the derivation policies. This crate binds
//! them to a [`Session`] implementation.

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

mod change;
mod details;
mod dummy_sig;
mod engine;
mod errors;
mod keypaths;
mod scripts;
mod session;

pub use details::{
    AddressType, DetailsResult, PsbtDetails, TxInput, TxOutput, UtxoSet, WalletCoords,
};
pub use engine::Engine;
pub use errors::EngineError;
pub use session::{ChainAccess, NetParams, OutputInfo, Session};

pub use wallet_hd as hd;
pub use wallet_psbt as psbt;
pub use wallet_signer as signer;
