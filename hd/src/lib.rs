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

//! Hierarchical-deterministic key handling for wallet sessions: raw-index
//! derivation paths, a thread-safe xpub cache with prefix promotion, and the
//! subaccount derivation policies used by multisig and singlesig wallets.

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

mod cache;
mod path;
mod pubkeys;
mod xkey;

pub use cache::{KeyCache, Lookup};
pub use path::{harden, is_hardened, to_bip32_path, HdPath, HARDENED_INDEX_BOUNDARY};
pub use pubkeys::{
    Bip44Pubkeys, DerivationError, GreenPubkeys, GreenUserPubkeys, SubaccountPubkeys,
    GAIT_GENERATION_NONCE,
};
pub use xkey::XpubHdKey;
