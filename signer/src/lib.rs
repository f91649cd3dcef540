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

//! Wallet signer: credential ingest, capability descriptors, BIP32 xpub
//! derivation with prefix-promotion caching, message-hash signing and
//! SLIP-77 blinding key derivation.

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

mod credentials;
mod device;
mod signer;
pub mod slip77;

pub use credentials::{Credentials, SeedBytes};
pub use device::{AeProtocolSupport, Device, DeviceType, LiquidSupport};
pub use signer::{Signer, SignerError, SignerNetwork};
