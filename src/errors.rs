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

use wallet_hd::DerivationError;
use wallet_psbt::PsbtError;
use wallet_signer::SignerError;

/// Errors surfaced by the enrichment engine.
///
/// Invariant violations (index mismatches, missing mandatory PSET fields on
/// locally built containers, unsupported blinding states) panic instead of
/// producing a variant here.
#[derive(Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum EngineError {
    /// PSBT error: {0}
    #[from]
    Psbt(PsbtError),

    /// signer error: {0}
    #[from]
    Signer(SignerError),

    /// derivation error: {0}
    #[from]
    Derivation(DerivationError),

    /// confidential proof error: {0}
    #[from]
    Zkp(elements::secp256k1_zkp::Error),

    /// hex decoding error: {0}
    #[from]
    Hex(bitcoin::hashes::hex::Error),

    /// collaborator failure: {0}
    Upstream(String),

    /// required PSET field `{0}` not found
    MissingPsetField(&'static str),

    /// previous output {0}:{1} is not present in the spent transaction
    PrevoutMissing(String, u32),

    /// transaction details are invalid: {0}
    InvalidDetails(String),

    /// details carry fewer inputs or outputs than the raw transaction
    LengthMismatch,
}
