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
use elements::encode as elm_encode;

/// Errors produced when parsing or serializing PSBT/PSET containers.
#[derive(Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum PsbtError {
    /// PSBT/PSET mismatch: the container type does not match the requested
    /// network kind
    LiquidMismatch,

    /// base64 decoding error: {0}
    #[from]
    Base64(base64::DecodeError),

    /// hex decoding error: {0}
    #[from]
    Hex(bitcoin::hashes::hex::Error),

    /// wire format error: {0}
    #[from]
    Wire(WireError),

    /// bitcoin transaction encoding error: {0}
    #[from]
    BitcoinEncode(btc_encode::Error),

    /// elements transaction encoding error: {0}
    #[from]
    ElementsEncode(elm_encode::Error),

    /// unsigned transaction input {0} already carries signature data
    SignedInput(usize),

    /// output {0} lacks required value or asset information
    IncompleteOutput(usize),

    /// invalid confidential commitment or proof: {0}
    #[from]
    Zkp(elements::secp256k1_zkp::Error),

    /// invalid hash data: {0}
    #[from]
    Hashes(bitcoin::hashes::Error),
}

/// Low-level BIP-174/PSET key-value wire errors.
#[derive(Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Display, Error)]
#[display(doc_comments)]
pub enum WireError {
    /// invalid container magic bytes
    InvalidMagic,

    /// unexpected end of data
    UnexpectedEof,

    /// trailing garbage after the last output map
    TrailingData,

    /// duplicate {1:#04x} key in {0} map
    DuplicateKey(&'static str, u64),

    /// required {0} field is missing
    MissingField(&'static str),

    /// field {0} has invalid length {1}
    InvalidFieldLength(&'static str, usize),

    /// PSBT version {0} is not supported
    UnsupportedVersion(u32),

    /// a version-2 container must not carry a global unsigned transaction
    UnsignedTxInV2,

    /// invalid BIP32 keypath entry
    InvalidKeypath,

    /// invalid public key in keypath entry
    InvalidPublicKey,
}
