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

use std::fmt::{self, Debug, Formatter};
use std::str::FromStr;

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bitcoin::hashes::hex::{FromHex, ToHex};
use bitcoin::util::bip32::ExtendedPubKey;
use serde_json::{json, Value};
use slip132::FromSlip132;

use crate::signer::SignerError;

const ENCRYPTION_SALT_LEN: usize = 16;
const ENCRYPTION_NONCE_LEN: usize = 12;

/// 64-byte BIP32 seed scrubbed from memory on drop.
#[derive(Clone, Eq, PartialEq)]
pub struct SeedBytes([u8; 64]);

impl From<[u8; 64]> for SeedBytes {
    fn from(seed: [u8; 64]) -> Self { Self(seed) }
}

impl AsRef<[u8]> for SeedBytes {
    #[inline]
    fn as_ref(&self) -> &[u8] { &self.0 }
}

impl Debug for SeedBytes {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result { f.write_str("SeedBytes(<scrubbed>)") }
}

impl Drop for SeedBytes {
    fn drop(&mut self) {
        for byte in self.0.iter_mut() {
            unsafe { std::ptr::write_volatile(byte, 0) };
        }
    }
}

impl SeedBytes {
    /// Hex form of the seed.
    pub fn to_hex(&self) -> String { self.0.to_hex() }
}

/// Login credentials, validated once on ingest.
#[derive(Clone, Eq, PartialEq, Debug)]
pub enum Credentials {
    /// BIP39 mnemonic with its derived seed.
    Mnemonic {
        /// Decrypted mnemonic words.
        mnemonic: String,
        /// Seed derived from the mnemonic and passphrase.
        seed: SeedBytes,
        /// BIP39 passphrase, when one was supplied.
        bip39_passphrase: Option<String>,
    },

    /// Raw 512-bit seed supplied as hex.
    HexSeed {
        /// The seed material.
        seed: SeedBytes,
    },

    /// Classic username/password watch-only login.
    WatchOnly {
        /// Watch-only username.
        username: String,
        /// Watch-only password.
        password: String,
    },

    /// Descriptor watch-only login with Core descriptors.
    Descriptors {
        /// Output descriptors, stored verbatim.
        core_descriptors: Vec<String>,
    },

    /// Descriptor watch-only login with SLIP-132 extended pubkeys.
    Slip132 {
        /// SLIP-132 encoded extended public keys.
        xpubs: Vec<String>,
    },

    /// No local credentials: hardware wallet or remote service.
    Remote,
}

impl Credentials {
    /// Parses and validates a credentials JSON.
    ///
    /// Exactly one credential form must be present; an empty JSON denotes a
    /// hardware or remote signer. An encrypted mnemonic is detected by the
    /// presence of a `password` and decrypted before validation.
    pub fn parse(json: &Value) -> Result<Credentials, SignerError> {
        if json.is_null() || json.as_object().map(|obj| obj.is_empty()).unwrap_or(false) {
            return Ok(Credentials::Remote);
        }

        if let Some(username) = string_field(json, "username") {
            let password =
                string_field(json, "password").ok_or(SignerError::InvalidCredentials)?;
            return Ok(Credentials::WatchOnly { username, password });
        }

        if let Some(user_mnemonic) = string_field(json, "mnemonic") {
            let bip39_passphrase = string_field(json, "bip39_passphrase");
            let mut mnemonic = user_mnemonic;
            if let Some(password) = string_field(json, "password") {
                if bip39_passphrase.is_some() {
                    return Err(SignerError::PassphraseWithPassword);
                }
                mnemonic = decrypt_mnemonic(&mnemonic, &password)?;
            }
            if mnemonic.contains(' ') {
                let parsed = bip39::Mnemonic::from_str(&mnemonic)
                    .map_err(|err| SignerError::InvalidMnemonic(err.to_string()))?;
                let seed = parsed.to_seed(bip39_passphrase.as_deref().unwrap_or(""));
                return Ok(Credentials::Mnemonic {
                    mnemonic,
                    seed: SeedBytes::from(seed),
                    bip39_passphrase,
                });
            }
            if mnemonic.len() == 129 && mnemonic.ends_with('X') {
                // Hex seed: a 512 bit seed encoded in hex with 'X' appended
                if bip39_passphrase.is_some() {
                    return Err(SignerError::PassphraseWithHexSeed);
                }
                let bytes = Vec::<u8>::from_hex(&mnemonic[..128])
                    .map_err(|_| SignerError::InvalidCredentials)?;
                let seed: [u8; 64] =
                    bytes.try_into().map_err(|_| SignerError::InvalidCredentials)?;
                return Ok(Credentials::HexSeed {
                    seed: SeedBytes::from(seed),
                });
            }
            return Err(SignerError::InvalidCredentials);
        }

        let slip132_xpubs = json.get("slip132_extended_pubkeys").and_then(Value::as_array);
        let descriptors = json.get("core_descriptors").and_then(Value::as_array);
        if slip132_xpubs.is_some() && descriptors.is_some() {
            return Err(SignerError::Slip132WithDescriptors);
        }

        if let Some(descriptors) = descriptors {
            return Ok(Credentials::Descriptors {
                core_descriptors: string_array(descriptors)?,
            });
        }

        if let Some(xpubs) = slip132_xpubs {
            let xpubs = string_array(xpubs)?;
            for xpub in &xpubs {
                ExtendedPubKey::from_slip132_str(xpub)
                    .map_err(|err| SignerError::Slip132(err.to_string()))?;
            }
            return Ok(Credentials::Slip132 { xpubs });
        }

        Err(SignerError::InvalidCredentials)
    }

    /// The seed, for credential forms carrying one.
    pub fn seed(&self) -> Option<&SeedBytes> {
        match self {
            Credentials::Mnemonic { seed, .. } | Credentials::HexSeed { seed } => Some(seed),
            _ => None,
        }
    }

    /// Returns whether the credentials are a descriptor watch-only form.
    pub fn is_descriptor_watch_only(&self) -> bool {
        matches!(
            self,
            Credentials::Descriptors { .. } | Credentials::Slip132 { .. }
        )
    }

    /// Sanitised JSON form of the credentials.
    pub fn to_json(&self) -> Value {
        match self {
            Credentials::Mnemonic {
                mnemonic,
                seed,
                bip39_passphrase,
            } => {
                let mut ret = json!({ "mnemonic": mnemonic, "seed": seed.to_hex() });
                if let Some(passphrase) = bip39_passphrase {
                    ret["bip39_passphrase"] = json!(passphrase);
                }
                ret
            }
            Credentials::HexSeed { seed } => json!({ "seed": seed.to_hex() }),
            Credentials::WatchOnly { username, password } => {
                json!({ "username": username, "password": password })
            }
            Credentials::Descriptors { core_descriptors } => {
                json!({ "core_descriptors": core_descriptors })
            }
            Credentials::Slip132 { xpubs } => json!({ "slip132_extended_pubkeys": xpubs }),
            Credentials::Remote => json!({}),
        }
    }
}

fn string_field(json: &Value, key: &str) -> Option<String> {
    json.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

fn string_array(values: &[Value]) -> Result<Vec<String>, SignerError> {
    values
        .iter()
        .map(|value| {
            value
                .as_str()
                .map(str::to_owned)
                .ok_or(SignerError::InvalidCredentials)
        })
        .collect()
}

/// Encrypts a mnemonic with a password: argon2id key derivation followed by
/// AES-256-GCM, encoded as base64 over `salt ‖ nonce ‖ ciphertext`. An empty
/// password leaves the mnemonic in the clear.
pub(crate) fn encrypt_mnemonic(mnemonic: &str, password: &str) -> Result<String, SignerError> {
    if password.is_empty() {
        return Ok(mnemonic.to_owned());
    }
    let salt: [u8; ENCRYPTION_SALT_LEN] = rand::random();
    let nonce_bytes: [u8; ENCRYPTION_NONCE_LEN] = rand::random();
    let cipher = password_cipher(password, &salt)?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), mnemonic.as_bytes())
        .map_err(|_| SignerError::MnemonicEncryption)?;

    let mut blob = Vec::with_capacity(salt.len() + nonce_bytes.len() + ciphertext.len());
    blob.extend_from_slice(&salt);
    blob.extend_from_slice(&nonce_bytes);
    blob.extend_from_slice(&ciphertext);
    Ok(BASE64.encode(blob))
}

/// Reverses [`encrypt_mnemonic`]. An empty password returns the input
/// unchanged.
pub(crate) fn decrypt_mnemonic(blob: &str, password: &str) -> Result<String, SignerError> {
    if password.is_empty() {
        return Ok(blob.to_owned());
    }
    let bytes = BASE64
        .decode(blob)
        .map_err(|_| SignerError::MnemonicDecryption)?;
    if bytes.len() <= ENCRYPTION_SALT_LEN + ENCRYPTION_NONCE_LEN {
        return Err(SignerError::MnemonicDecryption);
    }
    let (salt, rest) = bytes.split_at(ENCRYPTION_SALT_LEN);
    let (nonce, ciphertext) = rest.split_at(ENCRYPTION_NONCE_LEN);
    let cipher = password_cipher(password, salt)?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| SignerError::MnemonicDecryption)?;
    String::from_utf8(plaintext).map_err(|_| SignerError::MnemonicDecryption)
}

fn password_cipher(password: &str, salt: &[u8]) -> Result<Aes256Gcm, SignerError> {
    let mut key_bytes = [0u8; 32];
    argon2::Argon2::default()
        .hash_password_into(password.as_bytes(), salt, &mut key_bytes)
        .map_err(|_| SignerError::MnemonicEncryption)?;
    Aes256Gcm::new_from_slice(&key_bytes).map_err(|_| SignerError::MnemonicEncryption)
}
