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

use std::fmt::{self, Display, Formatter};
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use bitcoin::secp256k1::{self, Secp256k1, Verification};
use bitcoin::util::bip32::{self, ChainCode, ChildNumber, ExtendedPubKey, Fingerprint};
use bitcoin::Network;

use crate::path::to_bip32_path;

/// Extended public key wrapper used across the wallet: constructed either
/// from a base58 xpub or from raw key material, derivable along unhardened
/// raw-index paths.
///
/// Equality considers the public key and chain code only, so that keys
/// reconstructed through different routes (base58, raw service key material,
/// derivation) compare equal.
#[derive(Copy, Clone, Debug)]
pub struct XpubHdKey(ExtendedPubKey);

impl PartialEq for XpubHdKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.public_key == other.0.public_key && self.0.chain_code == other.0.chain_code
    }
}

impl Eq for XpubHdKey {}

impl Hash for XpubHdKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.public_key.serialize().hash(state);
        self.0.chain_code.as_bytes().hash(state);
    }
}

impl From<ExtendedPubKey> for XpubHdKey {
    fn from(xpub: ExtendedPubKey) -> Self { Self(xpub) }
}

impl FromStr for XpubHdKey {
    type Err = bip32::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> { ExtendedPubKey::from_str(s).map(Self) }
}

impl Display for XpubHdKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result { Display::fmt(&self.0, f) }
}

impl XpubHdKey {
    /// Constructs a depth-0 key from a raw public key and optional chain
    /// code. An absent chain code is stored as zeros, matching service key
    /// material distributed without one.
    pub fn with_public_key(
        is_main_net: bool,
        public_key: secp256k1::PublicKey,
        chain_code: Option<[u8; 32]>,
    ) -> Self {
        let network = if is_main_net { Network::Bitcoin } else { Network::Testnet };
        Self(ExtendedPubKey {
            network,
            depth: 0,
            parent_fingerprint: Fingerprint::default(),
            child_number: ChildNumber::from(0),
            public_key,
            chain_code: ChainCode::from(&chain_code.unwrap_or([0u8; 32])[..]),
        })
    }

    /// Derives a child key along `path`; every component must be unhardened.
    pub fn derive<C: Verification>(
        &self,
        secp: &Secp256k1<C>,
        path: &[u32],
    ) -> Result<Self, bip32::Error> {
        if path.is_empty() {
            return Ok(*self);
        }
        self.0.derive_pub(secp, &to_bip32_path(path)).map(Self)
    }

    /// Raw EC public key.
    #[inline]
    pub fn public_key(&self) -> secp256k1::PublicKey { self.0.public_key }

    /// BIP32 chain code bytes.
    #[inline]
    pub fn chain_code(&self) -> [u8; 32] {
        let mut code = [0u8; 32];
        code.copy_from_slice(self.0.chain_code.as_bytes());
        code
    }

    /// First four bytes of the key identifier.
    #[inline]
    pub fn fingerprint(&self) -> Fingerprint { self.0.fingerprint() }

    /// Base58check serialization of the key.
    #[inline]
    pub fn to_base58(&self) -> String { self.0.to_string() }

    /// Underlying `bitcoin` extended public key.
    #[inline]
    pub fn as_xpub(&self) -> &ExtendedPubKey { &self.0 }
}

#[cfg(test)]
mod test {
    use super::*;

    const XPUB: &str = "xpub661MyMwAqRbcFtXgS5sYJABqqG9YLmC4Q1Rdap9gSE8NqtwybGhePY2gZ29ESFjq\
                        JoCu1Rupje8YtGqsefD265TMg7usUDFdp6W1EGMcet8";

    #[test]
    fn base58_roundtrip() {
        let key = XpubHdKey::from_str(XPUB).unwrap();
        assert_eq!(key.to_base58(), XPUB);
    }

    #[test]
    fn raw_key_equality_ignores_metadata() {
        let key = XpubHdKey::from_str(XPUB).unwrap();
        let rebuilt =
            XpubHdKey::with_public_key(true, key.public_key(), Some(key.chain_code()));
        assert_eq!(key, rebuilt);
    }

    #[test]
    fn unhardened_derivation() {
        let secp = Secp256k1::verification_only();
        let key = XpubHdKey::from_str(XPUB).unwrap();
        let child = key.derive(&secp, &[0, 5]).unwrap();
        assert_ne!(child, key);
        assert_eq!(key.derive(&secp, &[]).unwrap(), key);
    }

    #[test]
    fn hardened_derivation_fails() {
        let secp = Secp256k1::verification_only();
        let key = XpubHdKey::from_str(XPUB).unwrap();
        assert!(key.derive(&secp, &[crate::harden(0)]).is_err());
    }
}
