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

//! SLIP-77 deterministic blinding key derivation: a 64-byte master blinding
//! node from the BIP39 seed, and per-scriptpubkey EC blinding private keys
//! from the node.

use bitcoin::hashes::{sha256, sha512, Hash, HashEngine, Hmac, HmacEngine};
use bitcoin::secp256k1::{self, PublicKey, Secp256k1, SecretKey, Signing};

const SLIP21_MASTER_LABEL: &[u8] = b"Symmetric key seed";
const SLIP77_LABEL: &[u8] = b"SLIP-0077";

/// Derives the 64-byte SLIP-77 master blinding node from a seed.
///
/// The first half is the SLIP-21 chaining material, the last 32 bytes are
/// the master blinding key proper.
pub fn master_blinding_key_from_seed(seed: &[u8]) -> [u8; 64] {
    let mut engine = HmacEngine::<sha512::Hash>::new(SLIP21_MASTER_LABEL);
    engine.input(seed);
    let root = Hmac::<sha512::Hash>::from_engine(engine).into_inner();

    let mut engine = HmacEngine::<sha512::Hash>::new(&root[..32]);
    engine.input(&[0u8]);
    engine.input(SLIP77_LABEL);
    Hmac::<sha512::Hash>::from_engine(engine).into_inner()
}

/// Derives the blinding private key for a scriptpubkey from the master
/// blinding node.
pub fn blinding_key_from_script(
    master: &[u8; 64],
    script: &[u8],
) -> Result<SecretKey, secp256k1::Error> {
    let mut engine = HmacEngine::<sha256::Hash>::new(&master[32..]);
    engine.input(script);
    let digest = Hmac::<sha256::Hash>::from_engine(engine).into_inner();
    SecretKey::from_slice(&digest)
}

/// Derives the blinding public key for a scriptpubkey.
pub fn blinding_pubkey_from_script<C: Signing>(
    secp: &Secp256k1<C>,
    master: &[u8; 64],
    script: &[u8],
) -> Result<PublicKey, secp256k1::Error> {
    blinding_key_from_script(master, script).map(|sk| PublicKey::from_secret_key(secp, &sk))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn master_node_is_label_separated() {
        let seed = [0x55u8; 64];
        let node = master_blinding_key_from_seed(&seed);
        // The SLIP-21 child step must be applied: the node differs from the
        // raw root HMAC of the seed
        let mut engine = HmacEngine::<sha512::Hash>::new(SLIP21_MASTER_LABEL);
        engine.input(&seed);
        let root = Hmac::<sha512::Hash>::from_engine(engine).into_inner();
        assert_ne!(node, root);
        // Deterministic
        assert_eq!(node, master_blinding_key_from_seed(&seed));
    }

    #[test]
    fn per_script_keys_differ() {
        let node = master_blinding_key_from_seed(b"correct horse battery staple");
        let key_a = blinding_key_from_script(&node, &[0x00, 0x14]).unwrap();
        let key_b = blinding_key_from_script(&node, &[0x00, 0x20]).unwrap();
        assert_ne!(key_a.secret_bytes(), key_b.secret_bytes());
        // Deterministic
        let key_a2 = blinding_key_from_script(&node, &[0x00, 0x14]).unwrap();
        assert_eq!(key_a.secret_bytes(), key_a2.secret_bytes());
    }

    #[test]
    fn pubkey_matches_private_key() {
        let secp = Secp256k1::new();
        let node = master_blinding_key_from_seed(b"correct horse battery staple");
        let script = [0x51u8];
        let sk = blinding_key_from_script(&node, &script).unwrap();
        let pk = blinding_pubkey_from_script(&secp, &node, &script).unwrap();
        assert_eq!(pk, PublicKey::from_secret_key(&secp, &sk));
    }
}
