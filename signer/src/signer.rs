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

use std::str::FromStr;
use std::sync::Mutex;

use bitcoin::hashes::hex::{FromHex, ToHex};
use bitcoin::secp256k1::ecdsa::{RecoverableSignature, Signature};
use bitcoin::secp256k1::{self, All, Message, PublicKey, Secp256k1, SecretKey};
use bitcoin::util::bip32::{self, ExtendedPrivKey, ExtendedPubKey, Fingerprint};
use bitcoin::Network;
use serde_json::{json, Value};
use wallet_hd::{to_bip32_path, KeyCache, Lookup, XpubHdKey};

use crate::credentials::encrypt_mnemonic;
use crate::device::{AeProtocolSupport, Device, DeviceType, LiquidSupport};
use crate::{slip77, Credentials};

/// Signer construction and operation errors
#[derive(Clone, PartialEq, Eq, Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum SignerError {
    /// the hardware wallet you are using does not support Liquid
    LiquidNotSupported,

    /// hardware device or credentials required
    CredentialsRequired,

    /// HWW/remote signer and login credentials cannot be used together
    CredentialsWithDevice,

    /// hardware device JSON requires a non-empty 'name' element
    MissingDeviceName,

    /// unknown device type {0}
    UnknownDeviceType(String),

    /// invalid device capability value: {0}
    InvalidCapability(String),

    /// invalid credentials
    InvalidCredentials,

    /// cannot use bip39_passphrase and password
    PassphraseWithPassword,

    /// cannot use bip39_passphrase and hex seed
    PassphraseWithHexSeed,

    /// cannot use slip132_extended_pubkeys and core_descriptors
    Slip132WithDescriptors,

    /// invalid mnemonic: {0}
    InvalidMnemonic(String),

    /// invalid SLIP-132 extended pubkey: {0}
    Slip132(String),

    /// mnemonic encryption failed
    MnemonicEncryption,

    /// mnemonic decryption failed; check the password
    MnemonicDecryption,

    /// operation requires seed material which this signer does not hold
    MasterKeyMissing,

    /// master blinding key is not known
    MasterBlindingKeyMissing,

    /// master blinding key must be 32 or 64 bytes of hex
    InvalidBlindingKey,

    /// BIP32 error: {0}
    #[from]
    Bip32(bip32::Error),

    /// elliptic curve error: {0}
    #[from]
    Secp(secp256k1::Error),
}

/// Network description consumed by the signer.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct SignerNetwork {
    /// Network identifier (e.g. `mainnet`, `liquid`, `testnet`).
    pub name: String,

    /// Whether this is a main network.
    pub is_main_net: bool,

    /// Whether this is an Elements/Liquid network.
    pub is_liquid: bool,

    /// Base58 P2PKH version byte of the network.
    pub btc_version: u8,
}

/// Hierarchical-deterministic signer normalising software, hardware,
/// watch-only and remote backends behind one interface.
///
/// Immutable after construction apart from the xpub cache and the master
/// blinding key, both protected by their own locks. No user callback is
/// ever invoked while a lock is held.
pub struct Signer {
    network: SignerNetwork,
    credentials: Credentials,
    device: Device,
    master_key: Option<ExtendedPrivKey>,
    master_blinding_key: Mutex<Option<[u8; 64]>>,
    cache: KeyCache,
    secp: Secp256k1<All>,
}

impl Signer {
    /// Constructs a signer from network parameters, an optional hardware
    /// device JSON and a credentials JSON.
    pub fn new(
        network: &SignerNetwork,
        hw_device: &Value,
        credentials: &Value,
    ) -> Result<Signer, SignerError> {
        let credentials = Credentials::parse(credentials)?;
        let device = Device::from_json(hw_device, &credentials)?;
        if network.is_liquid && device.supports_liquid == LiquidSupport::None {
            return Err(SignerError::LiquidNotSupported);
        }

        let mut master_key = None;
        let mut master_blinding_key = None;
        if let Some(seed) = credentials.seed() {
            let bip32_network = if network.is_main_net {
                Network::Bitcoin
            } else {
                Network::Testnet
            };
            master_key = Some(ExtendedPrivKey::new_master(bip32_network, seed.as_ref())?);
            if network.is_liquid {
                master_blinding_key = Some(slip77::master_blinding_key_from_seed(seed.as_ref()));
            }
        }

        Ok(Signer {
            network: network.clone(),
            credentials,
            device,
            master_key,
            master_blinding_key: Mutex::new(master_blinding_key),
            cache: KeyCache::new(),
            secp: Secp256k1::new(),
        })
    }

    /// The device capability descriptor.
    #[inline]
    pub fn device(&self) -> &Device { &self.device }

    /// The network the signer was constructed for.
    #[inline]
    pub fn network(&self) -> &SignerNetwork { &self.network }

    /// Whether the signer services an Elements/Liquid network.
    #[inline]
    pub fn is_liquid(&self) -> bool { self.network.is_liquid }

    /// Whether this signer is the remote service co-signer.
    #[inline]
    pub fn is_remote(&self) -> bool { self.device.device_type == DeviceType::GreenBackend }

    /// Whether this signer is watch-only.
    #[inline]
    pub fn is_watch_only(&self) -> bool { self.device.device_type == DeviceType::WatchOnly }

    /// Whether this signer is a hardware device.
    #[inline]
    pub fn is_hardware(&self) -> bool { self.device.device_type == DeviceType::Hardware }

    /// Whether this signer logged in with output descriptors or SLIP-132
    /// extended pubkeys.
    #[inline]
    pub fn is_descriptor_watch_only(&self) -> bool { self.credentials.is_descriptor_watch_only() }

    /// Whether the anti-exfil signing protocol is in use.
    #[inline]
    pub fn use_ae_protocol(&self) -> bool {
        self.device.supports_ae_protocol != AeProtocolSupport::None
    }

    /// Whether produced signatures are ground to low-R form. Anti-exfil
    /// takes precedence when the device supports it.
    #[inline]
    pub fn supports_low_r(&self) -> bool { !self.use_ae_protocol() && self.device.supports_low_r }

    /// Liquid support level of the backend.
    #[inline]
    pub fn liquid_support(&self) -> LiquidSupport { self.device.supports_liquid }

    /// Whether the host may derive blinding private keys.
    #[inline]
    pub fn supports_host_unblinding(&self) -> bool { self.device.supports_host_unblinding }

    /// Two signers are compatible when their devices compare equal and
    /// their credentials compare equal. The master blinding key is not part
    /// of the comparison: it may be learnt later in the session lifetime.
    pub fn is_compatible_with(&self, other: &Signer) -> bool {
        self.device == other.device && self.credentials == other.credentials
    }

    /// Sanitised credentials, including the master blinding key hex when
    /// on Liquid and known.
    pub fn get_credentials(&self) -> Value {
        let mut credentials = self.credentials.to_json();
        if self.network.is_liquid {
            let blinding = self
                .master_blinding_key
                .lock()
                .expect("blinding key lock poisoned");
            if let Some(key) = blinding.as_ref() {
                credentials["master_blinding_key"] = json!(key[32..].to_hex());
            }
        }
        credentials
    }

    /// The mnemonic, re-encrypted under `password` when one is given.
    /// Hex-seed credentials return the hex-with-`X` form; watch-only,
    /// hardware and remote signers return an empty string.
    pub fn get_mnemonic(&self, password: &str) -> Result<String, SignerError> {
        if self.is_hardware() || self.is_watch_only() || self.is_remote() {
            return Ok(String::new());
        }
        match &self.credentials {
            Credentials::Mnemonic { mnemonic, .. } => encrypt_mnemonic(mnemonic, password),
            Credentials::HexSeed { seed } => Ok(format!("{}X", seed.to_hex())),
            _ => Ok(String::new()),
        }
    }

    /// Base58 xpub for the master key.
    pub fn get_master_bip32_xpub(&self) -> Result<String, SignerError> { self.get_bip32_xpub(&[]) }

    /// Whether the master xpub can be served.
    pub fn has_master_bip32_xpub(&self) -> bool { self.has_bip32_xpub(&[]) }

    /// Fingerprint of the master key.
    pub fn master_fingerprint(&self) -> Result<Fingerprint, SignerError> {
        let xpub = self.get_master_bip32_xpub()?;
        Ok(XpubHdKey::from_str(&xpub)?.fingerprint())
    }

    /// Base58 xpub for an arbitrary derivation path.
    ///
    /// The cache is searched from the full path toward the root; a cached
    /// ancestor reachable through unhardened components is promoted by
    /// public derivation. Paths crossing an uncached hardened component
    /// require the master private key.
    pub fn get_bip32_xpub(&self, path: &[u32]) -> Result<String, SignerError> {
        match self.cache.lookup(path) {
            Lookup::Hit(xpub) => Ok(xpub),
            Lookup::Ancestor(prefix_len, xpub) => {
                let parent = XpubHdKey::from_str(&xpub)?;
                let child = parent.derive(&self.secp, &path[prefix_len..])?.to_base58();
                self.cache.insert(path, &child);
                Ok(child)
            }
            Lookup::Miss(prefix_len) => {
                let master = self.master_key.ok_or(SignerError::MasterKeyMissing)?;
                let master_xpub = ExtendedPubKey::from_priv(&self.secp, &master);
                self.cache.insert(&[], &master_xpub.to_string());
                if path.is_empty() {
                    return Ok(master_xpub.to_string());
                }

                // Private derivation down to the deepest hardened component
                let parent_priv =
                    master.derive_priv(&self.secp, &to_bip32_path(&path[..prefix_len]))?;
                let parent = ExtendedPubKey::from_priv(&self.secp, &parent_priv);
                if prefix_len > 0 {
                    self.cache.insert(&path[..prefix_len], &parent.to_string());
                }
                if prefix_len == path.len() {
                    return Ok(parent.to_string());
                }

                // Public derivation for the unhardened remainder
                let child = XpubHdKey::from(parent)
                    .derive(&self.secp, &path[prefix_len..])?
                    .to_base58();
                self.cache.insert(path, &child);
                Ok(child)
            }
        }
    }

    /// Whether an xpub for `path` can be served: either the master key is
    /// held, or the path (or an unhardened-reachable prefix of it) is
    /// already cached.
    pub fn has_bip32_xpub(&self, path: &[u32]) -> bool {
        if self.master_key.is_some() {
            return true;
        }
        !matches!(self.cache.lookup(path), Lookup::Miss(_))
    }

    /// Seeds the xpub cache with an externally obtained xpub (e.g. from a
    /// hardware device or the login response).
    ///
    /// # Panics
    ///
    /// If `path` is already cached with a different xpub.
    pub fn cache_bip32_xpub(&self, path: &[u32], bip32_xpub: &str) -> bool {
        self.cache.insert(path, bip32_xpub)
    }

    /// Clone of the cached path → xpub mapping.
    pub fn cached_bip32_xpubs(&self) -> std::collections::BTreeMap<Vec<u32>, String> {
        self.cache.snapshot()
    }

    /// Cached xpubs as a JSON object keyed by xpub (inverted, since the
    /// master path is empty and JSON keys cannot be).
    pub fn cached_bip32_xpubs_json(&self) -> Value {
        let mut ret = serde_json::Map::new();
        for (path, xpub) in self.cache.snapshot() {
            ret.insert(xpub, json!(path));
        }
        Value::Object(ret)
    }

    fn with_derived_key<T>(
        &self,
        path: &[u32],
        f: impl FnOnce(&Secp256k1<All>, &SecretKey) -> T,
    ) -> Result<T, SignerError> {
        let master = self.master_key.ok_or(SignerError::MasterKeyMissing)?;
        let mut derived = master.derive_priv(&self.secp, &to_bip32_path(path))?;
        let result = f(&self.secp, &derived.private_key);
        // Zero the derived child material before the slot is released.
        // `ExtendedPrivKey` has no drop glue, so a byte-wise overwrite is
        // sound.
        let slot = &mut derived as *mut ExtendedPrivKey as *mut u8;
        for offset in 0..std::mem::size_of::<ExtendedPrivKey>() {
            unsafe { std::ptr::write_volatile(slot.add(offset), 0) };
        }
        Ok(result)
    }

    /// Signs a 32-byte message hash with the key at `path`, returning a
    /// compact ECDSA signature. Low-R grinding applies when the device
    /// supports it and anti-exfil is not in use.
    pub fn sign_hash(&self, path: &[u32], hash: &[u8; 32]) -> Result<Signature, SignerError> {
        let message = Message::from_slice(hash)?;
        let low_r = self.supports_low_r();
        self.with_derived_key(path, |secp, seckey| {
            if low_r {
                secp.sign_ecdsa_low_r(&message, seckey)
            } else {
                secp.sign_ecdsa(&message, seckey)
            }
        })
    }

    /// Signs a 32-byte message hash with the key at `path`, returning a
    /// recoverable ECDSA signature.
    pub fn sign_rec_hash(
        &self,
        path: &[u32],
        hash: &[u8; 32],
    ) -> Result<RecoverableSignature, SignerError> {
        let message = Message::from_slice(hash)?;
        self.with_derived_key(path, |secp, seckey| {
            secp.sign_ecdsa_recoverable(&message, seckey)
        })
    }

    /// Whether the SLIP-77 master blinding key is known.
    pub fn has_master_blinding_key(&self) -> bool {
        self.master_blinding_key
            .lock()
            .expect("blinding key lock poisoned")
            .is_some()
    }

    /// The 64-byte SLIP-77 master blinding node.
    pub fn get_master_blinding_key(&self) -> Result<[u8; 64], SignerError> {
        self.master_blinding_key
            .lock()
            .expect("blinding key lock poisoned")
            .ok_or(SignerError::MasterBlindingKeyMissing)
    }

    /// Installs a master blinding key learnt from the wallet store or a
    /// hardware device. Accepts the full 64-byte node or its 32-byte lower
    /// half as hex; an empty string is ignored.
    pub fn set_master_blinding_key(&self, blinding_key_hex: &str) -> Result<(), SignerError> {
        if blinding_key_hex.is_empty() {
            return Ok(());
        }
        let bytes =
            Vec::<u8>::from_hex(blinding_key_hex).map_err(|_| SignerError::InvalidBlindingKey)?;
        if bytes.len() != 64 && bytes.len() != 32 {
            return Err(SignerError::InvalidBlindingKey);
        }
        let mut key = [0u8; 64];
        key[64 - bytes.len()..].copy_from_slice(&bytes);
        *self
            .master_blinding_key
            .lock()
            .expect("blinding key lock poisoned") = Some(key);
        Ok(())
    }

    /// SLIP-77 blinding private key for a scriptpubkey.
    pub fn get_blinding_key_from_script(&self, script: &[u8]) -> Result<SecretKey, SignerError> {
        let master = self.get_master_blinding_key()?;
        Ok(slip77::blinding_key_from_script(&master, script)?)
    }

    /// SLIP-77 blinding public key for a scriptpubkey.
    pub fn get_blinding_pubkey_from_script(&self, script: &[u8]) -> Result<PublicKey, SignerError> {
        let seckey = self.get_blinding_key_from_script(script)?;
        Ok(PublicKey::from_secret_key(&self.secp, &seckey))
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use wallet_hd::harden;

    use super::*;

    const MNEMONIC: &str = "abandon abandon abandon abandon abandon abandon abandon abandon \
                            abandon abandon abandon about";

    fn btc_network() -> SignerNetwork {
        SignerNetwork {
            name: s!("testnet"),
            is_main_net: false,
            is_liquid: false,
            btc_version: 111,
        }
    }

    fn liquid_network() -> SignerNetwork {
        SignerNetwork {
            name: s!("liquidtestnet"),
            is_main_net: false,
            is_liquid: true,
            btc_version: 36,
        }
    }

    fn software_signer(network: &SignerNetwork) -> Signer {
        Signer::new(network, &json!({}), &json!({ "mnemonic": MNEMONIC })).unwrap()
    }

    #[test]
    fn software_signer_construction() {
        let signer = software_signer(&btc_network());
        assert!(!signer.is_watch_only());
        assert!(!signer.is_hardware());
        assert!(!signer.is_remote());
        assert!(signer.has_master_bip32_xpub());
        assert!(!signer.has_master_blinding_key());

        let liquid = software_signer(&liquid_network());
        assert!(liquid.has_master_blinding_key());
    }

    #[test]
    fn liquid_requires_capability() {
        let hw = json!({ "device": {
            "name": "brick",
            "supports_liquid": 0,
        } });
        assert_eq!(
            Signer::new(&liquid_network(), &hw, &json!({})).err(),
            Some(SignerError::LiquidNotSupported)
        );
        // The same device is fine on bitcoin
        assert!(Signer::new(&btc_network(), &hw, &json!({})).is_ok());
    }

    #[test]
    fn xpub_prefix_promotion() {
        let signer = software_signer(&btc_network());
        let path_a = [harden(84), harden(0), harden(0), 0, 5];
        let path_b = [harden(84), harden(0), harden(0), 0, 6];

        let xpub_a = signer.get_bip32_xpub(&path_a).unwrap();
        let xpub_b = signer.get_bip32_xpub(&path_b).unwrap();
        assert_ne!(xpub_a, xpub_b);

        let cached = signer.cached_bip32_xpubs();
        let paths: Vec<&Vec<u32>> = cached.keys().collect();
        assert_eq!(paths, vec![
            &vec![],
            &vec![harden(84), harden(0), harden(0)],
            &path_a.to_vec(),
            &path_b.to_vec(),
        ]);
    }

    #[test]
    fn repeated_xpub_is_identical() {
        let signer = software_signer(&btc_network());
        let path = [harden(49), harden(1), harden(0), 1, 3];
        let first = signer.get_bip32_xpub(&path).unwrap();
        for _ in 0..3 {
            assert_eq!(signer.get_bip32_xpub(&path).unwrap(), first);
        }
    }

    #[test]
    fn concurrent_derivation_agrees() {
        let signer = Arc::new(software_signer(&btc_network()));
        let path = [harden(84), harden(1), harden(0), 0, 0];
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let signer = Arc::clone(&signer);
                std::thread::spawn(move || signer.get_bip32_xpub(&path).unwrap())
            })
            .collect();
        let mut results: Vec<String> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();
        results.dedup();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn watch_only_signer_uses_cache_only() {
        let network = btc_network();
        let creds = json!({ "username": "user", "password": "pass" });
        let watch_only = Signer::new(&network, &json!({}), &creds).unwrap();
        assert!(watch_only.is_watch_only());

        let path = [harden(84), harden(0), harden(0)];
        assert!(!watch_only.has_bip32_xpub(&path));
        assert_eq!(
            watch_only.get_bip32_xpub(&path).err(),
            Some(SignerError::MasterKeyMissing)
        );

        // Seed the account xpub from a software signer and check promotion
        let software = software_signer(&network);
        watch_only.cache_bip32_xpub(&path, &software.get_bip32_xpub(&path).unwrap());
        assert!(watch_only.has_bip32_xpub(&path));
        let terminal = [harden(84), harden(0), harden(0), 0, 1];
        assert!(watch_only.has_bip32_xpub(&terminal));
        assert_eq!(
            watch_only.get_bip32_xpub(&terminal).unwrap(),
            software.get_bip32_xpub(&terminal).unwrap()
        );
    }

    #[test]
    fn signature_verifies() {
        let signer = software_signer(&btc_network());
        let path = [harden(44), harden(1), harden(0), 0, 0];
        let hash = [7u8; 32];
        let signature = signer.sign_hash(&path, &hash).unwrap();

        let secp = Secp256k1::new();
        let xpub = ExtendedPubKey::from_str(&signer.get_bip32_xpub(&path).unwrap()).unwrap();
        let message = Message::from_slice(&hash).unwrap();
        assert!(secp
            .verify_ecdsa(&message, &signature, &xpub.public_key)
            .is_ok());
    }

    #[test]
    fn compatibility() {
        let network = btc_network();
        let a = software_signer(&network);
        let b = software_signer(&network);
        assert!(a.is_compatible_with(&b));

        let other_creds = json!({ "mnemonic": MNEMONIC, "bip39_passphrase": "x" });
        let c = Signer::new(&network, &json!({}), &other_creds).unwrap();
        assert!(!a.is_compatible_with(&c));

        let hw_a = json!({ "device": { "name": "jade", "supports_low_r": true } });
        let hw_b = json!({ "device": { "name": "jade", "supports_low_r": false } });
        let d = Signer::new(&network, &hw_a, &json!({})).unwrap();
        let e = Signer::new(&network, &hw_b, &json!({})).unwrap();
        assert!(!d.is_compatible_with(&e));
        assert!(d.is_compatible_with(&Signer::new(&network, &hw_a, &json!({})).unwrap()));
    }

    #[test]
    fn master_blinding_key_export() {
        let signer = software_signer(&liquid_network());
        let credentials = signer.get_credentials();
        let exported = credentials["master_blinding_key"].as_str().unwrap();
        assert_eq!(exported.len(), 64);
        assert_eq!(
            exported,
            signer.get_master_blinding_key().unwrap()[32..].to_hex()
        );
    }

    #[test]
    fn half_size_blinding_key_is_accepted() {
        let signer = Signer::new(
            &liquid_network(),
            &json!({}),
            &json!({ "username": "u", "password": "p" }),
        )
        .unwrap();
        assert!(!signer.has_master_blinding_key());
        signer.set_master_blinding_key(&"ab".repeat(32)).unwrap();
        let key = signer.get_master_blinding_key().unwrap();
        assert_eq!(key[..32], [0u8; 32]);
        assert_eq!(key[32..], [0xabu8; 32]);

        assert_eq!(
            signer.set_master_blinding_key("deadbeef"),
            Err(SignerError::InvalidBlindingKey)
        );
    }

    #[test]
    fn blinding_keys_are_per_script() {
        let signer = software_signer(&liquid_network());
        let key_a = signer.get_blinding_key_from_script(&[0x00, 0x14]).unwrap();
        let key_b = signer.get_blinding_key_from_script(&[0x00, 0x20]).unwrap();
        assert_ne!(key_a, key_b);
        let pubkey = signer
            .get_blinding_pubkey_from_script(&[0x00, 0x14])
            .unwrap();
        let secp = Secp256k1::new();
        assert_eq!(pubkey, PublicKey::from_secret_key(&secp, &key_a));
    }

    #[test]
    fn mnemonic_roundtrip_through_export() {
        let signer = software_signer(&btc_network());
        assert_eq!(signer.get_mnemonic("").unwrap(), MNEMONIC);
        let encrypted = signer.get_mnemonic("pass").unwrap();
        assert_ne!(encrypted, MNEMONIC);
        let reimported = Signer::new(
            &btc_network(),
            &json!({}),
            &json!({ "mnemonic": encrypted, "password": "pass" }),
        )
        .unwrap();
        assert!(signer.is_compatible_with(&reimported));
    }
}
