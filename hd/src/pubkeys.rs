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

//! Subaccount derivation policies: how a `(subaccount, pointer, is_internal)`
//! wallet coordinate maps onto derivation paths for the service co-signer,
//! the multisig user key and singlesig BIP-44/49/84 accounts.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Mutex;

use bitcoin::hashes::{sha512, Hash, HashEngine, Hmac, HmacEngine};
use bitcoin::secp256k1::{All, Secp256k1};
use bitcoin::util::bip32;

use crate::{harden, XpubHdKey};

/// Fixed HMAC key used when expanding a service gait key into the 32-index
/// gait derivation path.
pub const GAIT_GENERATION_NONCE: &[u8; 30] = b"GreenAddress.it HD wallet path";

/// Subaccount derivation policy errors
#[derive(Clone, PartialEq, Eq, Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum DerivationError {
    /// gait path must contain exactly 32 derivation indexes
    InvalidGaitPath,

    /// subaccount {0} is not registered with the wallet
    UnknownSubaccount(u32),

    /// BIP32 derivation error: {0}
    #[from]
    Bip32(bip32::Error),
}

/// Maps wallet coordinates onto derivation paths and subaccount-level keys.
pub trait SubaccountPubkeys {
    /// Derivation path from the policy root to the subaccount key.
    fn subaccount_root_path(&self, subaccount: u32) -> Vec<u32>;

    /// Full derivation path from the policy root to the key servicing the
    /// given wallet coordinate.
    fn full_path(&self, subaccount: u32, pointer: u32, is_internal: bool) -> Vec<u32>;

    /// Extended public key at the subaccount root.
    fn subaccount_key(
        &self,
        secp: &Secp256k1<All>,
        subaccount: u32,
    ) -> Result<XpubHdKey, DerivationError>;

    /// Key servicing the given wallet coordinate. `is_internal` is only
    /// consulted by policies whose terminal path carries a change branch.
    fn derive(
        &self,
        secp: &Secp256k1<All>,
        subaccount: u32,
        pointer: u32,
        is_internal: Option<bool>,
    ) -> Result<XpubHdKey, DerivationError> {
        let mut path = Vec::with_capacity(2);
        if let Some(internal) = is_internal {
            path.push(internal as u32);
        }
        path.push(pointer);
        Ok(self.subaccount_key(secp, subaccount)?.derive(secp, &path)?)
    }
}

/// Service ("Green") co-signer keys for multisig wallets.
///
/// Subaccount keys are derived from the service master key along the
/// user-specific gait path; the derivation is fully unhardened so the user
/// can reproduce the service keys from the published service xpub.
#[derive(Debug)]
pub struct GreenPubkeys {
    master: XpubHdKey,
    gait_path: Vec<u32>,
    subaccounts: Mutex<BTreeMap<u32, XpubHdKey>>,
}

impl GreenPubkeys {
    /// Constructs the policy from the service master key and the wallet's
    /// 32-index gait path.
    pub fn new(master: XpubHdKey, gait_path: &[u32]) -> Result<Self, DerivationError> {
        if gait_path.len() != 32 {
            return Err(DerivationError::InvalidGaitPath);
        }
        Ok(GreenPubkeys {
            master,
            gait_path: gait_path.to_vec(),
            subaccounts: Mutex::new(bmap! {}),
        })
    }

    /// Expands a gait key into the 32 unhardened indexes of the gait path:
    /// HMAC-SHA512 over the key's chain code and public key, read as
    /// big-endian 16-bit words.
    pub fn gait_path_from_gait_key(gait_key: &XpubHdKey) -> Vec<u32> {
        let mut engine = HmacEngine::<sha512::Hash>::new(GAIT_GENERATION_NONCE);
        engine.input(&gait_key.chain_code());
        engine.input(&gait_key.public_key().serialize());
        let bytes = Hmac::<sha512::Hash>::from_engine(engine).into_inner();
        bytes
            .chunks(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]) as u32)
            .collect()
    }
}

impl SubaccountPubkeys for GreenPubkeys {
    fn subaccount_root_path(&self, subaccount: u32) -> Vec<u32> {
        // Version-0 addresses predating gait-path derivation are not handled
        let prefix = if subaccount != 0 { 3 } else { 1 };
        let mut path = Vec::with_capacity(self.gait_path.len() + 2);
        path.push(prefix);
        path.extend_from_slice(&self.gait_path);
        if subaccount != 0 {
            path.push(subaccount);
        }
        path
    }

    fn full_path(&self, subaccount: u32, pointer: u32, _is_internal: bool) -> Vec<u32> {
        let mut path = self.subaccount_root_path(subaccount);
        path.push(pointer);
        path
    }

    fn subaccount_key(
        &self,
        secp: &Secp256k1<All>,
        subaccount: u32,
    ) -> Result<XpubHdKey, DerivationError> {
        let mut subaccounts = self.subaccounts.lock().expect("subaccount lock poisoned");
        if let Some(key) = subaccounts.get(&subaccount) {
            return Ok(*key);
        }
        let key = self
            .master
            .derive(secp, &self.subaccount_root_path(subaccount))?;
        subaccounts.insert(subaccount, key);
        Ok(key)
    }
}

/// Multisig user keys: one registered xpub per subaccount, derived on the
/// external branch only.
#[derive(Debug, Default)]
pub struct GreenUserPubkeys {
    subaccounts: Mutex<BTreeMap<u32, XpubHdKey>>,
}

impl GreenUserPubkeys {
    /// Constructs an empty registry.
    pub fn new() -> Self { Self::default() }

    /// Registers the user xpub for a subaccount. The stored key is derived
    /// onto branch 1 so terminal derivation only appends the pointer.
    ///
    /// # Panics
    ///
    /// If the subaccount is already registered with a different key.
    pub fn add_subaccount(
        &self,
        secp: &Secp256k1<All>,
        subaccount: u32,
        bip32_xpub: &str,
    ) -> Result<(), DerivationError> {
        let user_key = XpubHdKey::from_str(bip32_xpub)?.derive(secp, &[1])?;
        let mut subaccounts = self.subaccounts.lock().expect("subaccount lock poisoned");
        if let Some(present) = subaccounts.get(&subaccount) {
            assert_eq!(
                present, &user_key,
                "subaccount {} already registered with a different xpub",
                subaccount
            );
            return Ok(());
        }
        subaccounts.insert(subaccount, user_key);
        Ok(())
    }

    /// Returns whether a subaccount xpub has been registered.
    pub fn have_subaccount(&self, subaccount: u32) -> bool {
        self.subaccounts
            .lock()
            .expect("subaccount lock poisoned")
            .contains_key(&subaccount)
    }
}

impl SubaccountPubkeys for GreenUserPubkeys {
    fn subaccount_root_path(&self, subaccount: u32) -> Vec<u32> {
        if subaccount != 0 {
            vec![harden(3), harden(subaccount)]
        } else {
            vec![]
        }
    }

    fn full_path(&self, subaccount: u32, pointer: u32, _is_internal: bool) -> Vec<u32> {
        let mut path = self.subaccount_root_path(subaccount);
        path.push(1);
        path.push(pointer);
        path
    }

    fn subaccount_key(
        &self,
        _secp: &Secp256k1<All>,
        subaccount: u32,
    ) -> Result<XpubHdKey, DerivationError> {
        self.subaccounts
            .lock()
            .expect("subaccount lock poisoned")
            .get(&subaccount)
            .copied()
            .ok_or(DerivationError::UnknownSubaccount(subaccount))
    }
}

/// Singlesig user keys following BIP-44/49/84 account layout.
///
/// The wallet subaccount number encodes both the purpose and the account:
/// `subaccount % 16` selects the purpose (0 = 49, 1 = 84, 2 = 44; other
/// values are invalid and abort), the account number is
/// `subaccount / 16`.
#[derive(Debug)]
pub struct Bip44Pubkeys {
    is_main_net: bool,
    is_liquid: bool,
    subaccounts: Mutex<BTreeMap<u32, XpubHdKey>>,
}

impl Bip44Pubkeys {
    /// Constructs an empty registry for the given network.
    pub fn new(is_main_net: bool, is_liquid: bool) -> Self {
        Bip44Pubkeys {
            is_main_net,
            is_liquid,
            subaccounts: Mutex::new(bmap! {}),
        }
    }

    /// Registers the account xpub for a subaccount.
    ///
    /// # Panics
    ///
    /// If the subaccount is already registered with a different key.
    pub fn add_subaccount(&self, subaccount: u32, bip32_xpub: &str) -> Result<(), DerivationError> {
        let user_key = XpubHdKey::from_str(bip32_xpub)?;
        let mut subaccounts = self.subaccounts.lock().expect("subaccount lock poisoned");
        if let Some(present) = subaccounts.get(&subaccount) {
            assert_eq!(
                present, &user_key,
                "subaccount {} already registered with a different xpub",
                subaccount
            );
            return Ok(());
        }
        subaccounts.insert(subaccount, user_key);
        Ok(())
    }

    /// Returns whether a subaccount xpub has been registered.
    pub fn have_subaccount(&self, subaccount: u32) -> bool {
        self.subaccounts
            .lock()
            .expect("subaccount lock poisoned")
            .contains_key(&subaccount)
    }
}

impl SubaccountPubkeys for Bip44Pubkeys {
    fn subaccount_root_path(&self, subaccount: u32) -> Vec<u32> {
        // subaccount % 16 -> 0=49, 1=84, 2=44; anything else is out of
        // range and aborts
        const PURPOSES: [u32; 3] = [49, 84, 44];
        let purpose = PURPOSES[(subaccount % 16) as usize];
        let coin_type = match (self.is_main_net, self.is_liquid) {
            (true, true) => 1776,
            (true, false) => 0,
            (false, _) => 1,
        };
        let account = subaccount / 16;
        vec![harden(purpose), harden(coin_type), harden(account)]
    }

    fn full_path(&self, subaccount: u32, pointer: u32, is_internal: bool) -> Vec<u32> {
        let mut path = self.subaccount_root_path(subaccount);
        path.push(is_internal as u32);
        path.push(pointer);
        path
    }

    fn subaccount_key(
        &self,
        _secp: &Secp256k1<All>,
        subaccount: u32,
    ) -> Result<XpubHdKey, DerivationError> {
        self.subaccounts
            .lock()
            .expect("subaccount lock poisoned")
            .get(&subaccount)
            .copied()
            .ok_or(DerivationError::UnknownSubaccount(subaccount))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const XPUB: &str = "xpub68Gmy5EdvgibQVfPdqkBBCHxA5htiqg55crXYuXoQRKfDBFA1WEjWgP6LHhwBZeN\
                        K1VTsfTFUHCdrfp1bgwQ9xv5ski8PX9rL2dZXvgGDnw";

    #[test]
    fn gait_path_is_32_unhardened_indexes() {
        let gait_key = XpubHdKey::from_str(XPUB).unwrap();
        let path = GreenPubkeys::gait_path_from_gait_key(&gait_key);
        assert_eq!(path.len(), 32);
        assert!(path.iter().all(|index| *index < 0x10000));
    }

    #[test]
    fn green_root_path_shape() {
        let master = XpubHdKey::from_str(XPUB).unwrap();
        let gait_path: Vec<u32> = (0..32).collect();
        let green = GreenPubkeys::new(master, &gait_path).unwrap();

        let main = green.subaccount_root_path(0);
        assert_eq!(main[0], 1);
        assert_eq!(main.len(), 33);

        let sub = green.subaccount_root_path(7);
        assert_eq!(sub[0], 3);
        assert_eq!(*sub.last().unwrap(), 7);
        assert_eq!(sub.len(), 34);

        assert_eq!(green.full_path(7, 21, false), {
            let mut path = sub.clone();
            path.push(21);
            path
        });
    }

    #[test]
    fn gait_path_length_is_checked() {
        let master = XpubHdKey::from_str(XPUB).unwrap();
        assert_eq!(
            GreenPubkeys::new(master, &[1, 2, 3]),
            Err(DerivationError::InvalidGaitPath)
        );
    }

    #[test]
    fn green_user_paths() {
        let user = GreenUserPubkeys::new();
        assert_eq!(user.full_path(0, 5, false), vec![1, 5]);
        assert_eq!(
            user.full_path(2, 5, true),
            vec![harden(3), harden(2), 1, 5]
        );
    }

    #[test]
    fn bip44_purpose_and_coin_type() {
        let pubkeys = Bip44Pubkeys::new(true, false);
        assert_eq!(
            pubkeys.full_path(0, 3, false),
            vec![harden(49), harden(0), harden(0), 0, 3]
        );
        assert_eq!(
            pubkeys.full_path(1, 3, true),
            vec![harden(84), harden(0), harden(0), 1, 3]
        );
        assert_eq!(
            pubkeys.full_path(18, 0, false),
            vec![harden(44), harden(0), harden(1), 0, 0]
        );

        let liquid = Bip44Pubkeys::new(true, true);
        assert_eq!(liquid.subaccount_root_path(1)[1], harden(1776));
        let testnet = Bip44Pubkeys::new(false, true);
        assert_eq!(testnet.subaccount_root_path(1)[1], harden(1));
    }

    #[test]
    #[should_panic]
    fn bip44_purpose_slot_out_of_range_aborts() {
        let pubkeys = Bip44Pubkeys::new(true, false);
        pubkeys.subaccount_root_path(3);
    }

    #[test]
    fn unknown_subaccount_errors() {
        let secp = Secp256k1::new();
        let user = GreenUserPubkeys::new();
        assert_eq!(
            user.subaccount_key(&secp, 1),
            Err(DerivationError::UnknownSubaccount(1))
        );
        user.add_subaccount(&secp, 1, XPUB).unwrap();
        assert!(user.subaccount_key(&secp, 1).is_ok());
        // Re-registration with the same xpub is a no-op
        user.add_subaccount(&secp, 1, XPUB).unwrap();
    }
}
