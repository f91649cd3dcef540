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

use std::collections::BTreeMap;

use bitcoin::secp256k1::PublicKey;
use bitcoin::util::bip32::KeySource;
use wallet_hd::{to_bip32_path, SubaccountPubkeys, XpubHdKey};

use crate::details::WalletCoords;
use crate::{EngineError, Session};

/// Attaches `(pubkey → (master fingerprint, full path))` entries for every
/// key servicing a wallet UTXO to a PSBT keypath map. Returns the serviced
/// keys for further script construction.
///
/// For multisig the service co-signer key comes first; a recovery key may
/// follow the user key but its derivation policy is not defined, so no
/// keypath is attached for it.
pub(crate) fn add_utxo_keypaths(
    session: &dyn Session,
    keypaths: &mut BTreeMap<PublicKey, KeySource>,
    coords: &WalletCoords,
) -> Result<Vec<XpubHdKey>, EngineError> {
    let is_electrum = session.net_params().is_electrum;
    let keys = session.keys_from_utxo(coords)?;
    let fingerprint = session.signer().master_fingerprint()?;

    let mut add = |policy: &dyn SubaccountPubkeys, key: &XpubHdKey| {
        let path = policy.full_path(coords.subaccount, coords.pointer, coords.is_internal);
        keypaths.insert(key.public_key(), (fingerprint, to_bip32_path(&path)));
    };

    let mut user_key_index = 0;
    if !is_electrum {
        let green_policy = session.green_pubkeys().ok_or_else(|| {
            EngineError::InvalidDetails(s!("multisig session lacks service pubkeys"))
        })?;
        let green_key = keys
            .first()
            .ok_or_else(|| EngineError::InvalidDetails(s!("no service key for utxo")))?;
        add(green_policy, green_key);
        user_key_index = 1;
    }

    let user_key = keys
        .get(user_key_index)
        .ok_or_else(|| EngineError::InvalidDetails(s!("no user key for utxo")))?;
    add(session.user_pubkeys(), user_key);

    Ok(keys)
}

/// Derivation paths for the details JSON: the user path always, the service
/// co-signer path on multisig.
pub(crate) fn utxo_paths(
    session: &dyn Session,
    coords: &WalletCoords,
) -> (Vec<u32>, Option<Vec<u32>>) {
    let user_path = session.user_pubkeys().full_path(
        coords.subaccount,
        coords.pointer,
        coords.is_internal,
    );
    let service_path = session.green_pubkeys().map(|policy| {
        policy.full_path(coords.subaccount, coords.pointer, coords.is_internal)
    });
    (user_path, service_path)
}
