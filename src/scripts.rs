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

use bitcoin::blockdata::script::Builder;
use bitcoin::hashes::hex::FromHex;
use bitcoin::hashes::{hash160, sha256, Hash};
use wallet_hd::XpubHdKey;
use wallet_psbt::{Input, PSBT_IN_REDEEM_SCRIPT, PSBT_IN_WITNESS_SCRIPT};

use crate::details::{AddressType, WalletCoords};
use crate::EngineError;

/// Native segwit program paying to the hash160 of a public key.
pub(crate) fn p2wpkh_script(pubkey: &[u8]) -> Vec<u8> {
    let hash = hash160::Hash::hash(pubkey);
    Builder::new()
        .push_int(0)
        .push_slice(&hash[..])
        .into_script()
        .to_bytes()
}

/// Native segwit program paying to the sha256 of a witness script.
pub(crate) fn p2wsh_script(witness_script: &[u8]) -> Vec<u8> {
    let hash = sha256::Hash::hash(witness_script);
    Builder::new()
        .push_int(0)
        .push_slice(&hash[..])
        .into_script()
        .to_bytes()
}

/// Writes the redeem/witness scripts a wallet input needs for signing into
/// its PSBT fields, following the subaccount address type.
pub(crate) fn add_input_scripts(
    input: &mut Input,
    coords: &WalletCoords,
    prevout_script: Option<&str>,
    keys: &[XpubHdKey],
) -> Result<(), EngineError> {
    let redeem_script = match coords.address_type {
        AddressType::P2shP2wpkh => {
            let key = keys
                .first()
                .ok_or_else(|| EngineError::InvalidDetails(s!("no key for redeem script")))?;
            Some(p2wpkh_script(&key.public_key().serialize()))
        }
        AddressType::Csv | AddressType::P2wsh => {
            let prevout_script = prevout_script.ok_or_else(|| {
                EngineError::InvalidDetails(s!("multisig utxo lacks prevout_script"))
            })?;
            let witness_script = Vec::<u8>::from_hex(prevout_script)?;
            let redeem_script = p2wsh_script(&witness_script);
            input
                .psbt_fields
                .insert(PSBT_IN_WITNESS_SCRIPT, witness_script);
            Some(redeem_script)
        }
        AddressType::P2wpkh | AddressType::P2pkh => None,
    };
    if let Some(redeem_script) = redeem_script {
        input.psbt_fields.insert(PSBT_IN_REDEEM_SCRIPT, redeem_script);
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn p2wpkh_script_shape() {
        let script = p2wpkh_script(&[0x02; 33]);
        assert_eq!(script.len(), 22);
        assert_eq!(&script[..2], &[0x00, 0x14]);
    }

    #[test]
    fn p2wsh_script_shape() {
        let script = p2wsh_script(&[0x51]);
        assert_eq!(script.len(), 34);
        assert_eq!(&script[..2], &[0x00, 0x20]);
    }
}
