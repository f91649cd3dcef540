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

//! Placeholder signatures sized as conservative over-estimates of the final
//! ones, used to compute realistic fee rates before a transaction is
//! signed.

use bitcoin::blockdata::script::Builder;
use bitcoin::hashes::hex::FromHex;
use wallet_hd::XpubHdKey;

use crate::details::{AddressType, WalletCoords};
use crate::EngineError;
use crate::scripts::{p2wpkh_script, p2wsh_script};

/// Upper bound of a DER-encoded ECDSA signature with its sighash byte.
const DUMMY_SIG_LEN: usize = 73;

fn dummy_sig() -> Vec<u8> { vec![0u8; DUMMY_SIG_LEN] }

/// Builds placeholder scriptSig and witness data for an unsigned wallet
/// input. The shapes match the wallet script templates; lengths
/// over-estimate the signed form.
pub(crate) fn scriptsig_and_witness(
    coords: &WalletCoords,
    prevout_script: Option<&str>,
    keys: &[XpubHdKey],
) -> Result<(Vec<u8>, Vec<Vec<u8>>), EngineError> {
    let user_key = keys
        .last()
        .ok_or_else(|| EngineError::InvalidDetails(s!("no key for dummy signature")))?;
    let user_pubkey = user_key.public_key().serialize().to_vec();

    let result = match coords.address_type {
        AddressType::P2wpkh => (vec![], vec![dummy_sig(), user_pubkey]),
        AddressType::P2shP2wpkh => {
            let script_sig = Builder::new()
                .push_slice(&p2wpkh_script(&user_pubkey))
                .into_script()
                .to_bytes();
            (script_sig, vec![dummy_sig(), user_pubkey])
        }
        AddressType::P2pkh => {
            let script_sig = Builder::new()
                .push_slice(&dummy_sig())
                .push_slice(&user_pubkey)
                .into_script()
                .to_bytes();
            (script_sig, vec![])
        }
        AddressType::Csv | AddressType::P2wsh => {
            let prevout_script = prevout_script.ok_or_else(|| {
                EngineError::InvalidDetails(s!("multisig utxo lacks prevout_script"))
            })?;
            let witness_script = Vec::<u8>::from_hex(prevout_script)?;
            let script_sig = Builder::new()
                .push_slice(&p2wsh_script(&witness_script))
                .into_script()
                .to_bytes();
            // OP_CHECKMULTISIG consumes an extra empty stack element
            let witness = vec![vec![], dummy_sig(), dummy_sig(), witness_script];
            (script_sig, witness)
        }
    };
    Ok(result)
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use super::*;

    const XPUB: &str = "xpub6ASuArnXKPbfEwhqN6e3mwBcDTgzisQN1wXN9BJcM47sSikHjJf3UFHKkNAWbWMi\
                        Gj7Wf5uMash7SyYq527Hqck2AxYysAA7xmALppuCkwQ";

    fn coords(address_type: AddressType) -> WalletCoords {
        WalletCoords {
            subaccount: 0,
            pointer: 1,
            is_internal: false,
            address_type,
        }
    }

    #[test]
    fn segwit_single_sig_shapes() {
        let keys = vec![XpubHdKey::from_str(XPUB).unwrap()];

        let (script_sig, witness) =
            scriptsig_and_witness(&coords(AddressType::P2wpkh), None, &keys).unwrap();
        assert!(script_sig.is_empty());
        assert_eq!(witness.len(), 2);
        assert_eq!(witness[0].len(), DUMMY_SIG_LEN);
        assert_eq!(witness[1].len(), 33);

        let (script_sig, witness) =
            scriptsig_and_witness(&coords(AddressType::P2shP2wpkh), None, &keys).unwrap();
        // Pushed 22-byte program plus the push opcode
        assert_eq!(script_sig.len(), 23);
        assert_eq!(witness.len(), 2);
    }

    #[test]
    fn multisig_witness_carries_script() {
        let keys = vec![XpubHdKey::from_str(XPUB).unwrap()];
        let prevout_script = "52210279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16\
                              f817982102c6047f9441ed7d6d3045406e95c07cd85c778e4b8cef3ca7abac09\
                              b95c709ee552ae";
        let (script_sig, witness) = scriptsig_and_witness(
            &coords(AddressType::Csv),
            Some(prevout_script),
            &keys,
        )
        .unwrap();
        assert_eq!(script_sig.len(), 35);
        assert_eq!(witness.len(), 4);
        assert!(witness[0].is_empty());
        assert_eq!(witness[3], Vec::<u8>::from_hex(prevout_script).unwrap());
    }

    #[test]
    fn missing_prevout_script_is_rejected() {
        let keys = vec![XpubHdKey::from_str(XPUB).unwrap()];
        assert!(scriptsig_and_witness(&coords(AddressType::P2wsh), None, &keys).is_err());
    }
}
