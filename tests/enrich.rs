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

//! End-to-end enrichment scenarios over an in-memory session.

use std::collections::HashMap;
use std::str::FromStr;

use bitcoin::blockdata::script::Builder;
use bitcoin::hashes::hex::ToHex;
use bitcoin::hashes::{hash160, Hash};
use bitcoin::secp256k1::{All, Secp256k1};
use serde_json::json;
use wallet_hd::{harden, Bip44Pubkeys, GreenPubkeys, GreenUserPubkeys, SubaccountPubkeys, XpubHdKey};
use wallet_psbt::{Psbt, PsbtVersion, Tx};
use wallet_session::{
    AddressType, ChainAccess, Engine, EngineError, NetParams, OutputInfo, PsbtDetails, Session,
    TxInput, TxOutput, UtxoSet, WalletCoords,
};
use wallet_signer::{Signer, SignerNetwork};

const MNEMONIC: &str = "abandon abandon abandon abandon abandon abandon abandon abandon \
                        abandon abandon abandon about";

enum UserPolicy {
    Bip44(Bip44Pubkeys),
    Green(GreenUserPubkeys),
}

struct MockSession {
    net: NetParams,
    signer: Signer,
    user: UserPolicy,
    green: Option<GreenPubkeys>,
    scripts: HashMap<Vec<u8>, OutputInfo>,
    txs: HashMap<String, Tx>,
    secp: Secp256k1<All>,
}

impl MockSession {
    fn new(net: NetParams, user: UserPolicy, green: Option<GreenPubkeys>) -> MockSession {
        let signer_net = SignerNetwork {
            name: net.network.clone(),
            is_main_net: net.is_main_net,
            is_liquid: net.is_liquid,
            btc_version: net.btc_version,
        };
        let signer =
            Signer::new(&signer_net, &json!({}), &json!({ "mnemonic": MNEMONIC })).unwrap();
        MockSession {
            net,
            signer,
            user,
            green,
            scripts: HashMap::new(),
            txs: HashMap::new(),
            secp: Secp256k1::new(),
        }
    }

    fn add_tx(&mut self, tx: Tx) {
        self.txs.insert(tx.txid().to_string(), tx);
    }
}

impl ChainAccess for MockSession {
    fn fetch_raw_transaction(&self, txid: &str) -> Result<Tx, EngineError> {
        self.txs
            .get(txid)
            .cloned()
            .ok_or_else(|| EngineError::Upstream(format!("transaction {} not found", txid)))
    }
}

impl Session for MockSession {
    fn net_params(&self) -> &NetParams { &self.net }

    fn signer(&self) -> &Signer { &self.signer }

    fn keys_from_utxo(&self, coords: &WalletCoords) -> Result<Vec<XpubHdKey>, EngineError> {
        let mut keys = vec![];
        if let Some(green) = &self.green {
            keys.push(green.derive(&self.secp, coords.subaccount, coords.pointer, None)?);
        }
        match &self.user {
            UserPolicy::Bip44(user) => keys.push(user.derive(
                &self.secp,
                coords.subaccount,
                coords.pointer,
                Some(coords.is_internal),
            )?),
            UserPolicy::Green(user) => {
                keys.push(user.derive(&self.secp, coords.subaccount, coords.pointer, None)?)
            }
        }
        Ok(keys)
    }

    fn scriptpubkey_data(&self, script: &[u8]) -> Option<OutputInfo> {
        self.scripts.get(script).cloned()
    }

    fn green_pubkeys(&self) -> Option<&dyn SubaccountPubkeys> {
        self.green.as_ref().map(|green| green as &dyn SubaccountPubkeys)
    }

    fn user_pubkeys(&self) -> &dyn SubaccountPubkeys {
        match &self.user {
            UserPolicy::Bip44(user) => user,
            UserPolicy::Green(user) => user,
        }
    }
}

fn p2wpkh(key: &XpubHdKey) -> bitcoin::Script {
    let hash = hash160::Hash::hash(&key.public_key().serialize());
    Builder::new().push_int(0).push_slice(&hash[..]).into_script()
}

fn btc_net() -> NetParams {
    NetParams {
        network: "electrum-testnet".to_owned(),
        is_electrum: true,
        is_liquid: false,
        is_main_net: false,
        btc_version: 111,
        policy_asset: None,
    }
}

fn singlesig_session() -> (MockSession, XpubHdKey, XpubHdKey) {
    let user = Bip44Pubkeys::new(false, false);
    let mut session = MockSession::new(btc_net(), UserPolicy::Bip44(user), None);

    // Register subaccount 1 (BIP84) from the signer's own account xpub
    let account_path = [harden(84), harden(1), harden(0)];
    let account_xpub = session.signer.get_bip32_xpub(&account_path).unwrap();
    match &session.user {
        UserPolicy::Bip44(user) => user.add_subaccount(1, &account_xpub).unwrap(),
        _ => unreachable!(),
    }

    let account = XpubHdKey::from_str(&account_xpub).unwrap();
    let external_key = account.derive(&session.secp, &[0, 0]).unwrap();
    let change_key = account.derive(&session.secp, &[1, 0]).unwrap();
    (session, external_key, change_key)
}

/// Parse pipeline over a v0 single-input P2WPKH PSBT: the wallet input and
/// the change output are recognised, the fee is computed against the
/// remaining output, and serialization restores version 0 byte-for-byte.
#[test]
fn singlesig_parse_pipeline() {
    let (mut session, external_key, change_key) = singlesig_session();
    let wallet_script = p2wpkh(&external_key);
    let change_script = p2wpkh(&change_key);

    let prev_tx = bitcoin::Transaction {
        version: 2,
        lock_time: bitcoin::PackedLockTime(0),
        input: vec![bitcoin::TxIn {
            previous_output: bitcoin::OutPoint::default(),
            script_sig: bitcoin::Script::new(),
            sequence: bitcoin::Sequence::from_consensus(u32::MAX),
            witness: bitcoin::Witness::default(),
        }],
        output: vec![bitcoin::TxOut {
            value: 100_000,
            script_pubkey: wallet_script,
        }],
    };
    let prev_txid = prev_tx.txid();
    session.add_tx(Tx::Bitcoin(prev_tx));
    session.scripts.insert(change_script.to_bytes(), OutputInfo {
        subaccount: 1,
        pointer: 0,
        is_internal: true,
        address_type: AddressType::P2wpkh,
        branch: None,
        subtype: None,
    });

    let spend_tx = bitcoin::Transaction {
        version: 1,
        lock_time: bitcoin::PackedLockTime(0),
        input: vec![bitcoin::TxIn {
            previous_output: bitcoin::OutPoint {
                txid: prev_txid,
                vout: 0,
            },
            script_sig: bitcoin::Script::new(),
            sequence: bitcoin::Sequence::from_consensus(0xffff_fffd),
            witness: bitcoin::Witness::default(),
        }],
        output: vec![
            bitcoin::TxOut {
                value: 90_000,
                script_pubkey: Builder::new()
                    .push_int(0)
                    .push_slice(&[0x99; 20])
                    .into_script(),
            },
            bitcoin::TxOut {
                value: 9_000,
                script_pubkey: change_script,
            },
        ],
    };
    let mut psbt = Psbt::from_tx(&Tx::Bitcoin(spend_tx)).unwrap();
    assert_eq!(psbt.original_version(), PsbtVersion::V0);

    let utxos = UtxoSet::Flat(vec![TxInput {
        txhash: prev_txid.to_string(),
        pt_idx: 0,
        subaccount: 1,
        pointer: 0,
        is_internal: false,
        address_type: Some(AddressType::P2wpkh),
        satoshi: 100_000,
        ..TxInput::default()
    }]);

    let engine = Engine::new(&session);
    let result = engine.to_details(&mut psbt, utxos).unwrap();

    assert_eq!(result.transaction_inputs.len(), 1);
    let input = &result.transaction_inputs[0];
    assert!(!input.skip_signing);
    assert_eq!(input.satoshi, 100_000);
    assert_eq!(input.user_path, Some(vec![harden(84), harden(1), harden(0), 0, 0]));
    assert!(input.service_path.is_none());

    assert_eq!(result.fee, 1_000);
    assert!(result.fee_rate > 0);
    assert!(!result.is_partial);
    assert!(result.error.is_none());
    assert_eq!(result.utxo_strategy, "manual");

    // Singlesig outputs on the internal chain are change
    assert_eq!(result.transaction_outputs[1].is_change, Some(true));
    assert!(result.transaction_outputs[1].address.is_some());
    assert!(result.transaction_outputs[0].is_change.is_none());
    assert!(result.transaction_outputs[0].address.is_some());

    // The enriched container still serializes to version 0 and is stable
    let base64 = psbt.to_base64(false);
    let reparsed = Psbt::from_base64(&base64, false).unwrap();
    assert_eq!(reparsed.original_version(), PsbtVersion::V0);
    assert_eq!(reparsed, psbt);
    assert_eq!(reparsed.to_base64(false), base64);
}

/// The signed-size estimate uses dummy signatures: the reported transaction
/// is larger than the unsigned one.
#[test]
fn dummy_signatures_inflate_reported_size() {
    let (mut session, external_key, _) = singlesig_session();
    let wallet_script = p2wpkh(&external_key);

    let prev_tx = bitcoin::Transaction {
        version: 2,
        lock_time: bitcoin::PackedLockTime(0),
        input: vec![],
        output: vec![bitcoin::TxOut {
            value: 50_000,
            script_pubkey: wallet_script,
        }],
    };
    let prev_txid = prev_tx.txid();
    session.add_tx(Tx::Bitcoin(prev_tx));

    let spend_tx = bitcoin::Transaction {
        version: 2,
        lock_time: bitcoin::PackedLockTime(0),
        input: vec![bitcoin::TxIn {
            previous_output: bitcoin::OutPoint {
                txid: prev_txid,
                vout: 0,
            },
            script_sig: bitcoin::Script::new(),
            sequence: bitcoin::Sequence::from_consensus(u32::MAX),
            witness: bitcoin::Witness::default(),
        }],
        output: vec![bitcoin::TxOut {
            value: 49_000,
            script_pubkey: bitcoin::Script::from(vec![0x00, 0x14, 0x99]),
        }],
    };
    let unsigned_hex = bitcoin::consensus::encode::serialize(&spend_tx).to_hex();
    let mut psbt = Psbt::from_tx(&Tx::Bitcoin(spend_tx)).unwrap();

    let utxos = UtxoSet::Flat(vec![TxInput {
        txhash: prev_txid.to_string(),
        pt_idx: 0,
        subaccount: 1,
        pointer: 0,
        address_type: Some(AddressType::P2wpkh),
        satoshi: 50_000,
        ..TxInput::default()
    }]);

    let engine = Engine::new(&session);
    let result = engine.to_details(&mut psbt, utxos).unwrap();
    assert!(result.transaction.len() > unsigned_hex.len());
}

fn multisig_session() -> MockSession {
    let net = NetParams {
        network: "testnet".to_owned(),
        is_electrum: false,
        is_liquid: false,
        is_main_net: false,
        btc_version: 111,
        policy_asset: None,
    };
    let user = GreenUserPubkeys::new();
    let service_xpub = XpubHdKey::from_str(
        "xpub661MyMwAqRbcFtXgS5sYJABqqG9YLmC4Q1Rdap9gSE8NqtwybGhePY2gZ29ESFjqJoCu1Rupje8YtGq\
         sefD265TMg7usUDFdp6W1EGMcet8",
    )
    .unwrap();
    let gait_path: Vec<u32> = (100..132).collect();
    let green = GreenPubkeys::new(service_xpub, &gait_path).unwrap();
    let mut session = MockSession::new(net, UserPolicy::Green(user), Some(green));

    let master_xpub = session.signer.get_master_bip32_xpub().unwrap();
    match &session.user {
        UserPolicy::Green(user) => {
            user.add_subaccount(&session.secp, 0, &master_xpub).unwrap()
        }
        _ => unreachable!(),
    }
    session
}

fn multisig_prevout_script(session: &MockSession, pointer: u32) -> bitcoin::Script {
    // A plausible 2of2 witness script over the green and user keys
    let coords = WalletCoords {
        subaccount: 0,
        pointer,
        is_internal: false,
        address_type: AddressType::Csv,
    };
    let keys = session.keys_from_utxo(&coords).unwrap();
    let mut builder = Builder::new().push_int(2);
    for key in &keys {
        builder = builder.push_slice(&key.public_key().serialize());
    }
    builder
        .push_int(2)
        .push_opcode(bitcoin::blockdata::opcodes::all::OP_CHECKMULTISIG)
        .into_script()
}

/// Multisig change heuristic: with an external recipient and two wallet
/// outputs for the funded asset, exactly the earliest wallet output is
/// change.
#[test]
fn multisig_change_heuristic() {
    let mut session = multisig_session();

    let wallet_script_a = multisig_prevout_script(&session, 1);
    let wallet_script_b = multisig_prevout_script(&session, 2);
    let funding_script = multisig_prevout_script(&session, 5);
    for (pointer, script) in [(1u32, &wallet_script_a), (2u32, &wallet_script_b)] {
        session.scripts.insert(script.to_bytes(), OutputInfo {
            subaccount: 0,
            pointer,
            is_internal: false,
            address_type: AddressType::Csv,
            branch: Some(1),
            subtype: Some(51_840),
        });
    }

    let prev_tx = bitcoin::Transaction {
        version: 2,
        lock_time: bitcoin::PackedLockTime(0),
        input: vec![],
        output: vec![bitcoin::TxOut {
            value: 50_000,
            script_pubkey: funding_script.to_v0_p2wsh(),
        }],
    };
    let prev_txid = prev_tx.txid();
    session.add_tx(Tx::Bitcoin(prev_tx));

    let spend_tx = bitcoin::Transaction {
        version: 2,
        lock_time: bitcoin::PackedLockTime(0),
        input: vec![bitcoin::TxIn {
            previous_output: bitcoin::OutPoint {
                txid: prev_txid,
                vout: 0,
            },
            script_sig: bitcoin::Script::new(),
            sequence: bitcoin::Sequence::from_consensus(u32::MAX),
            witness: bitcoin::Witness::default(),
        }],
        output: vec![
            bitcoin::TxOut {
                value: 30_000,
                script_pubkey: bitcoin::Script::from(vec![0x00, 0x14, 0x77]),
            },
            bitcoin::TxOut {
                value: 10_000,
                script_pubkey: wallet_script_a,
            },
            bitcoin::TxOut {
                value: 9_000,
                script_pubkey: wallet_script_b,
            },
        ],
    };
    let mut psbt = Psbt::from_tx(&Tx::Bitcoin(spend_tx)).unwrap();

    let utxos = UtxoSet::Flat(vec![TxInput {
        txhash: prev_txid.to_string(),
        pt_idx: 0,
        subaccount: 0,
        pointer: 5,
        address_type: Some(AddressType::Csv),
        prevout_script: Some(funding_script.to_bytes().to_hex()),
        satoshi: 50_000,
        ..TxInput::default()
    }]);

    let engine = Engine::new(&session);
    let result = engine.to_details(&mut psbt, utxos).unwrap();

    assert_eq!(result.fee, 1_000);
    let input = &result.transaction_inputs[0];
    assert!(input.service_path.is_some());
    assert!(input.user_path.is_some());

    assert!(result.transaction_outputs[0].is_change.is_none());
    assert_eq!(result.transaction_outputs[1].is_change, Some(true));
    assert_eq!(result.transaction_outputs[2].is_change, Some(false));
}

/// Build pipeline on multisig: wallet inputs receive both co-signer
/// keypaths plus witness and redeem scripts.
#[test]
fn multisig_build_attaches_keypaths_and_scripts() {
    let mut session = multisig_session();
    let funding_script = multisig_prevout_script(&session, 5);

    let prev_tx = bitcoin::Transaction {
        version: 2,
        lock_time: bitcoin::PackedLockTime(0),
        input: vec![],
        output: vec![bitcoin::TxOut {
            value: 50_000,
            script_pubkey: funding_script.to_v0_p2wsh(),
        }],
    };
    let prev_txid = prev_tx.txid();
    session.add_tx(Tx::Bitcoin(prev_tx));

    let spend_tx = bitcoin::Transaction {
        version: 2,
        lock_time: bitcoin::PackedLockTime(0),
        input: vec![bitcoin::TxIn {
            previous_output: bitcoin::OutPoint {
                txid: prev_txid,
                vout: 0,
            },
            script_sig: bitcoin::Script::new(),
            sequence: bitcoin::Sequence::from_consensus(u32::MAX),
            witness: bitcoin::Witness::default(),
        }],
        output: vec![bitcoin::TxOut {
            value: 49_000,
            script_pubkey: bitcoin::Script::from(vec![0x00, 0x14, 0x77]),
        }],
    };

    let details = PsbtDetails {
        transaction: bitcoin::consensus::encode::serialize(&spend_tx).to_hex(),
        transaction_inputs: vec![TxInput {
            txhash: prev_txid.to_string(),
            pt_idx: 0,
            subaccount: 0,
            pointer: 5,
            address_type: Some(AddressType::P2wsh),
            prevout_script: Some(funding_script.to_bytes().to_hex()),
            satoshi: 50_000,
            ..TxInput::default()
        }],
        transaction_outputs: vec![TxOutput {
            scriptpubkey: "001477".to_owned(),
            satoshi: 49_000,
            ..TxOutput::default()
        }],
        error: None,
    };

    let engine = Engine::new(&session);
    let psbt = engine.from_details(&details).unwrap();

    let input = psbt.input(0);
    assert_eq!(input.keypaths.len(), 2);
    assert_eq!(input.witness_script(), Some(&funding_script.to_bytes()[..]));
    let redeem = input.redeem_script().unwrap();
    assert_eq!(redeem.len(), 34);
    assert_eq!(&redeem[..2], &[0x00, 0x20]);
    // The previous output was attached while building
    assert!(input.witness_utxo.is_some());

    // Keypaths carry the signer's master fingerprint
    let fingerprint = session.signer.master_fingerprint().unwrap();
    for (_, (source_fp, _)) in &input.keypaths {
        assert_eq!(*source_fp, fingerprint);
    }
}

/// Details with an error state are refused by the build pipeline.
#[test]
fn build_refuses_error_details() {
    let session = multisig_session();
    let details = PsbtDetails {
        transaction: String::new(),
        transaction_inputs: vec![],
        transaction_outputs: vec![],
        error: Some("id_invalid_amount".to_owned()),
    };
    let engine = Engine::new(&session);
    assert!(matches!(
        engine.from_details(&details),
        Err(EngineError::InvalidDetails(_))
    ));
}
