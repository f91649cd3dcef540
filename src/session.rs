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

use wallet_hd::{SubaccountPubkeys, XpubHdKey};
use wallet_psbt::Tx;
use wallet_signer::{Signer, SignerNetwork};

use crate::details::{AddressType, WalletCoords};
use crate::EngineError;

/// Network parameters of the session the engine runs within.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct NetParams {
    /// Network identifier (e.g. `mainnet`, `liquid`, `testnet`).
    pub network: String,

    /// Whether the session is singlesig (electrum-backed).
    pub is_electrum: bool,

    /// Whether this is an Elements/Liquid network.
    pub is_liquid: bool,

    /// Whether this is a main network.
    pub is_main_net: bool,

    /// Base58 P2PKH version byte.
    pub btc_version: u8,

    /// The policy (fee) asset in display hex, for Liquid networks.
    pub policy_asset: Option<String>,
}

impl NetParams {
    /// The signer-facing subset of these parameters.
    pub fn signer_network(&self) -> SignerNetwork {
        SignerNetwork {
            name: self.network.clone(),
            is_main_net: self.is_main_net,
            is_liquid: self.is_liquid,
            btc_version: self.btc_version,
        }
    }

    /// Bitcoin network for address encoding.
    pub fn bitcoin_network(&self) -> bitcoin::Network {
        if self.is_main_net {
            bitcoin::Network::Bitcoin
        } else {
            bitcoin::Network::Testnet
        }
    }

    /// Elements address parameters for address encoding.
    pub fn elements_params(&self) -> &'static elements::AddressParams {
        if self.is_main_net {
            &elements::AddressParams::LIQUID
        } else {
            &elements::AddressParams::ELEMENTS
        }
    }
}

/// Wallet-side description of an owned scriptpubkey.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct OutputInfo {
    /// Owning subaccount.
    pub subaccount: u32,

    /// Address pointer within the subaccount.
    pub pointer: u32,

    /// Whether the address sits on the internal (change) chain.
    pub is_internal: bool,

    /// Address type of the owning subaccount.
    pub address_type: AddressType,

    /// Multisig branch, absent for singlesig.
    pub branch: Option<u32>,

    /// Multisig subtype (CSV blocks), absent for singlesig.
    pub subtype: Option<u32>,
}

/// Block-chain access used to resolve previous transactions. Calls are
/// synchronous from the engine's point of view and may fail; failures abort
/// the current engine call.
pub trait ChainAccess {
    /// Fetches a raw transaction by its display (reversed) txid hex.
    fn fetch_raw_transaction(&self, txid: &str) -> Result<Tx, EngineError>;
}

/// The thin session facade the enrichment engine works against.
pub trait Session: ChainAccess {
    /// Network parameters of this session.
    fn net_params(&self) -> &NetParams;

    /// The signer servicing this session.
    fn signer(&self) -> &Signer;

    /// The set of pubkeys servicing a wallet UTXO: the service co-signer
    /// key first for multisig, then the user key, then a recovery key when
    /// the subaccount has one.
    fn keys_from_utxo(&self, coords: &WalletCoords) -> Result<Vec<XpubHdKey>, EngineError>;

    /// Looks up whether `script` belongs to the wallet.
    fn scriptpubkey_data(&self, script: &[u8]) -> Option<OutputInfo>;

    /// Service co-signer derivation policy; absent on singlesig sessions.
    fn green_pubkeys(&self) -> Option<&dyn SubaccountPubkeys>;

    /// User key derivation policy.
    fn user_pubkeys(&self) -> &dyn SubaccountPubkeys;
}
