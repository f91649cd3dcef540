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

use std::collections::{BTreeMap, BTreeSet};

use crate::details::TxOutput;

/// Multisig change detection.
///
/// For each asset the wallet contributed an input to: when the asset is
/// also sent externally, or more than one wallet output carries it, the
/// earliest wallet output for that asset is the change; every other wallet
/// output for the asset is explicitly not.
pub(crate) fn mark_change(
    outputs: &mut [TxOutput],
    wallet_assets: &BTreeSet<String>,
    spent_assets: &BTreeSet<String>,
    asset_outputs: &BTreeMap<String, Vec<usize>>,
) {
    for (asset_id, indexes) in asset_outputs {
        if !wallet_assets.contains(asset_id) {
            continue;
        }
        let is_spent_externally = spent_assets.contains(asset_id);
        let is_change = is_spent_externally || indexes.len() > 1;
        for (position, index) in indexes.iter().enumerate() {
            outputs[*index].is_change = Some(position == 0 && is_change);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn wallet_output(asset: &str) -> TxOutput {
        TxOutput {
            asset_id: Some(asset.to_owned()),
            ..TxOutput::default()
        }
    }

    fn btreeset(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn external_spend_marks_first_wallet_output() {
        let mut outputs = vec![wallet_output("btc"), wallet_output("btc")];
        let mut asset_outputs = BTreeMap::new();
        asset_outputs.insert("btc".to_owned(), vec![1]);

        mark_change(
            &mut outputs,
            &btreeset(&["btc"]),
            &btreeset(&["btc"]),
            &asset_outputs,
        );
        assert_eq!(outputs[1].is_change, Some(true));
        assert_eq!(outputs[0].is_change, None);
    }

    #[test]
    fn two_wallet_outputs_mark_earliest() {
        let mut outputs = vec![wallet_output("btc"), wallet_output("btc")];
        let mut asset_outputs = BTreeMap::new();
        asset_outputs.insert("btc".to_owned(), vec![0, 1]);

        mark_change(
            &mut outputs,
            &btreeset(&["btc"]),
            &BTreeSet::new(),
            &asset_outputs,
        );
        assert_eq!(outputs[0].is_change, Some(true));
        assert_eq!(outputs[1].is_change, Some(false));
    }

    #[test]
    fn single_wallet_output_without_external_spend_is_not_change() {
        let mut outputs = vec![wallet_output("btc")];
        let mut asset_outputs = BTreeMap::new();
        asset_outputs.insert("btc".to_owned(), vec![0]);

        mark_change(
            &mut outputs,
            &btreeset(&["btc"]),
            &BTreeSet::new(),
            &asset_outputs,
        );
        assert_eq!(outputs[0].is_change, Some(false));
    }

    #[test]
    fn unfunded_assets_are_ignored() {
        let mut outputs = vec![wallet_output("usdt")];
        let mut asset_outputs = BTreeMap::new();
        asset_outputs.insert("usdt".to_owned(), vec![0]);

        mark_change(
            &mut outputs,
            &btreeset(&["btc"]),
            &btreeset(&["usdt"]),
            &asset_outputs,
        );
        assert_eq!(outputs[0].is_change, None);
    }
}
