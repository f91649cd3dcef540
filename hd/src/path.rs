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
use std::ops::{Deref, DerefMut};

use bitcoin::util::bip32::{ChildNumber, DerivationPath};

/// Constant determining BIP32 boundary for u32 values after which index
/// is treated as hardened
pub const HARDENED_INDEX_BOUNDARY: u32 = 1 << 31;

/// Returns the hardened form of `index`.
///
/// # Panics
///
/// If `index` is already hardened.
#[inline]
pub fn harden(index: u32) -> u32 {
    assert!(
        index < HARDENED_INDEX_BOUNDARY,
        "index {} is already hardened",
        index
    );
    index | HARDENED_INDEX_BOUNDARY
}

/// Returns whether a raw derivation index is hardened.
#[inline]
pub fn is_hardened(index: u32) -> bool { index >= HARDENED_INDEX_BOUNDARY }

/// Converts a raw index slice into a [`DerivationPath`].
pub fn to_bip32_path(path: &[u32]) -> DerivationPath {
    path.iter()
        .map(|index| ChildNumber::from(*index))
        .collect::<Vec<_>>()
        .into()
}

/// Derivation path made of raw `u32` indexes, as used on the wallet protocol
/// surface. Hardened components carry the [`HARDENED_INDEX_BOUNDARY`] bit.
#[derive(Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Default, From)]
pub struct HdPath(Vec<u32>);

impl Deref for HdPath {
    type Target = Vec<u32>;

    fn deref(&self) -> &Self::Target { &self.0 }
}

impl DerefMut for HdPath {
    fn deref_mut(&mut self) -> &mut Self::Target { &mut self.0 }
}

impl From<&[u32]> for HdPath {
    fn from(path: &[u32]) -> Self { Self(path.to_vec()) }
}

impl AsRef<[u32]> for HdPath {
    #[inline]
    fn as_ref(&self) -> &[u32] { &self.0 }
}

impl FromIterator<u32> for HdPath {
    fn from_iter<T: IntoIterator<Item = u32>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for HdPath {
    type Item = u32;
    type IntoIter = std::vec::IntoIter<u32>;

    fn into_iter(self) -> Self::IntoIter { self.0.into_iter() }
}

impl HdPath {
    /// Constructs empty (master) derivation path.
    pub fn new() -> Self { Self::default() }

    /// Converts into a [`DerivationPath`] usable with `bitcoin` BIP32
    /// derivation functions.
    pub fn to_bip32(&self) -> DerivationPath { to_bip32_path(&self.0) }

    /// Unwraps the inner index vector.
    pub fn into_inner(self) -> Vec<u32> { self.0 }
}

impl Display for HdPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("m")?;
        for index in &self.0 {
            if is_hardened(*index) {
                write!(f, "/{}h", index ^ HARDENED_INDEX_BOUNDARY)?;
            } else {
                write!(f, "/{}", index)?;
            }
        }
        Ok(())
    }
}
