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
use std::sync::Mutex;

use crate::is_hardened;

/// Result of a [`KeyCache::lookup`] for some derivation path.
#[derive(Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug)]
pub enum Lookup {
    /// The full path is cached; carries the cached xpub.
    Hit(String),

    /// A proper prefix of the path is cached and every component after it is
    /// unhardened, so the remaining suffix can be derived publicly. Carries
    /// the prefix length and the cached prefix xpub.
    Ancestor(usize, String),

    /// No usable cached ancestor. Carries the length of the shortest prefix
    /// that public derivation cannot reach below (the walk stops at the
    /// first hardened component seen from the end, or at the root).
    Miss(usize),
}

/// Thread-safe memoization of derivation path → base58 xpub.
///
/// Re-inserting a path is a no-op when the value matches; inserting a
/// different xpub under an existing path indicates key material divergence
/// and aborts the process.
#[derive(Debug, Default)]
pub struct KeyCache {
    cache: Mutex<BTreeMap<Vec<u32>, String>>,
}

impl KeyCache {
    /// Constructs an empty cache.
    pub fn new() -> Self { Self::default() }

    /// Caches `xpub` under `path`. Returns whether the entry is new.
    ///
    /// # Panics
    ///
    /// If `path` is already cached with a different xpub.
    pub fn insert(&self, path: &[u32], xpub: &str) -> bool {
        let mut cache = self.cache.lock().expect("key cache lock poisoned");
        match cache.get(path) {
            None => {
                cache.insert(path.to_vec(), xpub.to_owned());
                true
            }
            Some(present) => {
                assert_eq!(
                    present, xpub,
                    "conflicting xpub cached for derivation path {:?}",
                    path
                );
                false
            }
        }
    }

    /// Returns the cached xpub for an exact `path` match.
    pub fn get(&self, path: &[u32]) -> Option<String> {
        self.cache
            .lock()
            .expect("key cache lock poisoned")
            .get(path)
            .cloned()
    }

    /// Returns whether an exact `path` entry exists.
    pub fn contains(&self, path: &[u32]) -> bool {
        self.cache
            .lock()
            .expect("key cache lock poisoned")
            .contains_key(path)
    }

    /// Searches for the longest cached prefix of `path` reachable from the
    /// end of the path via unhardened components only.
    pub fn lookup(&self, path: &[u32]) -> Lookup {
        let cache = self.cache.lock().expect("key cache lock poisoned");
        let mut len = path.len();
        loop {
            if let Some(xpub) = cache.get(&path[..len]) {
                return if len == path.len() {
                    Lookup::Hit(xpub.clone())
                } else {
                    Lookup::Ancestor(len, xpub.clone())
                };
            }
            if len == 0 || is_hardened(path[len - 1]) {
                // Root, or a hardened parent public derivation cannot cross
                return Lookup::Miss(len);
            }
            len -= 1;
        }
    }

    /// Clones out the full path → xpub mapping.
    pub fn snapshot(&self) -> BTreeMap<Vec<u32>, String> {
        self.cache.lock().expect("key cache lock poisoned").clone()
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize { self.cache.lock().expect("key cache lock poisoned").len() }

    /// Returns whether the cache holds no entries.
    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::harden;

    #[test]
    fn insert_is_idempotent() {
        let cache = KeyCache::new();
        assert!(cache.insert(&[1, 2], "xpub1"));
        assert!(!cache.insert(&[1, 2], "xpub1"));
        assert_eq!(cache.get(&[1, 2]).as_deref(), Some("xpub1"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    #[should_panic(expected = "conflicting xpub")]
    fn conflicting_insert_aborts() {
        let cache = KeyCache::new();
        cache.insert(&[1, 2], "xpub1");
        cache.insert(&[1, 2], "xpub2");
    }

    #[test]
    fn lookup_walks_to_unhardened_prefix() {
        let cache = KeyCache::new();
        let account = [harden(84), harden(1), harden(0)];
        cache.insert(&account, "account");

        let full = [harden(84), harden(1), harden(0), 0, 5];
        match cache.lookup(&full) {
            Lookup::Ancestor(len, xpub) => {
                assert_eq!(len, 3);
                assert_eq!(xpub, "account");
            }
            other => panic!("unexpected lookup result {:?}", other),
        }
    }

    #[test]
    fn lookup_stops_at_hardened_boundary() {
        let cache = KeyCache::new();
        // Nothing cached: the walk must not cross the hardened component
        let path = [harden(84), harden(1), harden(0), 0, 5];
        assert_eq!(cache.lookup(&path), Lookup::Miss(3));
        // A path ending in a hardened component cannot be derived publicly
        let hardened_tail = [harden(84), harden(1)];
        assert_eq!(cache.lookup(&hardened_tail), Lookup::Miss(2));
        // Fully unhardened path walks to the root
        assert_eq!(cache.lookup(&[0, 1]), Lookup::Miss(0));
    }

    #[test]
    fn exact_hit_wins_over_ancestor() {
        let cache = KeyCache::new();
        cache.insert(&[], "master");
        cache.insert(&[0, 5], "child");
        assert_eq!(cache.lookup(&[0, 5]), Lookup::Hit(s!("child")));
        assert_eq!(cache.lookup(&[0, 6]), Lookup::Ancestor(0, s!("master")));
    }
}
