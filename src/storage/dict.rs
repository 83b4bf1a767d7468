//! Dictionary
//!
//! A thin hash-map abstraction used for every keyed table in the server:
//! the keyspace itself, the expiry table, the command table and the client
//! registry.
//!
//! On top of the usual find/add/replace/delete it offers random access:
//! `random_key` picks one live entry and `sample` picks up to N distinct live
//! entries. Both the active expire cycle and the eviction engine depend on
//! these to avoid full scans.
//!
//! `std::collections::HashMap` only randomizes its iteration order per map
//! instance, not per call, so iterating from the front would keep returning
//! the same entries. Selection is therefore done explicitly with
//! `rand::seq::IteratorRandom` (reservoir sampling over the live entries).

use rand::seq::IteratorRandom;
use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use thiserror::Error;

/// Errors returned by the strict dictionary operations.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DictError {
    /// `add` was called for a key that is already present
    #[error("key already exists")]
    Exists,

    /// `delete` was called for a key that is not present
    #[error("key not found")]
    Absent,
}

/// Outcome of [`Dict::replace`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Replace {
    /// The key was not present and has been inserted
    Inserted,
    /// The key was present and its value has been overwritten
    Replaced,
}

/// A hash map with random sampling.
#[derive(Debug, Clone)]
pub struct Dict<K, V> {
    map: HashMap<K, V>,
}

impl<K, V> Default for Dict<K, V> {
    fn default() -> Self {
        Self {
            map: HashMap::new(),
        }
    }
}

impl<K, V> Dict<K, V>
where
    K: Eq + Hash,
{
    /// Creates an empty dictionary.
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a key.
    pub fn find<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.get(key)
    }

    /// Looks up a key for in-place modification.
    pub fn find_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.get_mut(key)
    }

    /// Returns a clone of the stored key equal to `key`.
    pub fn find_key<Q>(&self, key: &Q) -> Option<K>
    where
        K: Borrow<Q> + Clone,
        Q: Hash + Eq + ?Sized,
    {
        self.map.get_key_value(key).map(|(k, _)| k.clone())
    }

    /// Returns true if the key is present.
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.contains_key(key)
    }

    /// Inserts a new entry. Fails without overwriting if the key exists.
    pub fn add(&mut self, key: K, value: V) -> Result<(), DictError> {
        if self.map.contains_key(&key) {
            return Err(DictError::Exists);
        }
        self.map.insert(key, value);
        Ok(())
    }

    /// Inserts or overwrites an entry unconditionally.
    pub fn replace(&mut self, key: K, value: V) -> Replace {
        match self.map.insert(key, value) {
            Some(_) => Replace::Replaced,
            None => Replace::Inserted,
        }
    }

    /// Removes an entry, returning its value.
    pub fn delete<Q>(&mut self, key: &Q) -> Result<V, DictError>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.remove(key).ok_or(DictError::Absent)
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns true if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Iterates over all entries in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.map.iter()
    }

    /// Picks one entry uniformly at random, or `None` when empty.
    pub fn random_key(&self) -> Option<(&K, &V)> {
        if self.map.is_empty() {
            return None;
        }
        self.map.iter().choose(&mut rand::thread_rng())
    }

    /// Picks up to `count` distinct entries at random.
    ///
    /// Returns fewer than `count` entries when the dictionary is smaller,
    /// and an empty vector when it is empty.
    pub fn sample(&self, count: usize) -> Vec<(&K, &V)> {
        if count == 0 || self.map.is_empty() {
            return Vec::new();
        }
        self.map
            .iter()
            .choose_multiple(&mut rand::thread_rng(), count)
    }
}
