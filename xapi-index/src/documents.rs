//! Process-wide `documents: key -> (term_id, Data)` map:
//! the optimistic-concurrency guard consulted before a prepared document
//! is applied to the index.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use xapi_data::Data;

/// `(db_path, term_id)` — the key the source derives from the user id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentKey {
    pub db_path: String,
    pub term_id: String,
}

impl DocumentKey {
    pub fn new(db_path: impl Into<String>, term_id: impl Into<String>) -> Self {
        DocumentKey { db_path: db_path.into(), term_id: term_id.into() }
    }
}

pub enum SetOutcome {
    Accepted,
    Rejected(Arc<Data>),
}

/// Guards the map behind a single mutex (`documents_mtx` in the source);
/// entries are reference-counted immutable [`Data`] snapshots so readers
/// never block writers preparing a different document.
#[derive(Default)]
pub struct DocumentsChangeSeq {
    map: Mutex<HashMap<DocumentKey, Arc<Data>>>,
}

impl DocumentsChangeSeq {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically materialises the current snapshot for `key`, inserting
    /// the result of `load` if no entry exists yet. The returned snapshot
    /// is the one "the metadata was read" at, the visible
    /// invariant.
    pub fn get(&self, key: &DocumentKey, load: impl FnOnce() -> Data) -> Arc<Data> {
        let mut map = self.map.lock();
        map.entry(key.clone()).or_insert_with(|| Arc::new(load())).clone()
    }

    /// Accepts `new` iff the stored snapshot equals `expected` by [`Data`]
    /// content equality, or no entry exists yet. On acceptance, `new`
    /// becomes the stored snapshot. On rejection, the caller's retry
    /// should restart preparation from the returned (current) snapshot —
    /// scripted fields may legitimately observe the old document in the
    /// interim.
    pub fn set(&self, key: &DocumentKey, new: Data, expected: &Arc<Data>) -> SetOutcome {
        let mut map = self.map.lock();
        match map.get(key) {
            Some(current) if **current == *expected.as_ref() => {
                map.insert(key.clone(), Arc::new(new));
                SetOutcome::Accepted
            }
            None => {
                map.insert(key.clone(), Arc::new(new));
                SetOutcome::Accepted
            }
            Some(current) => SetOutcome::Rejected(current.clone()),
        }
    }

    pub fn remove(&self, key: &DocumentKey) {
        self.map.lock().remove(key);
    }

    pub fn len(&self) -> usize {
        self.map.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_materialises_once() {
        let docs = DocumentsChangeSeq::new();
        let key = DocumentKey::new("idx", "Qa");
        let mut calls = 0;
        let a = docs.get(&key, || {
            calls += 1;
            Data::new()
        });
        let b = docs.get(&key, || {
            calls += 1;
            Data::new()
        });
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(calls, 1);
    }

    #[test]
    fn set_accepts_matching_expected_and_rejects_stale() {
        let docs = DocumentsChangeSeq::new();
        let key = DocumentKey::new("idx", "Qa");
        let initial = docs.get(&key, Data::new);

        let mut updated = Data::new();
        updated.version = vec![1];
        assert!(matches!(docs.set(&key, updated.clone(), &initial), SetOutcome::Accepted));

        // Second writer still holds the stale `initial` snapshot.
        let mut other = Data::new();
        other.version = vec![2];
        match docs.set(&key, other, &initial) {
            SetOutcome::Rejected(current) => assert_eq!(*current, updated),
            SetOutcome::Accepted => panic!("stale CAS must be rejected"),
        }
    }
}
