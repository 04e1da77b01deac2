use std::collections::HashMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum KeyStatus {
    Loaded([u8; 16]),
    /// The key could not be fetched and won't be requested again.
    Failed,
}

/// Decryption keys already fetched, by key URI.
#[derive(Debug, Default)]
pub(super) struct KeyCache {
    keys: HashMap<String, KeyStatus>,
}

impl KeyCache {
    pub(super) fn get(&self, uri: &str) -> Option<[u8; 16]> {
        match self.keys.get(uri) {
            Some(KeyStatus::Loaded(key)) => Some(*key),
            _ => None,
        }
    }

    pub(super) fn has_failed(&self, uri: &str) -> bool {
        self.keys.get(uri) == Some(&KeyStatus::Failed)
    }

    pub(super) fn insert(&mut self, uri: &str, key: [u8; 16]) {
        self.keys.insert(uri.to_owned(), KeyStatus::Loaded(key));
    }

    pub(super) fn mark_failed(&mut self, uri: &str) {
        self.keys.insert(uri.to_owned(), KeyStatus::Failed);
    }
}
