//! Types shared by the resolver and the on-disk cache

use opconfig_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use zeroize::Zeroize;

/// Secret values keyed by secret reference.
///
/// Serialized as a flat JSON object; this is the plaintext that gets
/// encrypted into the cache file.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretPathCache {
    entries: BTreeMap<String, String>,
}

impl SecretPathCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.entries.get(path).map(String::as_str)
    }

    pub fn insert(&mut self, path: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(path.into(), value.into());
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    /// Merge another cache in; entries already present are kept
    pub fn merge(&mut self, other: SecretPathCache) {
        for (path, value) in other.into_entries() {
            self.entries.entry(path).or_insert(value);
        }
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parse the decrypted cache payload
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::cache_corrupt(format!("cache payload is not a path map: {}", e)))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| Error::Crypto(format!("failed to serialize path cache: {}", e)))
    }

    fn into_entries(mut self) -> BTreeMap<String, String> {
        std::mem::take(&mut self.entries)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for SecretPathCache {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl fmt::Debug for SecretPathCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretPathCache")
            .field("paths", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Drop for SecretPathCache {
    fn drop(&mut self) {
        for value in self.entries.values_mut() {
            value.zeroize();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_is_flat_object() {
        let cache: SecretPathCache =
            [("op://v/b", "2"), ("op://v/a", "1")].into_iter().collect();
        assert_eq!(cache.to_json().unwrap(), r#"{"op://v/a":"1","op://v/b":"2"}"#);

        let parsed = SecretPathCache::from_json(r#"{"op://v/a":"1"}"#).unwrap();
        assert_eq!(parsed.get("op://v/a"), Some("1"));
    }

    #[test]
    fn test_non_map_payload_is_corrupt() {
        assert!(matches!(
            SecretPathCache::from_json("[1, 2]"),
            Err(Error::CacheCorrupt(_))
        ));
        assert!(matches!(
            SecretPathCache::from_json(r#"{"op://v/a": 1}"#),
            Err(Error::CacheCorrupt(_))
        ));
    }

    #[test]
    fn test_merge_keeps_existing() {
        let mut cache: SecretPathCache = [("op://v/a", "live")].into_iter().collect();
        cache.merge([("op://v/a", "stale"), ("op://v/b", "new")].into_iter().collect());

        assert_eq!(cache.get("op://v/a"), Some("live"));
        assert_eq!(cache.get("op://v/b"), Some("new"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_debug_hides_values() {
        let cache: SecretPathCache = [("op://v/a", "hunter2")].into_iter().collect();
        let printed = format!("{:?}", cache);
        assert!(printed.contains("op://v/a"));
        assert!(!printed.contains("hunter2"));
    }
}
