//! Credential store seam.
//!
//! The vault owns one namespace in the store and uses the key id as the
//! account name.  Every access is an exact single-account lookup or write;
//! nothing is cached in-process so revocation in the store takes effect on
//! the next read.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use sealkey_core::{Error, Result};
use zeroize::Zeroizing;

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Short name used in logs and capability reports.
    fn kind(&self) -> &'static str;

    /// Probe whether the store can be reached at all.
    async fn is_available(&self) -> bool;

    async fn set(&self, namespace: &str, account: &str, label: &str, secret: &str) -> Result<()>;

    async fn get(&self, namespace: &str, account: &str) -> Result<Option<Zeroizing<String>>>;

    /// Returns `true` if an entry was removed.
    async fn delete(&self, namespace: &str, account: &str) -> Result<bool>;

    async fn list(&self, namespace: &str) -> Result<Vec<String>>;
}

/// In-process store.  Used for tests and for headless setups that accept
/// losing generated passphrases on exit.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<(String, String), Zeroizing<String>>>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.entries.lock().map(|e| e.len()).unwrap_or(0);
        f.debug_struct("MemoryStore")
            .field("entries", &count)
            .finish()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, BTreeMap<(String, String), Zeroizing<String>>>> {
        self.entries
            .lock()
            .map_err(|_| Error::Store("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn set(&self, namespace: &str, account: &str, _label: &str, secret: &str) -> Result<()> {
        self.entries()?.insert(
            (namespace.to_string(), account.to_string()),
            Zeroizing::new(secret.to_string()),
        );
        Ok(())
    }

    async fn get(&self, namespace: &str, account: &str) -> Result<Option<Zeroizing<String>>> {
        Ok(self
            .entries()?
            .get(&(namespace.to_string(), account.to_string()))
            .cloned())
    }

    async fn delete(&self, namespace: &str, account: &str) -> Result<bool> {
        Ok(self
            .entries()?
            .remove(&(namespace.to_string(), account.to_string()))
            .is_some())
    }

    async fn list(&self, namespace: &str) -> Result<Vec<String>> {
        Ok(self
            .entries()?
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, account)| account.clone())
            .collect())
    }
}
