//! Biometric-gated passphrase vault.
//!
//! [`PassphraseVault`] creates ED25519 keys whose encryption passphrase is a
//! random secret held only in the OS credential store, and releases that
//! passphrase at signing time.
//!
//! # Generation
//!
//! 1. A 256-bit random passphrase is generated.
//! 2. The key-generation tool writes the encrypted keypair into a private
//!    scratch directory.
//! 3. The passphrase is stored under `account = key_id`, then read back and
//!    compared.  Any failure after the write deletes the stored secret so no
//!    orphan is left behind.
//! 4. The scratch directory is removed on every path.
//!
//! # Release
//!
//! Under [`ReleasePolicy::ExplicitConsent`] a [`ConsentVerifier`] must approve
//! every release; an unavailable verifier fails closed.  Under
//! [`ReleasePolicy::StoreGated`] the credential store performs its own gate
//! and the vault passes straight through.
//!
//! Operations on one key id run one at a time; different key ids are
//! independent.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as B64URL;
use sealkey_core::config::{Config, ReleasePolicy, StoreKind};
use sealkey_core::{Error, Result};
use tempfile::TempDir;
use tokio::sync::{OnceCell, OwnedMutexGuard};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::consent::{Availability, CommandVerifier, ConsentVerifier, DenyVerifier};
use crate::keygen::{KeyGenerator, SshKeygen};
use crate::secret_service::SecretServiceStore;
use crate::store::{CredentialStore, MemoryStore};

const PASSPHRASE_BYTES: usize = 32;
const KEY_FILE_NAME: &str = "id_ed25519";

/// Result of [`PassphraseVault::generate_identity`].
pub struct GeneratedKey {
    /// OpenSSH public key line (`ssh-ed25519 AAAA... comment`).
    pub public_key: String,
    /// OpenSSH private key, encrypted with the stored passphrase.
    pub private_key: Zeroizing<String>,
}

impl std::fmt::Debug for GeneratedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratedKey")
            .field("public_key", &self.public_key)
            .field("private_key", &"[redacted]")
            .finish()
    }
}

/// Structured capability report; never an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupportReport {
    pub supported: bool,
    pub reasons: Vec<String>,
}

/// Capability probes, computed once per vault.
#[derive(Debug, Clone)]
pub struct Capabilities {
    pub store: bool,
    pub keygen: bool,
    /// Only probed under [`ReleasePolicy::ExplicitConsent`].
    pub consent: Option<Availability>,
}

#[derive(Default)]
struct KeyLocks(Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>);

impl KeyLocks {
    async fn acquire(&self, key_id: &str) -> Result<OwnedMutexGuard<()>> {
        let lock = {
            let mut map = self
                .0
                .lock()
                .map_err(|_| Error::Store("key lock table poisoned".to_string()))?;
            // Drop entries nobody holds or waits on.
            map.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(map.entry(key_id.to_string()).or_default())
        };
        Ok(lock.lock_owned().await)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.0.lock().map(|map| map.len()).unwrap_or(0)
    }
}

/// Temporary directory removed on drop, with failures logged.
struct ScratchDir(Option<TempDir>);

impl ScratchDir {
    fn new() -> Result<Self> {
        let dir = tempfile::Builder::new().prefix("sealkey-").tempdir()?;
        Ok(Self(Some(dir)))
    }

    fn path(&self) -> &Path {
        self.0.as_ref().map(TempDir::path).unwrap_or(Path::new(""))
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Some(dir) = self.0.take() {
            let path = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                warn!(path = %path.display(), error = %e, "failed to remove key scratch directory");
            }
        }
    }
}

pub struct PassphraseVault {
    namespace: String,
    policy: ReleasePolicy,
    store: Arc<dyn CredentialStore>,
    keygen: Arc<dyn KeyGenerator>,
    verifier: Arc<dyn ConsentVerifier>,
    capabilities: OnceCell<Capabilities>,
    locks: KeyLocks,
}

impl std::fmt::Debug for PassphraseVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PassphraseVault")
            .field("namespace", &self.namespace)
            .field("policy", &self.policy)
            .field("store", &self.store.kind())
            .finish_non_exhaustive()
    }
}

impl PassphraseVault {
    pub fn new(
        namespace: impl Into<String>,
        policy: ReleasePolicy,
        store: Arc<dyn CredentialStore>,
        keygen: Arc<dyn KeyGenerator>,
        verifier: Arc<dyn ConsentVerifier>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            policy,
            store,
            keygen,
            verifier,
            capabilities: OnceCell::new(),
            locks: KeyLocks::default(),
        }
    }

    /// Build a vault from the `[vault]` and `[consent]` config sections.
    pub fn from_config(config: &Config) -> Self {
        let store: Arc<dyn CredentialStore> = match config.vault.store {
            StoreKind::SecretService => Arc::new(SecretServiceStore::new()),
            StoreKind::Memory => Arc::new(MemoryStore::new()),
        };
        let verifier: Arc<dyn ConsentVerifier> = match CommandVerifier::from_config(&config.consent)
        {
            Some(v) => Arc::new(v),
            None => Arc::new(DenyVerifier),
        };
        Self::new(
            config.vault.namespace.clone(),
            config.vault.release_policy,
            store,
            Arc::new(SshKeygen::new(config.vault.keygen_program.clone())),
            verifier,
        )
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn policy(&self) -> ReleasePolicy {
        self.policy
    }

    /// Probe the store, the key-generation tool and (under explicit consent)
    /// the verifier.  The first call probes; later calls reuse the result.
    pub async fn capabilities(&self) -> &Capabilities {
        self.capabilities
            .get_or_init(|| async {
                let consent = match self.policy {
                    ReleasePolicy::ExplicitConsent => Some(self.verifier.check_available().await),
                    ReleasePolicy::StoreGated => None,
                };
                let caps = Capabilities {
                    store: self.store.is_available().await,
                    keygen: self.keygen.is_available(),
                    consent,
                };
                debug!(?caps, "vault capabilities probed");
                caps
            })
            .await
    }

    pub async fn check_support(&self) -> SupportReport {
        let caps = self.capabilities().await;
        let mut reasons = Vec::new();

        if !caps.store {
            reasons.push(format!("credential store ({}) is not available", self.store.kind()));
        }
        if !caps.keygen {
            reasons.push("key generation tool is not available".to_string());
        }
        match &caps.consent {
            Some(Availability::NotEnrolled) => {
                reasons.push("consent verifier has no enrolled credential".to_string());
            }
            Some(Availability::Unavailable(why)) => {
                reasons.push(format!("consent verifier unavailable: {why}"));
            }
            Some(Availability::Available) | None => {}
        }

        SupportReport {
            supported: reasons.is_empty(),
            reasons,
        }
    }

    pub async fn generate_identity(&self, key_id: &str, label: &str) -> Result<GeneratedKey> {
        validate_key_id(key_id)?;
        let _guard = self.locks.acquire(key_id).await?;

        let caps = self.capabilities().await;
        if !caps.store {
            return Err(Error::CapabilityUnavailable(format!(
                "credential store ({}) is not available",
                self.store.kind()
            )));
        }
        if !caps.keygen {
            return Err(Error::CapabilityUnavailable(
                "key generation tool is not available".to_string(),
            ));
        }

        if self.store.get(&self.namespace, key_id).await?.is_some() {
            return Err(Error::InvalidIdentity(format!(
                "key id {key_id} already has a stored passphrase"
            )));
        }

        let passphrase = random_passphrase();
        let scratch = ScratchDir::new()?;
        let key_path = scratch.path().join(KEY_FILE_NAME);

        self.keygen.generate(&key_path, &passphrase, label).await?;
        let private_key = Zeroizing::new(tokio::fs::read_to_string(&key_path).await?);
        let public_key = tokio::fs::read_to_string(key_path.with_extension("pub"))
            .await?
            .trim()
            .to_string();

        self.store
            .set(&self.namespace, key_id, label, &passphrase)
            .await?;

        if let Err(e) = self.verify_stored(key_id, &passphrase).await {
            self.rollback(key_id).await;
            return Err(e);
        }

        info!(key_id, "generated biometric-gated key");
        Ok(GeneratedKey {
            public_key,
            private_key,
        })
    }

    async fn verify_stored(&self, key_id: &str, expected: &str) -> Result<()> {
        match self.store.get(&self.namespace, key_id).await? {
            Some(stored) if stored.as_str() == expected => Ok(()),
            _ => Err(Error::SecretIntegrity(key_id.to_string())),
        }
    }

    async fn rollback(&self, key_id: &str) {
        match self.store.delete(&self.namespace, key_id).await {
            Ok(_) => debug!(key_id, "rolled back stored passphrase"),
            Err(e) => warn!(key_id, error = %e, "failed to roll back stored passphrase"),
        }
    }

    /// Release the passphrase for `key_id` after the configured gate.
    pub async fn release_passphrase(&self, key_id: &str, reason: &str) -> Result<Zeroizing<String>> {
        let _guard = self.locks.acquire(key_id).await?;

        if self.policy == ReleasePolicy::ExplicitConsent {
            let availability = self
                .capabilities()
                .await
                .consent
                .clone()
                .unwrap_or_else(|| Availability::Unavailable("not probed".to_string()));
            if !availability.is_available() {
                warn!(key_id, ?availability, "consent verifier unavailable, refusing release");
                return Err(Error::CapabilityUnavailable(format!(
                    "consent verifier unavailable: {availability:?}"
                )));
            }
            if !self.verifier.request_verification(reason).await? {
                return Err(Error::VerificationFailed(format!(
                    "user did not approve release for {key_id}"
                )));
            }
        }

        self.store
            .get(&self.namespace, key_id)
            .await?
            .ok_or_else(|| Error::SecretNotFound(key_id.to_string()))
    }

    pub async fn delete_identity(&self, key_id: &str) -> Result<bool> {
        let _guard = self.locks.acquire(key_id).await?;
        let removed = self.store.delete(&self.namespace, key_id).await?;
        debug!(key_id, removed, "delete identity");
        Ok(removed)
    }

    pub async fn list_identities(&self) -> Result<Vec<String>> {
        self.store.list(&self.namespace).await
    }
}

fn validate_key_id(key_id: &str) -> Result<()> {
    if key_id.is_empty() || key_id.chars().any(char::is_control) {
        return Err(Error::InvalidIdentity(format!("invalid key id {key_id:?}")));
    }
    Ok(())
}

fn random_passphrase() -> Zeroizing<String> {
    use rand::RngCore;

    let mut bytes = Zeroizing::new([0u8; PASSPHRASE_BYTES]);
    rand::rng().fill_bytes(&mut bytes[..]);
    Zeroizing::new(B64URL.encode(&bytes[..]))
}
