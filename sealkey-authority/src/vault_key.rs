//! Vault-generated keys: the passphrase is released for every signature.

use std::sync::Arc;

use async_trait::async_trait;
use sealkey_core::{Error, PublicKeyRecord, Result, SignatureWireBlob, VaultKeyIdentity};
use sealkey_vault::PassphraseVault;
use ssh_key::PrivateKey;

use crate::SignatureAuthority;
use crate::certificate::sign_standard;

pub struct VaultKeyAuthority {
    identity: VaultKeyIdentity,
    vault: Arc<PassphraseVault>,
    record: PublicKeyRecord,
}

impl VaultKeyAuthority {
    /// The public half is read from the encrypted key file, so building the
    /// authority never touches the vault.
    pub fn new(identity: VaultKeyIdentity, vault: Arc<PassphraseVault>) -> Result<Self> {
        let key = PrivateKey::from_openssh(identity.private_key_material.as_bytes())?;
        let record = PublicKeyRecord {
            algorithm: key.algorithm().as_str().to_string(),
            blob: key.public_key().to_bytes()?,
            comment: identity.comment.clone(),
        };
        Ok(Self {
            identity,
            vault,
            record,
        })
    }
}

impl std::fmt::Debug for VaultKeyAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultKeyAuthority")
            .field("key_id", &self.identity.key_id)
            .field("algorithm", &self.record.algorithm)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SignatureAuthority for VaultKeyAuthority {
    fn public_identity(&self) -> &PublicKeyRecord {
        &self.record
    }

    async fn sign(&self, data: &[u8]) -> Result<SignatureWireBlob> {
        let reason = if self.identity.comment.is_empty() {
            format!("Use SSH key {}", self.identity.key_id)
        } else {
            format!("Use SSH key {} ({})", self.identity.key_id, self.identity.comment)
        };
        let passphrase = self
            .vault
            .release_passphrase(&self.identity.key_id, &reason)
            .await?;

        let key = PrivateKey::from_openssh(self.identity.private_key_material.as_bytes())?;
        let key = if key.is_encrypted() {
            key.decrypt(passphrase.as_bytes()).map_err(|e| {
                Error::SecretIntegrity(format!(
                    "stored passphrase does not open key {}: {e}",
                    self.identity.key_id
                ))
            })?
        } else {
            key
        };
        sign_standard(&key, &self.record.algorithm, data)
    }
}
