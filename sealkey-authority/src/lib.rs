//! Signature authorities: one per signing identity.
//!
//! An authority answers two questions for the authentication packet builder:
//! what public key to advertise, and how to sign the session data.  The
//! three identity kinds differ only in where the private operation happens.

pub mod bridge;
pub mod certificate;
pub mod security_key;
pub mod vault_key;

use std::sync::Arc;

use async_trait::async_trait;
use sealkey_core::{Error, Identity, PublicKeyRecord, Result, SignatureWireBlob};
use sealkey_vault::PassphraseVault;

pub use bridge::{AssertionRequest, AssertionResponse, AuthenticatorBridge, ChannelBridge, PendingAssertion};
pub use certificate::CertificateAuthority;
pub use security_key::SecurityKeyAuthority;
pub use vault_key::VaultKeyAuthority;

#[async_trait]
pub trait SignatureAuthority: Send + Sync {
    /// Algorithm, key blob and comment to offer the server.
    fn public_identity(&self) -> &PublicKeyRecord;

    /// Sign the publickey userauth `data`.
    async fn sign(&self, data: &[u8]) -> Result<SignatureWireBlob>;
}

/// Collaborators an identity may need in order to sign.
#[derive(Clone, Default)]
pub struct Signers {
    pub bridge: Option<Arc<dyn AuthenticatorBridge>>,
    pub vault: Option<Arc<PassphraseVault>>,
}

impl Signers {
    /// Build the authority for `identity`.
    pub fn authority_for(&self, identity: Identity) -> Result<Box<dyn SignatureAuthority>> {
        Ok(match identity {
            Identity::Certificate(id) => Box::new(CertificateAuthority::new(id)),
            Identity::SecurityKey(id) => {
                let bridge = self.bridge.clone().ok_or_else(|| {
                    Error::CapabilityUnavailable("no authenticator bridge configured".to_string())
                })?;
                Box::new(SecurityKeyAuthority::new(id, bridge))
            }
            Identity::VaultKey(id) => {
                let vault = self.vault.clone().ok_or_else(|| {
                    Error::CapabilityUnavailable("no passphrase vault configured".to_string())
                })?;
                Box::new(VaultKeyAuthority::new(id, vault)?)
            }
        })
    }
}
