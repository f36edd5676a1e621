//! Certificate-bearing keys signed in-process.

use async_trait::async_trait;
use sealkey_core::{CertificateIdentity, Error, PublicKeyRecord, Result, SignatureWireBlob};
use signature::Signer;
use ssh_key::PrivateKey;
use tracing::debug;

use crate::SignatureAuthority;

pub struct CertificateAuthority {
    identity: CertificateIdentity,
    record: PublicKeyRecord,
}

impl CertificateAuthority {
    pub fn new(identity: CertificateIdentity) -> Self {
        let record = PublicKeyRecord {
            algorithm: identity.certificate_algorithm().to_string(),
            blob: identity.certificate_blob().to_vec(),
            comment: identity.comment().to_string(),
        };
        Self { identity, record }
    }

    fn unlocked_key(&self) -> Result<PrivateKey> {
        let key = PrivateKey::from_openssh(self.identity.private_key_material())?;
        if !key.is_encrypted() {
            return Ok(key);
        }
        let passphrase = self.identity.passphrase().ok_or_else(|| {
            Error::InvalidIdentity("private key is encrypted but no passphrase is set".to_string())
        })?;
        Ok(key.decrypt(passphrase)?)
    }
}

impl std::fmt::Debug for CertificateAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateAuthority")
            .field("algorithm", &self.record.algorithm)
            .field("comment", &self.record.comment)
            .finish()
    }
}

#[async_trait]
impl SignatureAuthority for CertificateAuthority {
    fn public_identity(&self) -> &PublicKeyRecord {
        &self.record
    }

    async fn sign(&self, data: &[u8]) -> Result<SignatureWireBlob> {
        let key = self.unlocked_key()?;
        sign_standard(&key, self.identity.base_algorithm(), data)
    }
}

/// Sign `data` and package it as an ordinary SSH signature for `algorithm`.
///
/// ECDSA and DSA signatures come back from `ssh-key` already in the SSH
/// `mpint` pair encoding.  A key that signs under a different name than the
/// one advertised is rejected.
pub(crate) fn sign_standard(
    key: &PrivateKey,
    algorithm: &str,
    data: &[u8],
) -> Result<SignatureWireBlob> {
    let signature: ssh_key::Signature = key
        .try_sign(data)
        .map_err(|e| Error::Unsupported(format!("signing with {algorithm} failed: {e}")))?;

    let produced = signature.algorithm();
    if produced.as_str() != algorithm {
        return Err(Error::Unsupported(format!(
            "key signs as {produced}, but {algorithm} was advertised"
        )));
    }

    debug!(algorithm, len = signature.as_bytes().len(), "signed");
    Ok(SignatureWireBlob::Standard {
        algorithm: algorithm.to_string(),
        blob: signature.as_bytes().to_vec(),
    })
}
