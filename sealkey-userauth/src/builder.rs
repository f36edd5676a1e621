//! Publickey request builders.
//!
//! [`PublicKeyRequestBuilder`] is the point where a host SSH library turns an
//! identity into a userauth packet.  Stock builders write the two-field
//! signature `string(alg) || string(blob)`, which is wrong for security-key
//! signatures.  [`SecurityKeyRequestBuilder`] wraps such a builder, takes
//! over the two security-key algorithms and hands every other algorithm to
//! the wrapped builder unchanged.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use sealkey_authority::SignatureAuthority;
use sealkey_core::identity::CERT_SUFFIX;
use sealkey_core::wire::is_security_key_algorithm;
use sealkey_core::{Error, Result, SignatureWireBlob};
use tracing::debug;

use crate::message::{PublicKeyRequest, security_key_signature_field, standard_signature_field};

#[async_trait]
pub trait PublicKeyRequestBuilder: Send + Sync {
    /// Sign and encode a complete `SSH_MSG_USERAUTH_REQUEST` payload.
    ///
    /// Nothing is written anywhere on failure; the caller owns sending.
    async fn build(
        &self,
        session_id: &[u8],
        username: &str,
        authority: &dyn SignatureAuthority,
    ) -> Result<Vec<u8>>;
}

async fn sign_request(
    session_id: &[u8],
    username: &str,
    authority: &dyn SignatureAuthority,
) -> Result<(SignatureWireBlob, Vec<u8>)> {
    let record = authority.public_identity();
    let request = PublicKeyRequest {
        username,
        algorithm: &record.algorithm,
        public_key_blob: &record.blob,
    };
    let data = request.signed_data(session_id)?;
    let signature = authority.sign(&data).await?;

    // Certificates advertise `<base>-cert-v01@openssh.com` but sign as `<base>`.
    let expected = record
        .algorithm
        .strip_suffix(CERT_SUFFIX)
        .unwrap_or(&record.algorithm);
    if signature.algorithm() != expected {
        return Err(Error::MalformedSignature(format!(
            "signature algorithm {} does not match advertised {}",
            signature.algorithm(),
            record.algorithm
        )));
    }
    Ok((signature, request.packet_prefix()?))
}

/// Two-field builder for ordinary signatures.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultRequestBuilder;

#[async_trait]
impl PublicKeyRequestBuilder for DefaultRequestBuilder {
    async fn build(
        &self,
        session_id: &[u8],
        username: &str,
        authority: &dyn SignatureAuthority,
    ) -> Result<Vec<u8>> {
        let (signature, prefix) = sign_request(session_id, username, authority).await?;
        match signature {
            SignatureWireBlob::Standard { algorithm, blob } => {
                finish(prefix, &standard_signature_field(&algorithm, &blob)?)
            }
            SignatureWireBlob::SecurityKey { algorithm, .. } => Err(Error::Unsupported(format!(
                "{algorithm} signatures need the security key request builder"
            ))),
        }
    }
}

/// Decorator owning `sk-ecdsa-sha2-nistp256@openssh.com` and its WebAuthn
/// variant.
pub struct SecurityKeyRequestBuilder {
    inner: Arc<dyn PublicKeyRequestBuilder>,
}

impl SecurityKeyRequestBuilder {
    pub fn new(inner: Arc<dyn PublicKeyRequestBuilder>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl PublicKeyRequestBuilder for SecurityKeyRequestBuilder {
    async fn build(
        &self,
        session_id: &[u8],
        username: &str,
        authority: &dyn SignatureAuthority,
    ) -> Result<Vec<u8>> {
        let algorithm = &authority.public_identity().algorithm;
        if !is_security_key_algorithm(algorithm) {
            return self.inner.build(session_id, username, authority).await;
        }

        debug!(algorithm, "building security key userauth request");
        let (signature, prefix) = sign_request(session_id, username, authority).await?;
        let field = match &signature {
            SignatureWireBlob::SecurityKey { algorithm, tail } => {
                security_key_signature_field(algorithm, tail)?
            }
            SignatureWireBlob::Standard { algorithm, blob } => {
                standard_signature_field(algorithm, blob)?
            }
        };
        finish(prefix, &field)
    }
}

fn finish(mut prefix: Vec<u8>, signature_field: &[u8]) -> Result<Vec<u8>> {
    sealkey_core::wire::put_string(&mut prefix, signature_field)?;
    Ok(prefix)
}

static INSTALLED: OnceLock<Arc<dyn PublicKeyRequestBuilder>> = OnceLock::new();

/// Wrap `inner` with [`SecurityKeyRequestBuilder`] once per process.
///
/// Later calls ignore their argument and return the builder installed first.
pub fn install(inner: Arc<dyn PublicKeyRequestBuilder>) -> Arc<dyn PublicKeyRequestBuilder> {
    Arc::clone(INSTALLED.get_or_init(|| {
        debug!("installing security key request builder");
        Arc::new(SecurityKeyRequestBuilder::new(inner))
    }))
}
