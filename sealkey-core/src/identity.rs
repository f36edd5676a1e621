//! Signing identities and the public record advertised for them.

use serde::{Deserialize, Serialize};
use ssh_encoding::Decode;
use ssh_key::{Algorithm, Certificate, HashAlg, PrivateKey};
use zeroize::Zeroizing;

use crate::config::SecurityKeyConfig;
use crate::error::{Error, Result};
use crate::wire::{SK_ECDSA_P256, WEBAUTHN_SK_ECDSA_P256};

/// Suffix OpenSSH appends to a key algorithm to name its certificate type.
pub const CERT_SUFFIX: &str = "-cert-v01@openssh.com";

/// WebAuthn user-verification requirement passed to the authenticator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserVerification {
    Required,
    #[default]
    Preferred,
    Discouraged,
}

impl UserVerification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Required => "required",
            Self::Preferred => "preferred",
            Self::Discouraged => "discouraged",
        }
    }
}

/// What a signing identity advertises to the peer.
///
/// The algorithm tag and the key blob are carried separately because they do
/// not always agree: a WebAuthn security key is offered under the extended
/// `webauthn-sk-*` name while its blob keeps the base `sk-*` type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKeyRecord {
    pub algorithm: String,
    pub blob: Vec<u8>,
    pub comment: String,
}

/// A certificate-bearing key.
#[derive(Clone)]
pub struct CertificateIdentity {
    certificate_blob: Vec<u8>,
    certificate_algorithm: String,
    private_key_material: Zeroizing<String>,
    passphrase: Option<Zeroizing<String>>,
    comment: String,
}

impl std::fmt::Debug for CertificateIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateIdentity")
            .field("certificate_algorithm", &self.certificate_algorithm)
            .field("comment", &self.comment)
            .field("private_key_material", &"[redacted]")
            .field("passphrase", &self.passphrase.as_ref().map(|_| "[redacted]"))
            .finish()
    }
}

impl CertificateIdentity {
    /// Validate and build a certificate identity.
    ///
    /// The certificate must parse, its key type must match
    /// `certificate_algorithm` minus the certificate suffix, and the private
    /// key (which may still be encrypted) must belong to the certified key.
    pub fn new(
        certificate_blob: Vec<u8>,
        certificate_algorithm: impl Into<String>,
        private_key_material: Zeroizing<String>,
        passphrase: Option<Zeroizing<String>>,
        comment: impl Into<String>,
    ) -> Result<Self> {
        let certificate_algorithm = certificate_algorithm.into();
        let certificate = Certificate::from_bytes(&certificate_blob)?;

        let base = base_algorithm_name(&certificate_algorithm)?;
        let advertised = Algorithm::new(base)?;
        signable(&advertised)?;
        if !same_key_type(&advertised, &certificate.algorithm()) {
            return Err(Error::InvalidIdentity(format!(
                "certificate key type {} does not match algorithm {certificate_algorithm}",
                certificate.algorithm()
            )));
        }

        let private_key = PrivateKey::from_openssh(private_key_material.as_bytes())?;
        if private_key.public_key().key_data() != certificate.public_key() {
            return Err(Error::InvalidIdentity(
                "private key does not match certificate".to_string(),
            ));
        }

        Ok(Self {
            certificate_blob,
            certificate_algorithm,
            private_key_material,
            passphrase,
            comment: comment.into(),
        })
    }

    pub fn certificate_blob(&self) -> &[u8] {
        &self.certificate_blob
    }

    pub fn certificate_algorithm(&self) -> &str {
        &self.certificate_algorithm
    }

    /// The signature algorithm: the certificate algorithm without its suffix.
    pub fn base_algorithm(&self) -> &str {
        self.certificate_algorithm
            .strip_suffix(CERT_SUFFIX)
            .unwrap_or(&self.certificate_algorithm)
    }

    pub fn private_key_material(&self) -> &str {
        &self.private_key_material
    }

    pub fn passphrase(&self) -> Option<&str> {
        self.passphrase.as_deref().map(String::as_str)
    }

    pub fn comment(&self) -> &str {
        &self.comment
    }
}

fn base_algorithm_name(certificate_algorithm: &str) -> Result<&str> {
    certificate_algorithm.strip_suffix(CERT_SUFFIX).ok_or_else(|| {
        Error::InvalidIdentity(format!(
            "{certificate_algorithm} is not a certificate algorithm"
        ))
    })
}

/// RSA keys only sign as `rsa-sha2-512` here, so the other RSA names would
/// fail on every signature.
fn signable(advertised: &Algorithm) -> Result<()> {
    match advertised {
        Algorithm::Rsa { hash } if *hash != Some(HashAlg::Sha512) => Err(Error::Unsupported(
            format!("{} certificates are not supported, use rsa-sha2-512", advertised.as_str()),
        )),
        _ => Ok(()),
    }
}

/// RSA certificates carry `ssh-rsa` keys but are offered under any of the
/// `rsa-sha2-*` names; every other type must match exactly.
fn same_key_type(advertised: &Algorithm, certified: &Algorithm) -> bool {
    match (advertised, certified) {
        (Algorithm::Rsa { .. }, Algorithm::Rsa { .. }) => true,
        _ => advertised == certified,
    }
}

/// A FIDO2 / WebAuthn credential whose private key never leaves the
/// authenticator.
#[derive(Debug, Clone)]
pub struct SecurityKeyIdentity {
    public_key_blob: Vec<u8>,
    credential_id: Vec<u8>,
    relying_party_id: String,
    user_verification: UserVerification,
    comment: String,
}

impl SecurityKeyIdentity {
    /// Build a security-key identity.
    ///
    /// `public_key_blob` must be an `sk-ecdsa-sha2-nistp256@openssh.com` key
    /// blob: servers match authorized keys on these bytes, so the encoded type
    /// must stay the base name even though signing is advertised under
    /// [`WEBAUTHN_SK_ECDSA_P256`].
    pub fn new(
        public_key_blob: Vec<u8>,
        credential_id: Vec<u8>,
        relying_party_id: impl Into<String>,
        user_verification: UserVerification,
        comment: impl Into<String>,
    ) -> Result<Self> {
        let key_type = encoded_key_type(&public_key_blob)?;
        if key_type != SK_ECDSA_P256 {
            return Err(Error::InvalidIdentity(format!(
                "security key blob has type {key_type}, expected {SK_ECDSA_P256}"
            )));
        }
        if credential_id.is_empty() {
            return Err(Error::InvalidIdentity("empty credential id".to_string()));
        }

        Ok(Self {
            public_key_blob,
            credential_id,
            relying_party_id: relying_party_id.into(),
            user_verification,
            comment: comment.into(),
        })
    }

    /// [`SecurityKeyIdentity::new`] with the user-verification requirement
    /// taken from configuration.
    pub fn from_config(
        public_key_blob: Vec<u8>,
        credential_id: Vec<u8>,
        relying_party_id: impl Into<String>,
        comment: impl Into<String>,
        config: &SecurityKeyConfig,
    ) -> Result<Self> {
        Self::new(
            public_key_blob,
            credential_id,
            relying_party_id,
            config.user_verification,
            comment,
        )
    }

    pub fn public_key_blob(&self) -> &[u8] {
        &self.public_key_blob
    }

    pub fn credential_id(&self) -> &[u8] {
        &self.credential_id
    }

    pub fn relying_party_id(&self) -> &str {
        &self.relying_party_id
    }

    pub fn user_verification(&self) -> UserVerification {
        self.user_verification
    }

    pub fn comment(&self) -> &str {
        &self.comment
    }

    pub fn advertised_algorithm(&self) -> &'static str {
        WEBAUTHN_SK_ECDSA_P256
    }
}

/// A vault-generated key whose passphrase lives in the credential store.
#[derive(Clone)]
pub struct VaultKeyIdentity {
    pub key_id: String,
    pub private_key_material: Zeroizing<String>,
    pub comment: String,
}

impl std::fmt::Debug for VaultKeyIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultKeyIdentity")
            .field("key_id", &self.key_id)
            .field("comment", &self.comment)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub enum Identity {
    Certificate(CertificateIdentity),
    SecurityKey(SecurityKeyIdentity),
    VaultKey(VaultKeyIdentity),
}

/// The leading `string` of an SSH public key blob.
pub fn encoded_key_type(blob: &[u8]) -> Result<String> {
    let mut reader = blob;
    Ok(String::decode(&mut reader)?)
}
