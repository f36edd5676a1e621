//! Shared types for sealkey: identities, the security-key signature wire
//! format, configuration and the common error type.

pub mod config;
pub mod der;
pub mod error;
pub mod identity;
pub mod wire;

pub use error::{Error, Result};
pub use identity::{
    CertificateIdentity, Identity, PublicKeyRecord, SecurityKeyIdentity, UserVerification,
    VaultKeyIdentity,
};
pub use wire::{Assertion, SignatureWireBlob};
