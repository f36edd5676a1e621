//! SSH wire encoding of security-key signatures.
//!
//! A WebAuthn assertion carries an ASN.1 DER ECDSA signature plus the raw
//! authenticator data.  OpenSSH expects the signature as two `mpint`s wrapped
//! in a `string`, followed by the authenticator flags and counter, and (for
//! the `webauthn-sk-*` variant) the origin, client data and extensions.
//!
//! ```text
//! sk-ecdsa-sha2-nistp256@openssh.com:
//!     string(mpint(r) || mpint(s)) || byte flags || uint32 counter
//!
//! webauthn-sk-ecdsa-sha2-nistp256@openssh.com:
//!     string(mpint(r) || mpint(s)) || byte flags || uint32 counter
//!     || string origin || string clientDataJSON || string extensions
//! ```

use ssh_encoding::{Decode, Encode, Reader};

use crate::der;
use crate::error::{Error, Result};

/// Algorithm name encoded inside security-key public key blobs.
pub const SK_ECDSA_P256: &str = "sk-ecdsa-sha2-nistp256@openssh.com";

/// Algorithm name advertised for signing with WebAuthn-driven security keys.
pub const WEBAUTHN_SK_ECDSA_P256: &str = "webauthn-sk-ecdsa-sha2-nistp256@openssh.com";

/// rpIdHash (32) + flags (1) + signCount (4).
pub const MIN_AUTHENTICATOR_DATA_LEN: usize = 37;

/// Authenticator data flag: extension data follows the counter.
pub const FLAG_EXTENSION_DATA: u8 = 0x80;

/// Upper bound on any single length-prefixed field we emit.
pub const MAX_FIELD_LEN: usize = 256 * 1024;

/// Returns true for the two algorithm names whose signatures carry the
/// security-key tail instead of a single opaque blob.
pub fn is_security_key_algorithm(name: &str) -> bool {
    name == SK_ECDSA_P256 || name == WEBAUTHN_SK_ECDSA_P256
}

/// Append an SSH `string` (uint32 length + bytes).
pub fn put_string(buf: &mut Vec<u8>, bytes: &[u8]) -> Result<()> {
    if bytes.len() > MAX_FIELD_LEN {
        return Err(Error::MalformedSignature(format!(
            "field of {} bytes exceeds limit of {MAX_FIELD_LEN}",
            bytes.len()
        )));
    }
    bytes.encode(buf)?;
    Ok(())
}

/// Append an unsigned big-endian integer as an SSH `mpint`.
///
/// Leading zero bytes are stripped; if the remaining high bit is set a single
/// `0x00` is prepended so the value reads as non-negative.
pub fn put_mpint(buf: &mut Vec<u8>, magnitude: &[u8]) -> Result<()> {
    let first_nonzero = magnitude
        .iter()
        .position(|b| *b != 0)
        .unwrap_or(magnitude.len());
    let trimmed = &magnitude[first_nonzero..];

    let mut value = Vec::with_capacity(trimmed.len() + 1);
    if trimmed.first().is_some_and(|b| b & 0x80 != 0) {
        value.push(0x00);
    }
    value.extend_from_slice(trimmed);
    put_string(buf, &value)
}

/// Read an SSH `mpint` and return its unsigned magnitude without padding.
///
/// Negative values never occur in signatures and are rejected.
pub fn read_mpint(reader: &mut impl Reader) -> Result<Vec<u8>> {
    let raw = Vec::<u8>::decode(reader)?;
    if raw.first().is_some_and(|b| b & 0x80 != 0) {
        return Err(Error::MalformedSignature("negative mpint".to_string()));
    }
    let first_nonzero = raw.iter().position(|b| *b != 0).unwrap_or(raw.len());
    Ok(raw[first_nonzero..].to_vec())
}

/// `string(mpint(r) || mpint(s))` from a DER-encoded ECDSA signature.
pub fn ecdsa_signature_string(signature_der: &[u8]) -> Result<Vec<u8>> {
    let sig = der::parse_ecdsa_signature(signature_der)?;

    let mut mpints = Vec::with_capacity(sig.r.len() + sig.s.len() + 10);
    put_mpint(&mut mpints, &sig.r)?;
    put_mpint(&mut mpints, &sig.s)?;

    let mut out = Vec::with_capacity(mpints.len() + 4);
    put_string(&mut out, &mpints)?;
    Ok(out)
}

/// A decoded WebAuthn assertion.
#[derive(Clone, PartialEq, Eq)]
pub struct Assertion {
    pub authenticator_data: Vec<u8>,
    pub client_data_json: Vec<u8>,
    pub signature_der: Vec<u8>,
    pub origin: String,
}

impl std::fmt::Debug for Assertion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Assertion")
            .field("authenticator_data_len", &self.authenticator_data.len())
            .field("client_data_json_len", &self.client_data_json.len())
            .field("signature_der_len", &self.signature_der.len())
            .field("origin", &self.origin)
            .finish()
    }
}

impl Assertion {
    /// Reject authenticator data too short to hold flags and counter.
    pub fn validate(&self) -> Result<()> {
        if self.authenticator_data.len() < MIN_AUTHENTICATOR_DATA_LEN {
            return Err(Error::MalformedSignature(format!(
                "authenticator data is {} bytes, need at least {MIN_AUTHENTICATOR_DATA_LEN}",
                self.authenticator_data.len()
            )));
        }
        Ok(())
    }

    pub fn flags(&self) -> Result<u8> {
        self.validate()?;
        Ok(self.authenticator_data[32])
    }

    pub fn counter(&self) -> Result<u32> {
        self.validate()?;
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&self.authenticator_data[33..37]);
        Ok(u32::from_be_bytes(bytes))
    }

    /// Extension bytes, only when the extension-data flag is set.
    pub fn extensions(&self) -> Result<&[u8]> {
        if self.flags()? & FLAG_EXTENSION_DATA != 0 {
            Ok(&self.authenticator_data[MIN_AUTHENTICATOR_DATA_LEN..])
        } else {
            Ok(&[])
        }
    }
}

/// Signature tail for `sk-ecdsa-sha2-nistp256@openssh.com`.
///
/// Security keys driven through WebAuthn never select this algorithm; it is
/// kept so peers that distinguish the two names can be served explicitly.
pub fn sk_ecdsa_tail(signature_der: &[u8], authenticator_data: &[u8]) -> Result<Vec<u8>> {
    let assertion = Assertion {
        authenticator_data: authenticator_data.to_vec(),
        client_data_json: Vec::new(),
        signature_der: signature_der.to_vec(),
        origin: String::new(),
    };
    let flags = assertion.flags()?;
    let counter = assertion.counter()?;

    let mut out = ecdsa_signature_string(signature_der)?;
    flags.encode(&mut out)?;
    counter.encode(&mut out)?;
    Ok(out)
}

/// Signature tail for `webauthn-sk-ecdsa-sha2-nistp256@openssh.com`.
pub fn webauthn_sk_ecdsa_tail(assertion: &Assertion) -> Result<Vec<u8>> {
    let flags = assertion.flags()?;
    let counter = assertion.counter()?;
    let extensions = assertion.extensions()?;

    let mut out = ecdsa_signature_string(&assertion.signature_der)?;
    flags.encode(&mut out)?;
    counter.encode(&mut out)?;
    put_string(&mut out, assertion.origin.as_bytes())?;
    put_string(&mut out, &assertion.client_data_json)?;
    put_string(&mut out, extensions)?;
    Ok(out)
}

/// What a signing identity hands back to the packet builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureWireBlob {
    /// Ordinary SSH signature: `string(algorithm) || string(blob)`.
    Standard { algorithm: String, blob: Vec<u8> },
    /// Security-key signature: `string(algorithm) || tail`, where the tail is
    /// the multi-field shape produced by [`webauthn_sk_ecdsa_tail`] or
    /// [`sk_ecdsa_tail`].
    SecurityKey { algorithm: String, tail: Vec<u8> },
}

impl SignatureWireBlob {
    pub fn algorithm(&self) -> &str {
        match self {
            Self::Standard { algorithm, .. } | Self::SecurityKey { algorithm, .. } => algorithm,
        }
    }
}
