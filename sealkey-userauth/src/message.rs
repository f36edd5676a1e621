//! `SSH_MSG_USERAUTH_REQUEST` for the `publickey` method (RFC 4252 §7).

use sealkey_core::wire::put_string;
use sealkey_core::{Result, SignatureWireBlob};
use ssh_encoding::Encode;

pub const SSH_MSG_USERAUTH_REQUEST: u8 = 50;
pub const SERVICE_CONNECTION: &str = "ssh-connection";
pub const METHOD_PUBLICKEY: &str = "publickey";

/// The fields shared by the signed data and the request packet.
#[derive(Debug, Clone, Copy)]
pub struct PublicKeyRequest<'a> {
    pub username: &'a str,
    pub algorithm: &'a str,
    pub public_key_blob: &'a [u8],
}

impl PublicKeyRequest<'_> {
    fn put_fields(&self, buf: &mut Vec<u8>) -> Result<()> {
        SSH_MSG_USERAUTH_REQUEST.encode(buf)?;
        put_string(buf, self.username.as_bytes())?;
        put_string(buf, SERVICE_CONNECTION.as_bytes())?;
        put_string(buf, METHOD_PUBLICKEY.as_bytes())?;
        1u8.encode(buf)?; // signature present
        put_string(buf, self.algorithm.as_bytes())?;
        put_string(buf, self.public_key_blob)?;
        Ok(())
    }

    /// What the identity signs: the session id followed by the request.
    pub fn signed_data(&self, session_id: &[u8]) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        put_string(&mut buf, session_id)?;
        self.put_fields(&mut buf)?;
        Ok(buf)
    }

    /// The request packet payload carrying an already encoded signature
    /// field (see [`standard_signature_field`] and
    /// [`security_key_signature_field`]).
    pub fn packet(&self, signature_field: &[u8]) -> Result<Vec<u8>> {
        let mut buf = self.packet_prefix()?;
        put_string(&mut buf, signature_field)?;
        Ok(buf)
    }

    /// The request packet up to, not including, the signature field.
    pub fn packet_prefix(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.put_fields(&mut buf)?;
        Ok(buf)
    }
}

/// `string(algorithm) || string(blob)`: the two-field signature.
pub fn standard_signature_field(algorithm: &str, blob: &[u8]) -> Result<Vec<u8>> {
    let mut field = Vec::with_capacity(algorithm.len() + blob.len() + 8);
    put_string(&mut field, algorithm.as_bytes())?;
    put_string(&mut field, blob)?;
    Ok(field)
}

/// `string(algorithm) || tail`: the tail is appended raw, its inner fields
/// are already length-prefixed.
pub fn security_key_signature_field(algorithm: &str, tail: &[u8]) -> Result<Vec<u8>> {
    let mut field = Vec::with_capacity(algorithm.len() + tail.len() + 4);
    put_string(&mut field, algorithm.as_bytes())?;
    field.extend_from_slice(tail);
    Ok(field)
}

/// Encode whichever shape `signature` carries.
pub fn signature_field(signature: &SignatureWireBlob) -> Result<Vec<u8>> {
    match signature {
        SignatureWireBlob::Standard { algorithm, blob } => standard_signature_field(algorithm, blob),
        SignatureWireBlob::SecurityKey { algorithm, tail } => {
            security_key_signature_field(algorithm, tail)
        }
    }
}
