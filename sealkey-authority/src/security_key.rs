//! FIDO2 security keys reached through an [`AuthenticatorBridge`].
//!
//! The key is advertised under the WebAuthn-extended algorithm name while
//! the public key blob keeps its base `sk-ecdsa` type.  Each signature is one
//! assertion round trip; nothing (counter, challenge, response) is kept
//! between calls.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as B64URL;
use sealkey_core::wire::{WEBAUTHN_SK_ECDSA_P256, webauthn_sk_ecdsa_tail};
use sealkey_core::{PublicKeyRecord, Result, SecurityKeyIdentity, SignatureWireBlob};
use tracing::debug;

use crate::SignatureAuthority;
use crate::bridge::{AssertionRequest, AuthenticatorBridge};

pub struct SecurityKeyAuthority {
    identity: SecurityKeyIdentity,
    bridge: Arc<dyn AuthenticatorBridge>,
    record: PublicKeyRecord,
}

impl SecurityKeyAuthority {
    pub fn new(identity: SecurityKeyIdentity, bridge: Arc<dyn AuthenticatorBridge>) -> Self {
        let record = PublicKeyRecord {
            algorithm: identity.advertised_algorithm().to_string(),
            blob: identity.public_key_blob().to_vec(),
            comment: identity.comment().to_string(),
        };
        Self {
            identity,
            bridge,
            record,
        }
    }
}

impl std::fmt::Debug for SecurityKeyAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityKeyAuthority")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SignatureAuthority for SecurityKeyAuthority {
    fn public_identity(&self) -> &PublicKeyRecord {
        &self.record
    }

    async fn sign(&self, data: &[u8]) -> Result<SignatureWireBlob> {
        let request = AssertionRequest {
            credential_id: B64URL.encode(self.identity.credential_id()),
            rp_id: self.identity.relying_party_id().to_string(),
            challenge: B64URL.encode(data),
            user_verification: self.identity.user_verification(),
        };

        let response = self.bridge.request_assertion(request).await?;
        let assertion = response.decode()?;
        let tail = webauthn_sk_ecdsa_tail(&assertion)?;

        debug!(
            rp_id = %self.identity.relying_party_id(),
            counter = assertion.counter()?,
            "security key assertion encoded"
        );
        Ok(SignatureWireBlob::SecurityKey {
            algorithm: WEBAUTHN_SK_ECDSA_P256.to_string(),
            tail,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use sealkey_core::wire::{SK_ECDSA_P256, put_string, read_mpint};
    use sealkey_core::{Error, UserVerification, identity::encoded_key_type};
    use ssh_encoding::{Decode, Reader};

    use super::*;
    use crate::bridge::AssertionResponse;

    fn sk_blob() -> Vec<u8> {
        let mut blob = Vec::new();
        put_string(&mut blob, SK_ECDSA_P256.as_bytes()).unwrap();
        put_string(&mut blob, b"nistp256").unwrap();
        put_string(&mut blob, &[0x04; 65]).unwrap();
        put_string(&mut blob, b"example.com").unwrap();
        blob
    }

    fn identity() -> SecurityKeyIdentity {
        SecurityKeyIdentity::new(
            sk_blob(),
            vec![0xde, 0xad, 0xbe, 0xef],
            "example.com",
            UserVerification::Required,
            "yubikey",
        )
        .unwrap()
    }

    fn authenticator_data(flags: u8, counter: u32) -> Vec<u8> {
        let mut data = vec![0x11; 32];
        data.push(flags);
        data.extend(counter.to_be_bytes());
        data
    }

    /// Answers every request with a canned response and records the request.
    struct FakeBridge {
        response: Option<AssertionResponse>,
        seen: Mutex<Vec<AssertionRequest>>,
    }

    #[async_trait]
    impl AuthenticatorBridge for FakeBridge {
        async fn request_assertion(&self, request: AssertionRequest) -> Result<AssertionResponse> {
            self.seen.lock().unwrap().push(request);
            self.response
                .clone()
                .ok_or_else(|| Error::ChannelUnavailable("gone".to_string()))
        }
    }

    fn bridge_answering(auth_data: Vec<u8>) -> Arc<FakeBridge> {
        Arc::new(FakeBridge {
            response: Some(AssertionResponse {
                authenticator_data: B64URL.encode(auth_data),
                client_data_json: B64URL.encode(br#"{"type":"webauthn.get"}"#),
                // r = 0x80 (needs a sign pad), s = 0x01
                signature: B64URL.encode([0x30, 0x07, 0x02, 0x02, 0x00, 0x80, 0x02, 0x01, 0x01]),
                origin: "https://example.com".to_string(),
            }),
            seen: Mutex::new(Vec::new()),
        })
    }

    #[test]
    fn advertises_extended_name_with_base_blob() {
        let authority = SecurityKeyAuthority::new(identity(), bridge_answering(Vec::new()));
        let record = authority.public_identity();
        assert_eq!(record.algorithm, WEBAUTHN_SK_ECDSA_P256);
        assert_eq!(encoded_key_type(&record.blob).unwrap(), SK_ECDSA_P256);
        assert_eq!(record.comment, "yubikey");
    }

    #[tokio::test]
    async fn sign_sends_request_and_encodes_tail() {
        let bridge = bridge_answering(authenticator_data(0x05, 42));
        let authority = SecurityKeyAuthority::new(identity(), bridge.clone());

        let blob = authority.sign(b"to be signed").await.unwrap();
        let SignatureWireBlob::SecurityKey { algorithm, tail } = blob else {
            panic!("expected a security key signature");
        };
        assert_eq!(algorithm, WEBAUTHN_SK_ECDSA_P256);

        let seen = bridge.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].challenge, B64URL.encode(b"to be signed"));
        assert_eq!(seen[0].credential_id, "3q2-7w");
        assert_eq!(seen[0].rp_id, "example.com");
        assert_eq!(seen[0].user_verification, UserVerification::Required);

        let mut reader = tail.as_slice();
        let inner = Vec::<u8>::decode(&mut reader).unwrap();
        let mut inner_reader = inner.as_slice();
        assert_eq!(read_mpint(&mut inner_reader).unwrap(), vec![0x80]);
        assert_eq!(read_mpint(&mut inner_reader).unwrap(), vec![0x01]);
        assert_eq!(u8::decode(&mut reader).unwrap(), 0x05);
        assert_eq!(u32::decode(&mut reader).unwrap(), 42);
        assert_eq!(String::decode(&mut reader).unwrap(), "https://example.com");
        assert_eq!(
            Vec::<u8>::decode(&mut reader).unwrap(),
            br#"{"type":"webauthn.get"}"#
        );
        assert!(Vec::<u8>::decode(&mut reader).unwrap().is_empty());
        assert!(reader.is_finished());
    }

    #[tokio::test]
    async fn undersized_authenticator_data_is_malformed() {
        let bridge = bridge_answering(vec![0u8; 36]);
        let authority = SecurityKeyAuthority::new(identity(), bridge);
        assert!(matches!(
            authority.sign(b"x").await,
            Err(Error::MalformedSignature(_))
        ));
    }

    #[tokio::test]
    async fn bridge_failure_is_not_retried() {
        let bridge = Arc::new(FakeBridge {
            response: None,
            seen: Mutex::new(Vec::new()),
        });
        let authority = SecurityKeyAuthority::new(identity(), bridge.clone());
        assert!(matches!(
            authority.sign(b"x").await,
            Err(Error::ChannelUnavailable(_))
        ));
        assert_eq!(bridge.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn each_sign_is_a_fresh_request() {
        let bridge = bridge_answering(authenticator_data(0x01, 7));
        let authority = SecurityKeyAuthority::new(identity(), bridge.clone());
        authority.sign(b"first").await.unwrap();
        authority.sign(b"second").await.unwrap();
        let seen = bridge.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_ne!(seen[0].challenge, seen[1].challenge);
    }
}
