//! Publickey authentication loop.

use async_trait::async_trait;
use sealkey_authority::SignatureAuthority;
use sealkey_core::Result;
use tracing::{debug, info, warn};

use crate::builder::PublicKeyRequestBuilder;

/// Server answer to one userauth request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthReply {
    Success,
    /// `SSH_MSG_USERAUTH_FAILURE` with the methods that may continue.
    Failure {
        methods: Vec<String>,
        partial_success: bool,
    },
}

/// The SSH connection as the authentication loop sees it.
#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, payload: &[u8]) -> Result<()>;

    async fn receive(&mut self) -> Result<AuthReply>;
}

/// Try each authority in order until the server accepts one.
///
/// Signing or encoding failures count as a rejection of that identity and
/// nothing is sent for it.  Transport errors end the loop.  Returns the index
/// of the accepted authority, or `None` if every identity failed.
pub async fn authenticate(
    transport: &mut dyn Transport,
    builder: &dyn PublicKeyRequestBuilder,
    session_id: &[u8],
    username: &str,
    authorities: &[Box<dyn SignatureAuthority>],
) -> Result<Option<usize>> {
    for (index, authority) in authorities.iter().enumerate() {
        let record = authority.public_identity();
        let payload = match builder.build(session_id, username, authority.as_ref()).await {
            Ok(payload) => payload,
            Err(e) => {
                warn!(
                    algorithm = %record.algorithm,
                    comment = %record.comment,
                    error = %e,
                    "skipping identity"
                );
                continue;
            }
        };

        transport.send(&payload).await?;
        match transport.receive().await? {
            AuthReply::Success => {
                info!(algorithm = %record.algorithm, comment = %record.comment, "authenticated");
                return Ok(Some(index));
            }
            AuthReply::Failure { methods, .. } => {
                debug!(algorithm = %record.algorithm, ?methods, "identity rejected");
            }
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use sealkey_core::wire::WEBAUTHN_SK_ECDSA_P256;
    use sealkey_core::{Error, SignatureWireBlob};

    use super::*;
    use crate::builder::tests::FakeAuthority;
    use crate::builder::{DefaultRequestBuilder, SecurityKeyRequestBuilder};

    #[derive(Default)]
    struct ScriptedTransport {
        sent: Vec<Vec<u8>>,
        replies: VecDeque<AuthReply>,
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&mut self, payload: &[u8]) -> Result<()> {
            self.sent.push(payload.to_vec());
            Ok(())
        }

        async fn receive(&mut self) -> Result<AuthReply> {
            self.replies
                .pop_front()
                .ok_or_else(|| Error::Io(std::io::ErrorKind::UnexpectedEof.into()))
        }
    }

    fn rejected() -> AuthReply {
        AuthReply::Failure {
            methods: vec!["publickey".to_string()],
            partial_success: false,
        }
    }

    fn ed25519_sig() -> Result<SignatureWireBlob> {
        Ok(SignatureWireBlob::Standard {
            algorithm: "ssh-ed25519".to_string(),
            blob: vec![1],
        })
    }

    fn malformed_assertion() -> Result<SignatureWireBlob> {
        Err(Error::MalformedSignature("authenticator data too short".to_string()))
    }

    fn builder() -> SecurityKeyRequestBuilder {
        SecurityKeyRequestBuilder::new(std::sync::Arc::new(DefaultRequestBuilder))
    }

    #[tokio::test]
    async fn malformed_identity_sends_nothing_and_falls_through() {
        let authorities: Vec<Box<dyn SignatureAuthority>> = vec![
            Box::new(FakeAuthority::new(WEBAUTHN_SK_ECDSA_P256, malformed_assertion)),
            Box::new(FakeAuthority::new("ssh-ed25519", ed25519_sig)),
        ];
        let mut transport = ScriptedTransport {
            replies: VecDeque::from([AuthReply::Success]),
            ..Default::default()
        };

        let accepted = authenticate(&mut transport, &builder(), b"sid", "git", &authorities)
            .await
            .unwrap();
        assert_eq!(accepted, Some(1));
        assert_eq!(transport.sent.len(), 1);
    }

    #[tokio::test]
    async fn all_rejected_returns_none() {
        let authorities: Vec<Box<dyn SignatureAuthority>> = vec![
            Box::new(FakeAuthority::new("ssh-ed25519", ed25519_sig)),
            Box::new(FakeAuthority::new("ssh-ed25519", ed25519_sig)),
        ];
        let mut transport = ScriptedTransport {
            replies: VecDeque::from([rejected(), rejected()]),
            ..Default::default()
        };

        let accepted = authenticate(&mut transport, &builder(), b"sid", "git", &authorities)
            .await
            .unwrap();
        assert_eq!(accepted, None);
        assert_eq!(transport.sent.len(), 2);
    }

    #[tokio::test]
    async fn first_success_stops_the_loop() {
        let second = FakeAuthority::new("ssh-ed25519", ed25519_sig);
        let authorities: Vec<Box<dyn SignatureAuthority>> = vec![
            Box::new(FakeAuthority::new("ssh-ed25519", ed25519_sig)),
            Box::new(second),
        ];
        let mut transport = ScriptedTransport {
            replies: VecDeque::from([AuthReply::Success]),
            ..Default::default()
        };
        let accepted = authenticate(&mut transport, &builder(), b"sid", "git", &authorities)
            .await
            .unwrap();
        assert_eq!(accepted, Some(0));
        assert_eq!(transport.sent.len(), 1);
    }

    #[tokio::test]
    async fn transport_error_ends_the_loop() {
        let authorities: Vec<Box<dyn SignatureAuthority>> =
            vec![Box::new(FakeAuthority::new("ssh-ed25519", ed25519_sig))];
        let mut transport = ScriptedTransport::default();
        assert!(matches!(
            authenticate(&mut transport, &builder(), b"sid", "git", &authorities).await,
            Err(Error::Io(_))
        ));
    }
}
