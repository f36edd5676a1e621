//! Bridge to the component that drives the platform authenticator.
//!
//! The authenticator (browser WebAuthn API, platform FIDO stack, a UI
//! process) lives on the other side of a channel.  Each signature sends one
//! [`AssertionRequest`] and awaits exactly one reply.  Byte fields travel as
//! unpadded base64url, and the JSON field names match the WebAuthn API so a
//! UI process can forward the payloads as-is.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as B64URL;
use sealkey_core::config::SecurityKeyConfig;
use sealkey_core::{Assertion, Error, Result, UserVerification};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssertionRequest {
    pub credential_id: String,
    pub rp_id: String,
    pub challenge: String,
    pub user_verification: UserVerification,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssertionResponse {
    pub authenticator_data: String,
    #[serde(rename = "clientDataJSON")]
    pub client_data_json: String,
    pub signature: String,
    pub origin: String,
}

impl AssertionResponse {
    /// Decode the base64url fields into an [`Assertion`].
    pub fn decode(&self) -> Result<Assertion> {
        let assertion = Assertion {
            authenticator_data: decode_field("authenticatorData", &self.authenticator_data)?,
            client_data_json: decode_field("clientDataJSON", &self.client_data_json)?,
            signature_der: decode_field("signature", &self.signature)?,
            origin: self.origin.clone(),
        };
        assertion.validate()?;
        Ok(assertion)
    }
}

fn decode_field(name: &str, value: &str) -> Result<Vec<u8>> {
    B64URL
        .decode(value.trim_end_matches('='))
        .map_err(|e| Error::MalformedSignature(format!("{name} is not base64url: {e}")))
}

#[async_trait]
pub trait AuthenticatorBridge: Send + Sync {
    async fn request_assertion(&self, request: AssertionRequest) -> Result<AssertionResponse>;
}

/// One in-flight request as seen by the UI side of a [`ChannelBridge`].
#[derive(Debug)]
pub struct PendingAssertion {
    request: AssertionRequest,
    reply: oneshot::Sender<std::result::Result<AssertionResponse, String>>,
}

impl PendingAssertion {
    pub fn request(&self) -> &AssertionRequest {
        &self.request
    }

    pub fn respond(self, response: AssertionResponse) {
        if self.reply.send(Ok(response)).is_err() {
            debug!("assertion requester went away before the response");
        }
    }

    /// Report that the authenticator refused or the user cancelled.
    pub fn fail(self, message: impl Into<String>) {
        if self.reply.send(Err(message.into())).is_err() {
            debug!("assertion requester went away before the failure");
        }
    }
}

/// [`AuthenticatorBridge`] over a tokio channel.
///
/// Dropping the receiver, or dropping a [`PendingAssertion`] without
/// answering it, fails the waiting signature with
/// [`Error::ChannelUnavailable`].
#[derive(Debug, Clone)]
pub struct ChannelBridge {
    tx: mpsc::Sender<PendingAssertion>,
    timeout: Option<Duration>,
}

impl ChannelBridge {
    pub fn new(buffer: usize, timeout: Option<Duration>) -> (Self, mpsc::Receiver<PendingAssertion>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx, timeout }, rx)
    }

    pub fn from_config(config: &SecurityKeyConfig) -> (Self, mpsc::Receiver<PendingAssertion>) {
        Self::new(
            1,
            config.assertion_timeout_secs.map(Duration::from_secs),
        )
    }

    async fn exchange(&self, request: AssertionRequest) -> Result<AssertionResponse> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(PendingAssertion { request, reply })
            .await
            .map_err(|_| Error::ChannelUnavailable("authenticator channel closed".to_string()))?;

        match response.await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(message)) => Err(Error::VerificationFailed(message)),
            Err(_) => Err(Error::ChannelUnavailable(
                "authenticator dropped the request".to_string(),
            )),
        }
    }
}

#[async_trait]
impl AuthenticatorBridge for ChannelBridge {
    async fn request_assertion(&self, request: AssertionRequest) -> Result<AssertionResponse> {
        debug!(rp_id = %request.rp_id, "requesting assertion");
        match self.timeout {
            None => self.exchange(request).await,
            Some(limit) => tokio::time::timeout(limit, self.exchange(request))
                .await
                .map_err(|_| {
                    warn!(?limit, "assertion request timed out");
                    Error::ChannelUnavailable(format!("no assertion within {limit:?}"))
                })?,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> AssertionRequest {
        AssertionRequest {
            credential_id: "AQID".to_string(),
            rp_id: "example.com".to_string(),
            challenge: "Y2hhbGxlbmdl".to_string(),
            user_verification: UserVerification::Required,
        }
    }

    fn response() -> AssertionResponse {
        AssertionResponse {
            authenticator_data: B64URL.encode([0u8; 37]),
            client_data_json: B64URL.encode(b"{}"),
            signature: B64URL.encode([0x30, 0x06, 0x02, 0x01, 0x01, 0x02, 0x01, 0x02]),
            origin: "https://example.com".to_string(),
        }
    }

    #[test]
    fn json_uses_webauthn_field_names() {
        let json = serde_json::to_value(request()).unwrap();
        assert_eq!(json["credentialId"], "AQID");
        assert_eq!(json["rpId"], "example.com");
        assert_eq!(json["userVerification"], "required");

        let json = serde_json::to_value(response()).unwrap();
        assert!(json.get("clientDataJSON").is_some());
        assert!(json.get("authenticatorData").is_some());

        let back: AssertionResponse = serde_json::from_value(json).unwrap();
        assert_eq!(back, response());
    }

    #[test]
    fn decode_accepts_padded_and_unpadded() {
        let mut padded = response();
        padded.client_data_json = "e30=".to_string();
        assert_eq!(padded.decode().unwrap().client_data_json, b"{}");
        assert_eq!(response().decode().unwrap().authenticator_data.len(), 37);
    }

    #[test]
    fn decode_rejects_bad_fields() {
        let mut bad = response();
        bad.signature = "not base64!".to_string();
        assert!(matches!(bad.decode(), Err(Error::MalformedSignature(_))));

        let mut short = response();
        short.authenticator_data = B64URL.encode([0u8; 36]);
        assert!(matches!(short.decode(), Err(Error::MalformedSignature(_))));
    }

    #[tokio::test]
    async fn round_trip_through_channel() {
        let (bridge, mut rx) = ChannelBridge::new(1, None);
        let ui = tokio::spawn(async move {
            let pending = rx.recv().await.unwrap();
            assert_eq!(pending.request().rp_id, "example.com");
            pending.respond(response());
        });
        assert_eq!(bridge.request_assertion(request()).await.unwrap(), response());
        ui.await.unwrap();
    }

    #[tokio::test]
    async fn closed_channel_fails_immediately() {
        let (bridge, rx) = ChannelBridge::new(1, None);
        drop(rx);
        let err = bridge.request_assertion(request()).await.unwrap_err();
        assert!(matches!(err, Error::ChannelUnavailable(_)));
    }

    #[tokio::test]
    async fn dropped_request_fails() {
        let (bridge, mut rx) = ChannelBridge::new(1, None);
        let ui = tokio::spawn(async move {
            let pending = rx.recv().await.unwrap();
            drop(pending);
        });
        let err = bridge.request_assertion(request()).await.unwrap_err();
        assert!(matches!(err, Error::ChannelUnavailable(_)));
        ui.await.unwrap();
    }

    #[tokio::test]
    async fn ui_refusal_is_retryable() {
        let (bridge, mut rx) = ChannelBridge::new(1, None);
        tokio::spawn(async move {
            rx.recv().await.unwrap().fail("NotAllowedError");
        });
        let err = bridge.request_assertion(request()).await.unwrap_err();
        assert!(matches!(err, Error::VerificationFailed(ref m) if m == "NotAllowedError"));
        assert!(err.is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_maps_to_channel_unavailable() {
        let (bridge, mut rx) = ChannelBridge::new(1, Some(Duration::from_secs(5)));
        let ui = tokio::spawn(async move {
            // Hold the request without answering.
            let pending = rx.recv().await.unwrap();
            tokio::time::sleep(Duration::from_secs(60)).await;
            drop(pending);
        });
        let err = bridge.request_assertion(request()).await.unwrap_err();
        assert!(matches!(err, Error::ChannelUnavailable(_)));
        ui.abort();
    }

    #[test]
    fn from_config_reads_timeout() {
        let config = SecurityKeyConfig {
            assertion_timeout_secs: Some(30),
            ..Default::default()
        };
        let (bridge, _rx) = ChannelBridge::from_config(&config);
        assert_eq!(bridge.timeout, Some(Duration::from_secs(30)));
    }
}
