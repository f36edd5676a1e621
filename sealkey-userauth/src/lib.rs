//! SSH `publickey` userauth requests with security-key signature support.

pub mod auth;
pub mod builder;
pub mod message;

pub use auth::{AuthReply, Transport, authenticate};
pub use builder::{DefaultRequestBuilder, PublicKeyRequestBuilder, SecurityKeyRequestBuilder, install};
pub use message::PublicKeyRequest;
