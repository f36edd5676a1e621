pub mod consent;
pub mod keygen;
pub mod secret_service;
pub mod store;
pub mod vault;

pub use consent::{Availability, CommandVerifier, ConsentVerifier, DenyVerifier};
pub use keygen::{KeyGenerator, SshKeygen};
pub use secret_service::SecretServiceStore;
pub use store::{CredentialStore, MemoryStore};
pub use vault::{Capabilities, GeneratedKey, PassphraseVault, SupportReport};
