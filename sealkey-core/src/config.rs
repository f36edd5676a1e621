use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::identity::UserVerification;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub vault: VaultConfig,
    #[serde(default)]
    pub consent: ConsentConfig,
    #[serde(default)]
    pub security_key: SecurityKeyConfig,
}

/// How the stored passphrase is released at signing time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReleasePolicy {
    /// The credential store itself gates reads on biometrics.
    #[default]
    StoreGated,
    /// Every release must first pass an explicit consent check.
    ExplicitConsent,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StoreKind {
    #[default]
    SecretService,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Credential store namespace (the Secret Service `service` attribute).
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_keygen_program")]
    pub keygen_program: String,
    #[serde(default)]
    pub release_policy: ReleasePolicy,
    #[serde(default)]
    pub store: StoreKind,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            keygen_program: default_keygen_program(),
            release_policy: ReleasePolicy::default(),
            store: StoreKind::default(),
        }
    }
}

/// External consent program used under [`ReleasePolicy::ExplicitConsent`].
///
/// `{{reason}}` in `args` is replaced with the human-readable reason.
///
/// ```toml
/// [consent]
/// program = "zenity"
/// args = ["--question", "--text={{reason}}"]
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsentConfig {
    #[serde(default)]
    pub program: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityKeyConfig {
    #[serde(default)]
    pub user_verification: UserVerification,
    /// Fail a pending assertion after this many seconds.  `None` waits until
    /// the UI side answers or goes away.
    #[serde(default)]
    pub assertion_timeout_secs: Option<u64>,
}

fn default_namespace() -> String {
    "sealkey".to_string()
}

fn default_keygen_program() -> String {
    "ssh-keygen".to_string()
}

/// `$XDG_CONFIG_HOME/sealkey/config.toml`, falling back to `~/.config`.
pub fn default_config_path() -> Result<PathBuf> {
    let base = if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME") {
        PathBuf::from(xdg)
    } else if let Some(home) = std::env::var_os("HOME") {
        PathBuf::from(home).join(".config")
    } else {
        return Err(Error::Config(
            "cannot locate config: neither XDG_CONFIG_HOME nor HOME is set".to_string(),
        ));
    };
    Ok(base.join("sealkey").join("config.toml"))
}

/// Load the config file, returning defaults when it does not exist.
pub fn load(path: &Path) -> Result<Config> {
    match std::fs::read_to_string(path) {
        Ok(text) => toml::from_str(&text)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display()))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            Ok(Config::default())
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_gives_defaults() {
        let cfg: Config = toml::from_str("").unwrap();
        assert_eq!(cfg.vault.namespace, "sealkey");
        assert_eq!(cfg.vault.keygen_program, "ssh-keygen");
        assert_eq!(cfg.vault.release_policy, ReleasePolicy::StoreGated);
        assert_eq!(cfg.vault.store, StoreKind::SecretService);
        assert!(cfg.consent.program.is_none());
        assert!(cfg.consent.args.is_empty());
        assert_eq!(cfg.security_key.user_verification, UserVerification::Preferred);
        assert!(cfg.security_key.assertion_timeout_secs.is_none());
    }

    #[test]
    fn parse_all_sections() {
        let toml_str = r#"
            [vault]
            namespace = "work"
            keygen_program = "/usr/bin/ssh-keygen"
            release_policy = "explicit-consent"
            store = "memory"

            [consent]
            program = "zenity"
            args = ["--question", "--text={{reason}}"]

            [security_key]
            user_verification = "required"
            assertion_timeout_secs = 60
        "#;
        let cfg: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.vault.namespace, "work");
        assert_eq!(cfg.vault.keygen_program, "/usr/bin/ssh-keygen");
        assert_eq!(cfg.vault.release_policy, ReleasePolicy::ExplicitConsent);
        assert_eq!(cfg.vault.store, StoreKind::Memory);
        assert_eq!(cfg.consent.program.as_deref(), Some("zenity"));
        assert_eq!(cfg.consent.args.len(), 2);
        assert_eq!(cfg.security_key.user_verification, UserVerification::Required);
        assert_eq!(cfg.security_key.assertion_timeout_secs, Some(60));
    }

    #[test]
    fn unknown_policy_is_an_error() {
        let toml_str = r#"
            [vault]
            release_policy = "whenever"
        "#;
        assert!(toml::from_str::<Config>(toml_str).is_err());
    }

    #[test]
    fn load_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(cfg.vault.namespace, "sealkey");
    }

    #[test]
    fn load_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[vault\nnamespace = 1").unwrap();
        assert!(matches!(load(&path), Err(Error::Config(_))));
    }

    #[test]
    fn config_roundtrip_serialize() {
        let cfg = Config::default();
        let serialized = toml::to_string(&cfg).unwrap();
        let deserialized: Config = toml::from_str(&serialized).unwrap();
        assert_eq!(deserialized.vault.namespace, cfg.vault.namespace);
        assert_eq!(deserialized.vault.release_policy, cfg.vault.release_policy);
    }
}
