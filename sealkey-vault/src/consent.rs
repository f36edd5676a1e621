//! Explicit user-consent verification.
//!
//! On platforms whose credential store does not gate reads on biometrics,
//! releasing a passphrase first requires a positive answer from a
//! [`ConsentVerifier`].  A verifier that is not available means the release
//! fails closed.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use sealkey_core::config::ConsentConfig;
use sealkey_core::{Error, Result};
use tracing::debug;

/// Result of probing a verifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability {
    Available,
    /// The mechanism exists but the user has not enrolled (no fingerprint,
    /// no PIN configured).
    NotEnrolled,
    /// Absent on this platform or build.
    Unavailable(String),
}

impl Availability {
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available)
    }
}

#[async_trait]
pub trait ConsentVerifier: Send + Sync {
    async fn check_available(&self) -> Availability;

    /// Ask the user to approve `reason`.  `Ok(false)` means declined or
    /// cancelled; `Err` means the mechanism itself failed.
    async fn request_verification(&self, reason: &str) -> Result<bool>;
}

/// Verifier used when nothing is configured: always unavailable.
#[derive(Debug, Default)]
pub struct DenyVerifier;

#[async_trait]
impl ConsentVerifier for DenyVerifier {
    async fn check_available(&self) -> Availability {
        Availability::Unavailable("no consent verifier configured".to_string())
    }

    async fn request_verification(&self, _reason: &str) -> Result<bool> {
        Err(Error::CapabilityUnavailable(
            "no consent verifier configured".to_string(),
        ))
    }
}

/// Runs an external confirmation program; exit status 0 means approved.
///
/// Works with askpass-style dialogs (`zenity --question`, `kdialog
/// --yesno`) and with fingerprint tools such as `fprintd-verify`.
#[derive(Debug, Clone)]
pub struct CommandVerifier {
    program: String,
    args: Vec<String>,
}

impl CommandVerifier {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn from_config(config: &ConsentConfig) -> Option<Self> {
        config
            .program
            .as_ref()
            .map(|program| Self::new(program.clone(), config.args.clone()))
    }
}

#[async_trait]
impl ConsentVerifier for CommandVerifier {
    async fn check_available(&self) -> Availability {
        match find_program(&self.program) {
            Some(_) => Availability::Available,
            None => Availability::Unavailable(format!("{} not found", self.program)),
        }
    }

    async fn request_verification(&self, reason: &str) -> Result<bool> {
        let context = HashMap::from([("reason", reason)]);
        let args = render_args(&self.args, &context);

        debug!(program = %self.program, "requesting consent");
        let status = tokio::process::Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|e| {
                Error::CapabilityUnavailable(format!("{} failed to launch: {e}", self.program))
            })?;

        debug!(program = %self.program, success = status.success(), "consent finished");
        Ok(status.success())
    }
}

/// Resolve `program` the way a shell would: paths are checked directly,
/// bare names are searched on `PATH`.
pub fn find_program(program: &str) -> Option<PathBuf> {
    if program.contains('/') {
        let path = PathBuf::from(program);
        return path.is_file().then_some(path);
    }
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

/// Replace `{{name}}` placeholders; unknown names are kept (trimmed) and an
/// unterminated `{{` is copied through unchanged.
pub fn render_template(template: &str, values: &HashMap<&str, &str>) -> String {
    let mut output = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find("{{") {
        output.push_str(&rest[..open]);
        let inside = &rest[open + 2..];
        let Some(close) = inside.find("}}") else {
            output.push_str(&rest[open..]);
            return output;
        };
        let name = inside[..close].trim();
        match values.get(name) {
            Some(value) => output.push_str(value),
            None => output.push_str(&format!("{{{{{name}}}}}")),
        }
        rest = &inside[close + 2..];
    }
    output.push_str(rest);
    output
}

pub fn render_args(args: &[String], values: &HashMap<&str, &str>) -> Vec<String> {
    args.iter()
        .map(|arg| render_template(arg, values))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_reason_placeholder() {
        let values = HashMap::from([("reason", "Sign in to prod")]);
        let args = vec!["--question".to_string(), "--text={{reason}}".to_string()];
        assert_eq!(
            render_args(&args, &values),
            vec!["--question".to_string(), "--text=Sign in to prod".to_string()]
        );
    }

    #[test]
    fn leaves_unknown_placeholders() {
        let values = HashMap::new();
        assert_eq!(render_template("{{ key_id }}", &values), "{{key_id}}");
    }

    #[test]
    fn unterminated_placeholder_is_copied() {
        let values = HashMap::from([("reason", "x")]);
        assert_eq!(render_template("ok {{reason}} {{reas", &values), "ok x {{reas");
        assert_eq!(render_template("{{reason}}{{reason}}", &values), "xx");
    }

    #[test]
    fn find_program_checks_explicit_paths() {
        assert!(find_program("/definitely/not/here").is_none());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tool");
        std::fs::write(&path, "").unwrap();
        assert_eq!(find_program(path.to_str().unwrap()), Some(path));
    }

    #[tokio::test]
    async fn deny_verifier_is_unavailable() {
        let verifier = DenyVerifier;
        assert!(!verifier.check_available().await.is_available());
        assert!(matches!(
            verifier.request_verification("x").await,
            Err(Error::CapabilityUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn missing_command_is_unavailable() {
        let verifier = CommandVerifier::new("/nonexistent/confirm", Vec::new());
        assert!(matches!(
            verifier.check_available().await,
            Availability::Unavailable(_)
        ));
        assert!(verifier.request_verification("x").await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_exit_status_decides() {
        let approve = CommandVerifier::new("true", Vec::new());
        let decline = CommandVerifier::new("false", Vec::new());
        assert!(approve.request_verification("x").await.unwrap());
        assert!(!decline.request_verification("x").await.unwrap());
    }

    #[test]
    fn from_config_requires_program() {
        assert!(CommandVerifier::from_config(&ConsentConfig::default()).is_none());
        let cfg = ConsentConfig {
            program: Some("zenity".to_string()),
            args: vec!["--question".to_string()],
        };
        let verifier = CommandVerifier::from_config(&cfg).unwrap();
        assert_eq!(verifier.program, "zenity");
    }
}
