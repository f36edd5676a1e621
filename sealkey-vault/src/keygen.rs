//! External key generation.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use sealkey_core::{Error, Result};
use tracing::debug;

use crate::consent::find_program;

#[async_trait]
pub trait KeyGenerator: Send + Sync {
    fn is_available(&self) -> bool;

    /// Write an ED25519 private key encrypted with `passphrase` to `output`
    /// and its public half to `<output>.pub`.
    async fn generate(&self, output: &Path, passphrase: &str, comment: &str) -> Result<()>;
}

/// `ssh-keygen` (or a compatible program) run as a subprocess.
#[derive(Debug, Clone)]
pub struct SshKeygen {
    program: String,
}

impl SshKeygen {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for SshKeygen {
    fn default() -> Self {
        Self::new("ssh-keygen")
    }
}

#[async_trait]
impl KeyGenerator for SshKeygen {
    fn is_available(&self) -> bool {
        find_program(&self.program).is_some()
    }

    async fn generate(&self, output: &Path, passphrase: &str, comment: &str) -> Result<()> {
        debug!(program = %self.program, path = %output.display(), "generating ed25519 key");

        let result = tokio::process::Command::new(&self.program)
            .arg("-q")
            .args(["-t", "ed25519"])
            .arg("-f")
            .arg(output)
            .arg("-N")
            .arg(passphrase)
            .arg("-C")
            .arg(comment)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| Error::KeyGeneration(format!("{} failed to launch: {e}", self.program)))?;

        if !result.status.success() {
            let mut message = String::from_utf8_lossy(&result.stdout).into_owned();
            message.push_str(&String::from_utf8_lossy(&result.stderr));
            let message = message.trim();
            return Err(Error::KeyGeneration(if message.is_empty() {
                format!("{} exited with {}", self.program, result.status)
            } else {
                message.to_string()
            }));
        }
        Ok(())
    }
}
