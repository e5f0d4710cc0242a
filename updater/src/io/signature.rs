//! Detached-signature verification.
//!
//! The [`SignatureVerifier`] trait decouples tasks from the crypto backend.
//! [`GpgVerifier`] drives `gpg` in a private home directory; tests use a
//! scripted verifier.

use std::path::PathBuf;
use std::process::Command;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use regex::Regex;
use tracing::{debug, info, instrument, warn};

use crate::io::process::run_command_with_timeout;

const GPG_OUTPUT_LIMIT_BYTES: usize = 64 * 1024;

static KEY_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(0x)?([0-9A-Fa-f]{16}|[0-9A-Fa-f]{40})$").expect("key id regex is valid")
});

/// Outcome of a signature check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureStatus {
    Valid { fingerprint: String },
    /// The signing key is not in the keyring; importing it may help.
    UnknownKey { fingerprint: String },
    Invalid { reason: String },
}

/// Abstraction over signature backends.
pub trait SignatureVerifier {
    /// Check `signature` (detached, armored or binary) against `content`.
    fn verify(&self, content: &[u8], signature: &[u8]) -> Result<SignatureStatus>;

    /// Fetch and import the public key `fingerprint`. Deciding whether the
    /// key may be trusted is the verifier's concern.
    fn import_key(&self, fingerprint: &str) -> Result<()>;
}

/// Verifier backed by the `gpg` binary.
#[derive(Debug, Clone)]
pub struct GpgVerifier {
    pub binary: PathBuf,
    /// Private keyring directory, created on first use.
    pub home: PathBuf,
    pub keyserver: String,
    /// Fingerprints allowed for import. Empty means any key may be imported.
    pub trusted_keys: Vec<String>,
    pub timeout: Duration,
}

impl GpgVerifier {
    fn command(&self) -> Result<Command> {
        std::fs::create_dir_all(&self.home)
            .with_context(|| format!("create gpg home {}", self.home.display()))?;
        restrict_permissions(&self.home)?;
        let mut cmd = Command::new(&self.binary);
        cmd.arg("--homedir").arg(&self.home).arg("--batch");
        Ok(cmd)
    }

    fn is_trusted(&self, fingerprint: &str) -> bool {
        if self.trusted_keys.is_empty() {
            return true;
        }
        let wanted = normalize_key_id(fingerprint);
        self.trusted_keys.iter().any(|trusted| {
            let trusted = normalize_key_id(trusted);
            trusted.ends_with(&wanted) || wanted.ends_with(&trusted)
        })
    }
}

impl SignatureVerifier for GpgVerifier {
    #[instrument(skip_all, fields(content_len = content.len()))]
    fn verify(&self, content: &[u8], signature: &[u8]) -> Result<SignatureStatus> {
        let scratch = tempfile::tempdir().context("create signature scratch dir")?;
        let content_path = scratch.path().join("artifact");
        let signature_path = scratch.path().join("artifact.sig");
        std::fs::write(&content_path, content).context("write artifact for gpg")?;
        std::fs::write(&signature_path, signature).context("write signature for gpg")?;

        let mut cmd = self.command()?;
        cmd.arg("--status-fd")
            .arg("1")
            .arg("--verify")
            .arg(&signature_path)
            .arg(&content_path);
        let output = run_command_with_timeout(cmd, self.timeout, GPG_OUTPUT_LIMIT_BYTES)
            .context("run gpg --verify")?;
        if output.timed_out {
            bail!("gpg --verify timed out after {:?}", self.timeout);
        }

        let status = parse_status_output(&output.stdout_text());
        debug!(?status, exit_code = ?output.status.code(), "gpg verify finished");
        Ok(status)
    }

    #[instrument(skip(self))]
    fn import_key(&self, fingerprint: &str) -> Result<()> {
        if !KEY_ID.is_match(fingerprint) {
            bail!("refusing to import malformed key id '{}'", fingerprint);
        }
        if !self.is_trusted(fingerprint) {
            warn!(fingerprint, "key is not in trusted_keys");
            bail!("key {} is not trusted", fingerprint);
        }

        info!(fingerprint, keyserver = %self.keyserver, "importing public key");
        let mut cmd = self.command()?;
        cmd.arg("--keyserver")
            .arg(&self.keyserver)
            .arg("--recv-keys")
            .arg(fingerprint);
        let output = run_command_with_timeout(cmd, self.timeout, GPG_OUTPUT_LIMIT_BYTES)
            .context("run gpg --recv-keys")?;
        output
            .ensure_success("gpg --recv-keys")
            .map_err(|err| anyhow!("import key {}: {:#}", fingerprint, err))
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &std::path::Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
        .with_context(|| format!("restrict permissions of {}", path.display()))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &std::path::Path) -> Result<()> {
    Ok(())
}

fn normalize_key_id(raw: &str) -> String {
    raw.trim()
        .trim_start_matches("0x")
        .replace(' ', "")
        .to_ascii_uppercase()
}

/// Map `gpg --status-fd` lines to a status.
///
/// `VALIDSIG` wins; `NO_PUBKEY` or `ERRSIG` with reason 9 mean the key is
/// missing; anything else is invalid.
pub fn parse_status_output(status: &str) -> SignatureStatus {
    let mut unknown: Option<String> = None;
    let mut bad: Option<String> = None;

    for line in status.lines() {
        let Some(rest) = line.strip_prefix("[GNUPG:] ") else {
            continue;
        };
        let mut fields = rest.split_whitespace();
        let keyword = fields.next().unwrap_or_default();
        let first = fields.next().unwrap_or_default().to_string();
        match keyword {
            "VALIDSIG" => return SignatureStatus::Valid { fingerprint: first },
            "NO_PUBKEY" => unknown = Some(first),
            "ERRSIG" => {
                if rest.split_whitespace().nth(6) == Some("9") {
                    unknown.get_or_insert(first);
                } else {
                    bad = Some(format!("signature error for key {}", first));
                }
            }
            "BADSIG" => bad = Some(format!("bad signature from key {}", first)),
            "EXPKEYSIG" | "REVKEYSIG" => {
                bad = Some(format!("signing key {} expired or revoked", first));
            }
            _ => {}
        }
    }

    if let Some(reason) = bad {
        return SignatureStatus::Invalid { reason };
    }
    match unknown {
        Some(fingerprint) => SignatureStatus::UnknownKey { fingerprint },
        None => SignatureStatus::Invalid {
            reason: "gpg reported no valid signature".to_string(),
        },
    }
}
