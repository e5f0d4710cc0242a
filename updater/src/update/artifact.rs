//! Download plus integrity checks shared by plugin and tool tasks.

use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use crate::core::types::Hash;
use crate::error::UpdateError;
use crate::io::signature::SignatureStatus;
use crate::update::context::{UpdateContext, signature_location};

/// One artifact to place under the install root.
pub struct ArtifactRequest<'r> {
    /// Human readable name for errors, e.g. `plugin foo 1.0.0`.
    pub subject: String,
    pub url: &'r str,
    pub signature_url: Option<&'r str>,
    pub hash: Option<&'r Hash>,
    pub signed: bool,
    /// Install-root relative destination.
    pub location: String,
}

/// Download, hash-check and signature-check an artifact.
///
/// Returns the install-root relative signature location when a signature was
/// verified. On any integrity failure the artifact (and its signature) are
/// removed before the error is returned.
#[instrument(skip_all, fields(subject = %request.subject))]
pub fn install_artifact(ctx: &UpdateContext<'_>, request: &ArtifactRequest<'_>) -> Result<Option<String>> {
    let destination = ctx.resolve(&request.location)?;
    ctx.downloader
        .fetch_artifact(request.url, request.hash, &destination)?;
    let content = ctx.fs.read(&destination)?;

    if let Some(hash) = request.hash {
        if !hash.verify(&content) {
            ctx.fs.remove_file(&destination)?;
            return Err(UpdateError::integrity(
                &request.subject,
                format!("{} hash mismatch, expected {}", hash.kind.as_str(), hash.value),
            )
            .into());
        }
        debug!(kind = hash.kind.as_str(), "hash verified");
    }

    if !request.signed {
        info!("signature check disabled, skipping");
        return Ok(None);
    }

    let Some(signature_url) = request.signature_url else {
        ctx.fs.remove_file(&destination)?;
        return Err(UpdateError::integrity(
            &request.subject,
            "signature required but the repository provides none",
        )
        .into());
    };

    let signature_rel = signature_location(&request.location);
    let signature_path = ctx.resolve(&signature_rel)?;
    ctx.downloader.fetch_to(signature_url, &signature_path)?;
    let signature = ctx.fs.read(&signature_path)?;

    match check_signature(ctx, &content, &signature) {
        Ok(fingerprint) => {
            info!(fingerprint = %fingerprint, "signature verified");
            Ok(Some(signature_rel))
        }
        Err(reason) => {
            warn!(reason = %reason, "signature rejected");
            remove_pair(ctx, &destination, Some(&signature_path))?;
            Err(UpdateError::integrity(&request.subject, reason).into())
        }
    }
}

/// Verify once; on an unknown key import it and verify exactly one more time.
fn check_signature(ctx: &UpdateContext<'_>, content: &[u8], signature: &[u8]) -> Result<String, String> {
    let status = ctx
        .verifier
        .verify(content, signature)
        .map_err(|err| format!("{:#}", err))?;

    let status = match status {
        SignatureStatus::UnknownKey { fingerprint } => {
            info!(fingerprint = %fingerprint, "unknown signing key, importing");
            ctx.verifier
                .import_key(&fingerprint)
                .map_err(|err| format!("cannot import key {}: {:#}", fingerprint, err))?;
            ctx.verifier
                .verify(content, signature)
                .map_err(|err| format!("{:#}", err))?
        }
        other => other,
    };

    match status {
        SignatureStatus::Valid { fingerprint } => Ok(fingerprint),
        SignatureStatus::UnknownKey { fingerprint } => {
            Err(format!("signing key {} is still unknown after import", fingerprint))
        }
        SignatureStatus::Invalid { reason } => Err(reason),
    }
}

/// Delete an installed artifact and its signature, both given relative to the
/// install root.
pub fn remove_artifact(ctx: &UpdateContext<'_>, location: &str, signature: Option<&str>) -> Result<()> {
    let signature_path: Option<PathBuf> = signature.map(|sig| ctx.resolve(sig)).transpose()?;
    remove_pair(ctx, &ctx.resolve(location)?, signature_path.as_deref())
}

fn remove_pair(ctx: &UpdateContext<'_>, artifact: &Path, signature: Option<&Path>) -> Result<()> {
    ctx.fs.remove_file(artifact)?;
    if let Some(signature) = signature {
        ctx.fs.remove_file(signature)?;
    }
    Ok(())
}
