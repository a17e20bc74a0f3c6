//! Streamed model download with atomic install.
//!
//! Bytes go to `<dest>.part`, are hashed on the way, and the file is
//! renamed into place only after the optional checksum matches. A
//! cancelled or failed download never leaves a torn file at `dest`.

use std::path::{Path, PathBuf};

use futures::StreamExt;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::error::PipelineError;

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}

fn failed(context: &str, e: impl std::fmt::Display) -> PipelineError {
    PipelineError::ModelDownloadFailed(format!("{context}: {e}"))
}

/// Download `url` to `dest`, reporting progress in `[0, 1]`.
pub(super) async fn fetch(
    http: &reqwest::Client,
    url: &str,
    dest: &Path,
    sha256: Option<&str>,
    cancel: &CancellationToken,
    mut progress: impl FnMut(f32),
) -> Result<(), PipelineError> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| failed("create cache dir", e))?;
    }
    let part = part_path(dest);

    match fetch_to(http, url, &part, sha256, cancel, &mut progress).await {
        Ok(()) => {
            tokio::fs::rename(&part, dest)
                .await
                .map_err(|e| failed("install", e))?;
            tracing::debug!(path = %dest.display(), "download installed");
            Ok(())
        }
        Err(e) => {
            let _ = tokio::fs::remove_file(&part).await;
            Err(e)
        }
    }
}

async fn fetch_to(
    http: &reqwest::Client,
    url: &str,
    part: &Path,
    sha256: Option<&str>,
    cancel: &CancellationToken,
    progress: &mut impl FnMut(f32),
) -> Result<(), PipelineError> {
    let response = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
        r = http.get(url).send() => r.map_err(|e| failed(url, e))?,
    };
    let status = response.status();
    if !status.is_success() {
        return Err(PipelineError::ModelDownloadFailed(format!(
            "{url}: HTTP {}",
            status.as_u16()
        )));
    }

    let total = response.content_length().filter(|&t| t > 0);
    let mut file = tokio::fs::File::create(part)
        .await
        .map_err(|e| failed("create file", e))?;
    let mut hasher = Sha256::new();
    let mut received: u64 = 0;
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        let chunk = chunk.map_err(|e| failed("read", e))?;
        hasher.update(&chunk);
        file.write_all(&chunk)
            .await
            .map_err(|e| failed("write", e))?;
        received += chunk.len() as u64;
        if let Some(total) = total {
            progress((received as f64 / total as f64).min(1.0) as f32);
        }
    }
    file.flush().await.map_err(|e| failed("flush", e))?;
    file.sync_all().await.map_err(|e| failed("sync", e))?;

    if let Some(expected) = sha256 {
        let actual = hex::encode(hasher.finalize());
        if !actual.eq_ignore_ascii_case(expected.trim()) {
            return Err(PipelineError::ModelDownloadFailed(format!(
                "checksum mismatch: expected {expected}, got {actual}"
            )));
        }
    }
    progress(1.0);
    Ok(())
}
