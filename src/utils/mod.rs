use log::warn;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::common::MAX_COPY_RETRIES;

const COPY_RETRY_DELAY_MS: u64 = 100;

pub trait PathExt {
    fn ext_lower(&self) -> String;
}

impl PathExt for Path {
    fn ext_lower(&self) -> String {
        self.extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_ascii_lowercase())
            .unwrap_or_default()
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Append a `v=<ms>` query parameter so clients cannot serve a stale copy.
pub fn cache_busted(url: &str, version_ms: i64) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}v={version_ms}")
}

/// `<path>.<suffix>`, keeping the original extension in place.
pub fn with_appended_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

/// Sibling temp path in the same directory, so the final rename never crosses
/// a filesystem boundary.
pub fn sibling_temp_path(path: &Path, tag: &str) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_name = format!(".{file_name}.{tag}.{}.tmp", uuid::Uuid::new_v4().simple());
    match path.parent() {
        Some(parent) => parent.join(temp_name),
        None => PathBuf::from(temp_name),
    }
}

// ────────────────────────────────────────────────────────────────
// All-or-nothing file replacement
// ────────────────────────────────────────────────────────────────

/// Removes a half-written file when dropped, unless disarmed. Covers both the
/// error path and a future dropped at an await point.
pub struct PartialFile<'a> {
    path: &'a Path,
    armed: bool,
}

impl<'a> PartialFile<'a> {
    pub fn new(path: &'a Path) -> Self {
        Self { path, armed: true }
    }

    pub fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PartialFile<'_> {
    fn drop(&mut self) {
        if self.armed {
            match std::fs::remove_file(self.path) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => warn!("Failed to remove partial file {:?}: {}", self.path, err),
            }
        }
    }
}

/// Write `bytes` to a temp sibling and rename it over `destination`.
pub async fn atomic_write(destination: &Path, bytes: &[u8]) -> io::Result<()> {
    let temp = sibling_temp_path(destination, "write");
    let partial = PartialFile::new(&temp);
    tokio::fs::write(&temp, bytes).await?;
    tokio::fs::rename(&temp, destination).await?;
    partial.disarm();
    Ok(())
}

/// Copy `source` to a temp sibling of `destination` (retrying transient
/// failures) and rename it into place.
pub async fn atomic_copy(source: &Path, destination: &Path) -> io::Result<()> {
    let temp = sibling_temp_path(destination, "copy");
    let partial = PartialFile::new(&temp);
    copy_with_retry(source, &temp).await?;
    tokio::fs::rename(&temp, destination).await?;
    partial.disarm();
    Ok(())
}

pub async fn copy_with_retry(source: &Path, destination: &Path) -> io::Result<u64> {
    let mut delay = Duration::from_millis(COPY_RETRY_DELAY_MS);
    let mut attempt = 0;
    loop {
        match tokio::fs::copy(source, destination).await {
            Ok(bytes) => return Ok(bytes),
            // A missing source will not appear by waiting.
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Err(err),
            Err(err) if attempt < MAX_COPY_RETRIES => {
                attempt += 1;
                warn!(
                    "Attempt {}/{} failed to copy {:?} -> {:?}: {}. Retrying in {:?}",
                    attempt,
                    MAX_COPY_RETRIES + 1,
                    source,
                    destination,
                    err,
                    delay
                );
                tokio::time::sleep(delay).await;
                delay = delay.checked_mul(2).unwrap_or(delay);
            }
            Err(err) => return Err(err),
        }
    }
}

/// Remove a file, treating "already gone" as success. Returns whether a file
/// was actually removed.
pub async fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}
