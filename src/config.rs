use anyhow::{Context, Result, bail};
use dotenv::dotenv;
use log::info;
use rand::{TryRngCore, rngs::OsRng};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

use crate::common::{MAX_BATCH_IDS, MAX_SELECTION_OWNERS};

/// Runtime configuration, read from `CROPPER_*` environment variables
/// (and a `.env` file when present). Every field has a default.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Directory holding the catalog's image files
    pub library_root: PathBuf,
    /// JSON manifest describing categories, owners and their images
    pub catalog_manifest: PathBuf,
    /// Where staged previews are written
    pub preview_dir: PathBuf,
    /// Where regenerated derived sizes are written
    pub derived_dir: PathBuf,
    /// URL prefix under which library files are served
    pub public_base_url: String,

    /// Executables tried in order; the first that answers the probe wins
    pub tool_candidates: Vec<String>,
    pub tool_probe_args: Vec<String>,
    /// Script handed to the interpreter as first argument, if any
    pub tool_script: Option<PathBuf>,

    pub probe_timeout_ms: u64,
    pub invoker_timeout_secs: u64,
    pub item_timeout_secs: u64,
    pub master_deadline_secs: u64,
    pub pacing_ms: u64,
    pub reencode_timeout_secs: u64,
    pub error_fraction: f64,
    pub max_batch_ids: usize,
    pub max_selection_owners: usize,

    pub retention_days: u64,
    pub sweep_interval_secs: u64,
    pub watchdog_interval_secs: u64,
    pub stale_threshold_secs: u64,

    /// Secret for anti-forgery tokens; a random one is generated when unset
    pub auth_key: Option<String>,
    pub nonce_lifetime_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            library_root: PathBuf::from("./library"),
            catalog_manifest: PathBuf::from("./library/catalog.json"),
            preview_dir: PathBuf::from("./object/previews"),
            derived_dir: PathBuf::from("./object/derived"),
            public_base_url: "/library".to_string(),
            tool_candidates: ["python3", "python", "/usr/bin/python3", "/usr/bin/python"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            tool_probe_args: vec!["--version".to_string()],
            tool_script: Some(PathBuf::from("./tools/cropper.py")),
            probe_timeout_ms: 5_000,
            invoker_timeout_secs: 55,
            item_timeout_secs: 75,
            master_deadline_secs: 480,
            pacing_ms: 1_200,
            reencode_timeout_secs: 20,
            error_fraction: 0.4,
            max_batch_ids: MAX_BATCH_IDS,
            max_selection_owners: MAX_SELECTION_OWNERS,
            retention_days: 7,
            sweep_interval_secs: 3_600,
            watchdog_interval_secs: 30,
            stale_threshold_secs: 300,
            auth_key: None,
            nonce_lifetime_secs: 86_400,
        }
    }
}

static FALLBACK_SECRET_KEY: LazyLock<Vec<u8>> = LazyLock::new(|| {
    let mut secret = vec![0u8; 32];
    OsRng
        .try_fill_bytes(&mut secret)
        .expect("Failed to generate random secret key");
    secret
});

impl AppConfig {
    /// Load from the process environment and validate the timeout composition.
    pub fn load() -> Result<Self> {
        dotenv().ok();
        let config = envy::prefixed("CROPPER_")
            .from_env::<AppConfig>()
            .context("Failed to read CROPPER_* environment variables")?;
        config.validate()?;
        info!(
            "Config loaded: library {:?}, previews {:?}, tool candidates {:?}",
            config.library_root, config.preview_dir, config.tool_candidates
        );
        Ok(config)
    }

    /// Invoker < per-item < master, and the watchdog never fires on a
    /// legitimate single item.
    pub fn validate(&self) -> Result<()> {
        if self.invoker_timeout() >= self.item_timeout() {
            bail!(
                "invoker timeout ({:?}) must be shorter than the per-item timeout ({:?})",
                self.invoker_timeout(),
                self.item_timeout()
            );
        }
        if self.item_timeout() >= self.master_deadline() {
            bail!(
                "per-item timeout ({:?}) must be shorter than the batch deadline ({:?})",
                self.item_timeout(),
                self.master_deadline()
            );
        }
        if self.stale_threshold() <= self.item_timeout() + self.pacing() {
            bail!(
                "stale threshold ({:?}) must exceed one item plus pacing ({:?})",
                self.stale_threshold(),
                self.item_timeout() + self.pacing()
            );
        }
        if !(self.error_fraction > 0.0 && self.error_fraction <= 1.0) {
            bail!("error fraction must be in (0, 1], got {}", self.error_fraction);
        }
        if self.tool_candidates.is_empty() {
            bail!("at least one tool candidate is required");
        }
        if self.max_batch_ids == 0 || self.max_selection_owners == 0 {
            bail!("batch and selection caps must be positive");
        }
        Ok(())
    }

    pub fn get_jwt_secret_key(&self) -> Vec<u8> {
        match self.auth_key.as_ref() {
            Some(auth_key) => auth_key.as_bytes().to_vec(),
            None => FALLBACK_SECRET_KEY.clone(),
        }
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn invoker_timeout(&self) -> Duration {
        Duration::from_secs(self.invoker_timeout_secs)
    }

    pub fn item_timeout(&self) -> Duration {
        Duration::from_secs(self.item_timeout_secs)
    }

    pub fn master_deadline(&self) -> Duration {
        Duration::from_secs(self.master_deadline_secs)
    }

    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }

    pub fn reencode_timeout(&self) -> Duration {
        Duration::from_secs(self.reencode_timeout_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_days * 24 * 60 * 60)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_secs(self.watchdog_interval_secs)
    }

    pub fn stale_threshold(&self) -> Duration {
        Duration::from_secs(self.stale_threshold_secs)
    }

    pub fn nonce_lifetime(&self) -> Duration {
        Duration::from_secs(self.nonce_lifetime_secs)
    }
}
