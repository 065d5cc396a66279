//! Setup/initialization module - handles application startup tasks
//!
//! Includes:
//! - Logger initialization
//! - Cropping tool availability check
//! - Folder structure initialization

use anyhow::{Context, Result};
use env_logger::{Builder, Env, fmt::style::{AnsiColor, Style}};
use log::kv::Key;
use log::{error, info};
use std::io::Write;

use super::transformer::Transformer;
use crate::config::AppConfig;

// ────────────────────────────────────────────────────────────────
// Cropping Tool Check
// ────────────────────────────────────────────────────────────────

/// Probe the transformer once at startup. A missing tool is logged, not
/// fatal: every crop attempt reports it again as `NotFound`.
pub async fn check_transformer(transformer: &dyn Transformer) {
    match transformer.probe().await {
        Ok(description) => info!("Cropping tool available: {}", description),
        Err(failure) => error!(
            "Cropping tool is not available ({}). Install it before cropping images.",
            failure
        ),
    }
}

// ────────────────────────────────────────────────────────────────
// Folder Initialization
// ────────────────────────────────────────────────────────────────

pub fn initialize_folder(config: &AppConfig) -> Result<()> {
    for dir in [&config.library_root, &config.preview_dir, &config.derived_dir] {
        std::fs::create_dir_all(dir).context(format!("failed to create directory {:?}", dir))?;
    }
    Ok(())
}

// ────────────────────────────────────────────────────────────────
// Logger Initialization
// ────────────────────────────────────────────────────────────────

pub fn initialize_logger() {
    let grey = Style::new().fg_color(Some(AnsiColor::BrightBlack.into()));
    let cyan = Style::new().fg_color(Some(AnsiColor::Cyan.into()));

    Builder::from_env(Env::default().default_filter_or("info"))
        .format(move |buf, record| {
            let ts = buf.timestamp();
            let level_style = buf.default_level_style(record.level());

            // Format the raw duration to 2 decimal places
            let dur_raw = record
                .key_values()
                .get(Key::from("duration"))
                .map(|v| {
                    let s = format!("{}", v);
                    if let Some(idx) = s.find(|c: char| c.is_alphabetic()) {
                        let (num, unit) = (&s[..idx], &s[idx..]);
                        if let Ok(val) = num.parse::<f32>() {
                            return format!("{:.2} {}", val, unit);
                        }
                    }
                    s
                })
                .unwrap_or_default();

            let dur = if dur_raw.is_empty() {
                " ".repeat(10)
            } else {
                format!("{cyan}{:>10}{cyan:#}", dur_raw)
            };

            writeln!(
                buf,
                "{grey}{ts}{grey:#} {level_style}{}{level_style:#} {grey}{}{grey:#}",
                record.level(),
                record.target()
            )?;

            let message = format!("{}", record.args());
            let subsequent_indent = " ".repeat(11);
            let mut lines = message.lines();
            if let Some(first_line) = lines.next() {
                writeln!(buf, "{} {}", dur, first_line)?;
            }
            for line in lines {
                writeln!(buf, "{}{}", subsequent_indent, line)?;
            }
            Ok(())
        })
        .filter(Some("rocket"), log::LevelFilter::Warn)
        .filter(Some("_"), log::LevelFilter::Warn)
        .init();
}

pub async fn initialize(config: &AppConfig, transformer: &dyn Transformer) -> Result<()> {
    initialize_folder(config)?;
    check_transformer(transformer).await;
    Ok(())
}
