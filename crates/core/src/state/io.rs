//! # IO Utilities
//!
//! File system helpers for the `.beacon` runtime directory and for campaign
//! output folders.

use anyhow::{Context, Result};
use chrono::Utc;
use regex::Regex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tokio::fs;

/// Longest slug produced by [`slugify`]
pub const MAX_SLUG_LEN: usize = 60;

/// Get the runtime directory path (.beacon)
///
/// Holds the checkpoint database and the persisted CLI config.
pub fn get_runtime_path() -> PathBuf {
    if let Ok(path) = std::env::var("BEACON_RUNTIME_PATH") {
        return PathBuf::from(path);
    }

    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(".beacon")
}

/// Ensure the runtime directory exists
pub async fn ensure_runtime_dir() -> Result<PathBuf> {
    let path = get_runtime_path();
    ensure_directory(&path).await?;
    Ok(path)
}

/// Create a directory (and parents) if needed
pub async fn ensure_directory(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    fs::create_dir_all(path)
        .await
        .with_context(|| format!("Failed to create directory: {:?}", path))?;
    Ok(path.to_path_buf())
}

/// Write a text file, creating parent directories
pub async fn write_text(path: impl AsRef<Path>, content: &str) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::write(path, content)
        .await
        .with_context(|| format!("Failed to write file: {:?}", path))
}

/// Write bytes, creating parent directories
pub async fn write_bytes(path: impl AsRef<Path>, content: &[u8]) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::write(path, content)
        .await
        .with_context(|| format!("Failed to write file: {:?}", path))
}

/// Pretty-print a value as UTF-8 JSON
pub async fn dump_json<T: Serialize + ?Sized>(data: &T, path: impl AsRef<Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(data).context("Failed to serialize JSON")?;
    write_text(path, &json).await
}

/// Compact UTC timestamp for folder and file naming
pub fn timestamp_id() -> String {
    Utc::now().format("%Y%m%d_%H%M%S").to_string()
}

fn non_alnum_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^a-z0-9]+").expect("static regex"))
}

/// Lowercase, hyphen-separated slug of at most [`MAX_SLUG_LEN`] characters
pub fn slugify(value: &str) -> String {
    let lowered = value.trim().to_lowercase();
    let slug = non_alnum_re().replace_all(&lowered, "-");
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        return "campaign".to_string();
    }
    slug.chars()
        .take(MAX_SLUG_LEN)
        .collect::<String>()
        .trim_end_matches('-')
        .to_string()
}

/// Truncate to at most `max` characters, on a char boundary
pub fn truncate(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}
