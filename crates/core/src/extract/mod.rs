//! # Structured Extractor
//!
//! Recovers a schema-conformant record from free-form generator text.
//!
//! ```text
//! raw text ─▶ first fenced block ─▶ first '{' .. last '}'
//!          ─▶ strict parse ─▶ strip trailing commas ─▶ strict parse
//!          ─▶ escape string literals ─▶ strict parse ─▶ lenient parse
//!          ─▶ typed validation (serde)
//! ```
//!
//! Nothing here panics or aborts a run: every failure comes back as an
//! [`ExtractError`] so the caller can substitute a schema-specific default.

pub mod repair;

use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::OnceLock;
use thiserror::Error;

/// Recoverable parse failure
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("no JSON object found in generator output")]
    NoObject,

    /// Every repair pass failed; `best_effort` is the most repaired candidate
    #[error("could not parse generator output: {reason}")]
    Unparseable { best_effort: String, reason: String },

    /// Parsed, but the value does not fit the target schema
    #[error("generator output does not match schema: {0}")]
    Invalid(String),
}

impl ExtractError {
    /// The repaired text when parsing ultimately failed
    pub fn best_effort(&self) -> Option<&str> {
        match self {
            Self::Unparseable { best_effort, .. } => Some(best_effort),
            _ => None,
        }
    }
}

/// How the candidate object was recovered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recovered {
    /// The candidate strict-parsed without changes
    Clean(String),
    /// One or more repair passes were needed
    Repaired(String),
}

impl Recovered {
    pub fn text(&self) -> &str {
        match self {
            Self::Clean(t) | Self::Repaired(t) => t,
        }
    }

    pub fn into_text(self) -> String {
        match self {
            Self::Clean(t) | Self::Repaired(t) => t,
        }
    }
}

fn fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)```(?:json)?(.*?)```").expect("static regex"))
}

/// Steps 1-2: narrow raw text down to the candidate object span
pub fn locate_object(text: &str) -> Result<&str, ExtractError> {
    let working = fence_re()
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or(text);

    let start = working.find('{').ok_or(ExtractError::NoObject)?;
    let end = working.rfind('}').ok_or(ExtractError::NoObject)?;
    if end < start {
        return Err(ExtractError::NoObject);
    }
    Ok(&working[start..=end])
}

fn parses(text: &str) -> bool {
    serde_json::from_str::<Value>(text).is_ok()
}

/// Apply the repair passes to an already located candidate.
///
/// Text that already strict-parses is returned untouched, which makes the
/// operation idempotent.
pub fn repair(candidate: &str) -> Result<Recovered, ExtractError> {
    if parses(candidate) {
        return Ok(Recovered::Clean(candidate.to_string()));
    }

    let without_commas = repair::strip_trailing_commas(candidate);
    if parses(&without_commas) {
        return Ok(Recovered::Repaired(without_commas));
    }

    let escaped = repair::escape_string_literals(&without_commas);
    if parses(&escaped) {
        return Ok(Recovered::Repaired(escaped));
    }

    // Lenient: drop control characters the scanner could not place
    let lenient = repair::strip_control_chars(&escaped);
    match serde_json::from_str::<Value>(&lenient) {
        Ok(_) => Ok(Recovered::Repaired(lenient)),
        Err(e) => Err(ExtractError::Unparseable {
            best_effort: escaped,
            reason: e.to_string(),
        }),
    }
}

/// Locate and repair; the returned text always strict-parses
pub fn extract_json_object(text: &str) -> Result<Recovered, ExtractError> {
    let candidate = locate_object(text)?;
    let recovered = repair(candidate)?;
    if matches!(recovered, Recovered::Repaired(_)) {
        tracing::debug!(len = candidate.len(), "Repaired generator JSON");
    }
    Ok(recovered)
}

/// Extract an untyped JSON object
pub fn extract_value(text: &str) -> Result<Value, ExtractError> {
    let recovered = extract_json_object(text)?;
    serde_json::from_str(recovered.text()).map_err(|e| ExtractError::Unparseable {
        best_effort: recovered.into_text(),
        reason: e.to_string(),
    })
}

/// Extract and validate a typed record.
///
/// Unknown fields are ignored; missing fields fall back to their serde
/// defaults where declared, otherwise validation fails.
pub fn extract<T: DeserializeOwned>(text: &str) -> Result<T, ExtractError> {
    let value = extract_value(text)?;
    serde_json::from_value(value).map_err(|e| ExtractError::Invalid(e.to_string()))
}

/// Extract a typed record, substituting `fallback` on any failure
pub fn extract_or_else<T, F>(text: &str, what: &str, fallback: F) -> T
where
    T: DeserializeOwned,
    F: FnOnce() -> T,
{
    match extract(text) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(record = what, error = %e, "Extraction failed, using fallback");
            fallback()
        }
    }
}
