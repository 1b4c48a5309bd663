//! Run id sanitization
//!
//! Run ids name the run directory under `<home>/runs/`, so they are reduced
//! to `[A-Za-z0-9._-]` before any path is built from them.

use unicode_normalization::UnicodeNormalization;

use brdflow_utils::error::{BrdflowError, ConfigError};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RunIdError {
    #[error("Run id is empty")]
    Empty,

    #[error("Run id '{0}' contains no usable characters")]
    NoUsableCharacters(String),
}

/// NFKC-normalize `raw`, replace characters outside `[A-Za-z0-9._-]` with `_`
/// and break up `..` sequences.
///
/// ```
/// use brdflow::run_id::sanitize_run_id;
///
/// assert_eq!(sanitize_run_id("shop-1").unwrap(), "shop-1");
/// assert_eq!(sanitize_run_id("shop run/1").unwrap(), "shop_run_1");
/// assert_eq!(sanitize_run_id("../etc").unwrap(), "___etc");
/// ```
///
/// # Errors
///
/// [`RunIdError`] when nothing usable is left.
pub fn sanitize_run_id(raw: &str) -> Result<String, RunIdError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(RunIdError::Empty);
    }

    let mut id: String = trimmed
        .nfkc()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    while id.contains("..") {
        id = id.replace("..", "__");
    }

    if id.chars().all(|c| c == '_' || c == '.') {
        return Err(RunIdError::NoUsableCharacters(raw.to_string()));
    }
    if id != trimmed {
        tracing::warn!(raw = %raw, sanitized = %id, "Run id sanitized");
    }
    Ok(id)
}

impl From<RunIdError> for BrdflowError {
    fn from(err: RunIdError) -> Self {
        ConfigError::InvalidValue {
            key: "run_id".to_string(),
            value: err.to_string(),
        }
        .into()
    }
}
