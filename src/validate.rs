//! Argument validation for paths and URLs
//!
//! The engine's path arguments must be absolute local paths with a filename
//! component, given either `/`-rooted or as a `file://` URL. URLs must be
//! absolute `http`/`https` with a host.

use std::path::Path;

use crate::error::EngineError;

/// Validates and normalizes a download path.
///
/// Accepts a `/`-rooted absolute path or a `file://` URL of one; returns
/// the plain filesystem path. Idempotent on accepted values.
pub fn parse_path(path: &str) -> crate::Result<String> {
    if path.is_empty() {
        return Err(EngineError::InvalidPath("path cannot be empty".to_string()));
    }

    let plain = match path.strip_prefix("file://") {
        Some(rest) if rest.starts_with('/') => rest,
        Some(_) => {
            return Err(EngineError::InvalidPath(
                "file URL must carry an absolute path".to_string(),
            ));
        }
        None => path,
    };

    let p = Path::new(plain);

    if !p.is_absolute() {
        return Err(EngineError::InvalidPath("path must be absolute".to_string()));
    }

    if p.file_name().is_none() {
        return Err(EngineError::InvalidPath(
            "path must have a filename".to_string(),
        ));
    }

    Ok(plain.to_string())
}

/// Validates a download URL.
///
/// Checks that the URL parses, uses the `http` or `https` scheme and has a
/// non-empty host.
pub fn validate_url(url: &str) -> crate::Result<()> {
    if url.is_empty() {
        return Err(EngineError::InvalidUrl("URL cannot be empty".to_string()));
    }

    let parsed =
        url::Url::parse(url).map_err(|e| EngineError::InvalidUrl(format!("{}", e)))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(EngineError::InvalidUrl(format!(
                "scheme '{}' is not supported: must be http or https",
                scheme
            )));
        }
    }

    if parsed.host().is_none() {
        return Err(EngineError::InvalidUrl("URL must have a host".to_string()));
    }

    Ok(())
}
