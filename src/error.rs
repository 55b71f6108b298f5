//! Error types for imagegen-mcp.
//!
//! # Security Note
//!
//! The OpenAI API key is never part of any error variant. Backend errors
//! carry the HTTP status and response body only.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while resolving an output path.
#[derive(Error, Debug)]
pub enum PathError {
    /// No home directory could be determined for the fallback location.
    #[error("could not determine user home directory for default download path")]
    NoHomeDir,

    /// The default download directory could not be created.
    #[error("failed to create download directory: {path}")]
    CreateDir {
        /// Directory that could not be created.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Every candidate filename was already taken.
    #[error("could not generate a unique filename after {attempts} attempts")]
    Exhausted {
        /// Number of suffixed candidates that were tried.
        attempts: u32,
    },
}

/// Errors that can occur while talking to the image generation backend.
#[derive(Error, Debug)]
pub enum BackendError {
    /// The API credential environment variable is not set.
    #[error("OPENAI_API_KEY environment variable not set")]
    MissingApiKey,

    /// The HTTP request itself failed (connect, timeout, TLS, ...).
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The API answered with a non-success status.
    #[error("API error (status {status}): {body}")]
    Api {
        /// HTTP status code returned by the API.
        status: u16,
        /// Response body, as returned by the API.
        body: String,
    },

    /// The API response contained no image URL.
    #[error("no image URL in response")]
    EmptyResponse,

    /// Writing the downloaded image to disk failed.
    #[error("failed to write image to {path}")]
    Write {
        /// Destination path that could not be written.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_error_display() {
        let error = PathError::Exhausted { attempts: 100 };
        let msg = error.to_string();
        assert!(msg.contains("100 attempts"));
    }

    #[test]
    fn backend_error_display() {
        let error = BackendError::Api {
            status: 429,
            body: "rate limited".to_string(),
        };
        let msg = error.to_string();
        assert!(msg.contains("429"));
        assert!(msg.contains("rate limited"));
    }

    #[test]
    fn missing_key_display() {
        let msg = BackendError::MissingApiKey.to_string();
        assert!(msg.contains("OPENAI_API_KEY"));
    }
}
