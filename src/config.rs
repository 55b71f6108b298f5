//! Runtime settings assembled from the environment.
//!
//! The server is configured entirely through environment variables:
//!
//! - `DEFAULT_DOWNLOAD_PATH` — overrides the default save directory
//!   (`<home>/Downloads` otherwise). Relative values are ignored with a
//!   warning, since resolved output paths must be absolute.
//! - `OPENAI_API_KEY` — consumed by the OpenAI client, not read here.

use std::path::PathBuf;

/// Validated runtime settings.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    /// Download directory override, absolute if present.
    pub download_dir: Option<PathBuf>,
}

impl Settings {
    /// Reads settings from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        let download_dir = std::env::var("DEFAULT_DOWNLOAD_PATH")
            .ok()
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .and_then(|dir| {
                if dir.is_absolute() {
                    Some(dir)
                } else {
                    tracing::warn!(
                        dir = %dir.display(),
                        "Ignoring relative DEFAULT_DOWNLOAD_PATH"
                    );
                    None
                }
            });

        Self { download_dir }
    }
}
