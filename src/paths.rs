//! Output path resolution for generated images.
//!
//! A tool call may carry an explicit `destination` hint; absent that, a
//! filename is derived from the prompt itself. Either way the final path
//! must land in a usable directory and must not clobber an existing file,
//! so resolution walks a chain of fallbacks:
//!
//! 1. explicit destination hint
//! 2. `DEFAULT_DOWNLOAD_PATH` environment override
//! 3. `<home>/Downloads`
//!
//! Collision avoidance appends a random 4-digit suffix, bounded at 100
//! attempts. The existence check and suffix source are injectable so the
//! retry loop can be tested without touching the filesystem.
//!
//! The check-then-use sequence is not atomic; that race is acceptable
//! because the server handles one request at a time.

use std::path::{Path, PathBuf};

use crate::error::PathError;

/// Canonical extension for saved images.
pub const IMAGE_EXT: &str = "png";

/// Maximum number of suffixed filenames tried before giving up.
pub const MAX_ATTEMPTS: u32 = 100;

/// Longest sanitised filename stem, in bytes.
const MAX_STEM_LEN: usize = 50;

/// Stem used when a prompt sanitises down to nothing.
const FALLBACK_STEM: &str = "image";

/// Resolves destination hints and prompts into collision-free output paths.
///
/// Holds the default download directory, determined once at startup.
pub struct PathResolver {
    /// Directory used when no usable destination hint is given.
    default_dir: PathBuf,
}

impl PathResolver {
    /// Creates a resolver with an explicit default directory.
    #[must_use]
    pub const fn new(default_dir: PathBuf) -> Self {
        Self { default_dir }
    }

    /// Creates a resolver from the environment.
    ///
    /// Uses the validated `DEFAULT_DOWNLOAD_PATH` override when present,
    /// otherwise `<home>/Downloads`.
    ///
    /// # Errors
    ///
    /// Returns [`PathError::NoHomeDir`] if no override is set and the home
    /// directory cannot be determined.
    pub fn from_env() -> Result<Self, PathError> {
        let settings = crate::config::Settings::from_env();
        match settings.download_dir {
            Some(dir) => Ok(Self::new(dir)),
            None => {
                let home = dirs::home_dir().ok_or(PathError::NoHomeDir)?;
                Ok(Self::new(home.join("Downloads")))
            }
        }
    }

    /// Returns the default download directory.
    #[must_use]
    pub fn default_dir(&self) -> &Path {
        &self.default_dir
    }

    /// Resolves a destination hint and prompt into an absolute, non-colliding
    /// output path.
    ///
    /// # Errors
    ///
    /// Returns an error if the fallback directory cannot be created or no
    /// free filename is found within [`MAX_ATTEMPTS`] attempts.
    pub fn resolve(&self, destination: Option<&str>, prompt: &str) -> Result<PathBuf, PathError> {
        let candidate = match destination {
            Some(dest) if !dest.is_empty() => PathBuf::from(dest),
            _ => {
                let mut stem = sanitize_prompt(prompt);
                if stem.is_empty() {
                    stem = FALLBACK_STEM.to_string();
                }
                self.default_dir.join(format!("{stem}.{IMAGE_EXT}"))
            }
        };

        let filename = candidate
            .file_name()
            .map_or_else(|| format!("{FALLBACK_STEM}.{IMAGE_EXT}"), |n| {
                normalize_extension(&n.to_string_lossy())
            });

        let dir = candidate.parent().map(Path::to_path_buf).unwrap_or_default();
        let dir = if directory_is_usable(&dir) {
            dir
        } else {
            tracing::warn!(
                requested = %dir.display(),
                fallback = %self.default_dir.display(),
                "Destination directory unusable, falling back to default"
            );
            std::fs::create_dir_all(&self.default_dir).map_err(|e| PathError::CreateDir {
                path: self.default_dir.clone(),
                source: e,
            })?;
            self.default_dir.clone()
        };

        unique_path(&dir, &filename, |p| p.exists(), || fastrand::u32(1000..10000))
    }
}

/// Derives a filename stem from a free-text prompt.
///
/// Takes at most the first 4 whitespace-delimited words, joins them with
/// `-`, replaces every character outside `[A-Za-z0-9-]` with `-`, truncates
/// to 50 bytes and trims leading/trailing `-`.
#[must_use]
pub fn sanitize_prompt(prompt: &str) -> String {
    let joined = prompt
        .split_whitespace()
        .take(4)
        .collect::<Vec<_>>()
        .join("-");

    let mut sanitized: String = joined
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect();

    // All characters are ASCII at this point, byte truncation is safe.
    sanitized.truncate(MAX_STEM_LEN);

    sanitized.trim_matches('-').to_string()
}

/// Forces the canonical image extension onto a filename.
///
/// A missing or wrong extension is replaced; a correct one (any case) is
/// kept as-is.
#[must_use]
pub fn normalize_extension(filename: &str) -> String {
    let lower = filename.to_lowercase();
    if lower.ends_with(&format!(".{IMAGE_EXT}")) {
        return filename.to_string();
    }

    let stem = Path::new(filename)
        .file_stem()
        .map_or_else(|| filename.to_string(), |s| s.to_string_lossy().into_owned());

    format!("{stem}.{IMAGE_EXT}")
}

/// Checks whether a directory can receive the output file.
///
/// The directory must be absolute, must not be the filesystem root or
/// contain `..`/`.` components, and must exist as a directory.
#[must_use]
pub fn directory_is_usable(dir: &Path) -> bool {
    if !dir.is_absolute() {
        return false;
    }

    if dir.parent().is_none() {
        // Filesystem root
        return false;
    }

    let has_dots = dir.components().any(|c| {
        matches!(
            c,
            std::path::Component::ParentDir | std::path::Component::CurDir
        )
    });
    if has_dots {
        return false;
    }

    dir.is_dir()
}

/// Picks the first path in `dir` that does not exist.
///
/// Tries `filename` verbatim first, then up to [`MAX_ATTEMPTS`] variants
/// with a random 4-digit suffix inserted before the extension. The
/// existence predicate and suffix source are injected so tests can run
/// deterministically without filesystem access.
///
/// # Errors
///
/// Returns [`PathError::Exhausted`] when every candidate already exists.
pub fn unique_path(
    dir: &Path,
    filename: &str,
    exists: impl Fn(&Path) -> bool,
    mut suffix: impl FnMut() -> u32,
) -> Result<PathBuf, PathError> {
    let first = dir.join(filename);
    if !exists(&first) {
        return Ok(first);
    }

    let (stem, ext) = match filename.rsplit_once('.') {
        Some((stem, ext)) => (stem, ext),
        None => (filename, IMAGE_EXT),
    };

    for _ in 0..MAX_ATTEMPTS {
        let candidate = dir.join(format!("{stem}-{}.{ext}", suffix()));
        if !exists(&candidate) {
            return Ok(candidate);
        }
    }

    Err(PathError::Exhausted {
        attempts: MAX_ATTEMPTS,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_keeps_at_most_four_words() {
        let stem = sanitize_prompt("a red fox in deep winter snow");
        assert_eq!(stem, "a-red-fox-in");
    }

    #[test]
    fn sanitize_replaces_special_characters() {
        let stem = sanitize_prompt("hello, world! (test)");
        assert!(stem.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'));
    }

    #[test]
    fn sanitize_truncates_to_fifty() {
        let prompt = "x".repeat(120);
        assert!(sanitize_prompt(&prompt).len() <= 50);
    }

    #[test]
    fn sanitize_trims_hyphens() {
        let stem = sanitize_prompt("!leading and trailing!");
        assert!(!stem.starts_with('-'));
        assert!(!stem.ends_with('-'));
    }

    #[test]
    fn sanitize_unicode_prompt_collapses() {
        let stem = sanitize_prompt("café über 日本 test extra");
        assert!(stem.is_ascii());
        assert!(stem.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'));
    }

    #[test]
    fn normalize_appends_missing_extension() {
        assert_eq!(normalize_extension("picture"), "picture.png");
    }

    #[test]
    fn normalize_replaces_wrong_extension() {
        assert_eq!(normalize_extension("picture.jpg"), "picture.png");
    }

    #[test]
    fn normalize_keeps_correct_extension() {
        assert_eq!(normalize_extension("picture.png"), "picture.png");
        assert_eq!(normalize_extension("picture.PNG"), "picture.PNG");
    }

    #[test]
    fn root_directory_is_rejected() {
        assert!(!directory_is_usable(Path::new("/")));
    }

    #[test]
    fn relative_directory_is_rejected() {
        assert!(!directory_is_usable(Path::new("some/relative")));
        assert!(!directory_is_usable(Path::new(".")));
    }

    #[test]
    fn dotted_directory_is_rejected() {
        assert!(!directory_is_usable(Path::new("/tmp/../etc")));
    }

    #[test]
    fn unique_path_returns_original_when_free() {
        let path = unique_path(Path::new("/out"), "fox.png", |_| false, || 1234).unwrap();
        assert_eq!(path, Path::new("/out/fox.png"));
    }

    #[test]
    fn unique_path_appends_suffix_on_collision() {
        let taken = Path::new("/out/fox.png");
        let path = unique_path(
            Path::new("/out"),
            "fox.png",
            |p| p == taken,
            || 4242,
        )
        .unwrap();
        assert_eq!(path, Path::new("/out/fox-4242.png"));
    }

    #[test]
    fn unique_path_skips_colliding_suffixes() {
        let mut counter = 1000;
        let taken = [
            PathBuf::from("/out/fox.png"),
            PathBuf::from("/out/fox-1000.png"),
            PathBuf::from("/out/fox-1001.png"),
        ];
        let path = unique_path(
            Path::new("/out"),
            "fox.png",
            |p| taken.iter().any(|t| t == p),
            || {
                let n = counter;
                counter += 1;
                n
            },
        )
        .unwrap();
        assert_eq!(path, Path::new("/out/fox-1002.png"));
    }

    #[test]
    fn unique_path_gives_up_after_bound() {
        let err = unique_path(Path::new("/out"), "fox.png", |_| true, || 5555).unwrap_err();
        assert!(matches!(
            err,
            PathError::Exhausted {
                attempts: MAX_ATTEMPTS
            }
        ));
    }

    #[test]
    fn resolver_uses_hint_when_directory_exists() {
        let tmp = tempfile::tempdir().unwrap();
        let resolver = PathResolver::new(PathBuf::from("/unused"));
        let hint = tmp.path().join("out.png");

        let resolved = resolver
            .resolve(Some(hint.to_str().unwrap()), "a red fox")
            .unwrap();
        assert_eq!(resolved, hint);
    }

    #[test]
    fn resolver_normalises_hint_extension() {
        let tmp = tempfile::tempdir().unwrap();
        let resolver = PathResolver::new(PathBuf::from("/unused"));
        let hint = tmp.path().join("out.jpg");

        let resolved = resolver
            .resolve(Some(hint.to_str().unwrap()), "a red fox")
            .unwrap();
        assert_eq!(resolved, tmp.path().join("out.png"));
    }

    #[test]
    fn resolver_falls_back_on_bad_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let resolver = PathResolver::new(tmp.path().join("downloads"));

        let resolved = resolver
            .resolve(Some("/nonexistent-dir-for-test/out.png"), "a red fox")
            .unwrap();
        assert_eq!(resolved, tmp.path().join("downloads").join("out.png"));
        assert!(tmp.path().join("downloads").is_dir());
    }

    #[test]
    fn resolver_derives_filename_from_prompt() {
        let tmp = tempfile::tempdir().unwrap();
        let resolver = PathResolver::new(tmp.path().to_path_buf());

        let resolved = resolver.resolve(None, "a red fox in snow").unwrap();
        assert_eq!(resolved, tmp.path().join("a-red-fox-in.png"));
    }

    #[test]
    fn resolver_avoids_existing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let resolver = PathResolver::new(tmp.path().to_path_buf());
        std::fs::write(tmp.path().join("a-red-fox-in.png"), b"taken").unwrap();

        let resolved = resolver.resolve(None, "a red fox in snow").unwrap();
        assert_ne!(resolved, tmp.path().join("a-red-fox-in.png"));
        assert_eq!(resolved.parent().unwrap(), tmp.path());
        assert_eq!(resolved.extension().unwrap(), "png");
    }

    #[test]
    fn resolver_handles_empty_sanitised_prompt() {
        let tmp = tempfile::tempdir().unwrap();
        let resolver = PathResolver::new(tmp.path().to_path_buf());

        let resolved = resolver.resolve(None, "!!! ///").unwrap();
        assert_eq!(resolved, tmp.path().join("image.png"));
    }
}
