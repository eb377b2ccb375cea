//! Small helpers: path-segment sanitizing, log truncation, pacing delays and
//! output directory checks.

use once_cell::sync::Lazy;
use rand::{Rng, rng};
use regex::Regex;
use std::fs as stdfs;
use std::io;
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::{info, instrument};

static FORBIDDEN_PATH_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[/*?:"<>|]"#).expect("static regex"));

/// Make a string usable as a single path segment.
///
/// Removes `/ * ? : " < > |` and trims surrounding whitespace. Applying it
/// twice gives the same result as applying it once.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(sanitize_filename(" a/b:c? "), "abc");
/// ```
pub fn sanitize_filename(name: &str) -> String {
    FORBIDDEN_PATH_CHARS.replace_all(name, "").trim().to_string()
}

/// Truncate a string for logging purposes.
///
/// Long strings are cut at `max` bytes (on a char boundary) with an ellipsis
/// and the number of dropped bytes appended.
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…(+{} bytes)", &s[..cut], s.len() - cut)
}

/// Uniform pause between consecutive article retrievals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayPolicy {
    pub min: Duration,
    pub max: Duration,
}

impl DelayPolicy {
    pub fn new(min: Duration, max: Duration) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    pub fn none() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    /// Draw a delay in `[min, max]`.
    pub fn sample(&self) -> Duration {
        if self.max.is_zero() || self.min == self.max {
            return self.min;
        }
        let millis = rng().random_range(self.min.as_millis() as u64..=self.max.as_millis() as u64);
        Duration::from_millis(millis)
    }
}

impl Default for DelayPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(3))
    }
}

/// Ensure a directory exists and is writable.
///
/// Creates the directory if needed, then writes and removes a probe file.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn ensure_writable_dir(path: &Path) -> io::Result<()> {
    fs::create_dir_all(path).await?;
    let probe_path = path.join("..__probe_write__");
    stdfs::File::create(&probe_path)?;
    let _ = stdfs::remove_file(&probe_path);
    info!("Output directory is writable");
    Ok(())
}
