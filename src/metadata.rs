//! Version-group and version-date resolution for uploaded files.
//!
//! Resolution is a priority chain, applied in this order:
//!
//! 1. filesystem size and timestamps establish a default date
//!    (`max(created, modified)`),
//! 2. timestamps embedded in a structured document ([`crate::docprops`])
//!    replace the filesystem ones when present,
//! 3. a date written in the file name overrides whatever the first two
//!    produced.
//!
//! The group is always derived from the name alone.

use std::path::Path;
use std::sync::OnceLock;
use std::time::SystemTime;

use chrono::{DateTime, Local};
use regex::Regex;
use tracing::{debug, warn};

use crate::docprops;
use crate::models::ResolvedMetadata;

const SEPARATORS: &[char] = &['-', '_', '.', ' '];

fn date_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"([0-9]{4})[-_.]?([0-9]{2})[-_.]?([0-9]{2})").expect("static regex")
    })
}

fn date_with_separators() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[-_.]?[0-9]{4}[-_.]?[0-9]{2}[-_.]?[0-9]{2}[-_.]?").expect("static regex")
    })
}

/// First date-like substring of `stem`, normalised to `YYYYMMDD`.
pub fn filename_date(stem: &str) -> Option<String> {
    date_pattern()
        .captures(stem)
        .map(|c| format!("{}{}{}", &c[1], &c[2], &c[3]))
}

/// Lineage key for a file stem: every date-like run removed and the
/// leftover separators trimmed. Falls back to the full stem when nothing
/// remains.
pub fn derive_version_group(stem: &str) -> String {
    let stripped = date_with_separators().replace_all(stem, "");
    let trimmed = stripped.trim_matches(SEPARATORS);
    if trimmed.is_empty() {
        stem.to_string()
    } else {
        trimmed.to_string()
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}

fn system_time_secs(t: std::io::Result<SystemTime>) -> Option<i64> {
    let t = t.ok()?;
    let secs = t.duration_since(SystemTime::UNIX_EPOCH).ok()?.as_secs();
    i64::try_from(secs).ok()
}

fn format_yyyymmdd(unix_secs: i64) -> String {
    DateTime::from_timestamp(unix_secs, 0)
        .map(|dt| dt.with_timezone(&Local).format("%Y%m%d").to_string())
        .unwrap_or_default()
}

/// Resolve lineage and provenance for a file name or local path.
///
/// Never fails: a path that cannot be read locally yields the name-derived
/// group and date only, since such a document exists only remotely.
pub fn resolve(path: &Path) -> ResolvedMetadata {
    let stem = file_stem(path);
    let mut resolved = ResolvedMetadata {
        version_group: derive_version_group(&stem),
        ..Default::default()
    };

    match std::fs::metadata(path) {
        Ok(meta) if meta.is_file() => {
            resolved.size = i64::try_from(meta.len()).ok();
            resolved.created_at = system_time_secs(meta.created());
            resolved.modified_at = system_time_secs(meta.modified());

            let mut canonical = match (resolved.created_at, resolved.modified_at) {
                (Some(c), Some(m)) => Some(c.max(m)),
                (c, m) => c.or(m),
            };

            match docprops::read_embedded_times(path) {
                Ok(Some(times)) if !times.is_empty() => {
                    debug!(file = %path.display(), ?times, "using embedded document timestamps");
                    if times.created.is_some() {
                        resolved.created_at = times.created;
                    }
                    if times.last_saved.is_some() {
                        resolved.modified_at = times.last_saved;
                    }
                    canonical = times.latest();
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(
                        file = %path.display(),
                        error = %e,
                        "embedded properties unreadable, keeping filesystem timestamps"
                    );
                }
            }

            if let Some(ts) = canonical {
                resolved.version_date = format_yyyymmdd(ts);
            }
        }
        Ok(_) => {}
        Err(e) => {
            debug!(file = %path.display(), error = %e, "file not available locally");
        }
    }

    if let Some(date) = filename_date(&stem) {
        resolved.version_date = date;
    }

    resolved
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_group_and_date_from_name() {
        let r = resolve(Path::new("인사규정_20260101.hwp"));
        assert_eq!(r.version_group, "인사규정");
        assert_eq!(r.version_date, "20260101");
    }

    #[test]
    fn test_missing_file_without_date() {
        let r = resolve(Path::new("/nonexistent/규정.hwp"));
        assert_eq!(r.version_group, "규정");
        assert_eq!(r.version_date, "");
        assert_eq!(r.size, None);
        assert_eq!(r.created_at, None);
        assert_eq!(r.modified_at, None);
    }

    #[test]
    fn test_separator_variants() {
        assert_eq!(filename_date("보안규정-2025-03-15").as_deref(), Some("20250315"));
        assert_eq!(filename_date("보안규정.2025.03.15").as_deref(), Some("20250315"));
        assert_eq!(filename_date("보안규정_2025_03_15").as_deref(), Some("20250315"));
        assert_eq!(derive_version_group("보안규정-2025-03-15"), "보안규정");
        assert_eq!(derive_version_group("2025.03.15 보안규정"), "보안규정");
    }

    #[test]
    fn test_first_date_wins() {
        assert_eq!(
            filename_date("규정_20240101_개정_20250101").as_deref(),
            Some("20240101")
        );
        assert_eq!(derive_version_group("규정_20240101_개정_20250101"), "규정개정");
    }

    #[test]
    fn test_name_that_is_only_a_date_keeps_stem() {
        assert_eq!(derive_version_group("20260101"), "20260101");
    }

    #[test]
    fn test_no_date_leaves_stem() {
        assert_eq!(filename_date("출장비 지급 기준"), None);
        assert_eq!(derive_version_group("출장비 지급 기준"), "출장비 지급 기준");
    }

    #[test]
    fn test_local_file_uses_filesystem_times() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path: PathBuf = tmp.path().join("회계규정.txt");
        std::fs::write(&path, "제1조").unwrap();

        let r = resolve(&path);
        assert_eq!(r.version_group, "회계규정");
        assert_eq!(r.size, Some(7));
        assert!(r.modified_at.is_some());
        assert_eq!(r.version_date.len(), 8);
    }

    #[test]
    fn test_filename_date_overrides_filesystem() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("회계규정_20190701.txt");
        std::fs::write(&path, "old").unwrap();

        let r = resolve(&path);
        assert_eq!(r.version_date, "20190701");
        assert!(r.modified_at.is_some());
    }

    #[test]
    fn test_corrupt_ole_falls_back_to_filesystem() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("복무규정.hwp");
        let mut bytes = vec![0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];
        bytes.extend_from_slice(&[0u8; 64]);
        std::fs::write(&path, bytes).unwrap();

        let r = resolve(&path);
        assert_eq!(r.version_group, "복무규정");
        assert_eq!(r.size, Some(72));
        assert_eq!(r.version_date.len(), 8);
    }
}
