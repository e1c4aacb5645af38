//! Trial identifiers: `{%Y%m%d%H%M%S}_{suffix}-{label}`.

use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::prng::Prng;

pub const DEFAULT_LABEL: &str = "trial";
pub const SUFFIX_LEN: usize = 4;
const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

static GENERATED: AtomicU64 = AtomicU64::new(0);

/// Opaque, time-sortable trial identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrialId(String);

impl TrialId {
    /// Fresh id stamped with the local wall clock. An empty label falls back
    /// to [`DEFAULT_LABEL`].
    pub fn generate(label: &str) -> Self {
        let timestamp = chrono::Local::now().format(TIMESTAMP_FORMAT).to_string();
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        let counter = GENERATED.fetch_add(1, Ordering::Relaxed);
        let mut rng = Prng::new(nanos ^ counter.wrapping_mul(0x9E37_79B9_7F4A_7C15));
        Self::with_parts(&timestamp, &rng.alnum(SUFFIX_LEN), label)
    }

    pub fn with_parts(timestamp: &str, suffix: &str, label: &str) -> Self {
        let label = if label.is_empty() { DEFAULT_LABEL } else { label };
        Self(format!("{timestamp}_{suffix}-{label}"))
    }

    /// Wrap an existing id verbatim.
    pub fn from_string(id: String) -> Self {
        Self(id)
    }

    /// Accept either a bare id or a path to a run directory or to its
    /// `meta_result.json`. Returns `None` for blank input.
    pub fn extract(input: &str) -> Option<Self> {
        let trimmed = input.trim().trim_end_matches(['/', '\\']);
        if trimmed.is_empty() {
            return None;
        }
        let path = Path::new(trimmed);
        let dir = match path.file_name().and_then(|n| n.to_str()) {
            Some(crate::results::META_RESULT_FILE) => path.parent().unwrap_or(path),
            _ => path,
        };
        dir.file_name()
            .and_then(|n| n.to_str())
            .map(|n| Self(n.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn timestamp(&self) -> &str {
        self.0.split_once('_').map_or("", |(ts, _)| ts)
    }

    pub fn label(&self) -> &str {
        self.0.split_once('-').map_or("", |(_, label)| label)
    }
}

impl fmt::Display for TrialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TrialId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_have_expected_shape() {
        let id = TrialId::generate("reach");
        let (ts, rest) = id.as_str().split_once('_').unwrap();
        assert_eq!(ts.len(), 14);
        assert!(ts.chars().all(|c| c.is_ascii_digit()));
        let (suffix, label) = rest.split_once('-').unwrap();
        assert_eq!(suffix.len(), SUFFIX_LEN);
        assert!(suffix.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        assert_eq!(label, "reach");
        assert_eq!(id.label(), "reach");
        assert_eq!(id.timestamp(), ts);
    }

    #[test]
    fn empty_label_uses_default() {
        assert_eq!(TrialId::generate("").label(), DEFAULT_LABEL);
    }

    #[test]
    fn consecutive_ids_differ() {
        let a = TrialId::generate("x");
        let b = TrialId::generate("x");
        assert_ne!(a, b);
    }

    #[test]
    fn ids_sort_by_time() {
        let early = TrialId::with_parts("20240101120000", "zzzz", "a");
        let late = TrialId::with_parts("20240101120001", "0000", "a");
        assert!(early < late);
    }

    #[test]
    fn extract_accepts_ids_and_paths() {
        let want = "20240101120000_ab12-trial";
        assert_eq!(TrialId::extract(want).unwrap().as_str(), want);
        assert_eq!(
            TrialId::extract(&format!("/data/runs/{want}/")).unwrap().as_str(),
            want
        );
        assert_eq!(
            TrialId::extract(&format!("runs/{want}/meta_result.json"))
                .unwrap()
                .as_str(),
            want
        );
        assert!(TrialId::extract("  ").is_none());
    }

    #[test]
    fn serializes_as_plain_string() {
        let id = TrialId::with_parts("20240101120000", "ab12", "trial");
        assert_eq!(
            serde_json::to_string(&id).unwrap(),
            "\"20240101120000_ab12-trial\""
        );
    }
}
