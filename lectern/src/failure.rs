use std::{collections::HashSet, fmt, io};
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Track {
    Video,
    Audio,
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Video => "video",
            Self::Audio => "audio",
        })
    }
}

/// Why a single lecture could not be produced.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FailureReason {
    #[error("missing media links")]
    MissingMedia,
    #[error("manifest resolution failed: {0}")]
    Resolution(String),
    #[error("failed to extract {track} KID: {detail}")]
    KidExtraction { track: Track, detail: String },
    #[error("{track} key not found for KID {kid}")]
    KeyNotFound { track: Track, kid: String },
    #[error("{tool} download failed (code={code})")]
    Download { tool: String, code: i32 },
    #[error("shaka-packager decryption failed (code={code})")]
    Packager { code: i32 },
    #[error("ffmpeg merge failed (code={code})")]
    Mux { code: i32 },
    #[error("i/o error: {0}")]
    Io(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl FailureReason {
    /// Re-running the whole lecture cannot change the outcome of these.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::MissingMedia | Self::KeyNotFound { .. })
    }
}

impl From<io::Error> for FailureReason {
    fn from(value: io::Error) -> Self {
        Self::Io(value.to_string())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FailureRecord {
    pub lecture_id: String,
    pub lecture_title: String,
    pub reason: FailureReason,
}

impl fmt::Display for FailureRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} | {} | {}",
            self.lecture_id, self.lecture_title, self.reason
        )
    }
}

/// Run-scoped, append-only list of lecture failures.
///
/// Entries are only removed when a later retry produces the lecture output.
#[derive(Debug, Default)]
pub struct FailureLedger {
    records: Vec<FailureRecord>,
}

impl FailureLedger {
    pub fn record(&mut self, lecture_id: &str, lecture_title: &str, reason: FailureReason) {
        self.records.push(FailureRecord {
            lecture_id: lecture_id.to_owned(),
            lecture_title: lecture_title.to_owned(),
            reason,
        });
    }

    /// Drop every record of a lecture, returns how many were removed.
    pub fn clear(&mut self, lecture_id: &str) -> usize {
        let before = self.records.len();
        self.records.retain(|x| x.lecture_id != lecture_id);
        before - self.records.len()
    }

    pub fn records(&self) -> &[FailureRecord] {
        &self.records
    }

    /// Last `n` records in insertion order.
    pub fn tail(&self, n: usize) -> &[FailureRecord] {
        &self.records[self.records.len().saturating_sub(n)..]
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Number of distinct lectures with at least one record.
    pub fn lecture_count(&self) -> usize {
        self.records
            .iter()
            .map(|x| x.lecture_id.as_str())
            .collect::<HashSet<_>>()
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
