use crate::error::{Result, TriageError};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// CommitId
// ---------------------------------------------------------------------------

/// A full 40-character lowercase hexadecimal revision id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CommitId(String);

static EMBEDDED_SHA_RE: OnceLock<Regex> = OnceLock::new();

fn embedded_sha_re() -> &'static Regex {
    EMBEDDED_SHA_RE
        .get_or_init(|| Regex::new(r"(?:^|[^0-9a-fA-F])([0-9a-fA-F]{40})(?:[^0-9a-fA-F]|$)").unwrap())
}

impl CommitId {
    pub const LEN: usize = 40;

    /// Parse a full revision id. Abbreviated ids are rejected; resolve them
    /// through the source repository instead.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.len() != Self::LEN || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(TriageError::InvalidCommitId(s.to_string()));
        }
        Ok(Self(s.to_ascii_lowercase()))
    }

    /// Find the first standalone 40-hex run in free text such as a CI branch
    /// name (`"refs/pull/1234/merge-<sha>"`, `"master@<sha>"`).
    pub fn extract(text: &str) -> Option<Self> {
        embedded_sha_re()
            .captures(text)
            .and_then(|c| c.get(1))
            .map(|m| Self(m.as_str().to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 characters, for display.
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for CommitId {
    type Err = TriageError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for CommitId {
    type Error = TriageError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<CommitId> for String {
    fn from(c: CommitId) -> Self {
        c.0
    }
}

// ---------------------------------------------------------------------------
// TestStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TestStatus {
    Success,
    Failure,
    /// Anything else the CI system records (unknown, skipped, error, ...).
    /// Never used by range or search logic.
    Other(String),
}

impl TestStatus {
    pub fn from_raw(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "success" => TestStatus::Success,
            "failure" => TestStatus::Failure,
            other => TestStatus::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            TestStatus::Success => "success",
            TestStatus::Failure => "failure",
            TestStatus::Other(s) => s,
        }
    }

    pub fn is_conclusive(&self) -> bool {
        matches!(self, TestStatus::Success | TestStatus::Failure)
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for TestStatus {
    fn from(s: String) -> Self {
        TestStatus::from_raw(&s)
    }
}

impl From<TestStatus> for String {
    fn from(s: TestStatus) -> Self {
        s.as_str().to_string()
    }
}

// ---------------------------------------------------------------------------
// TestRun
// ---------------------------------------------------------------------------

/// One historical execution of a test, as recorded by CI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestRun {
    pub test_name: String,
    /// Extracted from `branch_name`; `None` when the branch carries no sha.
    pub commit: Option<CommitId>,
    pub branch_name: String,
    pub status: TestStatus,
    pub start_date: DateTime<Utc>,
    pub build_id: String,
}

impl TestRun {
    /// Whether this run may anchor or influence range and search logic.
    pub fn is_usable(&self) -> bool {
        self.commit.is_some() && self.status.is_conclusive()
    }

    /// Order by start date, then by build id (numerically when both ids are
    /// numeric). `Greater` means more recent.
    pub fn cmp_recency(&self, other: &TestRun) -> Ordering {
        self.start_date
            .cmp(&other.start_date)
            .then_with(|| cmp_build_ids(&self.build_id, &other.build_id))
    }
}

fn cmp_build_ids(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        _ => a.cmp(b),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
