//! Historical test results: the warehouse client and its transports.
//!
//! `ResultsStore` is the transport seam (one rendered query in, raw rows out).
//! `ResultsClient` layers the lookup rules on top of any store: the lookback
//! window, the build-family restriction, commit extraction from branch
//! metadata, status filtering and recency ordering. Range and search code
//! depends only on the `RunHistory` trait.

pub mod http;
pub mod query;
pub mod sqlite;

use crate::error::Result;
use crate::types::{CommitId, TestRun, TestStatus};
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use std::collections::HashMap;
use tracing::debug;

pub use http::HttpResultsStore;
pub use query::{Dialect, RenderedQuery, RunQuery, SqlParam};
pub use sqlite::SqliteResultsStore;

// ---------------------------------------------------------------------------
// Transport seam
// ---------------------------------------------------------------------------

/// One row as returned by the warehouse, before interpretation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRow {
    pub build_id: String,
    pub start_date: DateTime<Utc>,
    pub branch_name: String,
    pub test_status: String,
}

pub trait ResultsStore {
    /// Execute a read-only query. Transport and credential failures are
    /// `TriageError::StoreUnavailable`; zero rows is `Ok(vec![])`.
    fn fetch(&self, query: &RenderedQuery) -> Result<Vec<RunRow>>;

    fn dialect(&self) -> Dialect {
        Dialect::Warehouse
    }
}

impl<S: ResultsStore + ?Sized> ResultsStore for Box<S> {
    fn fetch(&self, query: &RenderedQuery) -> Result<Vec<RunRow>> {
        (**self).fetch(query)
    }

    fn dialect(&self) -> Dialect {
        (**self).dialect()
    }
}

/// Parse the timestamp encodings the warehouse and snapshots use.
pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S%.f%#z", "%Y-%m-%d %H:%M:%S%#z"]
        .iter()
        .find_map(|fmt| DateTime::parse_from_str(raw, fmt).ok())
        .map(|ts| ts.with_timezone(&Utc))
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
                .ok()
                .map(|n| n.and_utc())
        })
}

// ---------------------------------------------------------------------------
// RunHistory
// ---------------------------------------------------------------------------

/// Read-only view of historical runs used by range and search logic.
pub trait RunHistory {
    /// Lookback window in days, for operator-facing messages.
    fn lookback_days(&self) -> u32;

    /// Most recent successful run of `test`, optionally restricted to a
    /// branch. The newest row is authoritative even when it has no commit.
    fn find_last_success(&self, test: &str, branch: Option<&str>) -> Result<Option<TestRun>>;

    /// Up to `limit` runs, newest first. Runs without a commit are included.
    fn get_history(&self, test: &str, limit: u32, branch: Option<&str>) -> Result<Vec<TestRun>>;

    /// Most recent success-or-failure run recorded at exactly `commit`.
    fn find_run_at(&self, test: &str, commit: &CommitId) -> Result<Option<TestRun>>;

    /// Batch form of `find_run_at`. Commits without a recorded run are absent
    /// from the map.
    fn find_runs_at(
        &self,
        test: &str,
        commits: &[CommitId],
    ) -> Result<HashMap<CommitId, TestRun>> {
        let mut found = HashMap::new();
        for commit in commits {
            if let Some(run) = self.find_run_at(test, commit)? {
                found.insert(commit.clone(), run);
            }
        }
        Ok(found)
    }
}

// ---------------------------------------------------------------------------
// ResultsClient
// ---------------------------------------------------------------------------

pub struct ResultsClient<S: ResultsStore> {
    store: S,
    lookback_days: u32,
    build_name_pattern: String,
    /// Pins the end of the lookback window; `None` means "now".
    as_of: Option<DateTime<Utc>>,
}

impl<S: ResultsStore> ResultsClient<S> {
    pub fn new(store: S, lookback_days: u32, build_name_pattern: impl Into<String>) -> Self {
        Self {
            store,
            lookback_days,
            build_name_pattern: build_name_pattern.into(),
            as_of: None,
        }
    }

    pub fn as_of(mut self, at: DateTime<Utc>) -> Self {
        self.as_of = Some(at);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn window_start(&self) -> DateTime<Utc> {
        self.as_of.unwrap_or_else(Utc::now) - Duration::days(i64::from(self.lookback_days))
    }

    fn base_query(&self, test: &str) -> RunQuery {
        RunQuery::new(test, self.window_start(), self.build_name_pattern.clone())
    }

    fn run(&self, test: &str, query: RunQuery) -> Result<Vec<TestRun>> {
        let rendered = query.render_for(self.store.dialect());
        debug!(test, params = rendered.params.len(), "querying results store");
        let rows = self.store.fetch(&rendered)?;
        let mut runs: Vec<TestRun> = rows.into_iter().map(|r| to_run(test, r)).collect();
        // Re-apply the store's ordering so the outcome never depends on how a
        // transport happens to order ties.
        runs.sort_by(|a, b| b.cmp_recency(a));
        debug!(test, rows = runs.len(), "results store answered");
        Ok(runs)
    }
}

fn to_run(test: &str, row: RunRow) -> TestRun {
    TestRun {
        test_name: test.to_string(),
        commit: CommitId::extract(&row.branch_name),
        status: TestStatus::from_raw(&row.test_status),
        branch_name: row.branch_name,
        start_date: row.start_date,
        build_id: row.build_id,
    }
}

impl<S: ResultsStore> RunHistory for ResultsClient<S> {
    fn lookback_days(&self) -> u32 {
        self.lookback_days
    }

    fn find_last_success(&self, test: &str, branch: Option<&str>) -> Result<Option<TestRun>> {
        let query = self.base_query(test).branch(branch).success_only().limit(1);
        let Some(newest) = self
            .run(test, query)?
            .into_iter()
            .find(|r| r.status == TestStatus::Success)
        else {
            return Ok(None);
        };

        // The store's LIMIT picked one of possibly several runs sharing the
        // newest start time; fetch them all so build ids compare numerically.
        let tied = RunQuery::new(test, newest.start_date, self.build_name_pattern.clone())
            .branch(branch)
            .success_only();
        let newest = self
            .run(test, tied)?
            .into_iter()
            .find(|r| r.status == TestStatus::Success)
            .unwrap_or(newest);
        Ok(Some(newest))
    }

    fn get_history(&self, test: &str, limit: u32, branch: Option<&str>) -> Result<Vec<TestRun>> {
        let query = self.base_query(test).branch(branch).limit(limit);
        let mut runs = self.run(test, query)?;
        runs.truncate(limit as usize);
        Ok(runs)
    }

    fn find_run_at(&self, test: &str, commit: &CommitId) -> Result<Option<TestRun>> {
        let query = self.base_query(test).commits(std::slice::from_ref(commit));
        let runs = self.run(test, query)?;
        Ok(runs
            .into_iter()
            .find(|r| r.status.is_conclusive() && r.commit.as_ref() == Some(commit)))
    }

    fn find_runs_at(
        &self,
        test: &str,
        commits: &[CommitId],
    ) -> Result<HashMap<CommitId, TestRun>> {
        if commits.is_empty() {
            return Ok(HashMap::new());
        }
        let query = self.base_query(test).commits(commits);
        let runs = self.run(test, query)?;
        let mut found: HashMap<CommitId, TestRun> = HashMap::new();
        // Runs arrive newest first, so the first usable run per commit wins.
        for run in runs {
            if !run.status.is_conclusive() {
                continue;
            }
            let Some(commit) = run.commit.clone() else {
                continue;
            };
            if commits.contains(&commit) && !found.contains_key(&commit) {
                found.insert(commit, run);
            }
        }
        Ok(found)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
