//! Forward scan of an ancestry interval for the earliest recorded failure.
//!
//! Coverage in CI history is sparse and not monotonic, so the scan is linear:
//! a commit without a recorded run says nothing about the commits around it.

use crate::error::Result;
use crate::repo::SourceRepository;
use crate::results::RunHistory;
use crate::types::{CommitId, TestRun, TestStatus};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// How the scan asks the history for runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScanStrategy {
    /// One lookup per commit.
    #[default]
    PerCommit,
    /// One lookup per `chunk` commits. Later chunks are not queried once a
    /// failure is found.
    Batched { chunk: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum SearchOutcome {
    /// Earliest commit whose most recent recorded run failed.
    Found {
        commit: CommitId,
        /// 0-based, oldest first.
        position: usize,
        run: TestRun,
    },
    /// No recorded failure in the interval.
    NotDeterminable {
        scanned: usize,
        /// How many scanned commits had any recorded run.
        with_runs: usize,
    },
}

impl SearchOutcome {
    pub fn first_failure(&self) -> Option<&CommitId> {
        match self {
            SearchOutcome::Found { commit, .. } => Some(commit),
            SearchOutcome::NotDeterminable { .. } => None,
        }
    }
}

/// Compute the interval between `good` and `bad` and scan it.
pub fn search_first_failure<H, R>(
    history: &H,
    repo: &R,
    test: &str,
    good: &CommitId,
    bad: &CommitId,
    strategy: ScanStrategy,
) -> Result<SearchOutcome>
where
    H: RunHistory + ?Sized,
    R: SourceRepository + ?Sized,
{
    let commits = repo.ancestry_interval(good, bad)?;
    scan_commits(history, test, &commits, strategy)
}

/// Scan `commits` oldest to newest. A store error aborts the scan.
pub fn scan_commits<H>(
    history: &H,
    test: &str,
    commits: &[CommitId],
    strategy: ScanStrategy,
) -> Result<SearchOutcome>
where
    H: RunHistory + ?Sized,
{
    info!(test, commits = commits.len(), ?strategy, "scanning for first failure");
    let mut with_runs = 0;

    match strategy {
        ScanStrategy::PerCommit => {
            for (position, commit) in commits.iter().enumerate() {
                let run = history.find_run_at(test, commit)?;
                if let Some(found) = inspect(commit, position, run, &mut with_runs) {
                    return Ok(found);
                }
            }
        }
        ScanStrategy::Batched { chunk } => {
            let chunk = chunk.max(1);
            for (index, batch) in commits.chunks(chunk).enumerate() {
                let mut runs = history.find_runs_at(test, batch)?;
                for (offset, commit) in batch.iter().enumerate() {
                    let position = index * chunk + offset;
                    let run = runs.remove(commit);
                    if let Some(found) = inspect(commit, position, run, &mut with_runs) {
                        return Ok(found);
                    }
                }
            }
        }
    }

    info!(test, scanned = commits.len(), with_runs, "no recorded failure in range");
    Ok(SearchOutcome::NotDeterminable {
        scanned: commits.len(),
        with_runs,
    })
}

fn inspect(
    commit: &CommitId,
    position: usize,
    run: Option<TestRun>,
    with_runs: &mut usize,
) -> Option<SearchOutcome> {
    let run = run.filter(TestRun::is_usable)?;
    *with_runs += 1;
    debug!(commit = %commit.short(), position, status = %run.status, "recorded run");
    if run.status != TestStatus::Failure {
        return None;
    }
    info!(commit = %commit.short(), position, build_id = %run.build_id, "first recorded failure");
    Some(SearchOutcome::Found {
        commit: commit.clone(),
        position,
        run,
    })
}
