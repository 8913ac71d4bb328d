use crate::error::{Result, TriageError};
use crate::repo::SourceRepository;
use crate::results::RunHistory;
use crate::types::{CommitId, TestRun};
use serde::Serialize;
use tracing::{debug, info};

/// The commits a manual or automatic bisection has to consider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BisectionRange {
    pub test_name: String,
    pub branch: Option<String>,
    pub last_good: CommitId,
    pub known_bad: CommitId,
    /// Strictly between `last_good` and `known_bad`, oldest first.
    pub commits: Vec<CommitId>,
    pub commit_count: usize,
    /// Successful run that anchored `last_good`; `None` when the operator
    /// supplied it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anchor: Option<TestRun>,
}

/// Find the last passing run of `test` and compute the interval from its
/// commit to `known_bad`.
pub fn compute_range<H, R>(
    history: &H,
    repo: &R,
    test: &str,
    known_bad: &CommitId,
    branch: Option<&str>,
) -> Result<BisectionRange>
where
    H: RunHistory + ?Sized,
    R: SourceRepository + ?Sized,
{
    let anchor = history
        .find_last_success(test, branch)?
        .ok_or_else(|| TriageError::NoKnownGood {
            test: test.to_string(),
            lookback_days: history.lookback_days(),
        })?;

    // Never fall back to an older run: the newest success is authoritative.
    let Some(last_good) = anchor.commit.clone() else {
        return Err(TriageError::NoCommitInfo {
            test: test.to_string(),
            build_id: anchor.build_id.clone(),
            branch: anchor.branch_name.clone(),
        });
    };
    debug!(test, build_id = %anchor.build_id, good = %last_good.short(), "anchored on last success");

    let mut range = range_from_known_good(repo, test, &last_good, known_bad, branch)?;
    range.anchor = Some(anchor);
    Ok(range)
}

/// Interval from an operator-supplied known-good commit.
pub fn range_from_known_good<R>(
    repo: &R,
    test: &str,
    good: &CommitId,
    known_bad: &CommitId,
    branch: Option<&str>,
) -> Result<BisectionRange>
where
    R: SourceRepository + ?Sized,
{
    let commits = repo.ancestry_interval(good, known_bad)?;
    info!(
        test,
        good = %good.short(),
        bad = %known_bad.short(),
        commits = commits.len(),
        "computed bisection range"
    );
    Ok(BisectionRange {
        test_name: test.to_string(),
        branch: branch.map(str::to_string),
        last_good: good.clone(),
        known_bad: known_bad.clone(),
        commit_count: commits.len(),
        commits,
        anchor: None,
    })
}
