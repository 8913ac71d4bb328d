use super::range::{compute_range, range_from_known_good, BisectionRange};
use super::search::{scan_commits, ScanStrategy, SearchOutcome};
use crate::error::{Result, TriageError};
use crate::io;
use crate::paths;
use crate::repo::SourceRepository;
use crate::results::RunHistory;
use crate::types::CommitId;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Resolved,
    NotDeterminable,
    NoKnownGood,
    NoCommitInfo,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Resolved => "resolved",
            Outcome::NotDeterminable => "not_determinable",
            Outcome::NoKnownGood => "no_known_good",
            Outcome::NoCommitInfo => "no_commit_info",
        }
    }
}

/// One persisted document per investigation, overwritten on every run.
///
/// Holds no wall-clock time, so recomputing against unchanged history and
/// repository state rewrites identical bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BisectionRecord {
    pub investigation_id: String,
    pub test_name: String,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub last_success_sha: Option<CommitId>,
    pub failure_sha: CommitId,
    #[serde(default)]
    pub commit_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_failure_sha: Option<CommitId>,
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BisectionRequest {
    pub investigation_id: String,
    pub test_name: String,
    pub known_bad: CommitId,
    pub branch: Option<String>,
    /// Skips the history lookup for the good endpoint.
    pub known_good: Option<CommitId>,
    pub strategy: ScanStrategy,
}

/// Bounds and commands for bisecting by hand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManualBisectPlan {
    pub good: CommitId,
    pub bad: CommitId,
    pub commit_count: usize,
    pub estimated_steps: u32,
    pub commands: Vec<String>,
}

impl ManualBisectPlan {
    pub fn new(good: &CommitId, bad: &CommitId, commit_count: usize) -> Self {
        Self {
            good: good.clone(),
            bad: bad.clone(),
            commit_count,
            estimated_steps: estimated_steps(commit_count),
            commands: vec![
                format!("git bisect start {bad} {good}"),
                "git bisect good".to_string(),
                "git bisect bad".to_string(),
                "git bisect reset".to_string(),
            ],
        }
    }
}

/// `ceil(log2(count + 1))`: test runs needed to isolate one of `count`
/// candidates.
fn estimated_steps(count: usize) -> u32 {
    usize::BITS - count.leading_zeros()
}

#[derive(Debug, Clone, Serialize)]
pub struct BisectionReport {
    pub record: BisectionRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range: Option<BisectionRange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<SearchOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manual: Option<ManualBisectPlan>,
    pub guidance: Vec<String>,
}

// ---------------------------------------------------------------------------
// Orchestration
// ---------------------------------------------------------------------------

/// Compute the range, scan it, persist the record and describe what to do
/// next.
///
/// A missing or commit-less known-good run still produces a record; every
/// other error is returned and nothing is written.
pub fn run_bisection<H, R>(
    history: &H,
    repo: &R,
    root: &Path,
    request: &BisectionRequest,
) -> Result<BisectionReport>
where
    H: RunHistory + ?Sized,
    R: SourceRepository + ?Sized,
{
    paths::validate_investigation_id(&request.investigation_id)?;
    let test = request.test_name.as_str();
    let branch = request.branch.as_deref();

    let computed = match &request.known_good {
        Some(good) => range_from_known_good(repo, test, good, &request.known_bad, branch),
        None => compute_range(history, repo, test, &request.known_bad, branch),
    };

    let mut record = BisectionRecord {
        investigation_id: request.investigation_id.clone(),
        test_name: request.test_name.clone(),
        branch: request.branch.clone(),
        last_success_sha: None,
        failure_sha: request.known_bad.clone(),
        commit_count: None,
        first_failure_sha: None,
        outcome: Outcome::NotDeterminable,
        reason: None,
    };

    let range = match computed {
        Ok(range) => range,
        Err(e @ (TriageError::NoKnownGood { .. } | TriageError::NoCommitInfo { .. })) => {
            record.outcome = match e {
                TriageError::NoKnownGood { .. } => Outcome::NoKnownGood,
                _ => Outcome::NoCommitInfo,
            };
            record.reason = Some(e.to_string());
            save_record(root, &record)?;
            info!(investigation = %record.investigation_id, outcome = record.outcome.as_str(), "bisection stopped before a range");
            return Ok(report_for(record));
        }
        Err(e) => return Err(e),
    };

    let outcome = scan_commits(history, test, &range.commits, request.strategy)?;

    record.last_success_sha = Some(range.last_good.clone());
    record.commit_count = Some(range.commit_count);
    record.first_failure_sha = outcome.first_failure().cloned();
    record.outcome = match outcome {
        SearchOutcome::Found { .. } => Outcome::Resolved,
        SearchOutcome::NotDeterminable { .. } => Outcome::NotDeterminable,
    };
    save_record(root, &record)?;
    info!(investigation = %record.investigation_id, outcome = record.outcome.as_str(), "bisection recorded");

    let mut report = report_for(record);
    report.range = Some(range);
    report.search = Some(outcome);
    Ok(report)
}

/// Re-derive the manual plan and guidance from a record.
pub fn report_for(record: BisectionRecord) -> BisectionReport {
    let manual = match (&record.outcome, &record.last_success_sha, record.commit_count) {
        (Outcome::NotDeterminable, Some(good), Some(count)) => {
            Some(ManualBisectPlan::new(good, &record.failure_sha, count))
        }
        _ => None,
    };
    let guidance = guidance(&record, manual.as_ref());
    BisectionReport {
        record,
        range: None,
        search: None,
        manual,
        guidance,
    }
}

fn guidance(record: &BisectionRecord, manual: Option<&ManualBisectPlan>) -> Vec<String> {
    let bad = &record.failure_sha;
    let mut lines = Vec::new();
    let endpoints = match (&record.last_success_sha, record.commit_count) {
        (Some(good), Some(count)) => Some(format!(
            "range: {good}..{bad} ({count} intermediate commit{})",
            if count == 1 { "" } else { "s" }
        )),
        _ => None,
    };

    match record.outcome {
        Outcome::Resolved => {
            if let Some(first) = &record.first_failure_sha {
                lines.push(format!("first recorded failure of {} at {first}", record.test_name));
                lines.extend(endpoints);
                lines.push(format!("review the change with `git show {first}`"));
                lines.push(
                    "runs before it were untested or passed; confirm with a targeted run if the \
                     failure is flaky"
                        .to_string(),
                );
            }
        }
        Outcome::NotDeterminable => {
            lines.push(
                "no intermediate commit has a recorded failing run; automatic narrowing is not \
                 possible"
                    .to_string(),
            );
            lines.extend(endpoints);
            if let Some(plan) = manual {
                if plan.commit_count == 0 {
                    lines.push(format!(
                        "the endpoints are adjacent: {bad} introduced the failure"
                    ));
                } else {
                    lines.push(format!(
                        "bisect manually: about {} test run{} between good {} and bad {}",
                        plan.estimated_steps,
                        if plan.estimated_steps == 1 { "" } else { "s" },
                        plan.good,
                        plan.bad
                    ));
                    lines.extend(plan.commands.iter().map(|c| format!("  {c}")));
                }
            }
        }
        Outcome::NoKnownGood | Outcome::NoCommitInfo => {
            if let Some(reason) = &record.reason {
                lines.push(reason.clone());
            }
            lines.push(format!(
                "supply a known-good commit manually: triage bisect {} --test {} --bad {bad} --good <sha>",
                record.investigation_id, record.test_name
            ));
        }
    }
    lines
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

pub fn save_record(root: &Path, record: &BisectionRecord) -> Result<()> {
    paths::validate_investigation_id(&record.investigation_id)?;
    let path = paths::bisection_record_path(root, &record.investigation_id);
    let mut data = serde_json::to_string_pretty(record)?;
    data.push('\n');
    io::atomic_write(&path, data.as_bytes())
}

pub fn load_record(root: &Path, investigation_id: &str) -> Result<BisectionRecord> {
    paths::validate_investigation_id(investigation_id)?;
    let path = paths::bisection_record_path(root, investigation_id);
    if !path.exists() {
        return Err(TriageError::RecordNotFound(investigation_id.to_string()));
    }
    let data = std::fs::read_to_string(&path)?;
    Ok(serde_json::from_str(&data)?)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bisect::fakes::{commit, run, FakeHistory, FakeRepo};
    use tempfile::TempDir;

    const TEST: &str = "pkgX/test1";

    fn request(id: &str, bad: char) -> BisectionRequest {
        BisectionRequest {
            investigation_id: id.to_string(),
            test_name: TEST.to_string(),
            known_bad: commit(bad),
            branch: None,
            known_good: None,
            strategy: ScanStrategy::PerCommit,
        }
    }

    fn read(root: &Path, id: &str) -> String {
        std::fs::read_to_string(paths::bisection_record_path(root, id)).unwrap()
    }

    #[test]
    fn sparse_history_records_range_and_manual_plan() {
        let dir = TempDir::new().unwrap();
        let repo = FakeRepo::linear("abcdef");
        let history = FakeHistory::new(vec![run(
            TEST,
            Some(&commit('a')),
            "master",
            "success",
            "2024-05-01T00:00:00Z",
            "1",
        )]);

        let report = run_bisection(&history, &repo, dir.path(), &request("issue-1", 'f')).unwrap();
        assert_eq!(report.record.outcome, Outcome::NotDeterminable);
        assert_eq!(report.record.last_success_sha, Some(commit('a')));
        assert_eq!(report.record.commit_count, Some(4));
        assert!(report.record.first_failure_sha.is_none());

        let plan = report.manual.unwrap();
        assert_eq!(plan.commit_count, 4);
        assert_eq!(plan.estimated_steps, 3);
        assert_eq!(
            plan.commands[0],
            format!("git bisect start {} {}", commit('f'), commit('a'))
        );
        assert!(report.guidance.iter().any(|l| l.contains("bisect manually")));

        let stored = load_record(dir.path(), "issue-1").unwrap();
        assert_eq!(stored, report.record);
    }

    #[test]
    fn recorded_failure_resolves() {
        let dir = TempDir::new().unwrap();
        let repo = FakeRepo::linear("abcdef");
        let history = FakeHistory::new(vec![
            run(TEST, Some(&commit('a')), "master", "success", "2024-05-01T00:00:00Z", "1"),
            run(TEST, Some(&commit('c')), "master", "failure", "2024-05-02T00:00:00Z", "2"),
        ]);
        let report = run_bisection(&history, &repo, dir.path(), &request("issue-2", 'f')).unwrap();
        assert_eq!(report.record.outcome, Outcome::Resolved);
        assert_eq!(report.record.first_failure_sha, Some(commit('c')));
        assert!(report.manual.is_none());
        assert!(report.guidance[0].contains(&commit('c').to_string()));
        assert!(read(dir.path(), "issue-2").contains("\"first_failure_sha\""));
    }

    #[test]
    fn no_known_good_persists_partial_record() {
        let dir = TempDir::new().unwrap();
        let repo = FakeRepo::linear("ab");
        let history = FakeHistory::new(Vec::new());

        let report = run_bisection(&history, &repo, dir.path(), &request("issue-3", 'b')).unwrap();
        assert_eq!(report.record.outcome, Outcome::NoKnownGood);
        assert!(report.record.last_success_sha.is_none());
        assert!(report.record.commit_count.is_none());
        assert!(report.record.reason.as_deref().unwrap().contains("90 days"));
        assert!(report.guidance.iter().any(|l| l.contains("--good <sha>")));

        let json: serde_json::Value = serde_json::from_str(&read(dir.path(), "issue-3")).unwrap();
        assert_eq!(json["outcome"], "no_known_good");
        assert!(json["last_success_sha"].is_null());
        assert_eq!(json["failure_sha"], commit('b').to_string());
    }

    #[test]
    fn no_commit_info_persists_partial_record() {
        let dir = TempDir::new().unwrap();
        let repo = FakeRepo::linear("ab");
        let history = FakeHistory::new(vec![run(
            TEST,
            None,
            "master",
            "success",
            "2024-05-01T00:00:00Z",
            "77",
        )]);
        let report = run_bisection(&history, &repo, dir.path(), &request("issue-4", 'b')).unwrap();
        assert_eq!(report.record.outcome, Outcome::NoCommitInfo);
        assert!(report.record.reason.unwrap().contains("build 77"));
    }

    #[test]
    fn fatal_errors_persist_nothing() {
        let dir = TempDir::new().unwrap();
        let repo = FakeRepo::linear("abc").with_side("9");
        let history = FakeHistory::new(vec![run(
            TEST,
            Some(&commit('9')),
            "master",
            "success",
            "2024-05-01T00:00:00Z",
            "1",
        )]);
        let err = run_bisection(&history, &repo, dir.path(), &request("issue-5", 'c')).unwrap_err();
        assert!(matches!(err, TriageError::AncestryError { .. }));
        assert!(!paths::bisection_record_path(dir.path(), "issue-5").exists());

        let mut down = FakeHistory::new(Vec::new());
        down.fail = true;
        let err = run_bisection(&down, &repo, dir.path(), &request("issue-6", 'c')).unwrap_err();
        assert!(matches!(err, TriageError::StoreUnavailable(_)));
        assert!(!paths::bisection_record_path(dir.path(), "issue-6").exists());
    }

    #[test]
    fn rerun_rewrites_identical_record() {
        let dir = TempDir::new().unwrap();
        let repo = FakeRepo::linear("abcdef");
        let history = FakeHistory::new(vec![
            run(TEST, Some(&commit('a')), "master", "success", "2024-05-01T00:00:00Z", "1"),
            run(TEST, Some(&commit('d')), "master", "failure", "2024-05-02T00:00:00Z", "2"),
        ]);
        run_bisection(&history, &repo, dir.path(), &request("issue-7", 'f')).unwrap();
        let first = read(dir.path(), "issue-7");
        run_bisection(&history, &repo, dir.path(), &request("issue-7", 'f')).unwrap();
        assert_eq!(read(dir.path(), "issue-7"), first);
    }

    #[test]
    fn rerun_overwrites_previous_outcome() {
        let dir = TempDir::new().unwrap();
        let repo = FakeRepo::linear("abcd");
        run_bisection(&FakeHistory::new(Vec::new()), &repo, dir.path(), &request("issue-8", 'd'))
            .unwrap();
        let history = FakeHistory::new(vec![run(
            TEST,
            Some(&commit('a')),
            "master",
            "success",
            "2024-05-01T00:00:00Z",
            "1",
        )]);
        run_bisection(&history, &repo, dir.path(), &request("issue-8", 'd')).unwrap();
        let stored = load_record(dir.path(), "issue-8").unwrap();
        assert_eq!(stored.outcome, Outcome::NotDeterminable);
        assert!(stored.reason.is_none());
    }

    #[test]
    fn known_good_override_bypasses_history() {
        let dir = TempDir::new().unwrap();
        let repo = FakeRepo::linear("abcde");
        let history = FakeHistory::new(Vec::new());
        let mut req = request("issue-9", 'e');
        req.known_good = Some(commit('b'));
        let report = run_bisection(&history, &repo, dir.path(), &req).unwrap();
        assert_eq!(report.record.last_success_sha, Some(commit('b')));
        assert_eq!(report.record.commit_count, Some(2));
    }

    #[test]
    fn invalid_id_is_rejected_before_any_lookup() {
        let dir = TempDir::new().unwrap();
        let repo = FakeRepo::linear("ab");
        let history = FakeHistory::new(Vec::new());
        let err = run_bisection(&history, &repo, dir.path(), &request("../x", 'b')).unwrap_err();
        assert!(matches!(err, TriageError::InvalidInvestigationId(_)));
    }

    #[test]
    fn report_for_stored_record_rebuilds_plan() {
        let record = BisectionRecord {
            investigation_id: "issue-10".into(),
            test_name: TEST.into(),
            branch: Some("release-24.3".into()),
            last_success_sha: Some(commit('a')),
            failure_sha: commit('b'),
            commit_count: Some(0),
            first_failure_sha: None,
            outcome: Outcome::NotDeterminable,
            reason: None,
        };
        let report = report_for(record);
        assert_eq!(report.manual.as_ref().unwrap().estimated_steps, 0);
        assert!(report.guidance.iter().any(|l| l.contains("adjacent")));
    }

    #[test]
    fn load_missing_record_is_not_found() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            load_record(dir.path(), "nope"),
            Err(TriageError::RecordNotFound(_))
        ));
    }

    #[test]
    fn estimated_steps_is_ceil_log2_of_candidates() {
        assert_eq!(estimated_steps(0), 0);
        assert_eq!(estimated_steps(1), 1);
        assert_eq!(estimated_steps(3), 2);
        assert_eq!(estimated_steps(4), 3);
        assert_eq!(estimated_steps(1000), 10);
    }
}
