use thiserror::Error;

#[derive(Debug, Error)]
pub enum TriageError {
    #[error("results store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("no passing run of '{test}' recorded in the last {lookback_days} days")]
    NoKnownGood { test: String, lookback_days: u32 },

    #[error(
        "last passing run of '{test}' (build {build_id}) has no commit id in branch '{branch}'"
    )]
    NoCommitInfo {
        test: String,
        build_id: String,
        branch: String,
    },

    #[error("commit '{0}' could not be resolved after a direct and a broad fetch")]
    CommitUnresolvable(String),

    #[error("{good} is not an ancestor of {bad}")]
    AncestryError { good: String, bad: String },

    #[error("git: {0}")]
    Git(String),

    #[error("invalid commit id '{0}': expected 40 hexadecimal characters")]
    InvalidCommitId(String),

    #[error("invalid investigation id '{0}': use letters, digits, '.', '_' or '-' (max 64)")]
    InvalidInvestigationId(String),

    #[error("no bisection record for investigation '{0}'")]
    RecordNotFound(String),

    #[error("issue tracker: {0}")]
    Issue(String),

    #[error("config: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl TriageError {
    /// The manual step an operator should take next, for errors that end an
    /// investigation. `None` for infrastructure errors with no domain-specific
    /// recovery.
    pub fn next_step(&self) -> Option<String> {
        match self {
            TriageError::StoreUnavailable(_) => Some(
                "check results store credentials and connectivity (TRIAGE_RESULTS_URL, \
                 TRIAGE_RESULTS_TOKEN), then re-run"
                    .to_string(),
            ),
            TriageError::NoKnownGood { .. } | TriageError::NoCommitInfo { .. } => Some(
                "supply a known-good commit manually with --good <sha> and re-run".to_string(),
            ),
            TriageError::CommitUnresolvable(sha) => Some(format!(
                "verify that {sha} exists on the remote and that the mirror can fetch from it \
                 (triage mirror sync)"
            )),
            TriageError::AncestryError { good, bad } => Some(format!(
                "inspect the history manually: `git log --oneline --graph {good} {bad}`; \
                 the endpoints may be on different branches or history was rewritten"
            )),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, TriageError>;
