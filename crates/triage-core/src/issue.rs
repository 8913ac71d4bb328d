//! Failure metadata from the issue tracker.
//!
//! CI files one issue per failing test. The issue body carries a line of the
//! form
//! ```text
//! <test> [failed](<build url>) with [artifacts](<artifacts url>) on <branch> @ [<sha>](<commit url>)
//! ```
//! which is all a bisection needs to get started.

use crate::config::Config;
use crate::error::{Result, TriageError};
use crate::types::CommitId;
use regex::Regex;
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssueFailure {
    pub investigation_id: String,
    pub test_name: String,
    pub commit: CommitId,
    pub branch: String,
}

pub trait IssueProvider {
    fn fetch_failure(&self, investigation_id: &str) -> Result<IssueFailure>;
}

// ---------------------------------------------------------------------------
// Body parsing
// ---------------------------------------------------------------------------

static FAILURE_LINE_RE: OnceLock<Regex> = OnceLock::new();

fn failure_line_re() -> &'static Regex {
    FAILURE_LINE_RE.get_or_init(|| {
        Regex::new(
            r"(?m)^\s*(?P<test>\S+)\s+\[failed\]\([^)]*\)\s+with\s+\[artifacts\]\([^)]*\)\s+on\s+(?P<branch>\S+)\s+@\s+\[(?P<sha>[0-9a-fA-F]{40})\]",
        )
        .unwrap()
    })
}

const ROACHTEST_PREFIX: &str = "roachtest.";

/// Extract the failing test, branch and commit from an issue body.
pub fn parse_failure(investigation_id: &str, body: &str) -> Result<IssueFailure> {
    let caps = failure_line_re().captures(body).ok_or_else(|| {
        TriageError::Issue(format!(
            "issue {investigation_id} has no '<test> [failed](..) ... on <branch> @ [<sha>](..)' line"
        ))
    })?;

    let raw_test = &caps["test"];
    let test_name = raw_test
        .strip_prefix(ROACHTEST_PREFIX)
        .unwrap_or(raw_test)
        .to_string();
    if test_name.is_empty() {
        return Err(TriageError::Issue(format!(
            "issue {investigation_id} names an empty test"
        )));
    }

    Ok(IssueFailure {
        investigation_id: investigation_id.to_string(),
        test_name,
        commit: CommitId::parse(&caps["sha"])?,
        branch: caps["branch"].to_string(),
    })
}

// ---------------------------------------------------------------------------
// GithubIssueProvider
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct IssueResponse {
    #[serde(default)]
    body: Option<String>,
}

pub struct GithubIssueProvider {
    client: Client,
    api_url: String,
    owner: String,
    repo: String,
    token: Option<String>,
}

impl GithubIssueProvider {
    pub fn new(
        api_url: impl Into<String>,
        owner: impl Into<String>,
        repo: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("triage/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TriageError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            owner: owner.into(),
            repo: repo.into(),
            token,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let (owner, repo) = config.issue_repo()?;
        Self::new(
            config.issues.api_url.clone(),
            owner,
            repo,
            config.issues.token.clone(),
            Duration::from_secs(config.results.timeout_secs),
        )
    }
}

impl IssueProvider for GithubIssueProvider {
    fn fetch_failure(&self, investigation_id: &str) -> Result<IssueFailure> {
        let number: u64 = investigation_id.trim_start_matches('#').parse().map_err(|_| {
            TriageError::Issue(format!(
                "'{investigation_id}' is not an issue number; pass --test and --bad explicitly"
            ))
        })?;
        let url = format!(
            "{}/repos/{}/{}/issues/{number}",
            self.api_url, self.owner, self.repo
        );
        debug!(%url, "fetching issue");

        let mut request = self
            .client
            .get(&url)
            .header("Accept", "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .map_err(|e| TriageError::Issue(format!("request to {url} failed: {e}")))?;

        match response.status() {
            s if s.is_success() => {}
            StatusCode::NOT_FOUND => {
                return Err(TriageError::Issue(format!(
                    "issue #{number} not found in {}/{}",
                    self.owner, self.repo
                )))
            }
            s => {
                return Err(TriageError::Issue(format!(
                    "issue tracker returned HTTP {}",
                    s.as_u16()
                )))
            }
        }

        let issue: IssueResponse = response
            .json()
            .map_err(|e| TriageError::Issue(format!("undecodable issue #{number}: {e}")))?;
        let body = issue.body.unwrap_or_default();
        parse_failure(investigation_id, &body)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
