use crate::error::{Result, TriageError};
use crate::paths;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ENV_RESULTS_URL: &str = "TRIAGE_RESULTS_URL";
pub const ENV_RESULTS_SQLITE: &str = "TRIAGE_RESULTS_SQLITE";
pub const ENV_REMOTE: &str = "TRIAGE_REMOTE";
pub const ENV_MIRROR: &str = "TRIAGE_MIRROR";

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// ResultsConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultsBackend {
    /// SQL-over-HTTP endpoint of the results warehouse.
    Http,
    /// Local SQLite snapshot of the warehouse.
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultsConfig {
    #[serde(default = "default_backend")]
    pub backend: ResultsBackend,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Name of the environment variable holding the bearer token.
    #[serde(default = "default_results_token_env")]
    pub token_env: String,
    /// Resolved from `token_env`; never written back to disk.
    #[serde(skip)]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sqlite_path: Option<PathBuf>,
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,
    /// SQL `LIKE` pattern selecting the test-execution build family.
    #[serde(default = "default_build_name_pattern")]
    pub build_name_pattern: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_backend() -> ResultsBackend {
    ResultsBackend::Http
}

fn default_results_token_env() -> String {
    "TRIAGE_RESULTS_TOKEN".to_string()
}

fn default_lookback_days() -> u32 {
    90
}

fn default_build_name_pattern() -> String {
    "%Test%".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

impl Default for ResultsConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            url: None,
            token_env: default_results_token_env(),
            token: None,
            sqlite_path: None,
            lookback_days: default_lookback_days(),
            build_name_pattern: default_build_name_pattern(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

// ---------------------------------------------------------------------------
// RepositoryConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    #[serde(default = "default_remote")]
    pub remote: String,
    /// Bare mirror shared by every investigation.
    #[serde(default = "default_mirror")]
    pub mirror: PathBuf,
    /// Parent of per-investigation working copies; defaults to `.triage/worktrees`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worktrees: Option<PathBuf>,
    #[serde(default = "default_branch")]
    pub default_branch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_binary: Option<PathBuf>,
}

fn default_remote() -> String {
    "https://github.com/cockroachdb/cockroach.git".to_string()
}

fn default_mirror() -> PathBuf {
    PathBuf::from("~/.cache/triage/mirror.git")
}

fn default_branch() -> String {
    "master".to_string()
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            remote: default_remote(),
            mirror: default_mirror(),
            worktrees: None,
            default_branch: default_branch(),
            git_binary: None,
        }
    }
}

impl RepositoryConfig {
    pub fn mirror_path(&self) -> Result<PathBuf> {
        paths::expand_home(&self.mirror)
    }

    pub fn worktrees_path(&self, root: &Path) -> Result<PathBuf> {
        match &self.worktrees {
            Some(p) => paths::expand_home(p),
            None => Ok(paths::default_worktrees_dir(root)),
        }
    }
}

// ---------------------------------------------------------------------------
// IssuesConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuesConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// `owner/name` of the repository failures are filed against.
    #[serde(default = "default_issue_repo")]
    pub repo: String,
    #[serde(default = "default_issue_token_env")]
    pub token_env: String,
    #[serde(skip)]
    pub token: Option<String>,
}

fn default_api_url() -> String {
    "https://api.github.com".to_string()
}

fn default_issue_repo() -> String {
    "cockroachdb/cockroach".to_string()
}

fn default_issue_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}

impl Default for IssuesConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            repo: default_issue_repo(),
            token_env: default_issue_token_env(),
            token: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub results: ResultsConfig,
    #[serde(default)]
    pub repository: RepositoryConfig,
    #[serde(default)]
    pub issues: IssuesConfig,
}

fn default_version() -> u32 {
    1
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            results: ResultsConfig::default(),
            repository: RepositoryConfig::default(),
            issues: IssuesConfig::default(),
        }
    }
}

impl Config {
    /// Load `.triage/config.yaml`. A missing file yields defaults so that a
    /// purely environment-driven setup still works.
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    /// `load` followed by overrides from the process environment.
    pub fn load_with_env(root: &Path) -> Result<Self> {
        let mut cfg = Self::load(root)?;
        cfg.apply_env(|key| std::env::var(key).ok());
        Ok(cfg)
    }

    /// Apply environment overrides through `lookup` (injectable for tests).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = non_empty(ENV_RESULTS_URL) {
            self.results.backend = ResultsBackend::Http;
            self.results.url = Some(url);
        }
        if let Some(path) = non_empty(ENV_RESULTS_SQLITE) {
            self.results.backend = ResultsBackend::Sqlite;
            self.results.sqlite_path = Some(PathBuf::from(path));
        }
        if let Some(token) = non_empty(&self.results.token_env) {
            self.results.token = Some(token);
        }
        if let Some(remote) = non_empty(ENV_REMOTE) {
            self.repository.remote = remote;
        }
        if let Some(mirror) = non_empty(ENV_MIRROR) {
            self.repository.mirror = PathBuf::from(mirror);
        }
        if let Some(token) = non_empty(&self.issues.token_env) {
            self.issues.token = Some(token);
        }
    }

    /// `owner` and `name` parts of `issues.repo`.
    pub fn issue_repo(&self) -> Result<(&str, &str)> {
        self.issues
            .repo
            .split_once('/')
            .filter(|(o, n)| !o.is_empty() && !n.is_empty() && !n.contains('/'))
            .ok_or_else(|| {
                TriageError::Config(format!(
                    "issues.repo must be 'owner/name', got '{}'",
                    self.issues.repo
                ))
            })
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        let mut push = |level: WarnLevel, message: String| {
            warnings.push(ConfigWarning { level, message })
        };

        match self.results.backend {
            ResultsBackend::Http => match self.results.url.as_deref().map(str::trim) {
                None | Some("") => push(
                    WarnLevel::Error,
                    format!("results.url is not set (or export {ENV_RESULTS_URL})"),
                ),
                Some(url) if !url.starts_with("http://") && !url.starts_with("https://") => {
                    push(
                        WarnLevel::Error,
                        format!("results.url '{url}' is not an http(s) URL"),
                    )
                }
                Some(_) => {
                    if self.results.token.is_none() {
                        push(
                            WarnLevel::Warning,
                            format!(
                                "no results token: {} is unset, requests will be anonymous",
                                self.results.token_env
                            ),
                        );
                    }
                }
            },
            ResultsBackend::Sqlite => {
                if self.results.sqlite_path.is_none() {
                    push(
                        WarnLevel::Error,
                        format!("results.sqlite_path is not set (or export {ENV_RESULTS_SQLITE})"),
                    );
                }
            }
        }

        if self.results.lookback_days == 0 {
            push(
                WarnLevel::Error,
                "results.lookback_days must be greater than 0".to_string(),
            );
        } else if self.results.lookback_days > 365 {
            push(
                WarnLevel::Warning,
                format!(
                    "results.lookback_days={} (>365 makes history queries expensive)",
                    self.results.lookback_days
                ),
            );
        }

        if !self.results.build_name_pattern.contains('%') {
            push(
                WarnLevel::Warning,
                format!(
                    "results.build_name_pattern '{}' has no '%' and matches one build name exactly",
                    self.results.build_name_pattern
                ),
            );
        }

        if self.repository.remote.trim().is_empty() {
            push(WarnLevel::Error, "repository.remote is empty".to_string());
        }
        if self.repository.default_branch.trim().is_empty() {
            push(
                WarnLevel::Error,
                "repository.default_branch is empty".to_string(),
            );
        }

        if self.issue_repo().is_err() {
            push(
                WarnLevel::Warning,
                format!(
                    "issues.repo '{}' is not 'owner/name'; issue lookups will fail",
                    self.issues.repo
                ),
            );
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = Config::load(dir.path()).unwrap();
        assert_eq!(cfg.version, 1);
        assert_eq!(cfg.results.lookback_days, 90);
        assert_eq!(cfg.repository.default_branch, "master");
    }

    #[test]
    fn serialized_config_loads_back_without_tokens() {
        let dir = TempDir::new().unwrap();
        let mut cfg = Config::load(dir.path()).unwrap();
        cfg.results.url = Some("https://results.example/api/v2/sql/".into());
        cfg.results.token = Some("secret".into());
        let raw = serde_yaml::to_string(&cfg).unwrap();
        assert!(!raw.contains("secret"), "token must never be persisted");
        std::fs::create_dir_all(dir.path().join(".triage")).unwrap();
        std::fs::write(paths::config_path(dir.path()), raw).unwrap();

        let loaded = Config::load(dir.path()).unwrap();
        assert_eq!(
            loaded.results.url.as_deref(),
            Some("https://results.example/api/v2/sql/")
        );
        assert!(loaded.results.token.is_none());
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".triage")).unwrap();
        std::fs::write(
            paths::config_path(dir.path()),
            "results:\n  backend: sqlite\n  sqlite_path: /tmp/snap.db\n",
        )
        .unwrap();
        let cfg = Config::load(dir.path()).unwrap();
        assert_eq!(cfg.results.backend, ResultsBackend::Sqlite);
        assert_eq!(cfg.results.lookback_days, 90);
        assert_eq!(cfg.issues.repo, "cockroachdb/cockroach");
    }

    #[test]
    fn env_overrides_apply() {
        let mut cfg = Config::default();
        cfg.apply_env(env(&[
            (ENV_RESULTS_URL, "https://warehouse/sql"),
            ("TRIAGE_RESULTS_TOKEN", "tok"),
            (ENV_MIRROR, "/srv/mirror.git"),
            ("GITHUB_TOKEN", "gh"),
        ]));
        assert_eq!(cfg.results.url.as_deref(), Some("https://warehouse/sql"));
        assert_eq!(cfg.results.token.as_deref(), Some("tok"));
        assert_eq!(cfg.repository.mirror, PathBuf::from("/srv/mirror.git"));
        assert_eq!(cfg.issues.token.as_deref(), Some("gh"));
    }

    #[test]
    fn blank_env_values_are_ignored() {
        let mut cfg = Config::default();
        cfg.apply_env(env(&[(ENV_REMOTE, "  ")]));
        assert_eq!(cfg.repository.remote, default_remote());
    }

    #[test]
    fn validate_flags_missing_results_url() {
        let cfg = Config::default();
        let warnings = cfg.validate();
        assert!(warnings
            .iter()
            .any(|w| w.level == WarnLevel::Error && w.message.contains("results.url")));
    }

    #[test]
    fn validate_sqlite_backend_without_path() {
        let mut cfg = Config::default();
        cfg.results.backend = ResultsBackend::Sqlite;
        let warnings = cfg.validate();
        assert!(warnings
            .iter()
            .any(|w| w.level == WarnLevel::Error && w.message.contains("sqlite_path")));
    }

    #[test]
    fn validate_clean_config_has_no_errors() {
        let mut cfg = Config::default();
        cfg.results.url = Some("https://warehouse/sql".into());
        cfg.results.token = Some("tok".into());
        let warnings = cfg.validate();
        assert!(warnings.is_empty(), "unexpected: {warnings:?}");
    }

    #[test]
    fn issue_repo_parsing() {
        let mut cfg = Config::default();
        assert_eq!(cfg.issue_repo().unwrap(), ("cockroachdb", "cockroach"));
        cfg.issues.repo = "no-slash".into();
        assert!(cfg.issue_repo().is_err());
    }
}
