pub mod bisect;
pub mod config;
pub mod history;
pub mod init;
pub mod mirror;
pub mod range;
pub mod search;
pub mod show;
pub mod worktree;

use anyhow::{bail, Context};
use std::path::Path;
use std::time::Duration;
use triage_core::{
    bisect::ScanStrategy,
    config::{Config, ResultsBackend, ENV_RESULTS_SQLITE, ENV_RESULTS_URL},
    paths,
    repo::{GitRepo, ProcessCommandRunner},
    results::{HttpResultsStore, ResultsClient, ResultsStore, SqliteResultsStore},
};

pub type History = ResultsClient<Box<dyn ResultsStore>>;

pub fn load_config(root: &Path) -> anyhow::Result<Config> {
    Config::load_with_env(root).context("failed to load .triage/config.yaml")
}

/// Results client for the configured backend.
pub fn open_history(root: &Path, config: &Config) -> anyhow::Result<History> {
    let results = &config.results;
    let store: Box<dyn ResultsStore> = match results.backend {
        ResultsBackend::Http => {
            let Some(url) = results.url.as_deref().filter(|u| !u.trim().is_empty()) else {
                bail!("results.url is not configured; set it in .triage/config.yaml or export {ENV_RESULTS_URL}");
            };
            Box::new(HttpResultsStore::new(
                url,
                results.token.clone(),
                Duration::from_secs(results.timeout_secs),
            )?)
        }
        ResultsBackend::Sqlite => {
            let Some(path) = results.sqlite_path.as_deref() else {
                bail!("results.sqlite_path is not configured; set it or export {ENV_RESULTS_SQLITE}");
            };
            let path = paths::expand_home(path)?;
            let path = if path.is_relative() { root.join(path) } else { path };
            Box::new(SqliteResultsStore::open(&path)?)
        }
    };
    Ok(ResultsClient::new(
        store,
        results.lookback_days,
        results.build_name_pattern.clone(),
    ))
}

pub fn open_repo(root: &Path, config: &Config) -> anyhow::Result<GitRepo<ProcessCommandRunner>> {
    Ok(GitRepo::from_config(&config.repository, root)?)
}

pub fn strategy(batch: Option<usize>) -> ScanStrategy {
    match batch {
        Some(chunk) => ScanStrategy::Batched { chunk },
        None => ScanStrategy::PerCommit,
    }
}
