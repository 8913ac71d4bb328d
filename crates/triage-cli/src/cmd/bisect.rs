use super::show::print_report;
use crate::output::print_json;
use anyhow::Context;
use std::path::Path;
use tracing::info;
use triage_core::{
    bisect::{run_bisection, BisectionRequest},
    issue::{GithubIssueProvider, IssueProvider},
    repo::SourceRepository,
};

pub struct BisectArgs<'a> {
    pub investigation_id: &'a str,
    pub test: Option<&'a str>,
    pub bad: Option<&'a str>,
    pub branch: Option<&'a str>,
    pub good: Option<&'a str>,
    pub batch: Option<usize>,
}

pub fn run(root: &Path, args: BisectArgs<'_>, json: bool) -> anyhow::Result<()> {
    let config = super::load_config(root)?;

    // Anything not given on the command line comes from the failure issue.
    let (test, bad, branch) = match (args.test, args.bad) {
        (Some(test), Some(bad)) => (
            test.to_string(),
            bad.to_string(),
            args.branch.map(str::to_string),
        ),
        (test, bad) => {
            let provider = GithubIssueProvider::from_config(&config)?;
            let failure = provider
                .fetch_failure(args.investigation_id)
                .with_context(|| {
                    format!(
                        "failed to read failure details for '{}'",
                        args.investigation_id
                    )
                })?;
            info!(test = %failure.test_name, commit = %failure.commit.short(), branch = %failure.branch, "failure from issue");
            (
                test.map_or(failure.test_name, str::to_string),
                bad.map_or_else(|| failure.commit.to_string(), str::to_string),
                Some(args.branch.map_or(failure.branch, str::to_string)),
            )
        }
    };

    let repo = super::open_repo(root, &config)?;
    let history = super::open_history(root, &config)?;
    let known_bad = repo.resolve(&bad)?;
    let known_good = args.good.map(|g| repo.resolve(g)).transpose()?;

    let request = BisectionRequest {
        investigation_id: args.investigation_id.to_string(),
        test_name: test,
        known_bad,
        branch,
        known_good,
        strategy: super::strategy(args.batch),
    };
    let report = run_bisection(&history, &repo, root, &request)?;

    if json {
        return print_json(&report);
    }
    print_report(&report);
    Ok(())
}
