use crate::output::{print_json, print_table};
use anyhow::Context;
use std::path::Path;
use triage_core::results::RunHistory;

pub fn run(
    root: &Path,
    test: &str,
    branch: Option<&str>,
    limit: u32,
    json: bool,
) -> anyhow::Result<()> {
    let config = super::load_config(root)?;
    let history = super::open_history(root, &config)?;
    let runs = history
        .get_history(test, limit, branch)
        .with_context(|| format!("failed to read history of '{test}'"))?;

    if json {
        return print_json(&runs);
    }
    if runs.is_empty() {
        println!(
            "No runs of '{test}' in the last {} days.",
            history.lookback_days()
        );
        return Ok(());
    }

    let rows = runs
        .iter()
        .map(|r| {
            vec![
                r.build_id.clone(),
                r.start_date.format("%Y-%m-%d %H:%M").to_string(),
                r.status.to_string(),
                r.commit
                    .as_ref()
                    .map_or_else(|| "-".to_string(), |c| c.short().to_string()),
                r.branch_name.clone(),
            ]
        })
        .collect();
    print_table(&["BUILD", "STARTED", "STATUS", "COMMIT", "BRANCH"], rows);

    let without_commit = runs.iter().filter(|r| r.commit.is_none()).count();
    if without_commit > 0 {
        println!(
            "\n{without_commit} of {} runs carry no commit id and cannot anchor a bisection.",
            runs.len()
        );
    }
    Ok(())
}
