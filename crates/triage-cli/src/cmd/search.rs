use crate::output::{print_fields, print_json};
use std::path::Path;
use triage_core::{
    bisect::{search_first_failure, SearchOutcome},
    repo::SourceRepository,
};

pub fn run(
    root: &Path,
    test: &str,
    good: &str,
    bad: &str,
    batch: Option<usize>,
    json: bool,
) -> anyhow::Result<()> {
    let config = super::load_config(root)?;
    let repo = super::open_repo(root, &config)?;
    let history = super::open_history(root, &config)?;
    let good = repo.resolve(good)?;
    let bad = repo.resolve(bad)?;

    let outcome = search_first_failure(&history, &repo, test, &good, &bad, super::strategy(batch))?;

    if json {
        return print_json(&outcome);
    }
    match &outcome {
        SearchOutcome::Found {
            commit,
            position,
            run,
        } => {
            print_fields(&[
                ("first failure", commit.to_string()),
                ("position", position.to_string()),
                ("build", run.build_id.clone()),
                ("started", run.start_date.to_rfc3339()),
            ]);
        }
        SearchOutcome::NotDeterminable { scanned, with_runs } => {
            println!(
                "Not determinable: {with_runs} of {scanned} intermediate commits have recorded runs, none failing."
            );
            println!("Bisect manually between {good} and {bad}.");
        }
    }
    Ok(())
}
