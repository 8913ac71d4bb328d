use crate::output::{print_fields, print_json};
use std::path::Path;
use triage_core::{
    bisect::{compute_range, range_from_known_good, BisectionRange},
    repo::SourceRepository,
};

pub fn run(
    root: &Path,
    test: &str,
    bad: &str,
    branch: Option<&str>,
    good: Option<&str>,
    json: bool,
) -> anyhow::Result<()> {
    let config = super::load_config(root)?;
    let repo = super::open_repo(root, &config)?;
    let bad = repo.resolve(bad)?;

    let range = match good {
        Some(good) => {
            let good = repo.resolve(good)?;
            range_from_known_good(&repo, test, &good, &bad, branch)?
        }
        None => {
            let history = super::open_history(root, &config)?;
            compute_range(&history, &repo, test, &bad, branch)?
        }
    };

    if json {
        return print_json(&range);
    }
    print_range(&range);
    Ok(())
}

pub fn print_range(range: &BisectionRange) {
    let mut fields = vec![
        ("test", range.test_name.clone()),
        ("good", range.last_good.to_string()),
        ("bad", range.known_bad.to_string()),
        ("commits", range.commit_count.to_string()),
    ];
    if let Some(branch) = &range.branch {
        fields.insert(1, ("branch", branch.clone()));
    }
    if let Some(anchor) = &range.anchor {
        fields.push((
            "anchor",
            format!(
                "build {} on {} ({})",
                anchor.build_id,
                anchor.branch_name,
                anchor.start_date.format("%Y-%m-%d %H:%M")
            ),
        ));
    }
    print_fields(&fields);

    if !range.commits.is_empty() {
        println!();
        for commit in &range.commits {
            println!("  {commit}");
        }
    }
}
