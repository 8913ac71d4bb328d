use crate::output::{commit_or_dash, print_fields, print_guidance, print_json};
use anyhow::Context;
use std::path::Path;
use triage_core::bisect::{load_record, report_for, BisectionReport};

pub fn run(root: &Path, investigation_id: &str, json: bool) -> anyhow::Result<()> {
    let record = load_record(root, investigation_id)
        .with_context(|| format!("cannot show investigation '{investigation_id}'"))?;
    let report = report_for(record);
    if json {
        return print_json(&report);
    }
    print_report(&report);
    Ok(())
}

pub fn print_report(report: &BisectionReport) {
    let record = &report.record;
    let mut fields = vec![
        ("investigation", record.investigation_id.clone()),
        ("test", record.test_name.clone()),
        ("branch", record.branch.clone().unwrap_or_else(|| "-".into())),
        ("outcome", record.outcome.as_str().to_string()),
        ("last success", commit_or_dash(record.last_success_sha.as_ref())),
        ("failure", record.failure_sha.to_string()),
        (
            "commits",
            record
                .commit_count
                .map_or_else(|| "-".to_string(), |n| n.to_string()),
        ),
    ];
    if record.first_failure_sha.is_some() {
        fields.push((
            "first failure",
            commit_or_dash(record.first_failure_sha.as_ref()),
        ));
    }
    print_fields(&fields);
    print_guidance(&report.guidance);
}
