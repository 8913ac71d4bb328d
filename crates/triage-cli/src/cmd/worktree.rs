use crate::output::{print_fields, print_json};
use clap::Subcommand;
use std::path::Path;
use triage_core::repo::SourceRepository;

#[derive(Subcommand)]
pub enum WorktreeSubcommand {
    /// Check a commit out in the investigation's working copy
    Checkout {
        investigation_id: String,
        /// Commit id (full or abbreviated) or ref
        commit: String,
    },
    /// Remove the investigation's working copy
    Release { investigation_id: String },
}

pub fn run(root: &Path, subcmd: WorktreeSubcommand, json: bool) -> anyhow::Result<()> {
    let config = super::load_config(root)?;
    let mut repo = super::open_repo(root, &config)?;

    match subcmd {
        WorktreeSubcommand::Checkout {
            investigation_id,
            commit,
        } => {
            let commit = repo.resolve(&commit)?;
            let handle = repo.materialize_working_copy(&investigation_id, &commit)?;
            if json {
                return print_json(&handle);
            }
            print_fields(&[
                ("investigation", handle.investigation_id.clone()),
                ("commit", handle.commit.to_string()),
                ("path", handle.path.display().to_string()),
            ]);
        }
        WorktreeSubcommand::Release { investigation_id } => {
            repo.release_working_copy(&investigation_id)?;
            if json {
                return print_json(&serde_json::json!({
                    "investigation_id": investigation_id,
                    "released": true,
                }));
            }
            println!("Released working copy for {investigation_id}");
        }
    }
    Ok(())
}
