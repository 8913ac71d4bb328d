use crate::output::print_json;
use clap::Subcommand;
use std::path::Path;

#[derive(Subcommand)]
pub enum MirrorSubcommand {
    /// Clone the bare mirror if it does not exist yet
    Sync,
}

pub fn run(root: &Path, subcmd: MirrorSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        MirrorSubcommand::Sync => sync(root, json),
    }
}

fn sync(root: &Path, json: bool) -> anyhow::Result<()> {
    let config = super::load_config(root)?;
    let repo = super::open_repo(root, &config)?;
    let cloned = repo.ensure_mirror()?;

    if json {
        return print_json(&serde_json::json!({
            "mirror": repo.mirror(),
            "cloned": cloned,
        }));
    }
    if cloned {
        println!("Cloned {} into {}", config.repository.remote, repo.mirror().display());
    } else {
        println!("Mirror present at {}", repo.mirror().display());
    }
    Ok(())
}
