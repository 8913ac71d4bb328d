use anyhow::Context;
use std::path::Path;
use triage_core::{config::Config, io, paths};

pub fn run(root: &Path) -> anyhow::Result<()> {
    println!("Initializing triage in: {}", root.display());

    for dir in [paths::TRIAGE_DIR, paths::INVESTIGATIONS_DIR] {
        let p = root.join(dir);
        io::ensure_dir(&p).with_context(|| format!("failed to create {}", p.display()))?;
    }

    let yaml = serde_yaml::to_string(&Config::default())?;
    let written = io::write_if_missing(&paths::config_path(root), yaml.as_bytes())
        .context("failed to write config.yaml")?;
    if written {
        println!("  created: {}", paths::CONFIG_FILE);
    } else {
        println!("  exists:  {}", paths::CONFIG_FILE);
    }

    println!(
        "\nNext: set results.url (or {}) and run `triage config validate`.",
        triage_core::config::ENV_RESULTS_URL
    );
    Ok(())
}
