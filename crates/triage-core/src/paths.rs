use crate::error::{Result, TriageError};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const TRIAGE_DIR: &str = ".triage";
pub const INVESTIGATIONS_DIR: &str = ".triage/investigations";
pub const WORKTREES_DIR: &str = ".triage/worktrees";

pub const CONFIG_FILE: &str = ".triage/config.yaml";
pub const BISECTION_FILE: &str = "bisection.json";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn investigation_dir(root: &Path, id: &str) -> PathBuf {
    root.join(INVESTIGATIONS_DIR).join(id)
}

pub fn bisection_record_path(root: &Path, id: &str) -> PathBuf {
    investigation_dir(root, id).join(BISECTION_FILE)
}

pub fn default_worktrees_dir(root: &Path) -> PathBuf {
    root.join(WORKTREES_DIR)
}

/// Expand a leading `~/` against the user's home directory.
pub fn expand_home(path: &Path) -> Result<PathBuf> {
    let Ok(rest) = path.strip_prefix("~") else {
        return Ok(path.to_path_buf());
    };
    let home = home::home_dir().ok_or_else(|| {
        TriageError::Config("home directory not found: set HOME environment variable".into())
    })?;
    Ok(home.join(rest))
}

// ---------------------------------------------------------------------------
// Investigation id validation
// ---------------------------------------------------------------------------

static INVESTIGATION_ID_RE: OnceLock<Regex> = OnceLock::new();

fn investigation_id_re() -> &'static Regex {
    INVESTIGATION_ID_RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._\-]*$").unwrap())
}

/// Investigation ids become directory names, so they must not be able to
/// escape the investigations or worktrees directory.
pub fn validate_investigation_id(id: &str) -> Result<()> {
    if id.is_empty() || id.len() > 64 || id.contains("..") || !investigation_id_re().is_match(id) {
        return Err(TriageError::InvalidInvestigationId(id.to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_investigation_ids() {
        for id in ["142345", "CRDB-1234", "issue_7", "a", "release-24.3-flake"] {
            validate_investigation_id(id).unwrap_or_else(|_| panic!("expected valid: {id}"));
        }
    }

    #[test]
    fn invalid_investigation_ids() {
        for id in ["", "../etc", "a/b", "-leading", "has space", "a..b", ".hidden"] {
            assert!(validate_investigation_id(id).is_err(), "expected invalid: {id}");
        }
        assert!(validate_investigation_id(&"x".repeat(65)).is_err());
    }

    #[test]
    fn path_helpers() {
        let root = Path::new("/tmp/proj");
        assert_eq!(
            config_path(root),
            PathBuf::from("/tmp/proj/.triage/config.yaml")
        );
        assert_eq!(
            bisection_record_path(root, "142345"),
            PathBuf::from("/tmp/proj/.triage/investigations/142345/bisection.json")
        );
    }

    #[test]
    fn expand_home_leaves_other_paths_alone() {
        let p = Path::new("/var/cache/mirror");
        assert_eq!(expand_home(p).unwrap(), p);
    }
}
