use super::{SourceRepository, WorkingCopyHandle};
use crate::config::RepositoryConfig;
use crate::error::{Result, TriageError};
use crate::io;
use crate::paths;
use crate::types::CommitId;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tracing::{debug, info, warn};

pub trait CommandRunner {
    fn run(&self, program: &str, args: &[OsString]) -> std::io::Result<Output>;
}

#[derive(Debug, Default)]
pub struct ProcessCommandRunner;

impl CommandRunner for ProcessCommandRunner {
    fn run(&self, program: &str, args: &[OsString]) -> std::io::Result<Output> {
        Command::new(program).args(args).output()
    }
}

/// Git CLI accessor over a bare, blob-less mirror of the remote.
///
/// All history queries run against the mirror. Working copies are linked
/// worktrees of the mirror, one directory per investigation id under
/// `worktrees`.
pub struct GitRepo<R: CommandRunner> {
    runner: R,
    binary: PathBuf,
    remote: String,
    mirror: PathBuf,
    worktrees: PathBuf,
    default_branch: String,
    handles: BTreeMap<String, WorkingCopyHandle>,
}

/// Locate the git binary: an explicit path is used as-is when it exists,
/// anything else is looked up on `PATH`.
pub fn locate_git(configured: Option<&Path>) -> Result<PathBuf> {
    let wanted = configured.unwrap_or_else(|| Path::new("git"));
    if wanted.components().count() > 1 && wanted.is_file() {
        return Ok(wanted.to_path_buf());
    }
    which::which(wanted).map_err(|e| {
        TriageError::Git(format!(
            "git binary '{}' not found ({e}); install git or set repository.git_binary",
            wanted.display()
        ))
    })
}

impl GitRepo<ProcessCommandRunner> {
    pub fn from_config(config: &RepositoryConfig, root: &Path) -> Result<Self> {
        let binary = locate_git(config.git_binary.as_deref())?;
        Ok(Self::with_runner(
            ProcessCommandRunner,
            binary,
            config.remote.clone(),
            config.mirror_path()?,
            config.worktrees_path(root)?,
            config.default_branch.clone(),
        ))
    }
}

impl<R: CommandRunner> GitRepo<R> {
    pub fn with_runner(
        runner: R,
        binary: PathBuf,
        remote: String,
        mirror: PathBuf,
        worktrees: PathBuf,
        default_branch: String,
    ) -> Self {
        Self {
            runner,
            binary,
            remote,
            mirror,
            worktrees,
            default_branch,
            handles: BTreeMap::new(),
        }
    }

    pub fn mirror(&self) -> &Path {
        &self.mirror
    }

    // -----------------------------------------------------------------------
    // Argument vectors
    // -----------------------------------------------------------------------

    fn mirror_args(mirror: &Path, rest: &[&str]) -> Vec<OsString> {
        let mut args = vec![OsString::from("--git-dir"), mirror.as_os_str().to_owned()];
        args.extend(rest.iter().map(OsString::from));
        args
    }

    fn clone_args(remote: &str, mirror: &Path) -> Vec<OsString> {
        vec![
            "clone".into(),
            "--bare".into(),
            "--filter=blob:none".into(),
            remote.into(),
            mirror.as_os_str().to_owned(),
        ]
    }

    fn rev_parse_args(mirror: &Path, rev: &str) -> Vec<OsString> {
        let spec = format!("{rev}^{{commit}}");
        Self::mirror_args(mirror, &["rev-parse", "--verify", "--quiet", &spec])
    }

    fn fetch_rev_args(mirror: &Path, rev: &str) -> Vec<OsString> {
        Self::mirror_args(mirror, &["fetch", "--no-tags", "origin", rev])
    }

    fn fetch_branch_args(mirror: &Path, branch: &str) -> Vec<OsString> {
        let refspec = format!("+refs/heads/{branch}:refs/heads/{branch}");
        Self::mirror_args(mirror, &["fetch", "--no-tags", "origin", &refspec])
    }

    fn is_ancestor_args(mirror: &Path, good: &CommitId, bad: &CommitId) -> Vec<OsString> {
        Self::mirror_args(
            mirror,
            &["merge-base", "--is-ancestor", good.as_str(), bad.as_str()],
        )
    }

    fn rev_list_args(mirror: &Path, good: &CommitId, bad: &CommitId) -> Vec<OsString> {
        let range = format!("{good}..{bad}");
        Self::mirror_args(
            mirror,
            &["rev-list", "--reverse", "--topo-order", "--ancestry-path", &range],
        )
    }

    fn worktree_add_args(mirror: &Path, path: &Path, commit: &CommitId) -> Vec<OsString> {
        let mut args = Self::mirror_args(mirror, &["worktree", "add", "--detach"]);
        args.push(path.as_os_str().to_owned());
        args.push(commit.as_str().into());
        args
    }

    fn worktree_remove_args(mirror: &Path, path: &Path) -> Vec<OsString> {
        let mut args = Self::mirror_args(mirror, &["worktree", "remove", "--force"]);
        args.push(path.as_os_str().to_owned());
        args
    }

    fn worktree_prune_args(mirror: &Path) -> Vec<OsString> {
        Self::mirror_args(mirror, &["worktree", "prune"])
    }

    fn head_args(path: &Path) -> Vec<OsString> {
        vec![
            "-C".into(),
            path.as_os_str().to_owned(),
            "rev-parse".into(),
            "--show-toplevel".into(),
            "HEAD".into(),
        ]
    }

    fn checkout_args(path: &Path, commit: &CommitId) -> Vec<OsString> {
        vec![
            "-C".into(),
            path.as_os_str().to_owned(),
            "checkout".into(),
            "--detach".into(),
            "--force".into(),
            commit.as_str().into(),
        ]
    }

    // -----------------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------------

    fn run_git_raw(&self, args: &[OsString]) -> Result<Output> {
        let program = self
            .binary
            .to_str()
            .ok_or_else(|| TriageError::Git("git binary path is not valid UTF-8".into()))?;
        debug!(args = %render_args(args), "git");
        self.runner.run(program, args).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => TriageError::Git(format!(
                "git binary '{}' was not found; install git or set repository.git_binary",
                self.binary.display()
            )),
            _ => TriageError::Git(format!(
                "failed to execute '{}': {e}",
                self.binary.display()
            )),
        })
    }

    fn run_git(&self, args: &[OsString]) -> Result<Output> {
        let output = self.run_git_raw(args)?;
        if output.status.success() {
            return Ok(output);
        }
        Err(self.command_failed(args, &output))
    }

    fn command_failed(&self, args: &[OsString], output: &Output) -> TriageError {
        TriageError::Git(format!(
            "`{} {}` failed: {}",
            self.binary.display(),
            render_args(args),
            failure_detail(output)
        ))
    }

    // -----------------------------------------------------------------------
    // Mirror and resolution
    // -----------------------------------------------------------------------

    /// Clone the mirror if it does not exist yet. Returns whether a clone
    /// happened.
    pub fn ensure_mirror(&self) -> Result<bool> {
        if self.mirror.join("HEAD").is_file() {
            return Ok(false);
        }
        if let Some(parent) = self.mirror.parent() {
            io::ensure_dir(parent)?;
        }
        info!(remote = %self.remote, mirror = %self.mirror.display(), "cloning mirror");
        self.run_git(&Self::clone_args(&self.remote, &self.mirror))?;
        Ok(true)
    }

    fn lookup_local(&self, rev: &str) -> Result<Option<CommitId>> {
        let args = Self::rev_parse_args(&self.mirror, rev);
        let output = self.run_git_raw(&args)?;
        if output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout);
            return CommitId::parse(stdout.trim()).map(Some).map_err(|_| {
                TriageError::Git(format!("unexpected rev-parse output: {}", stdout.trim()))
            });
        }
        if output.status.code() == Some(1) {
            return Ok(None);
        }
        Err(self.command_failed(&args, &output))
    }

    /// Run a fetch whose failure is not fatal on its own.
    fn try_fetch(&self, args: &[OsString], what: &str) -> Result<()> {
        let output = self.run_git_raw(args)?;
        if !output.status.success() {
            warn!(what, detail = %failure_detail(&output), "fetch failed");
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Working copies
    // -----------------------------------------------------------------------

    pub fn working_copy_path(&self, investigation_id: &str) -> Result<PathBuf> {
        paths::validate_investigation_id(investigation_id)?;
        Ok(self.worktrees.join(investigation_id))
    }

    pub fn working_copy(&self, investigation_id: &str) -> Option<&WorkingCopyHandle> {
        self.handles.get(investigation_id)
    }

    /// HEAD of the working copy at `path`, or `None` when `path` is not a
    /// checkout of its own. Git searches parent directories for a repository,
    /// so a stray directory under a checkout would otherwise report the
    /// enclosing repository's HEAD.
    fn current_head(&self, path: &Path) -> Result<Option<CommitId>> {
        if !path.join(".git").exists() {
            return Ok(None);
        }
        let output = self.run_git_raw(&Self::head_args(path))?;
        if !output.status.success() {
            return Ok(None);
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut lines = stdout.lines().map(str::trim);
        let (Some(toplevel), Some(head)) = (lines.next(), lines.next()) else {
            return Ok(None);
        };
        if !same_dir(Path::new(toplevel), path) {
            debug!(path = %path.display(), toplevel, "directory belongs to another checkout");
            return Ok(None);
        }
        Ok(CommitId::parse(head).ok())
    }

    /// Check `commit` out in the investigation's working copy, creating it
    /// when absent.
    pub fn materialize_working_copy(
        &mut self,
        investigation_id: &str,
        commit: &CommitId,
    ) -> Result<WorkingCopyHandle> {
        let path = self.working_copy_path(investigation_id)?;
        let commit = self.resolve(commit.as_str())?;

        if path.exists() {
            match self.current_head(&path)? {
                Some(head) if head == commit => {
                    debug!(investigation_id, commit = %commit.short(), "working copy already at commit");
                }
                Some(head) => {
                    info!(
                        investigation_id,
                        from = %head.short(),
                        to = %commit.short(),
                        "switching working copy"
                    );
                    self.run_git(&Self::checkout_args(&path, &commit))?;
                }
                None => {
                    warn!(path = %path.display(), "replacing unusable working copy");
                    io::remove_path(&path)?;
                    self.prune();
                    self.add_worktree(&path, &commit)?;
                }
            }
        } else {
            self.add_worktree(&path, &commit)?;
        }

        let handle = WorkingCopyHandle {
            investigation_id: investigation_id.to_string(),
            path,
            commit,
        };
        self.handles
            .insert(investigation_id.to_string(), handle.clone());
        Ok(handle)
    }

    fn add_worktree(&self, path: &Path, commit: &CommitId) -> Result<()> {
        io::ensure_dir(&self.worktrees)?;
        info!(path = %path.display(), commit = %commit.short(), "creating working copy");
        self.run_git(&Self::worktree_add_args(&self.mirror, path, commit))?;
        Ok(())
    }

    fn prune(&self) {
        match self.run_git_raw(&Self::worktree_prune_args(&self.mirror)) {
            Ok(output) if !output.status.success() => {
                warn!(detail = %failure_detail(&output), "worktree prune failed")
            }
            Err(e) => warn!(error = %e, "worktree prune failed"),
            Ok(_) => {}
        }
    }

    /// Remove the investigation's working copy. Falls back to deleting the
    /// directory when git refuses.
    pub fn release_working_copy(&mut self, investigation_id: &str) -> Result<()> {
        let path = self.working_copy_path(investigation_id)?;
        self.handles.remove(investigation_id);
        if !path.exists() {
            return Ok(());
        }

        let detail = match self.run_git_raw(&Self::worktree_remove_args(&self.mirror, &path)) {
            Ok(output) if output.status.success() => {
                info!(investigation_id, "released working copy");
                return Ok(());
            }
            Ok(output) => failure_detail(&output),
            Err(e) => e.to_string(),
        };

        warn!(investigation_id, detail = %detail, "worktree remove failed; deleting directory");
        io::remove_path(&path)?;
        self.prune();
        Ok(())
    }
}

impl<R: CommandRunner> SourceRepository for GitRepo<R> {
    fn resolve(&self, rev: &str) -> Result<CommitId> {
        let rev = rev.trim();
        if rev.is_empty() || rev.starts_with('-') {
            return Err(TriageError::InvalidCommitId(rev.to_string()));
        }
        self.ensure_mirror()?;

        if let Some(commit) = self.lookup_local(rev)? {
            return Ok(commit);
        }

        debug!(rev, "not in mirror; fetching by id");
        self.try_fetch(&Self::fetch_rev_args(&self.mirror, rev), rev)?;
        if let Some(commit) = self.lookup_local(rev)? {
            return Ok(commit);
        }

        info!(rev, branch = %self.default_branch, "fetching default branch");
        self.try_fetch(
            &Self::fetch_branch_args(&self.mirror, &self.default_branch),
            &self.default_branch,
        )?;
        self.lookup_local(rev)?
            .ok_or_else(|| TriageError::CommitUnresolvable(rev.to_string()))
    }

    fn ancestry_interval(&self, good: &CommitId, bad: &CommitId) -> Result<Vec<CommitId>> {
        let good = self.resolve(good.as_str())?;
        let bad = self.resolve(bad.as_str())?;

        let args = Self::is_ancestor_args(&self.mirror, &good, &bad);
        let output = self.run_git_raw(&args)?;
        match output.status.code() {
            Some(0) => {}
            Some(1) => {
                return Err(TriageError::AncestryError {
                    good: good.to_string(),
                    bad: bad.to_string(),
                })
            }
            _ => return Err(self.command_failed(&args, &output)),
        }

        let output = self.run_git(&Self::rev_list_args(&self.mirror, &good, &bad))?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut commits = stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(|l| {
                CommitId::parse(l)
                    .map_err(|_| TriageError::Git(format!("unexpected rev-list output: {l}")))
            })
            .collect::<Result<Vec<_>>>()?;
        commits.retain(|c| *c != bad);
        debug!(good = %good.short(), bad = %bad.short(), count = commits.len(), "ancestry interval");
        Ok(commits)
    }
}

fn render_args(args: &[OsString]) -> String {
    args.iter()
        .map(|a| a.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

fn same_dir(a: &Path, b: &Path) -> bool {
    match (std::fs::canonicalize(a), std::fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn failure_detail(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if !stderr.is_empty() {
        stderr
    } else if !stdout.is_empty() {
        stdout
    } else {
        format!("exit status {}", output.status)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
