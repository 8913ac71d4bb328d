mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{config::ConfigSubcommand, mirror::MirrorSubcommand, worktree::WorktreeSubcommand};
use std::path::PathBuf;
use triage_core::TriageError;

#[derive(Parser)]
#[command(
    name = "triage",
    about = "Bisection support for CI test failures: last-good lookup, ranges and first-failure search",
    version,
    propagate_version = true
)]
struct Cli {
    /// Workspace root (default: auto-detect from .triage/)
    #[arg(long, global = true, env = "TRIAGE_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    /// Log queries, git commands and scan progress
    #[arg(long, global = true, short = 'v')]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create .triage/ with a default config
    Init,

    /// Inspect or validate configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },

    /// List recent runs of a test, newest first
    History {
        #[arg(long)]
        test: String,
        /// Exact branch name or substring of it
        #[arg(long)]
        branch: Option<String>,
        #[arg(long, default_value = "20")]
        limit: u32,
    },

    /// Compute the commit range between the last passing run and a failing commit
    Range {
        #[arg(long)]
        test: String,
        /// Failing commit
        #[arg(long)]
        bad: String,
        #[arg(long)]
        branch: Option<String>,
        /// Known-good commit; skips the history lookup
        #[arg(long)]
        good: Option<String>,
    },

    /// Find the earliest commit between two endpoints with a recorded failure
    Search {
        #[arg(long)]
        test: String,
        #[arg(long)]
        good: String,
        #[arg(long)]
        bad: String,
        /// Look commits up N at a time instead of one by one
        #[arg(long, value_name = "N")]
        batch: Option<usize>,
    },

    /// Run a full bisection for an investigation and record the result
    Bisect {
        /// Investigation id (the failure's issue number)
        investigation_id: String,
        /// Test name (default: read from the issue)
        #[arg(long)]
        test: Option<String>,
        /// Failing commit (default: read from the issue)
        #[arg(long)]
        bad: Option<String>,
        #[arg(long)]
        branch: Option<String>,
        /// Known-good commit, when history has none
        #[arg(long)]
        good: Option<String>,
        #[arg(long, value_name = "N")]
        batch: Option<usize>,
    },

    /// Show the recorded bisection for an investigation
    Show { investigation_id: String },

    /// Manage the local mirror
    Mirror {
        #[command(subcommand)]
        subcommand: MirrorSubcommand,
    },

    /// Manage per-investigation working copies
    Worktree {
        #[command(subcommand)]
        subcommand: WorktreeSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Init => cmd::init::run(&root),
        Commands::Config { subcommand } => cmd::config::run(&root, subcommand, cli.json),
        Commands::History {
            test,
            branch,
            limit,
        } => cmd::history::run(&root, &test, branch.as_deref(), limit, cli.json),
        Commands::Range {
            test,
            bad,
            branch,
            good,
        } => cmd::range::run(
            &root,
            &test,
            &bad,
            branch.as_deref(),
            good.as_deref(),
            cli.json,
        ),
        Commands::Search {
            test,
            good,
            bad,
            batch,
        } => cmd::search::run(&root, &test, &good, &bad, batch, cli.json),
        Commands::Bisect {
            investigation_id,
            test,
            bad,
            branch,
            good,
            batch,
        } => cmd::bisect::run(
            &root,
            cmd::bisect::BisectArgs {
                investigation_id: &investigation_id,
                test: test.as_deref(),
                bad: bad.as_deref(),
                branch: branch.as_deref(),
                good: good.as_deref(),
                batch,
            },
            cli.json,
        ),
        Commands::Show { investigation_id } => cmd::show::run(&root, &investigation_id, cli.json),
        Commands::Mirror { subcommand } => cmd::mirror::run(&root, subcommand, cli.json),
        Commands::Worktree { subcommand } => cmd::worktree::run(&root, subcommand, cli.json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        if let Some(step) = e
            .chain()
            .find_map(|cause| cause.downcast_ref::<TriageError>())
            .and_then(TriageError::next_step)
        {
            eprintln!("next step: {step}");
        }
        std::process::exit(1);
    }
}
