use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use hive::config::Config;

mod cmd;

#[derive(Parser)]
#[command(name = "hive")]
#[command(version, about = "Plan-driven task orchestration in isolated git worktrees")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print results as JSON instead of human-readable text
    #[arg(long, global = true)]
    pub json: bool,

    #[arg(long, global = true, env = "HIVE_PROJECT_DIR")]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create or list features
    Feature {
        #[command(subcommand)]
        command: FeatureCommands,
    },
    /// Reconcile a feature's tasks with its plan.md
    Sync { feature: String },
    /// Inspect and update tasks
    Task {
        #[command(subcommand)]
        command: TaskCommands,
    },
    /// Show runnable and blocked tasks, and execution waves
    Schedule { feature: String },
    /// Manage subtasks of a task
    Subtask {
        #[command(subcommand)]
        command: SubtaskCommands,
    },
    /// Low-level worktree operations
    Worktree {
        #[command(subcommand)]
        command: WorktreeCommands,
    },
    /// Create the task's worktree and mark it in progress
    Start {
        feature: String,
        task: String,
        /// Branch or commit to cut the task branch from (default HEAD)
        #[arg(long)]
        base: Option<String>,
    },
    /// Commit the task's work, save its diff and mark it done
    Complete {
        feature: String,
        task: String,
        #[arg(short, long)]
        summary: String,
        /// File holding the report (generated when omitted)
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Merge a done task back and remove its worktree
    Integrate {
        feature: String,
        task: String,
        /// merge, squash or rebase (default from hive.toml)
        #[arg(long)]
        strategy: Option<String>,
    },
    /// Drop the task's worktree and branch and reset it to pending
    Abort { feature: String, task: String },
}

#[derive(Subcommand)]
pub enum FeatureCommands {
    /// Create a feature with a starter plan.md
    Create { name: String },
    /// List features
    List,
}

#[derive(Subcommand)]
pub enum TaskCommands {
    /// List tasks of a feature
    List { feature: String },
    /// Show a task's status and spec
    Show { feature: String, task: String },
    /// Set a task's status and summary
    Update {
        feature: String,
        task: String,
        #[arg(long)]
        status: String,
        #[arg(long)]
        summary: Option<String>,
    },
    /// Create a manual task outside of plan.md
    Create {
        feature: String,
        name: String,
        /// Comma-separated task folders this task waits for
        #[arg(long, value_delimiter = ',')]
        depends_on: Option<Vec<String>>,
        #[arg(short, long, default_value = "")]
        description: String,
    },
}

#[derive(Subcommand)]
pub enum SubtaskCommands {
    /// Create the next subtask of a task
    Create {
        feature: String,
        task: String,
        name: String,
        /// test, implement, review, verify, research, debug or custom
        #[arg(long = "type")]
        subtask_type: Option<String>,
        #[arg(short, long, default_value = "")]
        description: String,
    },
    /// List subtasks of a task
    List { feature: String, task: String },
    /// Set a subtask's status and summary
    Update {
        feature: String,
        task: String,
        /// Subtask id (`2.1`), folder or number
        subtask: String,
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        summary: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum WorktreeCommands {
    /// Create (or return) a task worktree
    Create {
        feature: String,
        task: String,
        #[arg(long)]
        base: Option<String>,
    },
    /// List task worktrees
    List { feature: Option<String> },
    /// Show the task's changes since its base commit
    Diff {
        feature: String,
        task: String,
        /// Also write the diff to the task's changes.diff
        #[arg(long)]
        save: bool,
    },
    /// Stage and commit all work in the worktree
    Commit {
        feature: String,
        task: String,
        #[arg(short, long)]
        message: Option<String>,
    },
    /// Merge the task branch into the current branch
    Merge {
        feature: String,
        task: String,
        #[arg(long)]
        strategy: Option<String>,
        #[arg(short, long)]
        message: Option<String>,
    },
    /// Check whether the task's saved diff applies to the repository root
    Check { feature: String, task: String },
    /// Remove a task worktree
    Remove {
        feature: String,
        task: String,
        /// Keep the task branch
        #[arg(long)]
        keep_branch: bool,
    },
    /// Remove worktrees whose HEAD no longer resolves
    Cleanup { feature: Option<String> },
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let default = if verbose { "hive=debug,info" } else { "hive=info,warn" };
    let filter = std::env::var("HIVE_LOG")
        .ok()
        .and_then(|v| EnvFilter::try_new(v).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    let config = Config::new(project_dir, cli.verbose)?;

    match &cli.command {
        Commands::Feature { command } => cmd::cmd_feature(&config, command, cli.json)?,
        Commands::Sync { feature } => cmd::cmd_sync(&config, feature, cli.json)?,
        Commands::Task { command } => cmd::cmd_task(&config, command, cli.json)?,
        Commands::Schedule { feature } => cmd::cmd_schedule(&config, feature, cli.json)?,
        Commands::Subtask { command } => cmd::cmd_subtask(&config, command, cli.json)?,
        Commands::Worktree { command } => cmd::cmd_worktree(&config, command, cli.json).await?,
        Commands::Start { feature, task, base } => {
            cmd::cmd_start(&config, feature, task, base.as_deref(), cli.json).await?
        }
        Commands::Complete {
            feature,
            task,
            summary,
            report,
        } => cmd::cmd_complete(&config, feature, task, summary, report.as_deref(), cli.json).await?,
        Commands::Integrate {
            feature,
            task,
            strategy,
        } => cmd::cmd_integrate(&config, feature, task, strategy.as_deref(), cli.json).await?,
        Commands::Abort { feature, task } => cmd::cmd_abort(&config, feature, task, cli.json).await?,
    }

    Ok(())
}
