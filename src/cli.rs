//! CLI argument parsing for job preparation.
use clap::{Parser, Subcommand};
use fair::job::JobMode;
use std::path::PathBuf;

/// Root CLI entrypoint.
#[derive(Parser, Debug)]
#[command(
    name = "fair",
    version,
    about = "Resolve FAIR data pipeline job configurations",
    after_help = "Examples:\n  fair prepare config.yaml\n  fair prepare config.yaml --mode pull --remote origin\n  fair get config.yaml run_metadata.default_input_namespace\n  fair validate ~/.fair/jobs/2021-09-10_14_05_09_000000/config.yaml",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "warn", value_name = "LEVEL")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    Prepare(PrepareArgs),
    Validate(ValidateArgs),
    Get(GetArgs),
}

/// Prepare command inputs for a single job.
#[derive(Parser, Debug)]
#[command(about = "Resolve a job configuration and write it to a new job directory")]
pub struct PrepareArgs {
    /// User job configuration (YAML)
    #[arg(value_name = "CONFIG")]
    pub config: PathBuf,

    /// Command the job is prepared for
    #[arg(long, value_enum, default_value = "run")]
    pub mode: JobMode,

    /// Allow uncommitted changes in the local repository
    #[arg(long)]
    pub allow_dirty: bool,

    /// Registry and git remote to use instead of `origin`
    #[arg(long, value_name = "LABEL")]
    pub remote: Option<String>,

    /// Inline job script, replacing any script in the configuration
    #[arg(long, value_name = "SCRIPT")]
    pub command: Option<String>,

    /// Shell for `--command`
    #[arg(long, value_name = "SHELL", requires = "command")]
    pub shell: Option<String>,

    /// Where to write the working configuration (defaults to the job directory)
    #[arg(long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// FAIR home directory (defaults to $FAIR_HOME or ~/.fair)
    #[arg(long, value_name = "DIR")]
    pub home: Option<PathBuf>,

    /// Emit machine-readable JSON output
    #[arg(long)]
    pub json: bool,
}

/// Validate command inputs.
#[derive(Parser, Debug)]
#[command(about = "Check a working job configuration against the job schema")]
pub struct ValidateArgs {
    /// Working job configuration (YAML)
    #[arg(value_name = "CONFIG")]
    pub config: PathBuf,

    /// Emit machine-readable JSON output
    #[arg(long)]
    pub json: bool,
}

/// Get command inputs.
#[derive(Parser, Debug)]
#[command(about = "Print the value at a dotted path of a job configuration")]
pub struct GetArgs {
    /// Job configuration (YAML)
    #[arg(value_name = "CONFIG")]
    pub config: PathBuf,

    /// Dotted key path, e.g. `run_metadata.local_repo`
    #[arg(value_name = "KEY")]
    pub key: String,
}
