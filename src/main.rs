use anyhow::{Context, Result};
use clap::Parser;
use fair::git::GitCommand;
use fair::job::{JobConfiguration, JobContext};
use fair::registry::RegistryClient;
use fair::settings::{default_home, find_fair_root, FairSettings};
use fair::validation;
use fair::FairError;
use serde_json::json;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod cli;
use cli::{Command, GetArgs, PrepareArgs, RootArgs, ValidateArgs};

fn main() -> ExitCode {
    let args = RootArgs::parse();
    init_tracing(&args.log_level);

    let result = match args.command {
        Command::Prepare(args) => cmd_prepare(args),
        Command::Validate(args) => cmd_validate(args),
        Command::Get(args) => cmd_get(args),
    };
    match result {
        Ok(code) => code,
        Err(err) => match err.downcast_ref::<FairError>() {
            Some(fair_err) => {
                eprintln!("{}", fair_err.render());
                ExitCode::from(u8::try_from(fair_err.exit_code()).unwrap_or(1))
            }
            None => {
                eprintln!("error: {err:#}");
                ExitCode::FAILURE
            }
        },
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn cmd_prepare(args: PrepareArgs) -> Result<ExitCode> {
    let cwd = std::env::current_dir().context("resolve current directory")?;
    let home = match args.home {
        Some(home) => home,
        None => default_home()?,
    };
    let project = find_fair_root(&cwd);
    let settings = FairSettings::load(&home, project.as_deref())?;
    let registry = RegistryClient::new();
    let git = GitCommand::new("git");
    let ctx = JobContext::new(&registry, &settings, &git);

    let mut job = JobConfiguration::load(&args.config)?;
    if let Some(remote) = args.remote {
        job = job.with_remote(remote);
    }
    if let Some(command) = &args.command {
        job.set_command(command, args.shell.as_deref())?;
    }
    job.prepare(&ctx, args.mode, args.allow_dirty)?;

    let script = if job.command().is_some() || job.script_path().is_some() {
        Some(job.setup_job_script()?)
    } else {
        None
    };
    let written = job.write(&settings, args.output.as_deref())?;
    let readables = job.get_readables()?;

    if args.json {
        let summary = json!({
            "config": written.path.display().to_string(),
            "job_dir": job.job_dir().map(|dir| dir.display().to_string()),
            "log": job.log_path().map(|log| log.display().to_string()),
            "script": script.as_ref().map(|s| s.path.display().to_string()),
            "shell": script.as_ref().map(|s| s.shell.name),
            "readables": readables,
            "environment": written.environment,
        });
        let text = serde_json::to_string_pretty(&summary).context("serialize summary")?;
        println!("{text}");
    } else {
        println!("{}", written.path.display());
        for (key, value) in &written.environment {
            println!("{key}={value}");
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_validate(args: ValidateArgs) -> Result<ExitCode> {
    let text = std::fs::read_to_string(&args.config)
        .with_context(|| format!("read {}", args.config.display()))?;
    let doc: serde_yaml::Value = serde_yaml::from_str(&text)
        .with_context(|| format!("parse {}", args.config.display()))?;
    let report = validation::validate(&doc);

    if args.json {
        let text = serde_json::to_string_pretty(&report).context("serialize report")?;
        println!("{text}");
    } else if report.is_valid() {
        println!("{}: valid", args.config.display());
    } else {
        print!("{report}");
    }
    Ok(if report.is_valid() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn cmd_get(args: GetArgs) -> Result<ExitCode> {
    let job = JobConfiguration::load(&args.config)?;
    let value = job.require(&args.key)?;
    match value {
        serde_yaml::Value::String(text) => println!("{text}"),
        other => {
            let text = serde_yaml::to_string(other).context("serialize value")?;
            print!("{text}");
        }
    }
    Ok(ExitCode::SUCCESS)
}
