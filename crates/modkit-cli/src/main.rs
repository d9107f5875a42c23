//! modkit - build and release PowerShell modules

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use modkit_core::format::SummaryStatus;
use tracing_subscriber::EnvFilter;

use modkit_cli::config::Config;
use modkit_cli::ui::Output;
use modkit_cli::{Cli, Commands, cmd};

fn main() -> Result<ExitCode> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    let out = Output::quiet(cli.quiet || cli.json);

    match &cli.command {
        Commands::Install(args) => cmd::install::install(args, &config.install, cli.json, &out)?,
        Commands::Exports { paths, manifest } => {
            cmd::exports::exports(paths, manifest.as_deref(), cli.json, &out)?;
        }
        Commands::Format(args) => {
            let status = cmd::format::format(args, &config.format, &config.normalize, cli.json, &out)?;
            if status == SummaryStatus::Fail {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Normalize(args) => {
            if !cmd::normalize::normalize(args, &config.normalize, cli.json, &out)? {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Manifest { command } => cmd::manifest::run(command, cli.json, &out)?,
    }
    Ok(ExitCode::SUCCESS)
}
