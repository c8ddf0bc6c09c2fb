use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info};

use mycloud::{asset, deploy, MycloudStack, StackConfig};

#[derive(Parser)]
#[command(
    name = "mycloud",
    about = "Synthesize and deploy the mycloud web stack",
    version,
    propagate_version = true,
)]
struct Cli {
    /// TOML config file. Defaults to ./mycloud.toml when present.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the CloudFormation template, or write it to a file
    Synth {
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Zip the handler directory and print its object key
    Package {
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Upload the handlers and create or update the stack
    Deploy,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("mycloud=info"))
        )
        .with_writer(std::io::stderr)
        .init();

    if report(run(Cli::parse())) {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// logs a failed command with its whole error chain. Returns whether it succeeded.
fn report(result: anyhow::Result<()>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            error!(error = %format!("{e:#}"), "command failed");
            false
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = StackConfig::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Synth { out } => {
            let template = MycloudStack::new(&config)?.synth()?;
            match out {
                Some(path) => {
                    std::fs::write(&path, template)
                        .with_context(|| format!("failed to write template to {}", path.display()))?;
                    info!(path = %path.display(), "wrote template");
                }
                None => println!("{template}"),
            }
        }
        Commands::Package { out } => {
            let asset = asset::package_dir(&config.asset_dir)?;
            let path = out.unwrap_or_else(|| PathBuf::from(format!("{:08x}.zip", asset.hash)));
            std::fs::write(&path, &asset.bytes)
                .with_context(|| format!("failed to write asset to {}", path.display()))?;
            info!(path = %path.display(), files = asset.files.len(), "wrote asset");
            println!("{}", asset.key());
        }
        Commands::Deploy => {
            let runtime = tokio::runtime::Runtime::new()?;
            let outputs = runtime.block_on(deploy::deploy(&config))?;
            for (key, value) in outputs.iter() {
                println!("{key} = {value}");
            }
        }
    }
    Ok(())
}
