mod config;
mod vcs;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::AsyncWriteExt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::vcs::Version;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "modcmd", about = "Command-backed VCS adapter for module proxies")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "/etc/modcmd/config.yaml")]
    config: String,

    #[command(subcommand)]
    action: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Print every known version of a module, one per line.
    List {
        /// Module path (e.g. `github.com/Masterminds/semver`).
        module: String,
    },
    /// Print the publication time of one version as RFC 3339.
    Timestamp {
        module: String,
        version: String,
    },
    /// Write the source archive of one version.
    Zip {
        module: String,
        version: String,
        /// Destination file; stdout when omitted.
        #[arg(short, long)]
        output: Option<String>,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = config::load_config(&cli.config)?;

    // Logs go to stderr: the zip subcommand may write archive bytes to
    // stdout.
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!(config_path = %cli.config, "starting modcmd");

    match cli.action {
        Action::List { module } => {
            let vcs = vcs::build(&config, &module);
            for version in vcs.list().await? {
                println!("{version}");
            }
        }
        Action::Timestamp { module, version } => {
            let vcs = vcs::build(&config, &module);
            let time = vcs.timestamp(&Version::from(version)).await?;
            println!("{}", time.to_rfc3339());
        }
        Action::Zip {
            module,
            version,
            output,
        } => {
            let vcs = vcs::build(&config, &module);
            let mut stream = vcs.zip(&Version::from(version)).await?;
            match output {
                Some(path) => {
                    let mut file = tokio::fs::File::create(&path)
                        .await
                        .with_context(|| format!("failed to create output file: {path}"))?;
                    tokio::io::copy(&mut stream, &mut file).await?;
                    file.flush().await?;
                }
                None => {
                    let mut stdout = tokio::io::stdout();
                    tokio::io::copy(&mut stream, &mut stdout).await?;
                    stdout.flush().await?;
                }
            }
        }
    }

    Ok(())
}
