//! tidegated: the Tidegate admin-plane daemon.
//!
//! # Usage
//!
//! ```text
//! tidegated run --config /etc/tidegate/tidegate.toml
//! tidegated check-config --config /etc/tidegate/tidegate.toml
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;

use tidegate_core::AdminConfig;

#[derive(Parser)]
#[command(name = "tidegated", about = "Tidegate admin-plane daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the admin service, cluster sync and job scheduler.
    Run {
        /// Path to the TOML configuration file.
        #[arg(long)]
        config: PathBuf,

        /// Override `admin.data_dir`.
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Override `cluster.listen`.
        #[arg(long)]
        listen: Option<String>,
    },

    /// Parse and validate a configuration file, then print it resolved.
    CheckConfig {
        #[arg(long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,tidegated=debug,tidegate=debug")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            data_dir,
            listen,
        } => {
            let mut config = AdminConfig::from_file(&config)?;
            if let Some(data_dir) = data_dir {
                config.admin.data_dir = data_dir;
            }
            if let Some(listen) = listen {
                config.cluster.listen = listen;
            }
            config.validate()?;
            tidegated::run_node(config).await
        }
        Command::CheckConfig { config: path } => {
            let config = AdminConfig::from_file(&path)?;
            info!(path = ?path, "configuration is valid");
            println!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}
