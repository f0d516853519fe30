mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands, CrdAction};
use kuberhealthy_core::config::Config;
use tracing_subscriber::EnvFilter;

/// `log_level` is `None` for subcommands that don't load a full `Config`
/// (they fall back to `RUST_LOG`/`info`); `Run` always has one by the time
/// this is called.
fn init_tracing(log_level: Option<&str>) {
    let filter = log_level
        .and_then(|lvl| EnvFilter::try_new(lvl).ok())
        .or_else(|| EnvFilter::try_from_env("RUST_LOG").ok())
        .unwrap_or_else(|| EnvFilter::new("info"));
    let format_json = std::env::var("KH_LOG_FORMAT").as_deref() == Ok("json");

    if format_json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => {
            let config = Config::from_file_and_env(config.as_deref().map(std::path::Path::new))
                .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;
            init_tracing(Some(&config.log_level));
            commands::run::run(config).await?
        }
        Commands::Crd { action } => {
            init_tracing(None);
            match action {
                CrdAction::Print => commands::crd::print()?,
                CrdAction::Install => commands::crd::install().await?,
            }
        }
        Commands::Check => {
            init_tracing(None);
            commands::check::run().await?
        }
        Commands::Version => {
            init_tracing(None);
            commands::version::run()?
        }
    }

    Ok(())
}
