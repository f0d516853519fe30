use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "kuberhealthy")]
#[command(about = "Synthetic health check controller for Kubernetes")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Boot the full controller (scheduler, ingestor, reaper, leader election)
    Run {
        /// Optional YAML config file; KH_* environment variables always override it
        #[arg(long)]
        config: Option<String>,
    },

    /// Manage the HealthCheck CRD
    Crd {
        #[command(subcommand)]
        action: CrdAction,
    },

    /// Run a connectivity smoke test against the cluster
    Check,

    /// Display application version
    Version,
}

#[derive(Subcommand)]
pub enum CrdAction {
    /// Print the CRD YAML to stdout
    Print,

    /// Install the CRD into the connected cluster
    Install,
}
