//! Command line and environment configuration

use std::time::Duration;

use cgc_common::CONTROLLER_NAME;
use clap::{Parser, ValueEnum};

/// Log output format
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Cloud gateway controller - materializes Gateway API resources from templates
#[derive(Parser, Clone, Debug)]
#[command(name = "cloud-gateway-controller", version, about, long_about = None)]
pub struct Config {
    /// GatewayClasses with this controllerName are reconciled. Also used as
    /// the server-side-apply field manager.
    #[arg(long, env = "CGC_CONTROLLER_NAME", default_value = CONTROLLER_NAME)]
    pub controller_name: String,

    /// Materialization passes per reconciliation
    #[arg(
        long,
        env = "CGC_MAX_PASSES",
        default_value_t = 3,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub max_passes: u32,

    /// Requeue interval while templates are pending or a dependency is missing
    #[arg(long, env = "CGC_REQUEUE_SECS", default_value_t = 5)]
    pub requeue_secs: u64,

    /// Requeue interval after a failed reconciliation
    #[arg(long, env = "CGC_ERROR_REQUEUE_SECS", default_value_t = 30)]
    pub error_requeue_secs: u64,

    /// Log output format
    #[arg(long, env = "CGC_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Print the GatewayClassParameters CRD and exit
    #[arg(long)]
    pub crd: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            controller_name: CONTROLLER_NAME.to_string(),
            max_passes: 3,
            requeue_secs: 5,
            error_requeue_secs: 30,
            log_format: LogFormat::Text,
            crd: false,
        }
    }
}

impl Config {
    /// Requeue delay for pending work
    pub fn requeue(&self) -> Duration {
        Duration::from_secs(self.requeue_secs)
    }

    /// Requeue delay after an error
    pub fn error_requeue(&self) -> Duration {
        Duration::from_secs(self.error_requeue_secs)
    }
}
