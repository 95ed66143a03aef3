//! Tracing subscriber setup

use clap::ValueEnum;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter, e.g. `shopfleet=debug,kube=warn`
pub const LOG_ENV: &str = "SHOPFLEET_LOG";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

fn filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| {
        EnvFilter::new(if verbose { "debug" } else { "info" })
    })
}

/// Install the global subscriber; later calls are ignored
pub fn init(format: LogFormat, verbose: bool) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter(verbose))
        .with_target(false);

    let result = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
