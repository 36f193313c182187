// src/main.rs

use std::process::ExitCode;

use tracing_subscriber::EnvFilter;

use vaultkeeper::config::{AgentConfig, LogFormat};
use vaultkeeper::sys::catalog::load_catalog;
use vaultkeeper::{AgentError, Supervisor};

#[tokio::main]
async fn main() -> ExitCode {
    // ==============================================================================
    // 1. Configuration & Environment
    // ==============================================================================

    // The log format lives in config, so a config failure is reported in text format.
    let config = match AgentConfig::load() {
        Ok(config) => config,
        Err(e) => {
            init_tracing(LogFormat::Text);
            return fatal(&e);
        }
    };
    init_tracing(config.log_format);

    let catalog = match load_catalog(&config.secrets_path) {
        Ok(catalog) => catalog,
        Err(e) => return fatal(&e),
    };

    tracing::info!(
        vault = %config.vault_addr,
        broker = %config.broker_addr,
        secrets = catalog.len(),
        refresh_interval_secs = config.refresh_interval.as_secs_f64(),
        renewal_grace_secs = config.renewal_grace.as_secs_f64(),
        "⚙️ Vaultkeeper agent starting"
    );

    // ==============================================================================
    // 2. Supervised Run
    // ==============================================================================

    let mut supervisor = match Supervisor::new(config, catalog) {
        Ok(supervisor) => supervisor,
        Err(e) => return fatal(&e),
    };

    match supervisor.run().await {
        // Unix exit codes fit in a byte.
        Ok(report) => ExitCode::from(report.outcome.exit_code().clamp(0, 255) as u8),
        Err(e) => fatal(&e),
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("vaultkeeper=info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

fn fatal(err: &AgentError) -> ExitCode {
    tracing::error!(phase = err.phase(), error = %err, "Agent failed");
    ExitCode::from(err.exit_code())
}
