//! flowchain - workflow execution engine
//!
//! Command line entry point: runs, streams, resumes and inspects the
//! built-in workflows against the configured execution store.

mod cli;
mod cmd_inspect;
mod cmd_run;
mod demo;
mod register;

use clap::Parser;
use tracing::{error, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use flowchain_config::{ConfigLoader, ConfigValidator, LoggingConfig};

use crate::cli::{Cli, Commands};

fn init_tracing(config: &LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
    std::fs::create_dir_all(&config.dir)?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("flowchain")
        .filename_suffix("log")
        .max_log_files(30)
        .build(&config.dir)?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // The guard flushes the file writer on drop, so it lives for the whole program.
    static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
        std::sync::OnceLock::new();
    let _ = GUARD.set(guard);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    // Console output goes to stderr so command output on stdout stays parseable.
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_ansi(true)
                .with_writer(std::io::stderr),
        )
        .with(
            config
                .json
                .then(|| fmt::layer().json().with_writer(non_blocking.clone())),
        )
        .with(
            (!config.json).then(|| fmt::layer().with_writer(non_blocking).with_ansi(false)),
        )
        .init();

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = ConfigLoader::load_or_default(cli.config.as_deref())?;
    init_tracing(&config.logging)?;

    let validation = ConfigValidator::validate(&config);
    for warning in &validation.warnings {
        warn!("Config {}: {}", warning.path, warning.message);
    }
    if !validation.is_valid() {
        for e in &validation.errors {
            error!("Config {}: {}", e.path, e.message);
        }
        return Err("invalid configuration".into());
    }

    let registry = register::build_registry(&config).await?;

    match cli.command {
        Commands::Run { workflow, input, user_id } => {
            cmd_run::run(&registry, &workflow, &input, user_id).await
        }
        Commands::Stream { workflow, input, user_id } => {
            cmd_run::stream(&registry, &workflow, &input, user_id).await
        }
        Commands::Resume { execution_id, data } => {
            cmd_run::resume(&registry, &execution_id, &data).await
        }
        Commands::Cancel { execution_id, reason } => {
            cmd_run::cancel(&registry, &execution_id, &reason).await
        }
        Commands::List { workflow, format } => {
            cmd_inspect::list(&registry, workflow.as_deref(), &format).await
        }
        Commands::Show { execution_id } => cmd_inspect::show(&registry, &execution_id).await,
    }
}
