//! `strata` command-line entry point.
//!
//! ```text
//! strata run app.yaml overrides.yaml --service worker --set component.components.web.port=9000
//! ```
//!
//! Exit codes: `0` clean stop (or the code an application component returned), `1` startup
//! or runtime failure, `2` configuration error.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use strata::{
    ComponentRegistry, ConfigError, ConfigLoader, LogWriter, Orchestrator, RuntimeError,
    Subscribe,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "strata")]
#[command(about = "Run a component tree described in YAML configuration", long_about = None)]
struct Cli {
    /// Default log filter when `RUST_LOG` is not set.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the selected service and run it until a termination signal arrives
    Run(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Configuration files, merged in order
    #[arg(value_name = "CONFIG")]
    configs: Vec<PathBuf>,

    /// Service to run (defaults to $STRATA_SERVICE, the only service, or "default")
    #[arg(short, long)]
    service: Option<String>,

    /// Override a configuration value: dotted.key=yaml-value (repeatable)
    #[arg(long = "set", value_name = "KEY=VALUE")]
    set: Vec<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Run(args) => run(args).await,
    }
}

async fn run(args: RunArgs) -> ExitCode {
    let mut loader = ConfigLoader::new().files(&args.configs);
    if let Some(service) = args.service {
        loader = loader.service(service);
    }
    let loader = args.set.into_iter().fold(loader, |loader, kv| loader.set(kv));

    let app = match loader.load() {
        Ok(app) => app,
        Err(err) => return config_error(&err),
    };
    tracing::info!(service = %app.service, "configuration loaded");

    let registry = ComponentRegistry::with_builtins();
    let root = match registry.build("root", &app.component) {
        Ok(root) => root,
        Err(err) => return config_error(&err),
    };

    let subscribers: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new())];
    let orchestrator = Orchestrator::builder(app.runtime)
        .with_subscribers(subscribers)
        .build();

    let res = orchestrator.run_until_shutdown(root).await;
    orchestrator.shutdown_subscribers().await;

    match res {
        Ok(code) => {
            tracing::info!(code, "stopped");
            ExitCode::from(code)
        }
        Err(RuntimeError::Config(err)) => config_error(&err),
        Err(err) => {
            tracing::error!(error = %err, label = err.as_label(), "application failed");
            ExitCode::FAILURE
        }
    }
}

fn config_error(err: &ConfigError) -> ExitCode {
    tracing::error!(error = %err, label = err.as_label(), "invalid configuration");
    ExitCode::from(2)
}
