use clap::Parser;
use rmcp::{ServiceExt, transport::stdio};
use std::sync::Arc;
use std::time::Duration;
use taskrunner::config::RuntimeConfig;
use taskrunner::error::AppError;
use taskrunner::server::TaskRunnerServer;
use taskrunner::telemetry;

#[derive(Parser, Debug)]
#[command(name = "taskrunner", about = "Task orchestration runtime over MCP")]
struct Cli {
    /// Path to a config file (without extension), overriding the default `taskrunner` lookup.
    #[arg(long)]
    config: Option<String>,
    /// Overrides `scheduler.max_concurrent_jobs`.
    #[arg(long)]
    max_concurrent_jobs: Option<usize>,
    /// Overrides `RUST_LOG` for this run.
    #[arg(long)]
    log_level: Option<String>,
}

const EXIT_SUCCESS: i32 = 0;
const EXIT_CONFIG: i32 = 2;

#[tokio::main]
async fn main() {
    let code = run().await;
    std::process::exit(code);
}

async fn run() -> i32 {
    let cli = Cli::parse();
    if let Some(level) = &cli.log_level {
        // SAFETY: single-threaded at this point, before the tokio runtime has
        // spawned any other task that might read the environment.
        unsafe { std::env::set_var("RUST_LOG", level) };
    }
    telemetry::init_tracing();

    let mut config = match RuntimeConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "failed to load configuration");
            return EXIT_CONFIG;
        }
    };
    if let Some(max_concurrent_jobs) = cli.max_concurrent_jobs {
        config.scheduler.max_concurrent_jobs = max_concurrent_jobs;
    }

    match serve(config).await {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "server exited with an error");
            e.exit_code()
        }
    }
}

async fn serve(config: RuntimeConfig) -> Result<(), AppError> {
    let cleanup_interval_ms = config.cleanup_interval_ms;
    let cleanup_max_age_ms = config.cleanup_max_age_ms;

    let server = TaskRunnerServer::new(config);
    let registry = server.registry_handle();
    spawn_cleanup_sweep(registry, cleanup_interval_ms, cleanup_max_age_ms);

    let service = server
        .serve(stdio())
        .await
        .map_err(|e| AppError::classify(anyhow::Error::from(e)))?;
    tokio::select! {
        result = service.waiting() => {
            result.map_err(|e| AppError::classify(anyhow::Error::from(e)))?;
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, stopping");
            return Err(AppError::Cancelled);
        }
    }
    Ok(())
}

fn spawn_cleanup_sweep(registry: Arc<taskrunner::job::JobRegistry>, interval_ms: u64, max_age_ms: u64) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms.max(1)));
        loop {
            ticker.tick().await;
            let removed = registry.cleanup_old_jobs(max_age_ms);
            if removed > 0 {
                tracing::debug!(removed, "swept terminal jobs past retention window");
            }
        }
    });
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
