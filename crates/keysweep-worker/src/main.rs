use clap::Parser;
use keysweep_core::telemetry::init_telemetry;
use keysweep_worker::{CliArgs, WorkerAgent, WorkerConfig, WorkerReport, self_check};
use tokio::signal;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let run_self_check = args.self_check;
    let config = WorkerConfig::try_from(args)?;

    let providers = init_telemetry("keysweep-worker")?;

    if run_self_check {
        tokio::task::spawn_blocking(self_check).await??;
        tracing::info!("Oracle self-check passed");
    }

    tracing::info!(
        "Starting worker for {} with {} cores",
        config.coordinator_addr,
        config.cores
    );

    let agent = WorkerAgent::new(config);
    let result = tokio::select! {
        result = agent.run() => result.map_err(anyhow::Error::from),
        () = shutdown_signal() => Err(anyhow::anyhow!("Interrupted before the session ended")),
    };

    if let Ok(report) = &result {
        print_report(report);
    }

    providers.shutdown();
    result.map(|_| ())
}

fn print_report(report: &WorkerReport) {
    match (report.reported, report.local_match) {
        (_, Some(value)) => println!("Match found: {value}"),
        (Some(_), None) if report.stopped_externally => println!("Stopped by coordinator"),
        (Some(_), None) => println!("No match in the assigned range"),
        (None, None) => println!("Session ended before the search started"),
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
    }
}
