use clap::Parser;
use keysweep_coordinator::{CliArgs, Coordinator, CoordinatorConfig, SessionReport};
use keysweep_core::telemetry::init_telemetry;
use tokio::signal;
use tokio_util::sync::CancellationToken;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = CoordinatorConfig::try_from(args)?;

    let providers = init_telemetry("keysweep-coordinator")?;
    log_startup_info(&config);

    let interrupt = CancellationToken::new();
    tokio::spawn({
        let interrupt = interrupt.clone();
        async move {
            shutdown_signal().await;
            interrupt.cancel();
        }
    });

    let result = Coordinator::new(config)
        .with_interrupt(interrupt)
        .run()
        .await
        .map_err(anyhow::Error::from);

    if let Ok(report) = &result {
        print_report(report);
    }

    providers.shutdown();
    result.map(|_| ())
}

fn log_startup_info(config: &CoordinatorConfig) {
    if cfg!(debug_assertions) {
        tracing::info!(
            "Starting coordinator on {} with full config: {:#?}",
            config.listen_addr,
            config
        );
    } else {
        tracing::info!(
            "Starting coordinator on {} for {} participants",
            config.listen_addr,
            config.participants
        );
    }
}

fn print_report(report: &SessionReport) {
    match report.result {
        Some(value) => println!("Match found: {value}"),
        None => println!("No match in the keyspace"),
    }
    for participant in &report.participants {
        let range = participant
            .range
            .map_or_else(|| "-".to_string(), |range| range.to_string());
        println!(
            "  #{} {} capacity={} range={range}",
            participant.id, participant.peer, participant.capacity
        );
    }
    println!(
        "Total capacity {} in {:.3}s",
        report.total_capacity,
        report.elapsed.as_secs_f64()
    );
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
