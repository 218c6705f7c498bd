use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use tollgate_core::MetricsRecorder;
use tollgate_server::config::TollgateConfig;
use tollgate_server::pipeline_factory::create_pipeline;

/// Tollgate monitor process.
#[derive(Parser, Debug)]
#[command(
    name = "tollgate-server",
    about = "Polls a rate-limited source and forwards new items to a rate-limited sink"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "tollgate.toml")]
    config: String,

    /// Run this many monitor cycles, wait for deliveries, then exit.
    /// Without it the monitor runs until interrupted.
    #[arg(long)]
    cycles: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load configuration from TOML file, or use defaults if the file does not exist.
    let config_exists = Path::new(&cli.config).exists();
    let config: TollgateConfig = if config_exists {
        let contents = std::fs::read_to_string(&cli.config)?;
        toml::from_str(&contents)?
    } else {
        toml::from_str("")?
    };

    tollgate_server::telemetry::init();

    if !config_exists {
        info!(path = %cli.config, "config file not found, using defaults");
    }

    let recorder = Arc::new(MetricsRecorder::new());
    let pipeline = Arc::new(create_pipeline(&config, recorder.clone())?);
    pipeline.start().await?;

    match cli.cycles {
        Some(cycles) => {
            let run = async {
                let reports = pipeline.run_cycles(cycles).await?;
                pipeline.wait_delivered().await;
                Ok::<_, tollgate_gateway::GatewayError>(reports.len())
            };
            tokio::select! {
                result = run => info!(cycles = result?, "requested cycles complete"),
                () = shutdown_signal() => {}
            }
        }
        None => {
            let monitor = tokio::spawn({
                let pipeline = Arc::clone(&pipeline);
                async move { pipeline.run().await }
            });
            shutdown_signal().await;
            pipeline.shutdown_token().cancel();
            monitor.await??;
        }
    }

    let abandoned = pipeline.stop().await;
    if !abandoned.is_empty() {
        warn!(
            count = abandoned.len(),
            "undelivered messages released for the next run"
        );
    }

    let summary = serde_json::json!({
        "pipeline": pipeline.metrics().snapshot(),
        "delivery": pipeline.delivery_stats(),
        "counters": recorder.counters().into_iter().collect::<std::collections::BTreeMap<_, _>>(),
        "timings": recorder.all_timings().into_iter().collect::<std::collections::BTreeMap<_, _>>(),
    });
    info!(summary = %summary, "tollgate stopped");
    Ok(())
}

/// Wait for SIGINT (Ctrl+C) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("received SIGINT"); }
        () = terminate => { info!("received SIGTERM"); }
    }
}
