//! metric-attributor service
//!
//! Loads configuration and rules, connects to Kafka, runs the claim loop and
//! serves `/` (consumer status) and the Prometheus endpoint until a
//! termination signal arrives or the consumer fails.

use clap::Parser;
use metric_attributor::{
    classifier::PathClassifier,
    cli::{Cli, Command, generate_config_template},
    config::Config,
    consumer::{KafkaClient, StopReason, StreamConsumer},
    error::AppResult,
    handlers::{self, AppState},
    metrics::Metrics,
    processor::RecordProcessor,
    rules::RuleSet,
    telemetry,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    if let Err(e) = run(Cli::parse()).await {
        tracing::error!(error = %e, "Fatal error");
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> AppResult<()> {
    if let Some(Command::Config { output }) = &cli.command {
        let template = generate_config_template();
        match output {
            Some(path) => {
                std::fs::write(path, template)?;
                println!("Configuration template written to {}", path);
            }
            None => print!("{}", template),
        }
        return Ok(());
    }

    let config = Config::from_cli(&cli)?;
    telemetry::init(&config.observability.log_level);

    let rules = RuleSet::from_file(&config.extraction.rules_path)?;
    let classifier = PathClassifier::new(rules, config.extraction.components)
        .with_tags(config.extraction.use_tags);

    let metrics = Arc::new(Metrics::new()?);
    let processor = Arc::new(RecordProcessor::new(
        classifier,
        config.extraction.record_shape(),
        metrics.clone(),
    ));

    let client = Arc::new(KafkaClient::connect(&config.kafka).await?);
    let mut consumer = StreamConsumer::new(client, &config.kafka.topic)?;
    let cancel = consumer.cancellation_token();

    tokio::spawn(shutdown_signal(cancel.clone()));

    let state = AppState::new(metrics, consumer.status_handle());
    let app = handlers::router(state, &config.server.metrics_path);

    let addr = SocketAddr::from((
        config
            .server
            .host
            .parse::<std::net::IpAddr>()
            .unwrap_or_else(|_| std::net::IpAddr::from([0, 0, 0, 0])),
        config.server.port,
    ));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("Listening on {}", addr);
    tracing::info!(
        "Metrics available at http://{}{}",
        addr,
        config.server.metrics_path
    );

    let server_cancel = cancel.clone();
    let server = tokio::spawn(async move {
        let shutdown = server_cancel.clone();
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await;
        if let Err(e) = served {
            tracing::error!(error = %e, "HTTP server failed, stopping consumer");
            server_cancel.cancel();
        }
    });

    consumer.run(processor)?;

    let reason = consumer.wait().await;
    // Stops the HTTP server when the loop ended on its own
    cancel.cancel();

    let closed = consumer.close().await;
    if let Err(e) = server.await {
        tracing::error!(error = %e, "HTTP server task panicked");
    }

    match reason {
        StopReason::Failed(e) => {
            if let Err(close_err) = &closed {
                tracing::error!(error = %close_err, "Consumer close failed after loop failure");
            }
            Err(e.into())
        }
        StopReason::Cancelled | StopReason::LoopEnded => {
            closed?;
            tracing::info!("Shutdown complete");
            Ok(())
        }
    }
}

/// Cancel `token` on Ctrl+C or SIGTERM
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
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
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Termination signal received");
    token.cancel();
}
