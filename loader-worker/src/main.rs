//! Receive object arrival events over HTTP and run the configured handlers on them.
use std::sync::Arc;

use envconfig::Envconfig;
use tokio::signal;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use loader_worker::config::Config;
use loader_worker::definitions::{build_dispatcher, load_definitions};
use loader_worker::error::WorkerError;
use loader_worker::handlers::app;
use loader_worker::metrics::setup_metrics_recorder;

async fn shutdown() {
    let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())
        .expect("failed to register SIGTERM handler");

    let mut interrupt = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .expect("failed to register SIGINT handler");

    tokio::select! {
        _ = term.recv() => {},
        _ = interrupt.recv() => {},
    };

    info!("shutting down gracefully...");
}

fn init_tracing(config: &Config) {
    // RUST_LOG wins over LOG_LEVEL when both are set.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let log_layer = if config.pretty_logging {
        fmt::layer().pretty().with_filter(filter).boxed()
    } else {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_filter(filter)
            .boxed()
    };

    tracing_subscriber::registry().with(log_layer).init();
}

#[tokio::main]
async fn main() -> Result<(), WorkerError> {
    let config = Config::init_from_env()?;
    init_tracing(&config);

    let definitions = load_definitions(&config.handlers_path)?;
    let dispatcher = build_dispatcher(&config, definitions)?;
    info!(
        handlers = ?dispatcher.handler_names().collect::<Vec<_>>(),
        slack = config.slack.is_enabled(),
        "loaded handler definitions from {}",
        config.handlers_path
    );

    let recorder_handle = setup_metrics_recorder()?;
    let router = app(Arc::new(dispatcher), Some(recorder_handle));

    let bind = config.bind();
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!("listening on {}", bind);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown())
        .await?;

    Ok(())
}
