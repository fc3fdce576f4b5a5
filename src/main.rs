mod cli;

use clap::Parser;
use cli::Cli;
use pushbox::client;
use pushbox::events::EventSink;
use pushbox::protocol::OutputEvent;
use pushbox::ratelimit::RateLimiterRegistry;
use pushbox::services::{AdapterRegistry, ServiceContext};
use pushbox::session::SessionStore;
use pushbox::worker::{self, Pipeline};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // stdout carries the event protocol; all logging goes to stderr.
    tracing_subscriber::fmt()
        .json()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let http = client::build_shared_client()?;
    let sink = Arc::new(EventSink::stdout());
    let pipeline = Pipeline {
        ctx: ServiceContext {
            http,
            sessions: Arc::new(SessionStore::new()),
            limits: Arc::new(RateLimiterRegistry::new()),
            sink: sink.clone(),
        },
        registry: Arc::new(AdapterRegistry::with_defaults()),
    };

    tracing::info!(workers = cli.workers, "sidecar starting");
    sink.emit(&OutputEvent::log(format!(
        "=== SIDECAR STARTED - WORKERS: {} ===",
        cli.workers
    )));

    let shutdown = shutdown_signal()?;
    let input = tokio::io::BufReader::new(tokio::io::stdin());
    worker::run(input, shutdown, pipeline, cli.workers as usize).await;

    Ok(())
}

#[cfg(unix)]
fn shutdown_signal() -> std::io::Result<impl std::future::Future<Output = ()>> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = signal(SignalKind::terminate())?;
    Ok(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    })
}

#[cfg(not(unix))]
fn shutdown_signal() -> std::io::Result<impl std::future::Future<Output = ()>> {
    Ok(async {
        let _ = tokio::signal::ctrl_c().await;
    })
}
