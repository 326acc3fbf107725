//! netpath - Network Health Path
//!
//! Runs packet-loss traces on demand and reports the lossy hops to a webhook.

mod config;
mod job;
mod probe;
mod web;

use config::ServerConfig;
use job::{DiagnosticJob, Notifier};
use probe::ProbeRunner;
use web::Server;

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("netpath=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("Starting netpath on port {}...", cfg.http_port);

    let runner = ProbeRunner::for_host(&cfg.job);
    tracing::info!(
        "Using {} with a {:?} bound",
        runner.command().program,
        cfg.job.probe_timeout
    );

    let notifier = Notifier::new(cfg.job.webhook_timeout)?;
    let job = Arc::new(DiagnosticJob::new(cfg.job.clone(), runner, notifier));

    // Start web server
    let server = Server::new(cfg, job);
    server.start().await?;

    Ok(())
}
