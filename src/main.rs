mod config;
mod db;
mod error;
mod gates;
mod ingest;
mod models;
mod notify;
mod policy;
mod processor;
mod server;
mod sweeps;
#[cfg(test)]
mod testing;

use std::sync::Arc;

use anyhow::Context;
use config::AppConfig;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::db::postgres::PgStore;
use crate::ingest::client::TelematicsClient;
use crate::ingest::poller::{Poller, PollerConfig};
use crate::notify::channels::HttpChannelGateway;
use crate::processor::assessor::RuleAssessor;
use crate::processor::pipeline::Engine;
use crate::server::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load config
    let config = AppConfig::load()?;

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(&config.log_level)
        .init();

    info!("Starting fleet alert engine...");

    // Init DB
    let pool = db::init_pool(
        &config.database_url,
        config.db_max_connections,
        config.run_migrations,
    )
    .await
    .context("connecting to database")?;
    info!("Connected to database");

    let gateway = HttpChannelGateway::new(
        &config.channel_gateway_url,
        &config.channel_gateway_token,
        config.channel_timeout_secs,
    )?;
    let engine = Arc::new(Engine::new(
        Arc::new(PgStore::new(pool.clone())),
        Arc::new(gateway),
        Arc::new(RuleAssessor),
    ));

    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => error!("Failed to listen for ctrl+c: {}", e),
        }
        shutdown_token.cancel();
    });

    let mut tasks = sweeps::scheduler::spawn_sweeps(engine.clone(), &config, cancel_token.clone());

    if config.poll_enabled {
        let source = TelematicsClient::new(
            &config.telematics_api_url,
            config.telematics_timeout_secs,
        )?;
        let poller = Poller::new(engine.clone(), Arc::new(source), PollerConfig::from(&config));
        let token = cancel_token.clone();
        tasks.push(tokio::spawn(async move { poller.run(token).await }));
    } else {
        info!("Polling disabled, relying on webhooks only");
    }

    let state = AppState {
        engine,
        webhook_secret: config.webhook_shared_secret.as_deref().map(Arc::from),
    };
    if let Err(e) = server::serve(&config.http_bind, state, cancel_token.clone()).await {
        error!("HTTP server failed: {:#}", e);
        cancel_token.cancel();
    }

    for task in tasks {
        if let Err(e) = task.await {
            error!("Background task panicked: {}", e);
        }
    }

    pool.close().await;
    info!("Database connection closed.");
    Ok(())
}
