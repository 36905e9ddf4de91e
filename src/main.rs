use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info, warn};

use chainrelay::chain::{ChainConnection, ReconnectPolicy};
use chainrelay::config;
use chainrelay::database;
use chainrelay::delivery::circuit::CircuitBreakerManager;
use chainrelay::delivery::dead_letter::{CleanupManager, DeadLetterQueue};
use chainrelay::delivery::queue::DeliveryQueue;
use chainrelay::delivery::sender::WebhookSender;
use chainrelay::delivery::tracker::DeliveryTracker;
use chainrelay::events::EventListener;
use chainrelay::processor::EventProcessor;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env before anything reads DATABASE_URL
    dotenv::dotenv().ok();
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let config_path = args.config.unwrap_or_else(config::default_config_path);
    info!("Using configuration file: {:?}", config_path);

    let config = match config::load_config(&config_path) {
        Ok(cfg) => {
            info!("Configuration loaded successfully");
            cfg
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(anyhow::anyhow!("Configuration error: {}", e));
        }
    };

    let pool = database::establish_connection().await?;
    database::run_migrations(&pool).await?;

    // Delivery side
    let tracker = Arc::new(DeliveryTracker::new());
    let sender = Arc::new(WebhookSender::new(tracker.clone())?);
    let circuit = Arc::new(CircuitBreakerManager::new((&config.circuit_breaker).into()));
    let dead_letter = Arc::new(DeadLetterQueue::new(
        Arc::new(database::DeadLetterRepository::new(pool.clone())),
        config.dead_letter.clone(),
    ));
    let queue = Arc::new(DeliveryQueue::new(
        Arc::new(database::DeliveryRepository::new(pool.clone())),
        dead_letter.clone(),
        sender.clone(),
        circuit,
        tracker,
        config.delivery.clone(),
    ));

    // Chain side
    let policy = ReconnectPolicy {
        max_attempts: config.node.max_reconnect_attempts,
        ..ReconnectPolicy::default()
    };
    let connection = ChainConnection::with_policy(&config.node.ws_url, policy)?;
    let (listener, signals) = EventListener::new(connection.clone());

    let subscription_store = Arc::new(database::SubscriptionRepository::new(pool.clone()));
    let processor = EventProcessor::new(
        connection,
        listener,
        signals,
        queue,
        sender,
        subscription_store,
    );

    // Config-seeded subscriptions are persisted like any other, so they
    // survive restarts and show up in the same tables.
    for subscription in config.subscriptions.clone() {
        let id = subscription.id.clone();
        if let Err(e) = processor.add_subscription(subscription).await {
            warn!("Skipping config subscription '{id}': {e:#}");
        }
    }

    processor.start().await?;

    let mut cleanup = CleanupManager::new(dead_letter, config.dead_letter.clone()).await?;
    cleanup.start().await?;

    info!("chainrelay started");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    cleanup.stop().await?;
    processor.stop().await;
    pool.close().await;

    info!("Shutdown complete");
    Ok(())
}
