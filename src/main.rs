//! Live reveal display - running vote average with a timed reveal
//!
//! Module structure:
//! - `domain/` - Ratings, aggregates and the display frame
//! - `io/` - External interfaces (REST store, MQTT feed and display, Prometheus)
//! - `services/` - Aggregation engine, reveal sequencer and the display loop
//! - `infra/` - Infrastructure (Config, Metrics, Broker)

use clap::Parser;
use live_reveal::infra::{Config, Metrics};
use live_reveal::io::{create_display_channel, DisplayPublisher, MqttFeed, RestClient};
use live_reveal::services::{FeedListener, LiveDisplay, RevealSequencer, RevealTiming};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Live reveal display - vote aggregation and reveal sequencer
#[derive(Parser, Debug)]
#[command(name = "live-reveal", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "config/dev.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // RUST_LOG=debug shows every frame and notification
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(git = %env!("GIT_HASH"), "live-reveal starting");

    let args = Args::parse();
    let config = Config::load_from_path(&args.config);

    info!(
        config_file = %config.config_file(),
        display_id = %config.display_id(),
        mqtt_host = %config.mqtt_host(),
        mqtt_port = %config.mqtt_port(),
        feed_topic_prefix = %config.feed_topic_prefix(),
        display_topic = %config.display_topic(),
        store = %config.store_base_url(),
        suspense_ms = %config.suspense().as_millis(),
        count_up_ms = %config.count_up().as_millis(),
        label_clear_ms = %config.label_clear().as_millis(),
        tie_break = ?config.tie_break(),
        prometheus_port = %config.prometheus_port(),
        "config_loaded"
    );

    live_reveal::infra::broker::start_embedded_broker(&config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let metrics = Arc::new(Metrics::new());

    // Display frames: sequencer -> bounded channel -> retained MQTT publish
    let (display_sender, display_rx) = create_display_channel(64, metrics.clone());
    let publisher = DisplayPublisher::new(&config, display_rx);
    let publisher_shutdown = shutdown_rx.clone();
    let publisher_task = tokio::spawn(async move {
        publisher.run(publisher_shutdown).await;
    });

    // Start Prometheus metrics HTTP server (if port > 0)
    let prometheus_port = config.prometheus_port();
    if prometheus_port > 0 {
        let prom_metrics = metrics.clone();
        let prom_shutdown = shutdown_rx.clone();
        let display_id = config.display_id().to_string();
        tokio::spawn(async move {
            if let Err(e) =
                live_reveal::io::prometheus::start_metrics_server(prometheus_port, prom_metrics, display_id, prom_shutdown)
                    .await
            {
                tracing::error!(error = %e, "Prometheus metrics server error");
            }
        });
    }

    // Periodic metrics summary in the log
    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
        interval.tick().await;
        loop {
            interval.tick().await;
            metrics_clone.report().log();
        }
    });

    let store = Arc::new(RestClient::new(&config)?);
    let feed = Arc::new(MqttFeed::new(&config, metrics.clone()));

    let sequencer = RevealSequencer::new(
        RevealTiming::from_config(&config),
        store.clone(),
        store.clone(),
        Arc::new(display_sender),
        metrics.clone(),
    );
    let listener = FeedListener::new(feed, 256);
    let display = LiveDisplay::new(store, listener, sequencer, config.schedule_poll_interval(), metrics);

    // Handle shutdown on Ctrl+C
    let shutdown_signal = shutdown_tx;
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_signal.send(true);
    });

    // Runs until shutdown, then closes the subscription and cancels timers
    display.run(shutdown_rx).await;
    let _ = publisher_task.await;

    info!("live-reveal shutdown complete");
    Ok(())
}
