mod buffer;
mod config;
mod dashboard;
mod error;
mod models;
mod mqtt_service;
mod rest_server;
mod service_utils;
mod view;

use crate::config::Config;
use crate::dashboard::{channels, Dashboard};
use crate::rest_server::run_rest_server;
use crate::service_utils::{handle_shutdown, start_dashboard, start_mqtt_service};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    // Load configuration
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Error loading configuration: {:?}", e);
            return;
        }
    };

    info!("Attempting to connect to: {}", config.broker.target());
    info!("Subscribing to: {}", config.broker.topic);

    // The dashboard task is the only writer of display state
    let dashboard = Dashboard::new(&config);
    let (event_tx, event_rx, snapshot_tx, snapshot_rx) = channels(&dashboard);
    let dashboard_task = start_dashboard(dashboard, event_rx, snapshot_tx);

    let mqtt_task = start_mqtt_service(config.broker.clone(), event_tx);

    // Serve the dashboard until Ctrl-C
    if let Err(e) = run_rest_server(&config, snapshot_rx).await {
        error!("Dashboard web server failed: {:?}", e);
    }

    handle_shutdown(mqtt_task).await;
    dashboard_task.abort();
    info!("All services shut down successfully.");
}
