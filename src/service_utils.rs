use crate::config::BrokerConfig;
use crate::dashboard::{run_dashboard, Dashboard, EventSender};
use crate::models::{DashboardEvent, Snapshot};
use crate::mqtt_service::{connect, ConnectionHandle};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Start the task that owns the dashboard state
pub fn start_dashboard(
    dashboard: Dashboard,
    events: mpsc::Receiver<DashboardEvent>,
    snapshots: watch::Sender<Snapshot>,
) -> JoinHandle<Dashboard> {
    tokio::spawn(run_dashboard(dashboard, events, snapshots))
}

/// Start the MQTT connection in the background. Resolves to the live
/// connection, or `None` if the handshake failed (already shown on the
/// dashboard).
pub fn start_mqtt_service(config: BrokerConfig, events: EventSender) -> JoinHandle<Option<ConnectionHandle>> {
    tokio::spawn(async move {
        match connect(&config, events).await {
            Ok(handle) => {
                info!("MQTT client connected to {} and listening on '{}'.", config.target(), config.topic);
                Some(handle)
            }
            Err(e) => {
                error!("MQTT connection to {} failed: {}", config.target(), e);
                None
            }
        }
    })
}

/// Close the broker session once the web server has stopped
pub async fn handle_shutdown(mqtt_task: JoinHandle<Option<ConnectionHandle>>) {
    if !mqtt_task.is_finished() {
        warn!("MQTT handshake still in progress, aborting it.");
        mqtt_task.abort();
        return;
    }

    match mqtt_task.await {
        Ok(Some(handle)) => {
            if handle.is_finished() {
                info!("MQTT session already closed.");
                return;
            }
            match handle.disconnect().await {
                Ok(()) => info!("Disconnected from MQTT broker."),
                Err(e) => error!("Failed to disconnect cleanly: {}", e),
            }
        }
        Ok(None) => info!("No MQTT session to close."),
        Err(e) => error!("MQTT task failed: {:?}", e),
    }
}
