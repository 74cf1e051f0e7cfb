use crate::buffer::MessageBuffer;
use crate::config::Config;
use crate::models::{ConnectionState, DashboardEvent, Message, Notice, Snapshot};
use crate::view;
use log::{debug, info, warn};
use std::collections::VecDeque;
use tokio::sync::{mpsc, watch};

/// Lifecycle notices kept for display.
pub const NOTICE_CAPACITY: usize = 20;
/// Pending events between the network task and the dashboard task.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

pub type EventSender = mpsc::Sender<DashboardEvent>;
pub type SnapshotReceiver = watch::Receiver<Snapshot>;

/// Display state of the dashboard. Owned by exactly one task; everyone else
/// talks to it through events and reads it through snapshots.
#[derive(Debug)]
pub struct Dashboard {
    title: String,
    broker: String,
    topic: String,
    buffer: MessageBuffer,
    connection: ConnectionState,
    notices: VecDeque<Notice>,
}

impl Dashboard {
    pub fn new(config: &Config) -> Self {
        Self {
            title: config.dashboard_title.clone(),
            broker: config.broker.target(),
            topic: config.broker.topic.clone(),
            buffer: MessageBuffer::default(),
            connection: ConnectionState::Disconnected,
            notices: VecDeque::with_capacity(NOTICE_CAPACITY),
        }
    }

    pub fn buffer(&self) -> &MessageBuffer {
        &self.buffer
    }

    pub fn connection(&self) -> &ConnectionState {
        &self.connection
    }

    pub fn on_message_received(&mut self, topic: String, payload: String) {
        debug!("Message on '{}' ({} bytes)", topic, payload.len());
        self.buffer.push(Message { topic, payload });
        debug!("{} messages buffered", self.buffer.len());
    }

    /// Returns false when the transition is not allowed by the state machine.
    pub fn set_connection(&mut self, next: ConnectionState) -> bool {
        if !self.connection.can_transition_to(&next) {
            warn!(
                "Ignoring connection state change {:?} -> {:?}",
                self.connection, next
            );
            return false;
        }
        info!("Connection state: {:?}", next);
        self.connection = next;
        true
    }

    pub fn push_notice(&mut self, notice: Notice) {
        if self.notices.len() == NOTICE_CAPACITY {
            self.notices.pop_front();
        }
        self.notices.push_back(notice);
    }

    /// Applies one event; returns whether anything visible changed.
    pub fn apply(&mut self, event: DashboardEvent) -> bool {
        match event {
            DashboardEvent::MessageReceived(message) => {
                self.on_message_received(message.topic, message.payload);
                true
            }
            DashboardEvent::ConnectionChanged(state) => self.set_connection(state),
            DashboardEvent::Notice(notice) => {
                self.push_notice(notice);
                true
            }
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            title: self.title.clone(),
            broker: self.broker.clone(),
            topic: self.topic.clone(),
            connection: self.connection.clone(),
            notices: self.notices.iter().cloned().collect(),
            messages: self.buffer.to_vec(),
            text: view::render(&self.buffer, &self.connection),
        }
    }
}

/// Consumes events until every sender is gone, publishing a fresh snapshot
/// after each visible change.
pub async fn run_dashboard(
    mut dashboard: Dashboard,
    mut events: mpsc::Receiver<DashboardEvent>,
    snapshots: watch::Sender<Snapshot>,
) -> Dashboard {
    while let Some(event) = events.recv().await {
        if dashboard.apply(event) {
            snapshots.send_replace(dashboard.snapshot());
        }
    }
    debug!(
        "Dashboard event channel closed in state {:?} with {} messages.",
        dashboard.connection(),
        dashboard.buffer().len()
    );
    dashboard
}

/// Channels wiring the network task, the dashboard task and the web layer.
pub fn channels(
    dashboard: &Dashboard,
) -> (
    EventSender,
    mpsc::Receiver<DashboardEvent>,
    watch::Sender<Snapshot>,
    SnapshotReceiver,
) {
    let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let (snapshot_tx, snapshot_rx) = watch::channel(dashboard.snapshot());
    (event_tx, event_rx, snapshot_tx, snapshot_rx)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::FailureReason;
    use crate::view::EMPTY_PLACEHOLDER;

    pub(crate) fn test_config(topic: &str) -> Config {
        Config::from_lookup(|key| match key {
            "MQTT_HOST" => Some("broker.test".to_string()),
            "MQTT_PORT" => Some("8883".to_string()),
            "MQTT_TOPIC" => Some(topic.to_string()),
            "MQTT_CLIENT_ID" => Some("dashboard-test".to_string()),
            _ => None,
        })
        .unwrap()
    }

    #[test]
    fn new_dashboard_is_disconnected_and_empty() {
        let dashboard = Dashboard::new(&test_config("device-1/#"));
        let snapshot = dashboard.snapshot();
        assert_eq!(snapshot.connection, ConnectionState::Disconnected);
        assert_eq!(snapshot.broker, "broker.test:8883");
        assert_eq!(snapshot.topic, "device-1/#");
        assert!(snapshot.messages.is_empty());
        assert!(snapshot.text.contains(EMPTY_PLACEHOLDER));
    }

    #[test]
    fn failed_state_is_terminal() {
        let mut dashboard = Dashboard::new(&test_config("device-1/#"));
        let failed = ConnectionState::Failed(FailureReason::ReturnCode(5));
        assert!(dashboard.apply(DashboardEvent::ConnectionChanged(failed.clone())));
        assert!(!dashboard.apply(DashboardEvent::ConnectionChanged(ConnectionState::Connected)));
        assert_eq!(dashboard.connection(), &failed);
    }

    #[test]
    fn notices_are_bounded() {
        let mut dashboard = Dashboard::new(&test_config("device-1/#"));
        for i in 0..NOTICE_CAPACITY + 5 {
            dashboard.push_notice(Notice::status(format!("note {}", i)));
        }
        let snapshot = dashboard.snapshot();
        assert_eq!(snapshot.notices.len(), NOTICE_CAPACITY);
        assert_eq!(snapshot.notices[0].text, "note 5");
        assert!(dashboard.buffer().is_empty());
    }

    #[tokio::test]
    async fn run_dashboard_publishes_snapshots() {
        let dashboard = Dashboard::new(&test_config("device-1/#"));
        let (event_tx, event_rx, snapshot_tx, mut snapshot_rx) = channels(&dashboard);
        let task = tokio::spawn(run_dashboard(dashboard, event_rx, snapshot_tx));

        event_tx
            .send(DashboardEvent::ConnectionChanged(ConnectionState::Connected))
            .await
            .unwrap();
        event_tx
            .send(DashboardEvent::MessageReceived(Message::new("device-1/a", "payload_a")))
            .await
            .unwrap();
        event_tx
            .send(DashboardEvent::MessageReceived(Message::new("device-1/b", "payload_b")))
            .await
            .unwrap();
        drop(event_tx);

        let dashboard = task.await.unwrap();
        assert_eq!(
            dashboard.buffer().to_vec(),
            vec![
                Message::new("device-1/b", "payload_b"),
                Message::new("device-1/a", "payload_a"),
            ]
        );

        let latest = snapshot_rx.borrow_and_update().clone();
        assert_eq!(latest.connection, ConnectionState::Connected);
        assert_eq!(latest.messages.len(), 2);
        assert_eq!(latest.messages[0].topic, "device-1/b");
    }
}
