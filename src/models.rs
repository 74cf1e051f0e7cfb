use serde::Serialize;
use std::fmt;

/// One message received from the broker. Payload is the UTF-8 decoded body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub topic: String,
    pub payload: String,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Why the connection is not (or no longer) usable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    /// Broker refused the CONNECT with this return code.
    ReturnCode(u8),
    /// CA certificate could not be loaded.
    Certificate(String),
    /// TLS or socket level failure, or the session dropped.
    Network(String),
    /// The subscribe request could not be issued.
    Subscribe(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::ReturnCode(code) => write!(f, "Failed to connect, return code {}", code),
            FailureReason::Certificate(detail) => write!(f, "Certificate error: {}", detail),
            FailureReason::Network(detail) => write!(f, "Connection error: {}", detail),
            FailureReason::Subscribe(detail) => write!(f, "Subscribe failed: {}", detail),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected,
    Failed(FailureReason),
}

impl ConnectionState {
    /// Only forward transitions are allowed: nothing returns to
    /// `Disconnected`, and `Failed` is terminal.
    pub fn can_transition_to(&self, next: &ConnectionState) -> bool {
        match (self, next) {
            (ConnectionState::Disconnected, ConnectionState::Connected) => true,
            (ConnectionState::Disconnected, ConnectionState::Failed(_)) => true,
            (ConnectionState::Connected, ConnectionState::Failed(_)) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Status,
    Error,
}

/// Lifecycle note shown under the status banner ("Connected to MQTT Broker!" ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub text: String,
}

impl Notice {
    pub fn status(text: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Status,
            text: text.into(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            text: text.into(),
        }
    }
}

/// Everything the network task may tell the dashboard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DashboardEvent {
    ConnectionChanged(ConnectionState),
    MessageReceived(Message),
    Notice(Notice),
}

/// Immutable view of the dashboard handed to readers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub title: String,
    pub broker: String,
    pub topic: String,
    pub connection: ConnectionState,
    pub notices: Vec<Notice>,
    pub messages: Vec<Message>,
    pub text: String,
}
