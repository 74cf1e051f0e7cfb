use crate::models::FailureReason;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("Failed to read CA certificate from {path:?}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("CA certificate {0:?} does not contain a PEM certificate")]
    Invalid(PathBuf),
}

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Broker refused the connection, return code {0}")]
    Refused(u8),
    #[error(transparent)]
    Certificate(#[from] CertificateError),
    #[error("MQTT connection error: {0}")]
    Network(String),
    #[error("MQTT client error: {0}")]
    Client(String),
}

/// A payload that is not valid UTF-8. Only that message is dropped.
#[derive(Debug, Error)]
#[error("Payload on '{topic}' is not valid UTF-8: {source}")]
pub struct DecodeError {
    pub topic: String,
    #[source]
    pub source: std::string::FromUtf8Error,
}

impl From<rumqttc::ConnectionError> for ConnectionError {
    fn from(err: rumqttc::ConnectionError) -> Self {
        match err {
            rumqttc::ConnectionError::ConnectionRefused(code) => ConnectionError::Refused(code as u8),
            other => ConnectionError::Network(other.to_string()),
        }
    }
}

impl From<rumqttc::ClientError> for ConnectionError {
    fn from(err: rumqttc::ClientError) -> Self {
        ConnectionError::Client(err.to_string())
    }
}

impl ConnectionError {
    /// The reason recorded in the dashboard's connection state.
    pub fn reason(&self) -> FailureReason {
        match self {
            ConnectionError::Refused(code) => FailureReason::ReturnCode(*code),
            ConnectionError::Certificate(err) => FailureReason::Certificate(err.to_string()),
            ConnectionError::Network(detail) => FailureReason::Network(detail.clone()),
            ConnectionError::Client(detail) => FailureReason::Subscribe(detail.clone()),
        }
    }
}
