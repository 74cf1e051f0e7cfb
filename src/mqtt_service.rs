use crate::config::BrokerConfig;
use crate::dashboard::EventSender;
use crate::error::{CertificateError, ConnectionError, DecodeError};
use crate::models::{ConnectionState, DashboardEvent, FailureReason, Message, Notice};
use log::{debug, error, info, warn};
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, Publish, QoS,
    SubscribeReasonCode, Transport,
};
use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use tokio::sync::oneshot;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{timeout, Duration};

const PEM_CERTIFICATE_MARKER: &[u8] = b"-----BEGIN CERTIFICATE-----";
const REQUEST_CHANNEL_CAPACITY: usize = 10;
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

/// What the event loop has to do after the session looked at an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    Subscribe(String),
    Publish(DashboardEvent),
    /// Handshake finished successfully.
    Established,
    /// Stop polling. The connection is never re-established.
    Stop,
}

/// Connection lifecycle for a single broker session.
///
/// Pure state machine: it never touches the network, the event loop feeds it
/// and executes the returned actions.
#[derive(Debug)]
pub struct Session {
    topic: String,
    state: ConnectionState,
}

impl Session {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            state: ConnectionState::Disconnected,
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn handle_event(&mut self, event: Event) -> Vec<SessionAction> {
        match event {
            Event::Incoming(Packet::ConnAck(ack)) => self.on_connack(ack.code),
            Event::Incoming(Packet::SubAck(ack)) => {
                if ack
                    .return_codes
                    .iter()
                    .any(|code| matches!(code, SubscribeReasonCode::Failure))
                {
                    warn!("Broker rejected subscription to '{}'.", self.topic);
                    return self.fail(FailureReason::Subscribe(format!(
                        "broker rejected subscription to {}",
                        self.topic
                    )));
                }
                info!("Successfully subscribed to topic '{}'.", self.topic);
                vec![SessionAction::Publish(DashboardEvent::Notice(Notice::status(
                    format!("Subscribed to {}", self.topic),
                )))]
            }
            Event::Incoming(Packet::Publish(publish)) => match decode_publish(publish) {
                Ok(message) => vec![SessionAction::Publish(DashboardEvent::MessageReceived(message))],
                Err(e) => {
                    warn!("Dropping message: {}", e);
                    Vec::new()
                }
            },
            Event::Incoming(Packet::Disconnect) => {
                self.fail(FailureReason::Network("broker closed the session".to_string()))
            }
            Event::Outgoing(_) => {
                debug!("Outgoing event.");
                Vec::new()
            }
            _ => {
                debug!("Unhandled event: {:?}", event);
                Vec::new()
            }
        }
    }

    pub fn handle_error(&mut self, err: &ConnectionError) -> Vec<SessionAction> {
        self.fail(err.reason())
    }

    fn on_connack(&mut self, code: ConnectReturnCode) -> Vec<SessionAction> {
        if code != ConnectReturnCode::Success {
            return self.fail(FailureReason::ReturnCode(code as u8));
        }

        if self.state != ConnectionState::Disconnected {
            debug!("Ignoring repeated ConnAck in state {:?}.", self.state);
            return Vec::new();
        }

        info!("Connected to MQTT broker.");
        self.state = ConnectionState::Connected;
        vec![
            SessionAction::Publish(DashboardEvent::ConnectionChanged(ConnectionState::Connected)),
            SessionAction::Publish(DashboardEvent::Notice(Notice::status(
                "Connected to MQTT Broker!",
            ))),
            SessionAction::Established,
            SessionAction::Subscribe(self.topic.clone()),
        ]
    }

    fn fail(&mut self, reason: FailureReason) -> Vec<SessionAction> {
        let next = ConnectionState::Failed(reason.clone());
        if !self.state.can_transition_to(&next) {
            return vec![SessionAction::Stop];
        }

        error!("{}", reason);
        self.state = next.clone();
        vec![
            SessionAction::Publish(DashboardEvent::ConnectionChanged(next)),
            SessionAction::Publish(DashboardEvent::Notice(Notice::error(reason.to_string()))),
            SessionAction::Stop,
        ]
    }
}

fn decode_publish(publish: Publish) -> Result<Message, DecodeError> {
    let topic = publish.topic;
    match String::from_utf8(publish.payload.to_vec()) {
        Ok(payload) => Ok(Message::new(topic, payload)),
        Err(source) => Err(DecodeError { topic, source }),
    }
}

/// Reads the CA certificate used to verify the broker.
pub fn load_ca_certificate(path: &Path) -> Result<Vec<u8>, CertificateError> {
    let bytes = fs::read(path).map_err(|source| CertificateError::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;

    if !bytes
        .windows(PEM_CERTIFICATE_MARKER.len())
        .any(|window| window == PEM_CERTIFICATE_MARKER)
    {
        return Err(CertificateError::Invalid(path.to_path_buf()));
    }

    Ok(bytes)
}

/// Session options without transport security.
pub fn base_options(config: &BrokerConfig) -> MqttOptions {
    let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
    options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
    options.set_clean_session(true);
    options.set_max_packet_size(config.max_packet_size, config.max_packet_size);
    options
}

pub fn mqtt_options(config: &BrokerConfig) -> Result<MqttOptions, CertificateError> {
    debug!("Configuring MQTT broker at {}...", config.target());

    let ca = load_ca_certificate(&config.ca_cert_path)?;

    let mut options = base_options(config);
    options.set_transport(Transport::tls(ca, None, None));
    Ok(options)
}

/// Aborts the network task if the handshake never completes, including when
/// the caller of [`connect`] is itself cancelled.
struct HandshakeGuard {
    task: AbortHandle,
    armed: bool,
}

impl Drop for HandshakeGuard {
    fn drop(&mut self) {
        if self.armed {
            self.task.abort();
        }
    }
}

/// A live broker session. Dropping it leaves the network task running;
/// call [`ConnectionHandle::disconnect`] to close it.
pub struct ConnectionHandle {
    client: AsyncClient,
    task: JoinHandle<ConnectionState>,
}

impl ConnectionHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Sends DISCONNECT and waits briefly for the network task to wind down.
    pub async fn disconnect(self) -> Result<(), ConnectionError> {
        let result = self.client.disconnect().await.map_err(ConnectionError::from);

        let mut task = self.task;
        match timeout(DISCONNECT_GRACE, &mut task).await {
            Ok(Ok(state)) => debug!("MQTT task finished in state {:?}.", state),
            Ok(Err(e)) => warn!("MQTT task ended abnormally: {}", e),
            Err(_) => {
                warn!("MQTT task did not stop in time, aborting.");
                task.abort();
            }
        }
        result
    }
}

/// Establishes the TLS session and subscribes to `config.topic`.
///
/// Returns once the broker accepted the CONNECT. Every outcome, success or
/// failure, is also reported to the dashboard through `events`.
pub async fn connect(config: &BrokerConfig, events: EventSender) -> Result<ConnectionHandle, ConnectionError> {
    info!("Starting MQTT connection to {}...", config.target());

    let options = match mqtt_options(config) {
        Ok(options) => options,
        Err(e) => {
            let err = ConnectionError::from(e);
            report_failure(&events, &err).await;
            return Err(err);
        }
    };

    establish(options, config, events).await
}

async fn establish(
    options: MqttOptions,
    config: &BrokerConfig,
    events: EventSender,
) -> Result<ConnectionHandle, ConnectionError> {
    let (client, eventloop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);
    let (handshake_tx, handshake_rx) = oneshot::channel();
    let session = Session::new(config.topic.clone());
    let task = tokio::spawn(drive_event_loop(
        eventloop,
        client.clone(),
        session,
        events.clone(),
        handshake_tx,
    ));
    let mut guard = HandshakeGuard {
        task: task.abort_handle(),
        armed: true,
    };

    let handshake_timeout = Duration::from_secs(config.connect_timeout_secs);
    match timeout(handshake_timeout, handshake_rx).await {
        Ok(Ok(Ok(()))) => {
            guard.armed = false;
            Ok(ConnectionHandle { client, task })
        }
        Ok(Ok(Err(e))) => Err(e),
        Ok(Err(_)) => Err(ConnectionError::Network("MQTT task stopped during handshake".to_string())),
        Err(_) => {
            task.abort();
            let err = ConnectionError::Network(format!(
                "handshake timed out after {}s",
                config.connect_timeout_secs
            ));
            report_failure(&events, &err).await;
            Err(err)
        }
    }
}

async fn report_failure(events: &EventSender, err: &ConnectionError) {
    let mut session = Session::new(String::new());
    for action in session.handle_error(err) {
        if let SessionAction::Publish(event) = action {
            if events.send(event).await.is_err() {
                warn!("Dashboard is gone, failure not reported: {}", err);
                return;
            }
        }
    }
}

async fn drive_event_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    mut session: Session,
    events: EventSender,
    handshake: oneshot::Sender<Result<(), ConnectionError>>,
) -> ConnectionState {
    let mut handshake = Some(handshake);

    loop {
        let mut pending: VecDeque<SessionAction> = match eventloop.poll().await {
            Ok(event) => session.handle_event(event).into(),
            Err(e) => {
                error!("Error in MQTT event loop: {:?}", e);
                let err = ConnectionError::from(e);
                let actions = session.handle_error(&err);
                if let Some(tx) = handshake.take() {
                    let _ = tx.send(Err(err));
                }
                actions.into()
            }
        };

        let mut stop = false;
        while let Some(action) = pending.pop_front() {
            match action {
                SessionAction::Subscribe(topic) => {
                    if let Err(e) = client.try_subscribe(&topic, QoS::AtMostOnce) {
                        error!("Failed to subscribe to topic '{}': {}", topic, e);
                        pending.extend(session.handle_error(&ConnectionError::from(e)));
                    }
                }
                SessionAction::Publish(event) => {
                    if events.send(event).await.is_err() {
                        warn!("Dashboard event channel closed, stopping MQTT task.");
                        stop = true;
                    }
                }
                SessionAction::Established => {
                    if let Some(tx) = handshake.take() {
                        let _ = tx.send(Ok(()));
                    }
                }
                SessionAction::Stop => stop = true,
            }
        }

        if stop {
            if let Some(tx) = handshake.take() {
                let err = match session.state() {
                    ConnectionState::Failed(FailureReason::ReturnCode(code)) => ConnectionError::Refused(*code),
                    ConnectionState::Failed(reason) => ConnectionError::Network(reason.to_string()),
                    other => ConnectionError::Network(format!("session stopped while {:?}", other)),
                };
                let _ = tx.send(Err(err));
            }
            break;
        }
    }

    info!("MQTT event loop stopped in state {:?}.", session.state());
    session.state().clone()
}
