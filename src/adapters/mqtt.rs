//! MQTT adapters built on `rumqttc`'s blocking client.
//!
//! - [`MqttTransport`] implements [`CommandTransport`] for the relay side.
//!   `connect` builds a fresh client and waits for the broker's CONNACK;
//!   `poll` drives the event loop and hands back publish payloads.  A
//!   connection error ends the session; reconnect policy belongs to the
//!   delivery loop.
//! - [`MqttPublisher`] implements [`CommandPublisher`] for the hub side.
//!   Its event loop runs on a background thread and reconnects by itself;
//!   commands are published with QoS 1 and the retain flag set, so a relay
//!   that subscribes later still receives the latest command.

use std::time::{Duration, Instant};

use log::{debug, info, warn};
use rumqttc::{Client, ConnectionError, Event, MqttOptions, Packet, QoS, RecvTimeoutError};

use crate::app::ports::{CommandPublisher, CommandTransport, TransportError};
use crate::config::MqttConfig;
use crate::records::SwitchState;

/// Request queue depth between client handle and event loop.
const CHANNEL_CAP: usize = 16;

/// How long `connect` waits for the CONNACK.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

fn options(cfg: &MqttConfig, client_id: &str) -> MqttOptions {
    let mut opts = MqttOptions::new(client_id, cfg.host.clone(), cfg.port);
    opts.set_keep_alive(Duration::from_secs(cfg.keep_alive_secs));
    if let (Some(user), Some(pass)) = (&cfg.username, &cfg.password) {
        opts.set_credentials(user.clone(), pass.clone());
    }
    opts
}

// ───────────────────────────────────────────────────────────────
// Relay side
// ───────────────────────────────────────────────────────────────

struct Session {
    client: Client,
    connection: rumqttc::Connection,
}

pub struct MqttTransport {
    config: MqttConfig,
    session: Option<Session>,
}

impl MqttTransport {
    pub fn new(config: MqttConfig) -> Self {
        Self {
            config,
            session: None,
        }
    }
}

impl CommandTransport for MqttTransport {
    fn connect(&mut self) -> Result<(), TransportError> {
        self.disconnect();

        let client_id = format!("{}-relay", self.config.client_id);
        let (client, mut connection) = Client::new(options(&self.config, &client_id), CHANNEL_CAP);

        let deadline = Instant::now() + CONNECT_TIMEOUT;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(TransportError::ConnectFailed(format!(
                    "no CONNACK from {}:{} within {:?}",
                    self.config.host, self.config.port, CONNECT_TIMEOUT
                )));
            }
            match connection.recv_timeout(remaining) {
                Ok(Ok(Event::Incoming(Packet::ConnAck(ack)))) => {
                    info!(
                        "MQTT: connected to {}:{} ({:?})",
                        self.config.host, self.config.port, ack.code
                    );
                    break;
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => return Err(TransportError::ConnectFailed(e.to_string())),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(TransportError::ConnectFailed("event loop closed".into()));
                }
            }
        }

        self.session = Some(Session { client, connection });
        Ok(())
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| TransportError::SubscribeFailed("not connected".into()))?;
        session
            .client
            .subscribe(topic, QoS::AtLeastOnce)
            .map_err(|e| TransportError::SubscribeFailed(e.to_string()))?;
        info!("MQTT: subscribed to '{}'", topic);
        Ok(())
    }

    fn poll(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, TransportError> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| TransportError::Disconnected("not connected".into()))?;

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            match session.connection.recv_timeout(remaining) {
                Ok(Ok(Event::Incoming(Packet::Publish(p)))) => {
                    debug!("MQTT: {} bytes on '{}'", p.payload.len(), p.topic);
                    return Ok(Some(p.payload.to_vec()));
                }
                Ok(Ok(Event::Incoming(Packet::Disconnect))) => {
                    self.session = None;
                    return Err(TransportError::Disconnected("broker sent DISCONNECT".into()));
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    self.session = None;
                    return Err(TransportError::Disconnected(e.to_string()));
                }
                Err(RecvTimeoutError::Timeout) => return Ok(None),
                Err(RecvTimeoutError::Disconnected) => {
                    self.session = None;
                    return Err(TransportError::Disconnected("event loop closed".into()));
                }
            }
        }
    }

    fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            if let Err(e) = session.client.disconnect() {
                debug!("MQTT: disconnect request not queued: {}", e);
            }
            info!("MQTT: session closed");
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Hub side
// ───────────────────────────────────────────────────────────────

pub struct MqttPublisher {
    client: Client,
    topic: String,
}

impl MqttPublisher {
    /// Create the client and start its event loop on a named thread.
    pub fn start(config: &MqttConfig) -> std::io::Result<Self> {
        let client_id = format!("{}-hub", config.client_id);
        let (client, mut connection) = Client::new(options(config, &client_id), CHANNEL_CAP);
        let retry = Duration::from_secs(2);

        std::thread::Builder::new()
            .name("mqtt-publisher".into())
            .spawn(move || {
                for notification in connection.iter() {
                    match notification {
                        Ok(Event::Incoming(Packet::ConnAck(_))) => info!("MQTT: publisher connected"),
                        Ok(_) => {}
                        Err(ConnectionError::RequestsDone) => break,
                        Err(e) => {
                            warn!("MQTT: publisher connection error: {}, retrying", e);
                            std::thread::sleep(retry);
                        }
                    }
                }
                info!("MQTT: publisher event loop stopped");
            })?;

        Ok(Self {
            client,
            topic: config.topic.clone(),
        })
    }
}

impl CommandPublisher for MqttPublisher {
    fn publish(&mut self, state: SwitchState, retain: bool) -> Result<(), TransportError> {
        self.client
            .try_publish(
                self.topic.as_str(),
                QoS::AtLeastOnce,
                retain,
                state.token().as_bytes(),
            )
            .map_err(|e| TransportError::PublishFailed(e.to_string()))?;
        debug!("MQTT: queued {} on '{}' (retain={})", state, self.topic, retain);
        Ok(())
    }
}
