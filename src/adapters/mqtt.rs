//! ESP-IDF MQTT transport.
//!
//! Implements [`Transport`] on top of `esp_idf_svc::mqtt::client`.  The
//! IDF client delivers events on its own task; a pump thread folds them
//! into [`SessionFlags`] behind a mutex + condvar so the blocking
//! [`Transport`] calls (connect, acknowledged publish, service) wait on
//! exactly the event they need.
//!
//! Inbound messages on the prediction topic are decoded and queued for the
//! reactor unit.  TLS material comes from the IDF certificate bundle.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use esp_idf_svc::mqtt::client::{
    EspMqttClient, EspMqttConnection, EventPayload, MqttClientConfiguration, QoS,
};
use log::{info, warn};

use crate::app::commands::{self, Inbox};
use crate::error::TransportError;
use crate::link::{ConnectParams, Qos, SessionStatus, Transport};

#[derive(Debug, Default)]
struct SessionFlags {
    connected: bool,
    /// Set on a Disconnected event that followed Connected.
    lost: bool,
    last_acked: Option<u32>,
    /// Command timeout of the current session, bounds the ack wait.
    ack_timeout: Duration,
    /// Bumped per session so a stale pump thread cannot touch a new one.
    generation: u32,
}

#[derive(Default)]
struct Shared {
    flags: Mutex<SessionFlags>,
    changed: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SessionFlags> {
        self.flags.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update(&self, generation: u32, f: impl FnOnce(&mut SessionFlags)) {
        let mut flags = self.lock();
        if flags.generation == generation {
            f(&mut flags);
            self.changed.notify_all();
        }
    }

    fn wait_until(
        &self,
        timeout: Duration,
        mut done: impl FnMut(&SessionFlags) -> bool,
    ) -> MutexGuard<'_, SessionFlags> {
        let guard = self.lock();
        let (guard, _) = self
            .changed
            .wait_timeout_while(guard, timeout, |f| !done(f))
            .unwrap_or_else(PoisonError::into_inner);
        guard
    }
}

pub struct EspMqttTransport {
    client: Mutex<Option<EspMqttClient<'static>>>,
    shared: Arc<Shared>,
    username: Option<&'static str>,
    password: Option<&'static str>,
    prediction_topic: heapless::String<64>,
    inbox: Arc<Inbox>,
}

impl EspMqttTransport {
    pub fn new(
        prediction_topic: heapless::String<64>,
        inbox: Arc<Inbox>,
        username: Option<&'static str>,
        password: Option<&'static str>,
    ) -> Self {
        Self {
            client: Mutex::new(None),
            shared: Arc::new(Shared::default()),
            username,
            password,
            prediction_topic,
            inbox,
        }
    }

    fn client(&self) -> MutexGuard<'_, Option<EspMqttClient<'static>>> {
        self.client.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Transport for EspMqttTransport {
    fn connect(&self, params: &ConnectParams) -> Result<(), TransportError> {
        let generation = {
            let mut flags = self.shared.lock();
            flags.generation = flags.generation.wrapping_add(1);
            flags.connected = false;
            flags.lost = false;
            flags.last_acked = None;
            flags.ack_timeout = params.command_timeout;
            flags.generation
        };

        let conf = MqttClientConfiguration {
            client_id: Some(params.client_id.as_str()),
            keep_alive_interval: Some(params.keep_alive),
            network_timeout: params.tls_handshake_timeout,
            username: self.username,
            password: self.password,
            crt_bundle_attach: Some(esp_idf_svc::sys::esp_crt_bundle_attach),
            ..Default::default()
        };
        let (mut client, connection) =
            EspMqttClient::new(params.endpoint.as_str(), &conf).map_err(|e| {
                warn!("MQTT: client init failed: {}", e);
                TransportError::ConnectFailed
            })?;

        let shared = Arc::clone(&self.shared);
        let topic = self.prediction_topic.clone();
        let inbox = Arc::clone(&self.inbox);
        std::thread::Builder::new()
            .name("mqtt-events".into())
            .stack_size(6 * 1024)
            .spawn(move || pump_events(connection, &shared, generation, &topic, &inbox))
            .map_err(|_| TransportError::ConnectFailed)?;

        let connected = self
            .shared
            .wait_until(params.command_timeout, |f| f.connected)
            .connected;
        if !connected {
            warn!("MQTT: no CONNACK within {:?}", params.command_timeout);
            return Err(TransportError::ConnectFailed);
        }

        client
            .subscribe(&self.prediction_topic, QoS::AtLeastOnce)
            .map_err(|_| TransportError::Rejected)?;
        info!("MQTT: session open, subscribed to {}", self.prediction_topic);
        *self.client() = Some(client);
        Ok(())
    }

    fn publish(&self, topic: &str, payload: &[u8], qos: Qos) -> Result<(), TransportError> {
        let id = {
            let mut guard = self.client();
            let client = guard.as_mut().ok_or(TransportError::NotConnected)?;
            let qos = match qos {
                Qos::AtMostOnce => QoS::AtMostOnce,
                Qos::AtLeastOnce => QoS::AtLeastOnce,
            };
            client
                .publish(topic, qos, false, payload)
                .map_err(|_| TransportError::PublishFailed)?
        };

        if qos == Qos::AtMostOnce {
            return Ok(());
        }
        let timeout = self.shared.lock().ack_timeout;
        let acked = self
            .shared
            .wait_until(timeout, |f| f.last_acked == Some(id) || f.lost)
            .last_acked
            == Some(id);
        if acked { Ok(()) } else { Err(TransportError::AckTimeout) }
    }

    fn service(&self, max_wait: Duration) -> SessionStatus {
        if self.shared.wait_until(max_wait, |f| f.lost).lost {
            SessionStatus::Lost
        } else {
            SessionStatus::Alive
        }
    }

    fn disconnect(&self) {
        {
            let mut flags = self.shared.lock();
            flags.generation = flags.generation.wrapping_add(1);
            flags.connected = false;
            flags.lost = false;
        }
        // Dropping the client stops the IDF task and ends the pump thread.
        drop(self.client().take());
    }
}

fn pump_events(
    mut connection: EspMqttConnection,
    shared: &Shared,
    generation: u32,
    prediction_topic: &str,
    inbox: &Inbox,
) {
    while let Ok(event) = connection.next() {
        match event.payload() {
            EventPayload::Connected(_) => shared.update(generation, |f| {
                f.connected = true;
                f.lost = false;
            }),
            EventPayload::Disconnected => shared.update(generation, |f| {
                if f.connected {
                    f.lost = true;
                }
                f.connected = false;
            }),
            EventPayload::Published(id) => shared.update(generation, |f| f.last_acked = Some(id)),
            EventPayload::Received { topic, data, .. } => {
                if topic == Some(prediction_topic) {
                    if let Err(e) = commands::deliver(inbox, data) {
                        warn!("MQTT: bad classification: {}", e);
                    }
                }
            }
            EventPayload::Error(e) => warn!("MQTT: {:?}", e),
            _ => {}
        }
    }
    info!("MQTT: event pump stopped");
}
