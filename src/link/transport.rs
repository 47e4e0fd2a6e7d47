//! Transport abstraction for the broker session.
//!
//! The [`Link`](super::Link) state machine drives any type implementing
//! [`Transport`]: the ESP-IDF MQTT client on target, scripted mocks in
//! tests, or [`NullTransport`] when no broker is configured.
//!
//! Every method takes `&self`: publishing (sampling unit) and servicing
//! (liveness unit) run concurrently, so implementations synchronise
//! internally.

use core::time::Duration;
use std::sync::Arc;

use crate::config::NodeConfig;
use crate::error::TransportError;

/// Delivery class of a publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Qos {
    /// Fire and forget; no acknowledgement.
    AtMostOnce,
    /// Bounded wait for the broker's acknowledgement.
    AtLeastOnce,
}

/// What one service call observed about the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Alive,
    /// The session dropped (keep-alive expired, socket closed, broker kick).
    Lost,
}

/// Session parameters handed to every connect attempt.  Credentials are
/// owned by the transport itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectParams {
    pub endpoint: heapless::String<128>,
    pub client_id: heapless::String<32>,
    pub keep_alive: Duration,
    /// Upper bound on connect, subscribe and acknowledged publish.
    pub command_timeout: Duration,
    pub tls_handshake_timeout: Duration,
}

impl ConnectParams {
    pub fn from_config(config: &NodeConfig) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            client_id: config.client_id.clone(),
            keep_alive: Duration::from_secs(u64::from(config.keep_alive_secs)),
            command_timeout: Duration::from_millis(u64::from(config.command_timeout_ms)),
            tls_handshake_timeout: Duration::from_millis(u64::from(config.tls_handshake_timeout_ms)),
        }
    }
}

/// A publish/subscribe session to the broker.
pub trait Transport {
    /// Open a session.  Blocks up to `params.command_timeout`.
    fn connect(&self, params: &ConnectParams) -> Result<(), TransportError>;

    /// Publish `payload` to `topic`.  For [`Qos::AtLeastOnce`] this returns
    /// once the acknowledgement arrives or with
    /// [`TransportError::AckTimeout`].
    fn publish(&self, topic: &str, payload: &[u8], qos: Qos) -> Result<(), TransportError>;

    /// Process keep-alive and inbound traffic for up to `max_wait`.
    fn service(&self, max_wait: Duration) -> SessionStatus;

    /// Tear the session down.  Idempotent.
    fn disconnect(&self);
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn connect(&self, params: &ConnectParams) -> Result<(), TransportError> {
        (**self).connect(params)
    }

    fn publish(&self, topic: &str, payload: &[u8], qos: Qos) -> Result<(), TransportError> {
        (**self).publish(topic, payload, qos)
    }

    fn service(&self, max_wait: Duration) -> SessionStatus {
        (**self).service(max_wait)
    }

    fn disconnect(&self) {
        (**self).disconnect();
    }
}

/// Accepts every session and discards all publishes.
pub struct NullTransport;

impl Transport for NullTransport {
    fn connect(&self, _params: &ConnectParams) -> Result<(), TransportError> {
        Ok(())
    }

    fn publish(&self, _topic: &str, _payload: &[u8], _qos: Qos) -> Result<(), TransportError> {
        Ok(())
    }

    fn service(&self, _max_wait: Duration) -> SessionStatus {
        SessionStatus::Alive
    }

    fn disconnect(&self) {}
}
