//! Inbound classification messages.
//!
//! The broker adapter receives raw payloads on the prediction topic,
//! decodes them here and drops them into the [`Inbox`].  The reactor unit
//! blocks on the other end.
//!
//! Two payload shapes are accepted:
//!
//! ```text
//! {"prediction": ["c1", ...]}   first element is the label
//! {"label": "c1"}
//! ```

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use log::warn;
use serde::Deserialize;

use crate::error::{Error, Result};

/// Classifications buffered between the broker and the reactor.
pub const INBOX_DEPTH: usize = 4;

pub type Inbox = Channel<CriticalSectionRawMutex, Classification, INBOX_DEPTH>;

/// A decoded classification label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub label: heapless::String<32>,
}

impl Classification {
    pub fn new(label: &str) -> Result<Self> {
        let mut l = heapless::String::new();
        l.push_str(label)
            .map_err(|_| Error::InvalidArgument("classification label too long"))?;
        Ok(Self { label: l })
    }
}

#[derive(Deserialize)]
struct Wire {
    /// Only the first element is read; the rest may be any JSON value.
    #[serde(default)]
    prediction: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    label: Option<String>,
}

/// Decode one inbound payload.
pub fn decode(payload: &[u8]) -> Result<Classification> {
    let wire: Wire = serde_json::from_slice(payload)
        .map_err(|_| Error::InvalidArgument("classification is not valid JSON"))?;

    let label = match (wire.prediction, wire.label) {
        (Some(prediction), _) => match prediction.into_iter().next() {
            Some(serde_json::Value::String(s)) => Some(s),
            Some(_) => return Err(Error::InvalidArgument("prediction label is not a string")),
            None => None,
        },
        (None, label) => label,
    }
    .ok_or(Error::InvalidArgument("classification carries no label"))?;

    let label = label.trim();
    if label.is_empty() {
        return Err(Error::InvalidArgument("classification label is empty"));
    }
    Classification::new(label)
}

/// Decode `payload` and queue it for the reactor.
///
/// A full inbox drops the newest message; the reactor is still busy with
/// an alert and a stale classification has no value once it catches up.
pub fn deliver(inbox: &Inbox, payload: &[u8]) -> Result<()> {
    let classification = decode(payload)?;
    if inbox.try_send(classification).is_err() {
        warn!("Inbox full, classification dropped");
    }
    Ok(())
}
