//! Push-channel event normalization and subscription lifecycle.
//!
//! The backend emits two event kinds, [`INCIDENT_CREATED`] and
//! [`INCIDENT_UPDATED`], each carrying either a bare incident record or an
//! envelope `{ "data": <record> }`. [`normalize`] unwraps the envelope,
//! rejects records without an identifier and decodes the rest into an
//! [`IncidentEvent`] ready to be upserted.
//!
//! A [`Subscription`] owns the task running a [`PushChannel`] and aborts it
//! when dropped, so the channel is released on every exit path.

use std::sync::Arc;

use incident_map_incident_models::Incident;
use serde::Serialize;
use serde_json::Value;
use strum_macros::{AsRefStr, Display};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::{ChannelError, EventError};

/// Event name for a newly reported incident.
pub const INCIDENT_CREATED: &str = "incident:new";

/// Event name for a modified incident.
pub const INCIDENT_UPDATED: &str = "incident:update";

/// A message delivered by a [`PushChannel`] implementation.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelMessage {
    /// The connection is established.
    Connected,
    /// The connection dropped; the transport may be reconnecting.
    Disconnected {
        /// Human-readable cause.
        reason: String,
    },
    /// A named server event.
    Event {
        /// Event name (e.g. [`INCIDENT_CREATED`]).
        name: String,
        /// Raw payload.
        payload: Value,
    },
}

/// A normalized incident event.
#[derive(Debug, Clone, PartialEq)]
pub enum IncidentEvent {
    /// A new incident was reported.
    Created(Incident),
    /// An existing incident changed.
    Updated(Incident),
}

impl IncidentEvent {
    /// The carried record.
    #[must_use]
    pub const fn incident(&self) -> &Incident {
        match self {
            Self::Created(incident) | Self::Updated(incident) => incident,
        }
    }

    /// Consumes the event, returning the record.
    #[must_use]
    pub fn into_incident(self) -> Incident {
        match self {
            Self::Created(incident) | Self::Updated(incident) => incident,
        }
    }
}

/// Observability-only connection indicator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Display, AsRefStr)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum LiveStatus {
    /// Not (yet) connected.
    #[default]
    Connecting,
    /// Receiving live events.
    Live,
}

impl LiveStatus {
    /// Label for the live indicator badge.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Connecting => "CONNECTING...",
            Self::Live => "LIVE FEED ACTIVE",
        }
    }
}

/// Returns the record wrapped under `data` if the payload is such an
/// envelope, otherwise the payload itself.
#[must_use]
pub fn unwrap_envelope(payload: Value) -> Value {
    match payload {
        Value::Object(mut map) => match map.remove("data") {
            Some(data @ Value::Object(_)) => data,
            Some(other) => {
                map.insert("data".to_string(), other);
                Value::Object(map)
            }
            None => Value::Object(map),
        },
        other => other,
    }
}

/// Normalizes a named push event into an [`IncidentEvent`].
///
/// Returns `Ok(None)` for event names this adapter does not handle.
///
/// # Errors
///
/// * [`EventError::NotAnObject`] if the unwrapped payload is not an object
/// * [`EventError::MissingIdentifier`] if it has no non-empty `id`
/// * [`EventError::Decode`] if the record is otherwise malformed
pub fn normalize(name: &str, payload: Value) -> Result<Option<IncidentEvent>, EventError> {
    let wrap: fn(Incident) -> IncidentEvent = match name {
        INCIDENT_CREATED => IncidentEvent::Created,
        INCIDENT_UPDATED => IncidentEvent::Updated,
        _ => return Ok(None),
    };

    let record = unwrap_envelope(payload);

    let Some(object) = record.as_object() else {
        return Err(EventError::NotAnObject {
            event: name.to_string(),
        });
    };

    let has_id = match object.get("id") {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(_) => true,
    };
    if !has_id {
        return Err(EventError::MissingIdentifier {
            event: name.to_string(),
        });
    }

    let incident = serde_json::from_value(record).map_err(|source| EventError::Decode {
        event: name.to_string(),
        source,
    })?;

    Ok(Some(wrap(incident)))
}

/// A source of push-channel messages.
#[async_trait::async_trait]
pub trait PushChannel: Send + Sync {
    /// Runs the channel until it fails permanently or `sink` is closed,
    /// forwarding connection transitions and events in arrival order.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError`] if the channel cannot continue.
    async fn run(&self, sink: mpsc::Sender<ChannelMessage>) -> Result<(), ChannelError>;
}

/// Scoped ownership of a running [`PushChannel`].
///
/// Dropping the subscription aborts the channel task; no message is
/// produced afterwards.
#[derive(Debug)]
pub struct Subscription {
    handle: JoinHandle<()>,
}

impl Subscription {
    /// Spawns `channel` on the current runtime, forwarding into `sink`.
    #[must_use]
    pub fn open(channel: Arc<dyn PushChannel>, sink: mpsc::Sender<ChannelMessage>) -> Self {
        let handle = tokio::spawn(async move {
            match channel.run(sink).await {
                Ok(()) => log::debug!("Push channel finished"),
                Err(e) => log::error!("Push channel stopped: {e}"),
            }
        });
        Self { handle }
    }

    /// Releases the subscription.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use incident_map_incident_models::{IncidentId, Severity};
    use serde_json::json;

    use super::*;

    #[test]
    fn unwraps_envelope() {
        let payload = json!({"type": "incident:new", "data": {"id": "a", "severity": "LOW"}});
        assert_eq!(unwrap_envelope(payload), json!({"id": "a", "severity": "LOW"}));
    }

    #[test]
    fn bare_record_passes_through() {
        let payload = json!({"id": "a", "severity": "LOW"});
        assert_eq!(unwrap_envelope(payload.clone()), payload);
    }

    #[test]
    fn non_object_data_is_not_an_envelope() {
        let payload = json!({"id": "a", "severity": "LOW", "data": "note"});
        assert_eq!(unwrap_envelope(payload.clone()), payload);
    }

    #[test]
    fn normalizes_both_kinds() {
        let created = normalize(INCIDENT_CREATED, json!({"data": {"id": 7, "severity": "HIGH"}}))
            .unwrap()
            .unwrap();
        assert!(matches!(created, IncidentEvent::Created(_)));
        assert_eq!(created.incident().id, IncidentId::new("7"));

        let updated = normalize(INCIDENT_UPDATED, json!({"id": "7", "severity": "LOW"}))
            .unwrap()
            .unwrap();
        assert!(matches!(updated, IncidentEvent::Updated(_)));
        assert_eq!(updated.into_incident().severity, Severity::Low);
    }

    #[test]
    fn ignores_unknown_event_names() {
        assert!(normalize("incident:delete", json!({"id": "a"})).unwrap().is_none());
    }

    #[test]
    fn rejects_missing_identifier() {
        for payload in [
            json!({"severity": "LOW"}),
            json!({"data": {"id": null, "severity": "LOW"}}),
            json!({"id": "", "severity": "LOW"}),
        ] {
            assert!(matches!(
                normalize(INCIDENT_CREATED, payload),
                Err(EventError::MissingIdentifier { .. })
            ));
        }
    }

    #[test]
    fn rejects_non_objects_and_malformed_records() {
        assert!(matches!(
            normalize(INCIDENT_CREATED, json!([1, 2])),
            Err(EventError::NotAnObject { .. })
        ));
        assert!(matches!(
            normalize(INCIDENT_CREATED, json!({"id": "a", "severity": "CATASTROPHIC"})),
            Err(EventError::Decode { .. })
        ));
    }

    #[test]
    fn record_without_coordinates_is_accepted() {
        let event = normalize(INCIDENT_CREATED, json!({"id": "a", "severity": "LOW"}))
            .unwrap()
            .unwrap();
        assert!(event.incident().coordinates().is_none());
    }

    #[test]
    fn tolerates_null_and_odd_optional_fields() {
        for payload in [
            json!({"id": "a", "severity": "HIGH", "latitude": 1, "longitude": 2, "description": null}),
            json!({"id": "a", "severity": "HIGH", "latitude": 1, "longitude": 2, "upvoteCount": null}),
            json!({"data": {"id": "a", "severity": "HIGH", "latitude": 1, "longitude": 2, "createdAt": "2023-10-26 14:30"}}),
        ] {
            let event = normalize(INCIDENT_CREATED, payload).unwrap().unwrap();
            assert_eq!(event.incident().id, IncidentId::new("a"));
            assert!(event.incident().coordinates().is_some());
        }
    }

    #[test]
    fn live_status_labels() {
        assert_eq!(LiveStatus::default(), LiveStatus::Connecting);
        assert_eq!(LiveStatus::Live.label(), "LIVE FEED ACTIVE");
        assert_eq!(LiveStatus::Connecting.label(), "CONNECTING...");
    }

    struct EndlessChannel;

    #[async_trait::async_trait]
    impl PushChannel for EndlessChannel {
        async fn run(&self, sink: mpsc::Sender<ChannelMessage>) -> Result<(), ChannelError> {
            sink.send(ChannelMessage::Connected)
                .await
                .map_err(|e| ChannelError::Protocol(e.to_string()))?;
            loop {
                tokio::time::sleep(Duration::from_millis(5)).await;
                let event = ChannelMessage::Event {
                    name: INCIDENT_CREATED.to_string(),
                    payload: json!({"id": "tick", "severity": "LOW"}),
                };
                if sink.send(event).await.is_err() {
                    return Ok(());
                }
            }
        }
    }

    #[tokio::test]
    async fn dropping_subscription_stops_messages() {
        let (tx, mut rx) = mpsc::channel(64);
        let subscription = Subscription::open(Arc::new(EndlessChannel), tx);

        assert_eq!(rx.recv().await, Some(ChannelMessage::Connected));
        assert!(rx.recv().await.is_some());

        subscription.release();

        // Drain anything sent before the abort landed; the sender is then
        // dropped with the aborted task and the queue closes.
        let drained = tokio::time::timeout(Duration::from_secs(1), async {
            while rx.recv().await.is_some() {}
        })
        .await;
        assert!(drained.is_ok(), "channel kept producing after release");
    }
}
