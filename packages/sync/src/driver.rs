//! Runs a [`MapSession`] against live I/O.
//!
//! [`MapView::start`] spawns the bulk fetch, the location request and the
//! push subscription, and a single consumer task that owns the session.
//! Every completion is routed through that consumer, so the session is
//! never touched concurrently and nothing is applied after teardown. Each
//! observable change publishes a fresh [`MapFrame`] on a watch channel.

use std::sync::Arc;

use incident_map_filter::FilterState;
use incident_map_incident_models::IncidentId;
use incident_map_viewport::{Viewport, ViewportSettings};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::events::{ChannelMessage, PushChannel, Subscription};
use crate::loader::{self, IncidentSource};
use crate::location::LocationProvider;
use crate::session::{MapFrame, MapSession, SessionEvent};

const CHANNEL_BUFFER: usize = 256;

/// I/O backing a [`MapView`].
#[derive(Clone)]
pub struct MapDependencies {
    /// Bulk incident list.
    pub source: Arc<dyn IncidentSource>,
    /// Push-event channel.
    pub channel: Arc<dyn PushChannel>,
    /// Device location.
    pub location: Arc<dyn LocationProvider>,
}

/// A running map session.
///
/// Dropping the view aborts every task it spawned, including the push
/// subscription.
pub struct MapView {
    commands: mpsc::UnboundedSender<SessionEvent>,
    frames: watch::Receiver<MapFrame>,
    consumer: Option<JoinHandle<MapSession>>,
    requests: Vec<JoinHandle<()>>,
}

impl MapView {
    /// Starts a session on the current Tokio runtime.
    #[must_use]
    pub fn start(
        deps: MapDependencies,
        filters: FilterState,
        settings: ViewportSettings,
        highlight: Option<IncidentId>,
    ) -> Self {
        let mut session = MapSession::new(filters, settings);
        session.apply(SessionEvent::HighlightChanged(highlight));

        let (frame_tx, frame_rx) = watch::channel(session.frame());
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (channel_tx, channel_rx) = mpsc::channel(CHANNEL_BUFFER);

        log::info!("Starting map session");

        let subscription = Subscription::open(deps.channel, channel_tx);

        let fetch_task = {
            let source = deps.source;
            let commands = command_tx.clone();
            tokio::spawn(async move {
                let result = loader::fetch(source.as_ref()).await;
                if commands.send(SessionEvent::BulkLoaded(result)).is_err() {
                    log::debug!("Bulk fetch finished after teardown");
                }
            })
        };

        let locate_task = {
            let location = deps.location;
            let commands = command_tx.clone();
            tokio::spawn(async move {
                let result = location.current_position().await;
                if commands.send(SessionEvent::LocationResolved(result)).is_err() {
                    log::debug!("Location resolved after teardown");
                }
            })
        };

        let consumer = tokio::spawn(consume(
            session,
            command_rx,
            channel_rx,
            subscription,
            frame_tx,
        ));

        Self {
            commands: command_tx,
            frames: frame_rx,
            consumer: Some(consumer),
            requests: vec![fetch_task, locate_task],
        }
    }

    /// Subscribes to frame updates.
    #[must_use]
    pub fn frames(&self) -> watch::Receiver<MapFrame> {
        self.frames.clone()
    }

    /// The most recently published frame.
    #[must_use]
    pub fn current_frame(&self) -> MapFrame {
        self.frames.borrow().clone()
    }

    /// Replaces the filter state.
    pub fn set_filters(&self, filters: FilterState) {
        self.send(SessionEvent::FiltersChanged(filters));
    }

    /// Sets or clears the deep-link target.
    pub fn set_highlight(&self, target: Option<IncidentId>) {
        self.send(SessionEvent::HighlightChanged(target));
    }

    /// Pins the camera to an explicit view.
    pub fn set_manual_view(&self, viewport: Viewport) {
        self.send(SessionEvent::ManualView(viewport));
    }

    /// Returns the camera to automatic positioning.
    pub fn recenter(&self) {
        self.send(SessionEvent::Recenter);
    }

    fn send(&self, event: SessionEvent) {
        if self.commands.send(event).is_err() {
            log::debug!("Map session already torn down");
        }
    }

    /// Tears the session down: releases the push subscription, cancels
    /// outstanding requests and returns the final session state.
    pub async fn shutdown(mut self) -> Option<MapSession> {
        log::info!("Shutting down map session");

        self.send(SessionEvent::Teardown);
        for request in self.requests.drain(..) {
            request.abort();
        }

        let consumer = self.consumer.take()?;
        match consumer.await {
            Ok(session) => Some(session),
            Err(e) => {
                log::warn!("Map session task failed: {e}");
                None
            }
        }
    }
}

impl Drop for MapView {
    fn drop(&mut self) {
        for request in &self.requests {
            request.abort();
        }
        if let Some(consumer) = &self.consumer {
            consumer.abort();
        }
    }
}

async fn consume(
    mut session: MapSession,
    mut commands: mpsc::UnboundedReceiver<SessionEvent>,
    mut channel: mpsc::Receiver<ChannelMessage>,
    subscription: Subscription,
    frames: watch::Sender<MapFrame>,
) -> MapSession {
    let mut channel_open = true;

    loop {
        let event = tokio::select! {
            command = commands.recv() => command.unwrap_or(SessionEvent::Teardown),
            message = channel.recv(), if channel_open => {
                if let Some(message) = message {
                    SessionEvent::Channel(message)
                } else {
                    log::debug!("Push channel closed");
                    channel_open = false;
                    continue;
                }
            }
        };

        let teardown = matches!(event, SessionEvent::Teardown);

        if session.apply(event) {
            let frame = session.frame();
            log::debug!(
                "Frame r{}: {}/{} incidents, camera {}",
                frame.revision,
                frame.incidents.len(),
                frame.total,
                frame.camera.tier
            );
            frames.send_replace(frame);
        }

        if teardown {
            break;
        }
    }

    subscription.release();
    session
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use incident_map_filter::TypeSelector;
    use incident_map_incident_models::{Coordinates, Incident, IncidentType, Severity};
    use incident_map_viewport::CameraTier;
    use serde_json::json;
    use tokio::sync::{Mutex, Notify};

    use super::*;
    use crate::events::INCIDENT_CREATED;
    use crate::location::{FixedLocation, NoLocation};
    use crate::{ChannelError, LoadError};

    struct FakeSource {
        records: Vec<Incident>,
        gate: Option<Arc<Notify>>,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl IncidentSource for FakeSource {
        async fn list_incidents(&self) -> Result<Vec<Incident>, LoadError> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.fail {
                return Err(LoadError::Status {
                    status: 500,
                    url: "http://test/api/incidents".to_string(),
                });
            }
            Ok(self.records.clone())
        }
    }

    struct ScriptedChannel {
        script: Mutex<Option<mpsc::UnboundedReceiver<ChannelMessage>>>,
    }

    #[async_trait::async_trait]
    impl PushChannel for ScriptedChannel {
        async fn run(&self, sink: mpsc::Sender<ChannelMessage>) -> Result<(), ChannelError> {
            let Some(mut script) = self.script.lock().await.take() else {
                return Ok(());
            };
            while let Some(message) = script.recv().await {
                if sink.send(message).await.is_err() {
                    break;
                }
            }
            Ok(())
        }
    }

    fn placed(id: &str, lat: f64, lng: f64) -> Incident {
        Incident::new(id, IncidentType::Fire, Severity::High).with_coordinates(lat, lng)
    }

    fn scripted() -> (Arc<ScriptedChannel>, mpsc::UnboundedSender<ChannelMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let channel = Arc::new(ScriptedChannel {
            script: Mutex::new(Some(rx)),
        });
        (channel, tx)
    }

    fn event(payload: serde_json::Value) -> ChannelMessage {
        ChannelMessage::Event {
            name: INCIDENT_CREATED.to_string(),
            payload,
        }
    }

    fn start(
        source: FakeSource,
        channel: Arc<ScriptedChannel>,
        location: Arc<dyn LocationProvider>,
        highlight: Option<IncidentId>,
    ) -> MapView {
        MapView::start(
            MapDependencies {
                source: Arc::new(source),
                channel,
                location,
            },
            FilterState::default(),
            ViewportSettings::default(),
            highlight,
        )
    }

    async fn wait_for(view: &MapView, predicate: impl FnMut(&MapFrame) -> bool) -> MapFrame {
        let mut frames = view.frames();
        let frame = tokio::time::timeout(Duration::from_secs(5), frames.wait_for(predicate))
            .await
            .expect("timed out waiting for frame")
            .expect("frame channel closed")
            .clone();
        frame
    }

    #[tokio::test]
    async fn bulk_load_and_push_events_merge() {
        let (channel, script) = scripted();
        let source = FakeSource {
            records: vec![placed("x", 1.0, 1.0), placed("y", 1.1, 1.1)],
            gate: None,
            fail: false,
        };
        let view = start(source, channel, Arc::new(NoLocation), None);

        script.send(ChannelMessage::Connected).unwrap();
        script
            .send(event(json!({"id": "a", "severity": "LOW", "latitude": 1.2, "longitude": 1.2})))
            .unwrap();

        let frame = wait_for(&view, |f| f.total == 3 && !f.loading).await;
        assert_eq!(frame.incidents.len(), 3);

        let frame = wait_for(&view, |f| f.live.label() == "LIVE FEED ACTIVE").await;
        assert_eq!(frame.camera.tier, CameraTier::AutoFit);

        let session = view.shutdown().await.unwrap();
        assert!(session.is_torn_down());
    }

    #[tokio::test]
    async fn push_before_seed_is_kept() {
        let (channel, script) = scripted();
        let gate = Arc::new(Notify::new());
        let source = FakeSource {
            records: vec![placed("x", 1.0, 1.0)],
            gate: Some(gate.clone()),
            fail: false,
        };
        let view = start(source, channel, Arc::new(NoLocation), None);

        script
            .send(event(json!({"id": "early", "severity": "HIGH"})))
            .unwrap();
        let frame = wait_for(&view, |f| f.total == 1).await;
        assert!(frame.loading);

        gate.notify_one();
        let frame = wait_for(&view, |f| !f.loading).await;
        assert_eq!(frame.total, 2);
        let ids: Vec<_> = frame.incidents.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, ["early", "x"]);
    }

    #[tokio::test]
    async fn failed_fetch_clears_loading() {
        let (channel, _script) = scripted();
        let source = FakeSource {
            records: Vec::new(),
            gate: None,
            fail: true,
        };
        let view = start(source, channel, Arc::new(NoLocation), None);

        let frame = wait_for(&view, |f| !f.loading).await;
        assert_eq!(frame.total, 0);
        assert_eq!(frame.camera.tier, CameraTier::Fallback);
    }

    #[tokio::test]
    async fn user_location_centers_empty_map() {
        let (channel, _script) = scripted();
        let source = FakeSource {
            records: Vec::new(),
            gate: None,
            fail: false,
        };
        let here = Coordinates::new(12.0, 34.0);
        let view = start(source, channel, Arc::new(FixedLocation(here)), None);

        let frame = wait_for(&view, |f| f.camera.tier == CameraTier::UserLocation).await;
        assert_eq!(frame.camera.viewport.center, here);
        assert_eq!(frame.camera.viewport.zoom, 13);
    }

    #[tokio::test]
    async fn deep_link_focuses_pushed_incident() {
        let (channel, script) = scripted();
        let source = FakeSource {
            records: vec![placed("x", 1.0, 1.0)],
            gate: None,
            fail: false,
        };
        let view = start(
            source,
            channel,
            Arc::new(NoLocation),
            Some(IncidentId::new("X")),
        );

        script
            .send(event(json!({"id": "X", "severity": "LOW", "latitude": 5.0, "longitude": 6.0})))
            .unwrap();

        let frame = wait_for(&view, |f| f.camera.tier == CameraTier::Highlight).await;
        assert_eq!(frame.camera.viewport.center, Coordinates::new(5.0, 6.0));
        assert_eq!(frame.camera.viewport.zoom, 16);

        view.set_highlight(None);
        wait_for(&view, |f| f.camera.tier == CameraTier::Manual).await;

        view.recenter();
        wait_for(&view, |f| f.camera.tier == CameraTier::AutoFit).await;
    }

    #[tokio::test]
    async fn filter_and_manual_commands_apply() {
        let (channel, _script) = scripted();
        let source = FakeSource {
            records: vec![placed("x", 1.0, 1.0)],
            gate: None,
            fail: false,
        };
        let view = start(source, channel, Arc::new(NoLocation), None);
        wait_for(&view, |f| f.total == 1).await;

        view.set_filters(FilterState::new(50.0, [Severity::Low], TypeSelector::All).unwrap());
        wait_for(&view, |f| f.incidents.is_empty()).await;

        let pinned = Viewport::new(Coordinates::new(9.0, 9.0), 10);
        view.set_manual_view(pinned);
        let frame = wait_for(&view, |f| f.camera.tier == CameraTier::Manual).await;
        assert_eq!(frame.camera.viewport, pinned);
    }

    #[tokio::test]
    async fn no_frames_after_shutdown() {
        let (channel, script) = scripted();
        let source = FakeSource {
            records: Vec::new(),
            gate: None,
            fail: false,
        };
        let view = start(source, channel, Arc::new(NoLocation), None);
        let frames = view.frames();
        wait_for(&view, |f| !f.loading).await;

        let session = view.shutdown().await.unwrap();
        assert!(session.is_torn_down());

        // The subscription is released; late pushes go nowhere.
        let _ = script.send(event(json!({"id": "late", "severity": "HIGH"})));
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(frames.borrow().total, 0);
        assert!(session.store().is_empty());
    }
}
