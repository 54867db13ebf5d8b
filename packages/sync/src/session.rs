//! The map session reducer.
//!
//! [`MapSession`] owns every piece of mutable state behind the map view and
//! changes it only through [`MapSession::apply`]. Derived data (the filtered
//! view, markers and camera) is recomputed from that state on demand in
//! [`MapSession::frame`] and never stored.

use incident_map_filter::{FilterState, filter_incidents};
use incident_map_incident_models::{Coordinates, Incident, IncidentId};
use incident_map_viewport::{
    CameraCommand, DeepLinkResolver, Viewport, ViewportController, ViewportSettings,
};
use serde::Serialize;

use crate::events::{ChannelMessage, LiveStatus, normalize};
use crate::loader::{BulkLoader, LoadState};
use crate::store::IncidentStore;
use crate::{LoadError, LocationError};

/// Everything that can change the session.
#[derive(Debug)]
pub enum SessionEvent {
    /// The bulk fetch finished.
    BulkLoaded(Result<Vec<Incident>, LoadError>),
    /// The location request finished.
    LocationResolved(Result<Coordinates, LocationError>),
    /// The push channel produced a message.
    Channel(ChannelMessage),
    /// The caller supplied a new filter state.
    FiltersChanged(FilterState),
    /// The deep-link identifier changed.
    HighlightChanged(Option<IncidentId>),
    /// The user moved the map.
    ManualView(Viewport),
    /// The user asked to return to the automatic camera.
    Recenter,
    /// The view is going away; nothing is applied afterwards.
    Teardown,
}

/// Derived snapshot handed to the renderer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MapFrame {
    /// Store revision this frame was computed from.
    pub revision: u64,
    /// Filtered incidents in store order.
    pub incidents: Vec<Incident>,
    /// Resolved camera.
    pub camera: CameraCommand,
    /// Live indicator.
    pub live: LiveStatus,
    /// Whether the bulk fetch is still in flight.
    pub loading: bool,
    /// Deep-link target, pending or resolved.
    pub highlight: Option<IncidentId>,
    /// Number of incidents in the store, before filtering.
    pub total: usize,
}

impl MapFrame {
    /// Filtered incidents that have coordinates, i.e. those that get a
    /// marker.
    pub fn markers(&self) -> impl Iterator<Item = (&Incident, Coordinates)> {
        self.incidents
            .iter()
            .filter_map(|incident| incident.coordinates().map(|c| (incident, c)))
    }
}

/// Mutable state of one map view.
#[derive(Debug)]
pub struct MapSession {
    store: IncidentStore,
    loader: BulkLoader,
    live: LiveStatus,
    filters: FilterState,
    user_location: Option<Coordinates>,
    deep_link: DeepLinkResolver,
    viewport: ViewportController,
    torn_down: bool,
}

impl MapSession {
    /// Creates a session with an empty store and a bulk fetch in flight.
    #[must_use]
    pub fn new(filters: FilterState, settings: ViewportSettings) -> Self {
        Self {
            store: IncidentStore::new(),
            loader: BulkLoader::new(),
            live: LiveStatus::Connecting,
            filters,
            user_location: None,
            deep_link: DeepLinkResolver::new(),
            viewport: ViewportController::new(settings),
            torn_down: false,
        }
    }

    /// Applies one event. Returns `true` if anything observable may have
    /// changed. Every event after [`SessionEvent::Teardown`] is ignored.
    pub fn apply(&mut self, event: SessionEvent) -> bool {
        if self.torn_down {
            log::debug!("Ignoring event after teardown: {event:?}");
            return false;
        }

        match event {
            SessionEvent::BulkLoaded(result) => {
                self.loader.complete(result, &mut self.store);
                self.resolve_deep_link();
                true
            }
            SessionEvent::LocationResolved(Ok(position)) => {
                log::info!(
                    "User location: ({}, {})",
                    position.latitude,
                    position.longitude
                );
                self.user_location = Some(position);
                true
            }
            SessionEvent::LocationResolved(Err(e)) => {
                log::info!("Location unavailable ({e}), using default center");
                false
            }
            SessionEvent::Channel(message) => self.apply_channel(message),
            SessionEvent::FiltersChanged(filters) => {
                if filters == self.filters {
                    return false;
                }
                self.filters = filters;
                true
            }
            SessionEvent::HighlightChanged(target) => {
                if !self.deep_link.set_target(target) {
                    return false;
                }
                self.viewport.release_highlight();
                self.resolve_deep_link();
                true
            }
            SessionEvent::ManualView(view) => {
                self.viewport.set_manual(view);
                true
            }
            SessionEvent::Recenter => {
                self.viewport.recenter();
                true
            }
            SessionEvent::Teardown => {
                log::debug!("Map session torn down");
                self.torn_down = true;
                false
            }
        }
    }

    fn apply_channel(&mut self, message: ChannelMessage) -> bool {
        match message {
            ChannelMessage::Connected => {
                log::info!("Push channel connected");
                self.set_live(LiveStatus::Live)
            }
            ChannelMessage::Disconnected { reason } => {
                log::info!("Push channel disconnected: {reason}");
                self.set_live(LiveStatus::Connecting)
            }
            ChannelMessage::Event { name, payload } => {
                log::debug!("Received {name}");
                match normalize(&name, payload) {
                    Ok(Some(event)) => {
                        self.store.upsert(event.into_incident());
                        self.resolve_deep_link();
                        true
                    }
                    Ok(None) => false,
                    Err(e) => {
                        log::warn!("Dropping push event: {e}");
                        false
                    }
                }
            }
        }
    }

    fn set_live(&mut self, live: LiveStatus) -> bool {
        let changed = self.live != live;
        self.live = live;
        changed
    }

    fn resolve_deep_link(&mut self) {
        let store = &self.store;
        if let Some(command) = self
            .deep_link
            .observe(|id| store.get(id).and_then(Incident::coordinates))
        {
            self.viewport.focus_highlight(command.coordinates);
        }
    }

    /// The incident store.
    #[must_use]
    pub const fn store(&self) -> &IncidentStore {
        &self.store
    }

    /// Bulk fetch progress.
    #[must_use]
    pub const fn load_state(&self) -> &LoadState {
        self.loader.state()
    }

    /// Live indicator.
    #[must_use]
    pub const fn live(&self) -> LiveStatus {
        self.live
    }

    /// Current filter state.
    #[must_use]
    pub const fn filters(&self) -> &FilterState {
        &self.filters
    }

    /// The user's position, once known.
    #[must_use]
    pub const fn user_location(&self) -> Option<Coordinates> {
        self.user_location
    }

    /// Deep-link resolver.
    #[must_use]
    pub const fn deep_link(&self) -> &DeepLinkResolver {
        &self.deep_link
    }

    /// Whether [`SessionEvent::Teardown`] was applied.
    #[must_use]
    pub const fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// Filtered view in store order.
    #[must_use]
    pub fn filtered(&self) -> Vec<&Incident> {
        filter_incidents(
            &self.store,
            &self.filters,
            self.user_location,
            self.deep_link.target(),
        )
    }

    /// Computes the renderer snapshot.
    #[must_use]
    pub fn frame(&self) -> MapFrame {
        let filtered = self.filtered();
        let camera = self.viewport.resolve(&filtered, self.user_location);

        MapFrame {
            revision: self.store.revision(),
            incidents: filtered.into_iter().cloned().collect(),
            camera,
            live: self.live,
            loading: self.loader.is_loading(),
            highlight: self.deep_link.target().cloned(),
            total: self.store.len(),
        }
    }
}
