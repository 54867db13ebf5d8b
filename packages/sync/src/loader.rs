//! One-shot bulk fetch of existing incidents.

use incident_map_incident_models::Incident;
use serde::Serialize;
use serde_json::Value;

use crate::LoadError;
use crate::store::IncidentStore;

/// Fetches the full incident list.
#[async_trait::async_trait]
pub trait IncidentSource: Send + Sync {
    /// Lists every incident the backend knows about.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError`] if the request fails or the body is not JSON.
    async fn list_incidents(&self) -> Result<Vec<Incident>, LoadError>;
}

/// Decodes a bulk response body.
///
/// Accepts either a bare array or an object with a `data` array. A missing
/// or non-array `data` yields an empty list. Individual records that fail to
/// decode are skipped with a warning so one bad row does not hide the rest.
#[must_use]
pub fn decode_incident_list(body: Value) -> Vec<Incident> {
    let records = match body {
        Value::Array(records) => records,
        Value::Object(mut map) => match map.remove("data") {
            Some(Value::Array(records)) => records,
            Some(other) => {
                log::warn!("Incident list 'data' is not an array: {other}");
                Vec::new()
            }
            None => {
                log::warn!("Incident list response has no 'data' field");
                Vec::new()
            }
        },
        other => {
            log::warn!("Unexpected incident list response: {other}");
            Vec::new()
        }
    };

    records
        .into_iter()
        .enumerate()
        .filter_map(
            |(index, record)| match serde_json::from_value::<Incident>(record) {
                Ok(incident) => Some(incident),
                Err(e) => {
                    log::warn!("Skipping incident #{index}: {e}");
                    None
                }
            },
        )
        .collect()
}

/// Progress of the bulk fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LoadState {
    /// Not started.
    Idle,
    /// Request in flight.
    Loading,
    /// Completed and merged into the store.
    Loaded {
        /// Records received.
        count: usize,
    },
    /// Failed; the store was left as is.
    Failed {
        /// Error description.
        message: String,
    },
}

/// Tracks the bulk fetch and applies its outcome to the store.
#[derive(Debug, Clone)]
pub struct BulkLoader {
    state: LoadState,
}

impl Default for BulkLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl BulkLoader {
    /// Creates a loader in the [`LoadState::Loading`] state; the fetch is
    /// issued as soon as the session starts.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: LoadState::Loading,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> &LoadState {
        &self.state
    }

    /// Whether the fetch is still in flight.
    #[must_use]
    pub const fn is_loading(&self) -> bool {
        matches!(self.state, LoadState::Loading)
    }

    /// Applies the fetch outcome. On success the records seed `store`; on
    /// failure the store is untouched. Either way loading is over.
    ///
    /// Returns `true` if the store changed.
    pub fn complete(
        &mut self,
        result: Result<Vec<Incident>, LoadError>,
        store: &mut IncidentStore,
    ) -> bool {
        match result {
            Ok(records) => {
                let count = records.len();
                log::info!("Loaded {count} incidents");
                store.seed(records);
                self.state = LoadState::Loaded { count };
                true
            }
            Err(e) => {
                log::error!("Failed to load incidents: {e}");
                self.state = LoadState::Failed {
                    message: e.to_string(),
                };
                false
            }
        }
    }
}

/// Runs a bulk fetch against `source`, logging how long it took.
///
/// # Errors
///
/// Propagates the source's [`LoadError`].
pub async fn fetch(source: &dyn IncidentSource) -> Result<Vec<Incident>, LoadError> {
    let start = std::time::Instant::now();
    let result = source.list_incidents().await;
    log::debug!(
        "Bulk fetch finished in {:.1}ms",
        start.elapsed().as_secs_f64() * 1000.0
    );
    result
}

#[cfg(test)]
mod tests {
    use incident_map_incident_models::{IncidentId, IncidentType, Severity};
    use serde_json::json;

    use super::*;

    #[test]
    fn decodes_bare_array() {
        let list = decode_incident_list(json!([
            {"id": "a", "severity": "LOW"},
            {"id": "b", "severity": "HIGH", "incidentType": "FIRE"},
        ]));
        assert_eq!(list.len(), 2);
        assert_eq!(list[1].incident_type, IncidentType::Fire);
    }

    #[test]
    fn decodes_data_envelope() {
        let list = decode_incident_list(json!({"data": [{"id": 1, "severity": "MEDIUM"}]}));
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].id, IncidentId::new("1"));
    }

    #[test]
    fn missing_data_is_empty() {
        assert!(decode_incident_list(json!({"success": true})).is_empty());
        assert!(decode_incident_list(json!({"data": null})).is_empty());
        assert!(decode_incident_list(json!("nope")).is_empty());
    }

    #[test]
    fn skips_bad_records() {
        let list = decode_incident_list(json!([
            {"id": "a", "severity": "LOW"},
            {"severity": "LOW"},
            {"id": "c", "severity": "HIGH"},
        ]));
        let ids: Vec<_> = list.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, ["a", "c"]);
    }

    #[test]
    fn starts_loading() {
        assert!(BulkLoader::new().is_loading());
    }

    #[test]
    fn success_seeds_store() {
        let mut loader = BulkLoader::new();
        let mut store = IncidentStore::new();
        let changed = loader.complete(
            Ok(vec![Incident::new("a", IncidentType::Fire, Severity::Low)]),
            &mut store,
        );

        assert!(changed);
        assert!(!loader.is_loading());
        assert_eq!(loader.state(), &LoadState::Loaded { count: 1 });
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn failure_leaves_store_untouched() {
        let mut loader = BulkLoader::new();
        let mut store = IncidentStore::new();
        store.upsert(Incident::new("live", IncidentType::Fire, Severity::Low));
        let revision = store.revision();

        let changed = loader.complete(
            Err(LoadError::Status {
                status: 500,
                url: "http://localhost/api/incidents".to_string(),
            }),
            &mut store,
        );

        assert!(!changed);
        assert!(!loader.is_loading());
        assert!(matches!(loader.state(), LoadState::Failed { .. }));
        assert_eq!(store.len(), 1);
        assert_eq!(store.revision(), revision);
    }

    struct Canned;

    #[async_trait::async_trait]
    impl IncidentSource for Canned {
        async fn list_incidents(&self) -> Result<Vec<Incident>, LoadError> {
            Ok(decode_incident_list(json!({"data": [{"id": "a", "severity": "LOW"}]})))
        }
    }

    #[tokio::test]
    async fn fetch_delegates_to_source() {
        let list = fetch(&Canned).await.unwrap();
        assert_eq!(list.len(), 1);
    }
}
