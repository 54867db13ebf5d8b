//! Authoritative in-memory incident collection.
//!
//! Records are kept in display order (newest first for pushed creations)
//! and keyed by [`IncidentId`]: a write with a known identifier replaces the
//! existing record in place, a write with an unknown identifier is inserted
//! at the front. Nothing is ever removed.

use std::collections::BTreeMap;

use incident_map_incident_models::{Incident, IncidentId};

/// Outcome of [`IncidentStore::upsert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upserted {
    /// The identifier was new; the record went to the front.
    Inserted,
    /// An existing record was replaced at its current position.
    Replaced,
}

/// Ordered, identifier-unique incident collection.
#[derive(Debug, Clone, Default)]
pub struct IncidentStore {
    /// Oldest first; display order is the reverse, so a front insertion is
    /// a push and never shifts `positions`.
    incidents: Vec<Incident>,
    positions: BTreeMap<IncidentId, usize>,
    revision: u64,
    seeded: bool,
}

impl IncidentStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `incident` at the front if its identifier is unknown,
    /// otherwise replaces the existing record without moving it.
    pub fn upsert(&mut self, incident: Incident) -> Upserted {
        self.revision += 1;
        self.put(incident)
    }

    fn put(&mut self, incident: Incident) -> Upserted {
        if let Some(existing) = self
            .positions
            .get(&incident.id)
            .and_then(|&position| self.incidents.get_mut(position))
        {
            *existing = incident;
            Upserted::Replaced
        } else {
            self.positions
                .insert(incident.id.clone(), self.incidents.len());
            self.incidents.push(incident);
            Upserted::Inserted
        }
    }

    /// Seeds the store from a bulk fetch.
    ///
    /// The fetched records become the base sequence (duplicate identifiers
    /// within the batch collapse onto the first position, last write wins).
    /// Records that were already upserted before the seed are then
    /// re-applied with upsert semantics, unless the fetched copy carries a
    /// strictly newer `updated_at`. No record is lost or duplicated whatever
    /// the relative completion order of the fetch and the push events.
    pub fn seed(&mut self, records: Vec<Incident>) {
        if self.seeded {
            log::warn!("Incident store seeded more than once; merging");
        }

        let live = std::mem::take(&mut self.incidents);

        let mut base: Vec<Incident> = Vec::with_capacity(records.len());
        let mut slots: BTreeMap<IncidentId, usize> = BTreeMap::new();
        for record in records {
            if let Some(existing) = slots.get(&record.id).and_then(|&slot| base.get_mut(slot)) {
                *existing = record;
            } else {
                slots.insert(record.id.clone(), base.len());
                base.push(record);
            }
        }
        base.reverse();

        self.incidents = base;
        self.positions = self
            .incidents
            .iter()
            .enumerate()
            .map(|(position, incident)| (incident.id.clone(), position))
            .collect();

        for record in live {
            let fetched_is_newer = self.get(&record.id).is_some_and(|fetched| {
                matches!(
                    (fetched.updated_at, record.updated_at),
                    (Some(fetched_at), Some(live_at)) if fetched_at > live_at
                )
            });
            if !fetched_is_newer {
                self.put(record);
            }
        }

        self.seeded = true;
        self.revision += 1;
    }

    /// Looks up a record by identifier.
    #[must_use]
    pub fn get(&self, id: &IncidentId) -> Option<&Incident> {
        self.positions
            .get(id)
            .and_then(|&position| self.incidents.get(position))
    }

    /// Records in display order.
    pub fn iter(&self) -> std::iter::Rev<std::slice::Iter<'_, Incident>> {
        self.incidents.iter().rev()
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.incidents.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.incidents.is_empty()
    }

    /// Incremented on every mutation.
    #[must_use]
    pub const fn revision(&self) -> u64 {
        self.revision
    }

    /// Whether [`Self::seed`] has run.
    #[must_use]
    pub const fn is_seeded(&self) -> bool {
        self.seeded
    }
}

impl<'a> IntoIterator for &'a IncidentStore {
    type Item = &'a Incident;
    type IntoIter = std::iter::Rev<std::slice::Iter<'a, Incident>>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
