//! Station catalog shared between the catalog refresher and the controller.

use crate::error::{RelayError, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A tuner channel that can be relayed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Station {
    /// Stable identifier (the tuner guide number)
    pub id: String,
    pub display_name: String,
    /// HTTP URL of the channel stream on the tuner
    pub source_url: String,
}

impl Station {
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        source_url: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            source_url: source_url.into(),
        }
    }
}

/// The last fetched catalog
///
/// Cloning is cheap and every clone sees the same catalog. The station set
/// is only ever replaced as a whole; readers get either the old or the new
/// set, never a mix.
#[derive(Debug, Clone, Default)]
pub struct StationRegistry {
    stations: Arc<RwLock<Arc<BTreeMap<String, Station>>>>,
}

impl StationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stations(stations: impl IntoIterator<Item = Station>) -> Self {
        let registry = Self::new();
        registry.replace(stations);
        registry
    }

    /// Replaces the whole catalog.
    ///
    /// Returns `true` when the new set differs from the previous one.
    pub fn replace(&self, stations: impl IntoIterator<Item = Station>) -> bool {
        let next: BTreeMap<String, Station> = stations
            .into_iter()
            .map(|station| (station.id.clone(), station))
            .collect();

        let mut current = self.stations.write();
        if **current == next {
            return false;
        }
        *current = Arc::new(next);
        true
    }

    /// Finds a station by id.
    ///
    /// Falls back to a case-insensitive match on the id or the display name,
    /// so "bbc radio 4" finds the station listed as "BBC Radio 4".
    pub fn lookup(&self, id: &str) -> Result<Station> {
        let stations = self.snapshot();
        if let Some(station) = stations.get(id) {
            return Ok(station.clone());
        }

        let wanted = id.trim().to_lowercase();
        stations
            .values()
            .find(|s| s.id.to_lowercase() == wanted || s.display_name.to_lowercase() == wanted)
            .cloned()
            .ok_or_else(|| RelayError::UnknownStation(id.to_string()))
    }

    /// Every station, ordered by display name
    pub fn list(&self) -> Vec<Station> {
        let mut stations: Vec<Station> = self.snapshot().values().cloned().collect();
        stations.sort_by(|a, b| {
            a.display_name
                .to_lowercase()
                .cmp(&b.display_name.to_lowercase())
                .then_with(|| a.id.cmp(&b.id))
        });
        stations
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    fn snapshot(&self) -> Arc<BTreeMap<String, Station>> {
        Arc::clone(&self.stations.read())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> StationRegistry {
        StationRegistry::with_stations([
            Station::new("700", "BBC Radio 1", "http://tuner/auto/v700"),
            Station::new("704", "BBC Radio 4", "http://tuner/auto/v704"),
        ])
    }

    #[test]
    fn test_lookup_by_id_and_name() {
        let registry = catalog();
        assert_eq!(registry.lookup("704").unwrap().display_name, "BBC Radio 4");
        assert_eq!(registry.lookup("bbc radio 1").unwrap().id, "700");
        assert_eq!(
            registry.lookup("nonexistent"),
            Err(RelayError::UnknownStation("nonexistent".into()))
        );
    }

    #[test]
    fn test_replace_is_wholesale() {
        let registry = catalog();
        let reader = registry.clone();

        assert!(registry.replace([Station::new("710", "Classic FM", "http://tuner/auto/v710")]));
        assert_eq!(reader.len(), 1);
        assert!(reader.lookup("700").is_err());

        // same content again is not a change
        assert!(!registry.replace([Station::new("710", "Classic FM", "http://tuner/auto/v710")]));
    }

    #[test]
    fn test_list_is_sorted_by_name() {
        let registry = StationRegistry::with_stations([
            Station::new("2", "zeta", "u2"),
            Station::new("1", "Alpha", "u1"),
        ]);
        let names: Vec<_> = registry.list().into_iter().map(|s| s.display_name).collect();
        assert_eq!(names, vec!["Alpha", "zeta"]);
    }
}
