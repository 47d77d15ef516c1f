//! Derived-series status sub-registry
//!
//! Tracks each derivation per dataset so handlers can tell "not started"
//! from "in progress" from "ready". Updates are tagged with the parent load
//! generation; a finish from an older generation is discarded.

use super::DatasetKey;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SeriesKind {
    Sector,
    Industry,
    StockReturns,
}

impl SeriesKind {
    pub const ALL: [SeriesKind; 3] = [SeriesKind::Sector, SeriesKind::Industry, SeriesKind::StockReturns];

    pub fn label(&self) -> &'static str {
        match self {
            SeriesKind::Sector => "sector series",
            SeriesKind::Industry => "industry series",
            SeriesKind::StockReturns => "stock returns",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SeriesStatus {
    Pending,
    Computing,
    Ready,
    Failed,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    status: SeriesStatus,
    generation: u64,
}

#[derive(Debug, Default)]
pub struct SeriesStatusRegistry {
    entries: RwLock<HashMap<(DatasetKey, SeriesKind), Entry>>,
}

impl SeriesStatusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self, key: &DatasetKey, kind: SeriesKind) -> SeriesStatus {
        self.entries
            .read()
            .get(&(key.clone(), kind))
            .map(|e| e.status)
            .unwrap_or(SeriesStatus::Pending)
    }

    pub fn is_ready(&self, key: &DatasetKey, kind: SeriesKind) -> bool {
        self.status(key, kind) == SeriesStatus::Ready
    }

    /// Reset every derivation of a dataset to `Pending` for a new load
    pub fn reset(&self, key: &DatasetKey, generation: u64) {
        let mut entries = self.entries.write();
        for kind in SeriesKind::ALL {
            entries.insert(
                (key.clone(), kind),
                Entry {
                    status: SeriesStatus::Pending,
                    generation,
                },
            );
        }
    }

    /// Mark a derivation as computing; returns false if the generation is stale
    pub fn mark_computing(&self, key: &DatasetKey, kind: SeriesKind, generation: u64) -> bool {
        self.transition(key, kind, generation, SeriesStatus::Computing)
    }

    /// Record a finished derivation; returns false if the generation is stale
    pub fn finish(&self, key: &DatasetKey, kind: SeriesKind, generation: u64, ok: bool) -> bool {
        let status = if ok { SeriesStatus::Ready } else { SeriesStatus::Failed };
        self.transition(key, kind, generation, status)
    }

    fn transition(
        &self,
        key: &DatasetKey,
        kind: SeriesKind,
        generation: u64,
        status: SeriesStatus,
    ) -> bool {
        let mut entries = self.entries.write();
        let entry = entries.entry((key.clone(), kind)).or_insert(Entry {
            status: SeriesStatus::Pending,
            generation,
        });

        if generation < entry.generation {
            tracing::debug!(
                "[{}] Discarding stale {} update (generation {} < {})",
                key,
                kind.label(),
                generation,
                entry.generation
            );
            return false;
        }

        entry.generation = generation;
        entry.status = status;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_lifecycle() {
        let registry = SeriesStatusRegistry::new();
        let key = DatasetKey::new("sp500").unwrap();

        assert_eq!(registry.status(&key, SeriesKind::Sector), SeriesStatus::Pending);

        registry.reset(&key, 1);
        assert!(registry.mark_computing(&key, SeriesKind::Sector, 1));
        assert_eq!(registry.status(&key, SeriesKind::Sector), SeriesStatus::Computing);

        assert!(registry.finish(&key, SeriesKind::Sector, 1, true));
        assert!(registry.is_ready(&key, SeriesKind::Sector));

        assert!(registry.finish(&key, SeriesKind::Industry, 1, false));
        assert_eq!(registry.status(&key, SeriesKind::Industry), SeriesStatus::Failed);
    }

    #[test]
    fn test_stale_generation_discarded() {
        let registry = SeriesStatusRegistry::new();
        let key = DatasetKey::new("sp500").unwrap();

        registry.reset(&key, 1);
        registry.mark_computing(&key, SeriesKind::Sector, 1);

        // A refresh starts generation 2 while generation 1 is still computing
        registry.reset(&key, 2);
        assert!(!registry.finish(&key, SeriesKind::Sector, 1, true));
        assert_eq!(registry.status(&key, SeriesKind::Sector), SeriesStatus::Pending);

        assert!(registry.finish(&key, SeriesKind::Sector, 2, true));
        assert!(registry.is_ready(&key, SeriesKind::Sector));
    }
}
