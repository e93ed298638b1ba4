//! In-memory registry holding the latest record per device and metric.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use plugsight_common::MetricRecord;
use tracing::trace;

/// Identity of a stored record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    pub device_id: String,
    pub metric: String,
}

impl RecordKey {
    pub fn new(device_id: impl Into<String>, metric: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            metric: metric.into(),
        }
    }

    fn of(record: &MetricRecord) -> Self {
        Self::new(record.device_id(), record.name())
    }
}

/// What [`MetricRegistry::upsert`] did with a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// First record for this key.
    Inserted,
    /// Replaced an older (or same-age) record.
    Replaced,
    /// Discarded because a newer record is already stored.
    Stale,
}

/// Registry statistics.
#[derive(Debug, Clone, Default)]
pub struct RegistryStats {
    /// Records accepted (inserted or replaced).
    pub upserts: u64,
    /// Records discarded as older than the stored one.
    pub stale_discarded: u64,
}

/// Thread-safe store of the latest [`MetricRecord`] per `(device_id, metric)`.
///
/// Records are held behind `Arc` and swapped as a whole, so readers never see
/// a partially written record.
#[derive(Debug, Default)]
pub struct MetricRegistry {
    records: RwLock<HashMap<RecordKey, Arc<MetricRecord>>>,
    stats: RwLock<RegistryStats>,
}

/// Create a shareable registry handle.
pub type SharedRegistry = Arc<MetricRegistry>;

impl MetricRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a record unless a newer one is already present for its key.
    pub fn upsert(&self, record: MetricRecord) -> UpsertOutcome {
        let key = RecordKey::of(&record);
        let record = Arc::new(record);

        let outcome = {
            let mut records = self.records.write();
            match records.get(&key) {
                Some(existing) if existing.timestamp_ms() > record.timestamp_ms() => {
                    UpsertOutcome::Stale
                }
                Some(_) => {
                    records.insert(key, record);
                    UpsertOutcome::Replaced
                }
                None => {
                    records.insert(key, record);
                    UpsertOutcome::Inserted
                }
            }
        };

        let mut stats = self.stats.write();
        match outcome {
            UpsertOutcome::Stale => {
                stats.stale_discarded += 1;
                trace!("Discarded out-of-order record");
            }
            UpsertOutcome::Inserted | UpsertOutcome::Replaced => stats.upserts += 1,
        }

        outcome
    }

    /// Take an immutable point-in-time view of all records.
    pub fn snapshot(&self) -> RegistrySnapshot {
        let mut records: Vec<Arc<MetricRecord>> = {
            let records = self.records.read();
            records.values().cloned().collect()
        };

        records.sort_by(|a, b| {
            a.name()
                .cmp(b.name())
                .then_with(|| a.device_id().cmp(b.device_id()))
        });

        RegistrySnapshot { records }
    }

    /// Get the current number of stored records.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Get registry statistics.
    pub fn stats(&self) -> RegistryStats {
        self.stats.read().clone()
    }
}

/// Immutable view of the registry, sorted by metric name then device id.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    records: Vec<Arc<MetricRecord>>,
}

impl RegistrySnapshot {
    pub fn iter(&self) -> impl Iterator<Item = &MetricRecord> {
        self.records.iter().map(|r| r.as_ref())
    }

    /// Look up the record for a device and metric name.
    pub fn get(&self, device_id: &str, metric: &str) -> Option<&MetricRecord> {
        self.iter()
            .find(|r| r.device_id() == device_id && r.name() == metric)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
