//! Identity cache with an in-memory hot window and a sled spill tree.
//!
//! Each external identifier is claimed at most once per run: the first
//! `lookup_and_put` wins, every later call reports the identifier as
//! present. Entries are moved to the spill tree when the hot window grows
//! past its capacity. A drain writes an entry to the spill tree before it is
//! removed from the hot window, so a concurrent lookup always finds it in
//! one of the two.

use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rkyv::{Archive, Deserialize, Serialize};
use sled::{Db, Tree};

use crate::config::IdentityCacheConfig;
use crate::error::Error;

/// Tree holding spilled feature identities.
const FEATURE_TREE: &str = "identity:features";

/// Tree holding spilled geometry identities.
const GEOMETRY_TREE: &str = "identity:geometries";

/// First materialization of an externally identified object.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct ObjectIdentity {
    pub external_id: String,
    pub surrogate_id: i64,
    pub object_class_id: i32,
}

impl ObjectIdentity {
    pub fn new(external_id: impl Into<String>, surrogate_id: i64, object_class_id: i32) -> Self {
        Self {
            external_id: external_id.into(),
            surrogate_id,
            object_class_id,
        }
    }

    /// Serialize using rkyv.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map(|v| v.to_vec())
            .map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize using rkyv.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(bytes)
            .map_err(|e| Error::Deserialization(e.to_string()))
    }
}

/// Write-once map from external identifier to its first materialization.
pub struct IdentityCache {
    name: &'static str,
    hot: DashMap<String, ObjectIdentity>,
    spill: Tree,
    hot_capacity: usize,
    drain_fraction: f64,
    draining: AtomicBool,
}

impl IdentityCache {
    fn new(name: &'static str, spill: Tree, config: &IdentityCacheConfig) -> Self {
        Self {
            name,
            hot: DashMap::new(),
            spill,
            hot_capacity: config.hot_capacity.max(1),
            drain_fraction: config.drain_fraction,
            draining: AtomicBool::new(false),
        }
    }

    /// Insert the identity unless its external id is already known.
    ///
    /// Returns `true` if the id was already present, in which case the cache
    /// is left unchanged.
    pub fn lookup_and_put(&self, identity: ObjectIdentity) -> Result<bool, Error> {
        let present = match self.hot.entry(identity.external_id.clone()) {
            Entry::Occupied(_) => true,
            Entry::Vacant(vacant) => {
                // The shard lock is held, so no drain can move this key
                // between the spill check and the insert.
                if self.spill.contains_key(vacant.key().as_bytes())? {
                    true
                } else {
                    vacant.insert(identity);
                    false
                }
            }
        };

        if !present && self.hot.len() > self.hot_capacity {
            self.drain()?;
        }
        Ok(present)
    }

    /// Identity recorded for an external id.
    pub fn get(&self, external_id: &str) -> Result<Option<ObjectIdentity>, Error> {
        if let Some(entry) = self.hot.get(external_id) {
            return Ok(Some(entry.value().clone()));
        }
        match self.spill.get(external_id.as_bytes())? {
            Some(bytes) => Ok(Some(ObjectIdentity::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Surrogate id recorded for an external id.
    pub fn surrogate_id(&self, external_id: &str) -> Result<Option<i64>, Error> {
        Ok(self.get(external_id)?.map(|identity| identity.surrogate_id))
    }

    /// Move a share of the hot window to the spill tree.
    ///
    /// Only one drain runs at a time; concurrent callers return immediately.
    /// Returns the number of entries moved.
    pub fn drain(&self) -> Result<usize, Error> {
        if self
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(0);
        }
        let result = self.drain_some();
        self.draining.store(false, Ordering::Release);
        result
    }

    fn drain_some(&self) -> Result<usize, Error> {
        let target = ((self.hot_capacity as f64 * self.drain_fraction).ceil() as usize).max(1);
        let victims: Vec<ObjectIdentity> = self
            .hot
            .iter()
            .take(target)
            .map(|entry| entry.value().clone())
            .collect();

        let mut batch = sled::Batch::default();
        for identity in &victims {
            batch.insert(identity.external_id.as_bytes(), identity.to_bytes()?);
        }
        self.spill.apply_batch(batch)?;

        for identity in &victims {
            self.hot.remove(&identity.external_id);
        }

        tracing::debug!(
            cache = self.name,
            moved = victims.len(),
            hot = self.hot.len(),
            "drained identity cache"
        );
        Ok(victims.len())
    }

    /// Number of known identities. Approximate while a drain is running.
    pub fn len(&self) -> usize {
        self.hot.len() + self.spill.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of identities held in memory.
    pub fn hot_len(&self) -> usize {
        self.hot.len()
    }
}

/// The feature and geometry caches of one run, spilling into one store.
pub struct IdentityCaches {
    db: Db,
    pub features: IdentityCache,
    pub geometries: IdentityCache,
}

impl IdentityCaches {
    /// Open the spill store and start from empty caches.
    pub fn open(config: &IdentityCacheConfig) -> Result<Self, Error> {
        let db = config.spill.to_sled_config().open()?;
        let feature_tree = db.open_tree(FEATURE_TREE)?;
        let geometry_tree = db.open_tree(GEOMETRY_TREE)?;

        // Identities never outlive a run.
        feature_tree.clear()?;
        geometry_tree.clear()?;

        Ok(Self {
            db,
            features: IdentityCache::new("features", feature_tree, config),
            geometries: IdentityCache::new("geometries", geometry_tree, config),
        })
    }

    /// Flush the spill store to disk.
    pub fn flush(&self) -> Result<(), Error> {
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::SpillConfig;

    fn caches(hot_capacity: usize) -> IdentityCaches {
        IdentityCaches::open(&IdentityCacheConfig::default().with_hot_capacity(hot_capacity)).unwrap()
    }

    #[test]
    fn test_identity_roundtrip() {
        let identity = ObjectIdentity::new("GML_1", 100, 26);
        let decoded = ObjectIdentity::from_bytes(&identity.to_bytes().unwrap()).unwrap();
        assert_eq!(identity, decoded);
    }

    #[test]
    fn test_first_writer_wins() {
        let caches = caches(100);
        assert!(!caches.features.lookup_and_put(ObjectIdentity::new("GML_1", 100, 26)).unwrap());
        assert!(caches.features.lookup_and_put(ObjectIdentity::new("GML_1", 200, 26)).unwrap());
        assert_eq!(caches.features.surrogate_id("GML_1").unwrap(), Some(100));
        assert_eq!(caches.features.len(), 1);
    }

    #[test]
    fn test_keyspaces_are_disjoint() {
        let caches = caches(100);
        caches.features.lookup_and_put(ObjectIdentity::new("X", 1, 26)).unwrap();
        assert!(!caches.geometries.lookup_and_put(ObjectIdentity::new("X", 9, 0)).unwrap());
        assert_eq!(caches.geometries.surrogate_id("X").unwrap(), Some(9));
    }

    #[test]
    fn test_drain_keeps_identities_reachable() {
        let caches = caches(8);
        for i in 0..50 {
            let present = caches
                .features
                .lookup_and_put(ObjectIdentity::new(format!("GML_{i}"), i, 26))
                .unwrap();
            assert!(!present);
        }

        assert!(caches.features.hot_len() <= 9);
        assert_eq!(caches.features.len(), 50);
        for i in 0..50 {
            assert_eq!(caches.features.surrogate_id(&format!("GML_{i}")).unwrap(), Some(i));
            assert!(caches
                .features
                .lookup_and_put(ObjectIdentity::new(format!("GML_{i}"), -1, 26))
                .unwrap());
        }
    }

    #[test]
    fn test_concurrent_claims() {
        let caches = Arc::new(caches(16));
        let winners: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|worker| {
                    let caches = caches.clone();
                    scope.spawn(move || {
                        (0..200)
                            .filter(|i| {
                                !caches
                                    .features
                                    .lookup_and_put(ObjectIdentity::new(format!("GML_{i}"), worker, 26))
                                    .unwrap()
                            })
                            .count()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });

        assert_eq!(winners, 200);
        assert_eq!(caches.features.len(), 200);
    }

    #[test]
    fn test_on_disk_spill() {
        let dir = tempfile::tempdir().unwrap();
        let config = IdentityCacheConfig::default()
            .with_hot_capacity(1)
            .with_spill(SpillConfig::at(dir.path().join("spill")));

        let caches = IdentityCaches::open(&config).unwrap();
        for i in 0..10 {
            caches.features.lookup_and_put(ObjectIdentity::new(format!("G{i}"), i, 26)).unwrap();
        }
        caches.flush().unwrap();

        assert_eq!(caches.features.len(), 10);
        assert_eq!(
            caches.features.get("G0").unwrap(),
            Some(ObjectIdentity::new("G0", 0, 26))
        );
    }
}
