//! Narrow interfaces to out-of-scope collaborators. The core only ever sees
//! an optional coordinate pair and an opaque evidence reference.

use dashmap::DashMap;
use uuid::Uuid;

use crate::geo::GeoPoint;

/// Address resolution collaborator. `None` means unresolved; the core
/// tolerates that everywhere and never blocks a transition on it.
pub trait Geocoder: Send + Sync {
    fn resolve(&self, address: &str) -> Option<GeoPoint>;
}

/// Geocoder that resolves nothing. Packages created through it simply rank as
/// unknown-distance until an admin supplies coordinates.
pub struct NullGeocoder;

impl Geocoder for NullGeocoder {
    fn resolve(&self, _address: &str) -> Option<GeoPoint> {
        None
    }
}

/// Fixed lookup table, used by tests and local demos.
pub struct StaticGeocoder {
    entries: DashMap<String, GeoPoint>,
}

impl StaticGeocoder {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    pub fn insert(&self, address: &str, point: GeoPoint) {
        self.entries.insert(address.to_string(), point);
    }
}

impl Default for StaticGeocoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Geocoder for StaticGeocoder {
    fn resolve(&self, address: &str) -> Option<GeoPoint> {
        self.entries.get(address).map(|entry| *entry.value())
    }
}

/// Evidence storage collaborator. Returns an opaque reference on success; a
/// failure aborts the whole verification call before anything commits.
pub trait EvidenceStore: Send + Sync {
    fn store(&self, bytes: &[u8], content_type: &str) -> Result<String, String>;
}

/// Keeps evidence in memory and hands back `evidence://` references.
pub struct InMemoryEvidenceStore {
    blobs: DashMap<String, (Vec<u8>, String)>,
}

impl InMemoryEvidenceStore {
    pub fn new() -> Self {
        Self {
            blobs: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

impl Default for InMemoryEvidenceStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EvidenceStore for InMemoryEvidenceStore {
    fn store(&self, bytes: &[u8], content_type: &str) -> Result<String, String> {
        let reference = format!("evidence://{}", Uuid::new_v4());
        self.blobs
            .insert(reference.clone(), (bytes.to_vec(), content_type.to_string()));
        Ok(reference)
    }
}

/// Always fails; lets tests prove that nothing partially commits.
pub struct FailingEvidenceStore;

impl EvidenceStore for FailingEvidenceStore {
    fn store(&self, _bytes: &[u8], _content_type: &str) -> Result<String, String> {
        Err("evidence backend unavailable".to_string())
    }
}
