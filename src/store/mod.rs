use std::collections::HashSet;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::package::{
    DeliveryEvidence, MergedPackage, PackageStatus, PackageView, TrackingHistoryEntry,
    VerificationCode, ViewKind,
};

/// The durable record for one tracking number: both storage views plus the
/// verification and audit state that belongs to the logical package rather
/// than to either view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageRecord {
    pub booking: Option<PackageView>,
    pub shipment: Option<PackageView>,
    /// Status written by the last successful sync; used to tell a fresh
    /// divergence apart from an incomplete one.
    pub last_synced_status: Option<PackageStatus>,
    /// Set while only one view exists; replayed when the sibling appears.
    pub pending_sync: bool,
    pub pickup_code: Option<VerificationCode>,
    pub delivery_code: Option<VerificationCode>,
    /// Session flags set by a successful code check and consumed by the
    /// matching complete call.
    pub pickup_verified: bool,
    pub delivery_verified: bool,
    pub evidence: Vec<DeliveryEvidence>,
    pub history: Vec<TrackingHistoryEntry>,
    pub version: u64,
}

impl PackageRecord {
    pub fn new(booking: PackageView) -> Self {
        Self {
            booking: Some(booking),
            shipment: None,
            last_synced_status: None,
            pending_sync: true,
            pickup_code: None,
            delivery_code: None,
            pickup_verified: false,
            delivery_verified: false,
            evidence: Vec::new(),
            history: Vec::new(),
            version: 0,
        }
    }

    /// The booking view is canonical when both exist; a single-view record is
    /// valid and its one view is canonical.
    pub fn canonical_view(&self) -> Option<&PackageView> {
        self.booking.as_ref().or(self.shipment.as_ref())
    }

    pub fn view(&self, kind: ViewKind) -> Option<&PackageView> {
        match kind {
            ViewKind::Booking => self.booking.as_ref(),
            ViewKind::Shipment => self.shipment.as_ref(),
        }
    }

    pub fn view_mut(&mut self, kind: ViewKind) -> Option<&mut PackageView> {
        match kind {
            ViewKind::Booking => self.booking.as_mut(),
            ViewKind::Shipment => self.shipment.as_mut(),
        }
    }

    pub fn status(&self) -> Option<PackageStatus> {
        self.canonical_view().map(|v| v.status)
    }

    pub fn assigned_driver_id(&self) -> Option<Uuid> {
        self.canonical_view().and_then(|v| v.assigned_driver_id)
    }

    /// Both views present with unequal statuses. Surfaced, never auto-merged.
    pub fn divergence(&self) -> Option<(PackageStatus, PackageStatus)> {
        match (&self.booking, &self.shipment) {
            (Some(b), Some(s)) if b.status != s.status => Some((b.status, s.status)),
            _ => None,
        }
    }

    pub fn for_each_view_mut(&mut self, mut f: impl FnMut(&mut PackageView)) {
        if let Some(view) = self.booking.as_mut() {
            f(view);
        }
        if let Some(view) = self.shipment.as_mut() {
            f(view);
        }
    }

    pub fn merged(&self) -> Option<MergedPackage> {
        let view = self.canonical_view()?;
        Some(MergedPackage {
            tracking_number: view.tracking_number.clone(),
            status: view.status,
            pickup_address: view.pickup_address.clone(),
            pickup_coordinates: view.pickup_coordinates,
            delivery_address: view.delivery_address.clone(),
            delivery_coordinates: view.delivery_coordinates,
            assigned_driver_id: view.assigned_driver_id,
            weight_kg: view.weight_kg,
            dimensions: view.dimensions.clone(),
            service_type: view.service_type,
            has_booking_view: self.booking.is_some(),
            has_shipment_view: self.shipment.is_some(),
            pending_sync: self.pending_sync,
            version: self.version,
            created_at: view.created_at,
            updated_at: view.updated_at,
        })
    }
}

/// In-process source of truth: package records by tracking number plus a
/// driver-assignment index answering "driver X's open work" without a scan.
pub struct PackageStore {
    records: DashMap<String, PackageRecord>,
    driver_index: DashMap<Uuid, HashSet<String>>,
}

impl PackageStore {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            driver_index: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, tracking_number: &str) -> bool {
        self.records.contains_key(tracking_number)
    }

    pub fn insert(&self, record: PackageRecord) -> Result<(), AppError> {
        let Some(tracking_number) = record.canonical_view().map(|v| v.tracking_number.clone())
        else {
            return Err(AppError::Internal("record has no view".to_string()));
        };

        if self.records.contains_key(&tracking_number) {
            return Err(AppError::BadRequest(format!(
                "package {tracking_number} already exists"
            )));
        }

        self.records.insert(tracking_number, record);
        Ok(())
    }

    /// Point-in-time snapshot; never hands out a live reference.
    pub fn get(&self, tracking_number: &str) -> Option<PackageRecord> {
        self.records
            .get(tracking_number)
            .map(|entry| entry.value().clone())
    }

    pub fn merged(&self, tracking_number: &str) -> Result<MergedPackage, AppError> {
        self.get(tracking_number)
            .and_then(|record| record.merged())
            .ok_or_else(|| AppError::NotFound(format!("package {tracking_number} not found")))
    }

    pub fn history(&self, tracking_number: &str) -> Result<Vec<TrackingHistoryEntry>, AppError> {
        self.get(tracking_number)
            .map(|record| record.history)
            .ok_or_else(|| AppError::NotFound(format!("package {tracking_number} not found")))
    }

    /// Serialized mutation of one record. The closure works on a copy and the
    /// copy is committed only on `Ok`, so a failing operation leaves the
    /// record byte-for-byte untouched. The entry guard serializes concurrent
    /// mutations of the same tracking number.
    pub fn update<T>(
        &self,
        tracking_number: &str,
        f: impl FnOnce(&mut PackageRecord) -> Result<T, AppError>,
    ) -> Result<T, AppError> {
        self.commit(tracking_number, None, f)
    }

    /// Optimistic variant for callers that read a snapshot first: fails with
    /// `ConcurrentModification` when the record moved under them.
    pub fn update_checked<T>(
        &self,
        tracking_number: &str,
        expected_version: u64,
        f: impl FnOnce(&mut PackageRecord) -> Result<T, AppError>,
    ) -> Result<T, AppError> {
        self.commit(tracking_number, Some(expected_version), f)
    }

    /// The working copy already carries the bumped version, so anything the
    /// closure builds from the record reports the committed version.
    fn commit<T>(
        &self,
        tracking_number: &str,
        expected_version: Option<u64>,
        f: impl FnOnce(&mut PackageRecord) -> Result<T, AppError>,
    ) -> Result<T, AppError> {
        let mut entry = self
            .records
            .get_mut(tracking_number)
            .ok_or_else(|| AppError::NotFound(format!("package {tracking_number} not found")))?;

        if let Some(expected) = expected_version {
            if entry.version != expected {
                return Err(AppError::ConcurrentModification);
            }
        }

        let mut working = entry.value().clone();
        working.version += 1;
        let out = f(&mut working)?;
        *entry.value_mut() = working;
        Ok(out)
    }

    pub fn index_assignment(&self, driver_id: Uuid, tracking_number: &str) {
        self.driver_index
            .entry(driver_id)
            .or_default()
            .insert(tracking_number.to_string());
    }

    pub fn unindex_assignment(&self, driver_id: Uuid, tracking_number: &str) {
        if let Some(mut set) = self.driver_index.get_mut(&driver_id) {
            set.remove(tracking_number);
        }
    }

    /// Snapshots of the driver's indexed packages, in O(assigned set).
    pub fn driver_packages(&self, driver_id: Uuid) -> Vec<PackageRecord> {
        let Some(set) = self.driver_index.get(&driver_id) else {
            return Vec::new();
        };

        set.iter()
            .filter_map(|tracking_number| self.get(tracking_number))
            .collect()
    }

    pub fn snapshot_all(&self) -> Vec<PackageRecord> {
        self.records
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn count_by_status(&self, status: PackageStatus) -> usize {
        self.records
            .iter()
            .filter(|entry| entry.value().status() == Some(status))
            .count()
    }
}

impl Default for PackageStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{PackageRecord, PackageStore};
    use crate::error::AppError;
    use crate::models::package::{PackageStatus, PackageView, ServiceType};

    fn view(tn: &str) -> PackageView {
        PackageView {
            tracking_number: tn.to_string(),
            status: PackageStatus::Pending,
            pickup_address: "12 Main Rd, Johannesburg".to_string(),
            pickup_coordinates: None,
            delivery_address: "5 Church St, Pretoria".to_string(),
            delivery_coordinates: None,
            assigned_driver_id: None,
            weight_kg: Some(2.5),
            dimensions: None,
            service_type: ServiceType::Overnight,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn failed_update_leaves_record_untouched() {
        let store = PackageStore::new();
        store.insert(PackageRecord::new(view("RC0000TEST"))).unwrap();

        let result: Result<(), AppError> = store.update("RC0000TEST", |record| {
            record.booking.as_mut().unwrap().status = PackageStatus::Delivered;
            Err(AppError::Internal("boom".to_string()))
        });
        assert!(result.is_err());

        let record = store.get("RC0000TEST").unwrap();
        assert_eq!(record.status(), Some(PackageStatus::Pending));
        assert_eq!(record.version, 0);
    }

    #[test]
    fn successful_update_bumps_version() {
        let store = PackageStore::new();
        store.insert(PackageRecord::new(view("RC0000TEST"))).unwrap();

        store
            .update("RC0000TEST", |record| {
                record.booking.as_mut().unwrap().status = PackageStatus::Assigned;
                Ok(())
            })
            .unwrap();

        let record = store.get("RC0000TEST").unwrap();
        assert_eq!(record.status(), Some(PackageStatus::Assigned));
        assert_eq!(record.version, 1);
    }

    #[test]
    fn stale_version_is_rejected() {
        let store = PackageStore::new();
        store.insert(PackageRecord::new(view("RC0000TEST"))).unwrap();

        store.update("RC0000TEST", |_| Ok(())).unwrap();

        let result = store.update_checked("RC0000TEST", 0, |_| Ok(()));
        assert!(matches!(result, Err(AppError::ConcurrentModification)));
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let store = PackageStore::new();
        store.insert(PackageRecord::new(view("RC0000TEST"))).unwrap();
        assert!(store.insert(PackageRecord::new(view("RC0000TEST"))).is_err());
    }

    #[test]
    fn driver_index_round_trip() {
        let store = PackageStore::new();
        store.insert(PackageRecord::new(view("RC0000TEST"))).unwrap();

        let driver = uuid::Uuid::new_v4();
        store.index_assignment(driver, "RC0000TEST");
        assert_eq!(store.driver_packages(driver).len(), 1);

        store.unindex_assignment(driver, "RC0000TEST");
        assert!(store.driver_packages(driver).is_empty());
    }
}
