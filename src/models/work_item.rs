use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::GeoPoint;
use crate::models::package::{PackageStatus, ServiceType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkRole {
    Pickup,
    Delivery,
}

/// A single actionable stop on a driver's workboard. Derived on every query,
/// never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub tracking_number: String,
    pub role: WorkRole,
    pub address: String,
    pub coordinates: Option<GeoPoint>,
    pub distance_km: Option<f64>,
    pub estimated_minutes: Option<u32>,
    pub status: PackageStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workboard {
    pub pickups: Vec<WorkItem>,
    pub deliveries: Vec<WorkItem>,
    pub stats: WorkboardStats,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkboardStats {
    pub pickup_count: usize,
    pub delivery_count: usize,
    /// Sum over items with resolved coordinates; unknown distances contribute
    /// nothing rather than zero-as-data.
    pub known_distance_km: f64,
}

/// An unassigned PENDING package offered to a driver within a search radius.
/// Only packages with resolved pickup coordinates qualify.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailablePackage {
    pub tracking_number: String,
    pub pickup_address: String,
    pub coordinates: GeoPoint,
    pub distance_km: f64,
    pub estimated_minutes: u32,
    pub service_type: ServiceType,
    pub created_at: DateTime<Utc>,
}
