use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::GeoPoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PackageStatus {
    Pending,
    Assigned,
    PickedUp,
    InTransit,
    OutForDelivery,
    Delivered,
    FailedDelivery,
    Cancelled,
}

impl PackageStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PackageStatus::Delivered | PackageStatus::FailedDelivery | PackageStatus::Cancelled
        )
    }

    /// Exhaustive transition table. A request for the current status is not a
    /// transition; callers treat it as an idempotent no-op before consulting
    /// this table.
    pub fn can_transition_to(self, target: PackageStatus) -> bool {
        use PackageStatus::*;

        if self.is_terminal() {
            return false;
        }

        match (self, target) {
            // Any non-terminal state may be cancelled or fail in the field.
            (_, Cancelled) | (_, FailedDelivery) => true,
            (Pending, Assigned) => true,
            // Unassignment returns the package to the open pool.
            (Assigned, Pending) => true,
            (Assigned, PickedUp) => true,
            (PickedUp, InTransit) => true,
            (InTransit, OutForDelivery) => true,
            (OutForDelivery, Delivered) => true,
            _ => false,
        }
    }

    /// Statuses that are only reachable through the verification protocol,
    /// never via a plain status update.
    pub fn requires_verification_gate(self) -> bool {
        matches!(self, PackageStatus::Delivered | PackageStatus::FailedDelivery)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PackageStatus::Pending => "PENDING",
            PackageStatus::Assigned => "ASSIGNED",
            PackageStatus::PickedUp => "PICKED_UP",
            PackageStatus::InTransit => "IN_TRANSIT",
            PackageStatus::OutForDelivery => "OUT_FOR_DELIVERY",
            PackageStatus::Delivered => "DELIVERED",
            PackageStatus::FailedDelivery => "FAILED_DELIVERY",
            PackageStatus::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for PackageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceType {
    SameDay,
    Overnight,
    Economy,
    Urgent,
}

/// One of the two storage records projecting the same physical package.
/// The booking view is created at quote time, the shipment view at intake;
/// both share the tracking number and must agree on status and driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageView {
    pub tracking_number: String,
    pub status: PackageStatus,
    pub pickup_address: String,
    pub pickup_coordinates: Option<GeoPoint>,
    pub delivery_address: String,
    pub delivery_coordinates: Option<GeoPoint>,
    pub assigned_driver_id: Option<Uuid>,
    pub weight_kg: Option<f64>,
    pub dimensions: Option<String>,
    pub service_type: ServiceType,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewKind {
    Booking,
    Shipment,
}

/// Append-only audit entry; exactly one per successful status transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingHistoryEntry {
    pub status: PackageStatus,
    pub location: String,
    pub notes: Option<String>,
    pub updated_by: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvidenceKind {
    Signature,
    Photo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvidenceStage {
    Pickup,
    Delivery,
}

/// Opaque reference into the evidence storage collaborator; the core never
/// holds raw bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryEvidence {
    pub id: Uuid,
    pub kind: EvidenceKind,
    pub stage: EvidenceStage,
    pub reference: String,
    pub captured_at: DateTime<Utc>,
}

const CODE_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const CODE_LEN: usize = 6;

/// One-time pickup/delivery verification code with a wall-clock expiry,
/// checked at verification time rather than by an active timer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationCode {
    pub value: String,
    pub expires_at: DateTime<Utc>,
}

impl VerificationCode {
    pub fn generate(ttl: Duration) -> Self {
        let mut rng = rand::thread_rng();
        let value: String = (0..CODE_LEN)
            .map(|_| CODE_CHARS[rng.gen_range(0..CODE_CHARS.len())] as char)
            .collect();

        Self {
            value,
            expires_at: Utc::now() + ttl,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Case-sensitive exact match. A mismatch does not invalidate the code.
    pub fn matches(&self, supplied: &str) -> bool {
        self.value == supplied
    }
}

/// The single read projection external callers see; the two storage views are
/// never exposed separately to customers or drivers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergedPackage {
    pub tracking_number: String,
    pub status: PackageStatus,
    pub pickup_address: String,
    pub pickup_coordinates: Option<GeoPoint>,
    pub delivery_address: String,
    pub delivery_coordinates: Option<GeoPoint>,
    pub assigned_driver_id: Option<Uuid>,
    pub weight_kg: Option<f64>,
    pub dimensions: Option<String>,
    pub service_type: ServiceType,
    pub has_booking_view: bool,
    pub has_shipment_view: bool,
    pub pending_sync: bool,
    /// Echo this back as `expected_version` to make an update conditional.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Generates a fresh `RC`-prefixed tracking number.
pub fn generate_tracking_number() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("RC{}", &suffix[..8].to_uppercase())
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::{generate_tracking_number, PackageStatus, VerificationCode};

    #[test]
    fn happy_path_is_legal() {
        use PackageStatus::*;
        let chain = [Pending, Assigned, PickedUp, InTransit, OutForDelivery, Delivered];
        for pair in chain.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn terminal_states_reject_everything() {
        use PackageStatus::*;
        for terminal in [Delivered, FailedDelivery, Cancelled] {
            for target in [
                Pending,
                Assigned,
                PickedUp,
                InTransit,
                OutForDelivery,
                Delivered,
                FailedDelivery,
                Cancelled,
            ] {
                assert!(!terminal.can_transition_to(target));
            }
        }
    }

    #[test]
    fn skipping_ahead_is_illegal() {
        use PackageStatus::*;
        assert!(!Pending.can_transition_to(PickedUp));
        assert!(!Assigned.can_transition_to(OutForDelivery));
        assert!(!PickedUp.can_transition_to(Delivered));
    }

    #[test]
    fn any_non_terminal_may_cancel_or_fail() {
        use PackageStatus::*;
        for status in [Pending, Assigned, PickedUp, InTransit, OutForDelivery] {
            assert!(status.can_transition_to(Cancelled));
            assert!(status.can_transition_to(FailedDelivery));
        }
    }

    #[test]
    fn unassignment_returns_to_pending() {
        assert!(PackageStatus::Assigned.can_transition_to(PackageStatus::Pending));
        assert!(!PackageStatus::PickedUp.can_transition_to(PackageStatus::Pending));
    }

    #[test]
    fn code_expiry_is_wall_clock() {
        let code = VerificationCode::generate(Duration::minutes(-1));
        assert!(code.is_expired(Utc::now()));

        let fresh = VerificationCode::generate(Duration::minutes(30));
        assert!(!fresh.is_expired(Utc::now()));
    }

    #[test]
    fn code_match_is_case_sensitive() {
        let code = VerificationCode {
            value: "AB12CD".to_string(),
            expires_at: Utc::now() + Duration::hours(1),
        };
        assert!(code.matches("AB12CD"));
        assert!(!code.matches("ab12cd"));
    }

    #[test]
    fn tracking_numbers_carry_the_carrier_prefix() {
        let tn = generate_tracking_number();
        assert!(tn.starts_with("RC"));
        assert_eq!(tn.len(), 10);
    }
}
