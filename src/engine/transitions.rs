use chrono::Utc;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::package::{PackageStatus, TrackingHistoryEntry};
use crate::store::PackageRecord;

/// Whether the caller came through the verification protocol. `Delivered` and
/// `FailedDelivery` are rejected on the direct path regardless of the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionGate {
    Direct,
    Verified,
}

/// Validates and applies one status transition to every present view of the
/// record, appending exactly one history entry. Returns the appended entry,
/// or `None` when the request targeted the current status (idempotent no-op
/// for retried driver-app requests).
pub fn apply_transition(
    record: &mut PackageRecord,
    target: PackageStatus,
    location: &str,
    notes: Option<String>,
    actor: &str,
    gate: TransitionGate,
) -> Result<Option<TrackingHistoryEntry>, AppError> {
    let current = record
        .status()
        .ok_or_else(|| AppError::Internal("package record has no view".to_string()))?;

    if target == current {
        return Ok(None);
    }

    if location.trim().is_empty() {
        return Err(AppError::BadRequest(
            "a location is required for every status update".to_string(),
        ));
    }

    if target.requires_verification_gate() && gate == TransitionGate::Direct {
        return Err(AppError::InvalidTransition {
            current,
            requested: target,
        });
    }

    if !current.can_transition_to(target) {
        return Err(AppError::InvalidTransition {
            current,
            requested: target,
        });
    }

    // ASSIGNED is meaningless without a driver attached.
    if target == PackageStatus::Assigned && record.assigned_driver_id().is_none() {
        return Err(AppError::BadRequest(
            "a package cannot be ASSIGNED without a driver; assign one instead".to_string(),
        ));
    }

    let now = Utc::now();
    record.for_each_view_mut(|view| {
        view.status = target;
        view.updated_at = now;
        // Returning to the open pool always detaches the driver.
        if target == PackageStatus::Pending {
            view.assigned_driver_id = None;
        }
    });

    let entry = TrackingHistoryEntry {
        status: target,
        location: location.trim().to_string(),
        notes,
        updated_by: actor.to_string(),
        timestamp: now,
    };
    record.history.push(entry.clone());

    Ok(Some(entry))
}

/// Compare-and-set driver assignment: succeeds only while the package is
/// `Pending` with no driver, so a race between two accepting drivers has
/// exactly one winner.
pub fn assign_driver(
    record: &mut PackageRecord,
    driver_id: Uuid,
    location: &str,
    actor: &str,
) -> Result<TrackingHistoryEntry, AppError> {
    let current = record
        .status()
        .ok_or_else(|| AppError::Internal("package record has no view".to_string()))?;

    if record.assigned_driver_id().is_some() {
        return Err(AppError::AlreadyAssigned);
    }

    if current != PackageStatus::Pending {
        return Err(AppError::InvalidTransition {
            current,
            requested: PackageStatus::Assigned,
        });
    }

    record.for_each_view_mut(|view| view.assigned_driver_id = Some(driver_id));

    let entry = apply_transition(
        record,
        PackageStatus::Assigned,
        location,
        None,
        actor,
        TransitionGate::Direct,
    )?
    .ok_or_else(|| AppError::Internal("assignment produced no transition".to_string()))?;

    Ok(entry)
}

/// Releases the package back to the open pool.
pub fn unassign_driver(
    record: &mut PackageRecord,
    location: &str,
    actor: &str,
) -> Result<(Uuid, TrackingHistoryEntry), AppError> {
    let driver_id = record
        .assigned_driver_id()
        .ok_or_else(|| AppError::BadRequest("package has no assigned driver".to_string()))?;

    let entry = apply_transition(
        record,
        PackageStatus::Pending,
        location,
        None,
        actor,
        TransitionGate::Direct,
    )?
    .ok_or_else(|| AppError::Internal("unassignment produced no transition".to_string()))?;

    Ok((driver_id, entry))
}
