//! Driver-facing orchestration: each operation checks status and ownership
//! preconditions, delegates to the verification protocol and state machine,
//! and folds any error into a uniform outcome the driver app can render
//! without seeing storage internals.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::sync;
use crate::engine::transitions::{apply_transition, assign_driver, TransitionGate};
use crate::engine::verification;
use crate::error::AppError;
use crate::models::package::{MergedPackage, PackageStatus};
use crate::state::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package: Option<MergedPackage>,
}

impl ActionOutcome {
    fn ok(message: impl Into<String>, package: MergedPackage) -> Self {
        Self {
            success: true,
            message: message.into(),
            package: Some(package),
        }
    }

    fn failed(err: &AppError) -> Self {
        Self {
            success: false,
            message: err.to_string(),
            package: None,
        }
    }
}

fn ensure_driver(state: &AppState, driver_id: Uuid) -> Result<(), AppError> {
    if state.drivers.contains_key(&driver_id) {
        Ok(())
    } else {
        Err(AppError::NotFound(format!("driver {driver_id} not found")))
    }
}

/// Driver accepts an open package. Compare-and-set: one winner per package.
/// Acceptance is also the intake moment for the shipment view.
pub fn accept_package(state: &AppState, driver_id: Uuid, tracking_number: &str) -> ActionOutcome {
    let result = ensure_driver(state, driver_id).and_then(|()| {
        sync::apply_and_sync(&state.packages, tracking_number, |record| {
            let location = record
                .canonical_view()
                .map(|v| v.pickup_address.clone())
                .unwrap_or_default();

            let entry = assign_driver(record, driver_id, &location, &driver_id.to_string())?;
            sync::ensure_shipment_view(record)?;

            let merged = record
                .merged()
                .ok_or_else(|| AppError::Internal("record has no view".to_string()))?;
            Ok((merged, entry))
        })
    });

    match result {
        Ok((merged, entry)) => {
            state.packages.index_assignment(driver_id, tracking_number);
            state
                .metrics
                .assignments_total
                .with_label_values(&["success"])
                .inc();
            state.record_transition(tracking_number, &entry);
            tracing::info!(tracking_number, driver_id = %driver_id, "package accepted");
            ActionOutcome::ok("Package accepted", merged)
        }
        Err(err) => {
            let outcome_label = match &err {
                AppError::AlreadyAssigned => "already_assigned",
                _ => "error",
            };
            state
                .metrics
                .assignments_total
                .with_label_values(&[outcome_label])
                .inc();
            state.track_sync_conflict(&err);
            ActionOutcome::failed(&err)
        }
    }
}

/// Admin-side twin of `accept_package` used by dispatcher assignment.
pub fn assign_to_driver(
    state: &AppState,
    driver_id: Uuid,
    tracking_number: &str,
    actor: &str,
) -> Result<MergedPackage, AppError> {
    ensure_driver(state, driver_id)?;

    let (merged, entry) = sync::apply_and_sync(&state.packages, tracking_number, |record| {
        let location = record
            .canonical_view()
            .map(|v| v.pickup_address.clone())
            .unwrap_or_default();

        let entry = assign_driver(record, driver_id, &location, actor)?;
        sync::ensure_shipment_view(record)?;

        let merged = record
            .merged()
            .ok_or_else(|| AppError::Internal("record has no view".to_string()))?;
        Ok((merged, entry))
    })
    .inspect_err(|err| state.track_sync_conflict(err))?;

    state.packages.index_assignment(driver_id, tracking_number);
    state.record_transition(tracking_number, &entry);
    Ok(merged)
}

pub fn unassign_from_driver(
    state: &AppState,
    tracking_number: &str,
    actor: &str,
) -> Result<MergedPackage, AppError> {
    let (merged, entry, released) =
        sync::apply_and_sync(&state.packages, tracking_number, |record| {
            let location = record
                .canonical_view()
                .map(|v| v.pickup_address.clone())
                .unwrap_or_default();

            let (released, entry) =
                crate::engine::transitions::unassign_driver(record, &location, actor)?;

            let merged = record
                .merged()
                .ok_or_else(|| AppError::Internal("record has no view".to_string()))?;
            Ok((merged, entry, released))
        })
        .inspect_err(|err| state.track_sync_conflict(err))?;

    state.packages.unindex_assignment(released, tracking_number);
    state.record_transition(tracking_number, &entry);
    Ok(merged)
}

pub fn initiate_pickup(
    state: &AppState,
    driver_id: Uuid,
    tracking_number: &str,
    supplied_code: &str,
) -> ActionOutcome {
    let result = ensure_driver(state, driver_id)
        .and_then(|()| verification::initiate_pickup(state, tracking_number, driver_id, supplied_code))
        .and_then(|()| state.packages.merged(tracking_number));

    match result {
        Ok(merged) => ActionOutcome::ok(
            "Pickup code verified; capture signature and photo to complete pickup",
            merged,
        ),
        Err(err) => ActionOutcome::failed(&err),
    }
}

pub fn complete_pickup(
    state: &AppState,
    driver_id: Uuid,
    tracking_number: &str,
    signature: &str,
    photo: Option<&[u8]>,
    notes: Option<String>,
) -> ActionOutcome {
    let result = ensure_driver(state, driver_id).and_then(|()| {
        verification::complete_pickup(state, tracking_number, driver_id, signature, photo, notes)
    });

    match result {
        Ok(merged) => ActionOutcome::ok("Pickup completed", merged),
        Err(err) => ActionOutcome::failed(&err),
    }
}

/// Moves a picked-up package onto the road, stepping through `InTransit`
/// when the driver jumps straight to out-for-delivery.
pub fn mark_out_for_delivery(
    state: &AppState,
    driver_id: Uuid,
    tracking_number: &str,
    notes: Option<String>,
) -> ActionOutcome {
    let result = ensure_driver(state, driver_id).and_then(|()| {
        sync::apply_and_sync(&state.packages, tracking_number, |record| {
            if record.assigned_driver_id() != Some(driver_id) {
                return Err(AppError::BadRequest(
                    "you are not assigned to this package".to_string(),
                ));
            }

            let delivery_address = record
                .canonical_view()
                .map(|v| v.delivery_address.clone())
                .unwrap_or_default();
            let actor = driver_id.to_string();

            let mut entries = Vec::new();
            if record.status() == Some(PackageStatus::PickedUp) {
                if let Some(entry) = apply_transition(
                    record,
                    PackageStatus::InTransit,
                    "In transit",
                    None,
                    &actor,
                    TransitionGate::Direct,
                )? {
                    entries.push(entry);
                }
            }

            if let Some(entry) = apply_transition(
                record,
                PackageStatus::OutForDelivery,
                &delivery_address,
                notes.clone(),
                &actor,
                TransitionGate::Direct,
            )? {
                entries.push(entry);
            }

            let merged = record
                .merged()
                .ok_or_else(|| AppError::Internal("record has no view".to_string()))?;
            Ok((merged, entries))
        })
    });

    match result {
        Ok((merged, entries)) => {
            for entry in &entries {
                state.record_transition(tracking_number, entry);
            }
            ActionOutcome::ok("Package is out for delivery", merged)
        }
        Err(err) => {
            state.track_sync_conflict(&err);
            ActionOutcome::failed(&err)
        }
    }
}

pub fn verify_delivery_code(
    state: &AppState,
    driver_id: Uuid,
    tracking_number: &str,
    supplied_code: &str,
) -> ActionOutcome {
    let result = ensure_driver(state, driver_id)
        .and_then(|()| {
            verification::verify_delivery_code(state, tracking_number, driver_id, supplied_code)
        })
        .and_then(|()| state.packages.merged(tracking_number));

    match result {
        Ok(merged) => ActionOutcome::ok(
            "Delivery code verified; capture recipient details to complete delivery",
            merged,
        ),
        Err(err) => ActionOutcome::failed(&err),
    }
}

#[allow(clippy::too_many_arguments)]
pub fn complete_delivery(
    state: &AppState,
    driver_id: Uuid,
    tracking_number: &str,
    recipient_name: &str,
    recipient_id_number: Option<&str>,
    signature: &str,
    photo: Option<&[u8]>,
    notes: Option<String>,
) -> ActionOutcome {
    let result = ensure_driver(state, driver_id).and_then(|()| {
        verification::complete_delivery(
            state,
            tracking_number,
            driver_id,
            recipient_name,
            recipient_id_number,
            signature,
            photo,
            notes,
        )
    });

    match result {
        Ok(merged) => ActionOutcome::ok("Delivery completed", merged),
        Err(err) => ActionOutcome::failed(&err),
    }
}

pub fn mark_failed(
    state: &AppState,
    driver_id: Uuid,
    tracking_number: &str,
    reason: &str,
    notes: Option<String>,
    photo: Option<&[u8]>,
) -> ActionOutcome {
    let result = ensure_driver(state, driver_id).and_then(|()| {
        verification::mark_failed_delivery(state, tracking_number, driver_id, reason, notes, photo)
    });

    match result {
        Ok(merged) => ActionOutcome::ok("Delivery marked as failed", merged),
        Err(err) => ActionOutcome::failed(&err),
    }
}
