//! The booking/shipment split is a historical artifact of two intake paths;
//! this module is the single place that keeps the pair agreeing on status,
//! driver, and timestamps.

use crate::error::AppError;
use crate::store::{PackageRecord, PackageStore};

/// Applies `mutation` to the record and propagates the canonical result into
/// every present view, so external readers never observe the views apart.
///
/// If the two views already disagree (a legacy path wrote one of them
/// directly), the mutation is refused with `SyncConflict` for operator
/// review; the correct status is not guessable from the conflicting pair.
pub fn apply_and_sync<T>(
    store: &PackageStore,
    tracking_number: &str,
    mutation: impl FnOnce(&mut PackageRecord) -> Result<T, AppError>,
) -> Result<T, AppError> {
    store.update(tracking_number, |record| {
        check_and_run(tracking_number, record, mutation)
    })
}

/// `apply_and_sync` for callers that read a snapshot first: the mutation is
/// refused with `ConcurrentModification` when the record's version moved past
/// `expected_version` in the meantime.
pub fn apply_and_sync_checked<T>(
    store: &PackageStore,
    tracking_number: &str,
    expected_version: u64,
    mutation: impl FnOnce(&mut PackageRecord) -> Result<T, AppError>,
) -> Result<T, AppError> {
    store.update_checked(tracking_number, expected_version, |record| {
        check_and_run(tracking_number, record, mutation)
    })
}

fn check_and_run<T>(
    tracking_number: &str,
    record: &mut PackageRecord,
    mutation: impl FnOnce(&mut PackageRecord) -> Result<T, AppError>,
) -> Result<T, AppError> {
    if let Some((booking, shipment)) = record.divergence() {
        return Err(AppError::SyncConflict {
            tracking_number: tracking_number.to_string(),
            booking,
            shipment,
        });
    }

    let out = mutation(record)?;
    propagate(record);
    Ok(out)
}

/// Copies status, driver, and timestamp from the canonical view into the
/// sibling and records the sync watermark. Harmless to call twice.
pub fn propagate(record: &mut PackageRecord) {
    let Some(canonical) = record.canonical_view().cloned() else {
        return;
    };

    record.for_each_view_mut(|view| {
        view.status = canonical.status;
        view.assigned_driver_id = canonical.assigned_driver_id;
        view.updated_at = canonical.updated_at;
    });

    record.last_synced_status = Some(canonical.status);
    record.pending_sync = record.booking.is_none() || record.shipment.is_none();
}

/// Creates the shipment view from the booking at intake time, replaying any
/// deferred mutations the booking accumulated while it lived alone. A record
/// that already has both views just gets re-propagated, so the call is
/// idempotent.
pub fn ensure_shipment_view(record: &mut PackageRecord) -> Result<(), AppError> {
    if record.shipment.is_none() {
        let booking = record
            .booking
            .as_ref()
            .ok_or_else(|| AppError::Internal("record has no view".to_string()))?;
        record.shipment = Some(booking.clone());
    }

    propagate(record);
    Ok(())
}
