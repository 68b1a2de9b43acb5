use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::engine::sync;
use crate::engine::transitions::{apply_transition, TransitionGate};
use crate::engine::verification::issue_codes;
use crate::engine::workboard;
use crate::error::AppError;
use crate::models::package::{
    generate_tracking_number, MergedPackage, PackageStatus, PackageView, ServiceType,
    TrackingHistoryEntry, ViewKind,
};
use crate::state::AppState;
use crate::store::PackageRecord;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/packages", post(create_package).get(list_packages))
        .route("/packages/stats", get(package_stats))
        .route("/packages/:tracking_number", get(get_package))
        .route("/packages/:tracking_number/history", get(get_history))
        .route("/packages/:tracking_number/status", post(update_status))
        .route("/packages/:tracking_number/assign", post(assign_driver))
        .route("/packages/:tracking_number/unassign", post(unassign_driver))
        .route(
            "/packages/:tracking_number/views/:view/status",
            post(set_view_status),
        )
}

#[derive(Deserialize)]
pub struct CreatePackageRequest {
    pub pickup_address: String,
    pub delivery_address: String,
    pub weight_kg: Option<f64>,
    pub dimensions: Option<String>,
    pub service_type: ServiceType,
}

#[derive(Serialize)]
pub struct CreatePackageResponse {
    pub package: MergedPackage,
    /// Handed to the sender and recipient out of band; the driver must read
    /// them back at the doorstep.
    pub pickup_code: String,
    pub delivery_code: String,
}

async fn create_package(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreatePackageRequest>,
) -> Result<Json<CreatePackageResponse>, AppError> {
    if payload.pickup_address.trim().is_empty() || payload.delivery_address.trim().is_empty() {
        return Err(AppError::BadRequest(
            "pickup and delivery addresses are required".to_string(),
        ));
    }

    // Geocoding is best-effort; an unresolved address never blocks intake.
    let pickup_coordinates = state.geocoder.resolve(&payload.pickup_address);
    let delivery_coordinates = state.geocoder.resolve(&payload.delivery_address);

    let now = Utc::now();
    let tracking_number = generate_tracking_number();

    let mut record = PackageRecord::new(PackageView {
        tracking_number: tracking_number.clone(),
        status: PackageStatus::Pending,
        pickup_address: payload.pickup_address.trim().to_string(),
        pickup_coordinates,
        delivery_address: payload.delivery_address.trim().to_string(),
        delivery_coordinates,
        assigned_driver_id: None,
        weight_kg: payload.weight_kg,
        dimensions: payload.dimensions,
        service_type: payload.service_type,
        created_at: now,
        updated_at: now,
    });
    issue_codes(&mut record, state.config.code_ttl_minutes);

    let pickup_code = record
        .pickup_code
        .as_ref()
        .map(|c| c.value.clone())
        .unwrap_or_default();
    let delivery_code = record
        .delivery_code
        .as_ref()
        .map(|c| c.value.clone())
        .unwrap_or_default();

    let package = record
        .merged()
        .ok_or_else(|| AppError::Internal("record has no view".to_string()))?;
    state.packages.insert(record)?;
    state.metrics.open_packages.inc();

    tracing::info!(tracking_number, "package created");

    Ok(Json(CreatePackageResponse {
        package,
        pickup_code,
        delivery_code,
    }))
}

#[derive(Deserialize)]
pub struct ListQuery {
    pub status: Option<PackageStatus>,
}

async fn list_packages(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Json<Vec<MergedPackage>> {
    let packages = state
        .packages
        .snapshot_all()
        .iter()
        .filter_map(|record| record.merged())
        .filter(|merged| query.status.is_none_or(|status| merged.status == status))
        .collect();

    Json(packages)
}

async fn package_stats(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let store = &state.packages;
    Json(json!({
        "total": store.len(),
        "pending": store.count_by_status(PackageStatus::Pending),
        "assigned": store.count_by_status(PackageStatus::Assigned),
        "picked_up": store.count_by_status(PackageStatus::PickedUp),
        "in_transit": store.count_by_status(PackageStatus::InTransit),
        "out_for_delivery": store.count_by_status(PackageStatus::OutForDelivery),
        "delivered": store.count_by_status(PackageStatus::Delivered),
        "failed_delivery": store.count_by_status(PackageStatus::FailedDelivery),
        "cancelled": store.count_by_status(PackageStatus::Cancelled),
    }))
}

async fn get_package(
    State(state): State<Arc<AppState>>,
    Path(tracking_number): Path<String>,
) -> Result<Json<MergedPackage>, AppError> {
    Ok(Json(state.packages.merged(&tracking_number)?))
}

async fn get_history(
    State(state): State<Arc<AppState>>,
    Path(tracking_number): Path<String>,
) -> Result<Json<Vec<TrackingHistoryEntry>>, AppError> {
    Ok(Json(state.packages.history(&tracking_number)?))
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: PackageStatus,
    pub location: String,
    pub notes: Option<String>,
    pub actor: Option<String>,
    /// When present, the update only applies if the record is still at this
    /// version; a stale value gets `409 Conflict`.
    pub expected_version: Option<u64>,
}

/// Admin status update. Gated targets (`DELIVERED`, `FAILED_DELIVERY`) are
/// refused here; only the verification protocol may reach them.
async fn update_status(
    State(state): State<Arc<AppState>>,
    Path(tracking_number): Path<String>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<Json<MergedPackage>, AppError> {
    let actor = payload.actor.unwrap_or_else(|| "admin".to_string());

    let mutation = |record: &mut PackageRecord| {
        let prior_driver = record.assigned_driver_id();
        let entry = apply_transition(
            record,
            payload.status,
            &payload.location,
            payload.notes.clone(),
            &actor,
            TransitionGate::Direct,
        )?;

        // A return to the pool or a terminal status ends the driver's claim
        // on this package; the index entry goes with it.
        let released = match &entry {
            Some(e) if e.status == PackageStatus::Pending || e.status.is_terminal() => {
                prior_driver
            }
            _ => None,
        };

        let merged = record
            .merged()
            .ok_or_else(|| AppError::Internal("record has no view".to_string()))?;
        Ok((merged, entry, released))
    };

    let (merged, entry, released) = match payload.expected_version {
        Some(version) => {
            sync::apply_and_sync_checked(&state.packages, &tracking_number, version, mutation)
        }
        None => sync::apply_and_sync(&state.packages, &tracking_number, mutation),
    }
    .inspect_err(|err| state.track_sync_conflict(err))?;

    if let Some(driver_id) = released {
        state.packages.unindex_assignment(driver_id, &tracking_number);
    }

    // An idempotent repeat produces no entry and no event.
    if let Some(entry) = &entry {
        state.record_transition(&tracking_number, entry);
    }

    Ok(Json(merged))
}

#[derive(Deserialize)]
pub struct AssignRequest {
    pub driver_id: Uuid,
    pub actor: Option<String>,
}

async fn assign_driver(
    State(state): State<Arc<AppState>>,
    Path(tracking_number): Path<String>,
    Json(payload): Json<AssignRequest>,
) -> Result<Json<MergedPackage>, AppError> {
    let actor = payload.actor.unwrap_or_else(|| "dispatcher".to_string());
    let merged = workboard::assign_to_driver(&state, payload.driver_id, &tracking_number, &actor)?;
    Ok(Json(merged))
}

#[derive(Deserialize)]
pub struct UnassignRequest {
    pub actor: Option<String>,
}

async fn unassign_driver(
    State(state): State<Arc<AppState>>,
    Path(tracking_number): Path<String>,
    Json(payload): Json<UnassignRequest>,
) -> Result<Json<MergedPackage>, AppError> {
    let actor = payload.actor.unwrap_or_else(|| "dispatcher".to_string());
    let merged = workboard::unassign_from_driver(&state, &tracking_number, &actor)?;
    Ok(Json(merged))
}

#[derive(Deserialize)]
pub struct SetViewStatusRequest {
    pub status: PackageStatus,
}

/// Legacy escape hatch that writes one view directly, bypassing the
/// synchronizer. This is how the two views diverge in the wild; the next
/// synchronized mutation will surface the divergence as a conflict.
async fn set_view_status(
    State(state): State<Arc<AppState>>,
    Path((tracking_number, view)): Path<(String, ViewKind)>,
    Json(payload): Json<SetViewStatusRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.packages.update(&tracking_number, |record| {
        let target = record
            .view_mut(view)
            .ok_or_else(|| AppError::NotFound(format!("{view:?} view does not exist")))?;
        target.status = payload.status;
        target.updated_at = Utc::now();
        Ok(())
    })?;

    tracing::warn!(
        tracking_number,
        ?view,
        status = %payload.status,
        "view written directly, bypassing sync"
    );

    Ok(Json(json!({ "view": view, "status": payload.status })))
}
