use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, patch, post};
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::dispatch;
use crate::engine::workboard::{self, ActionOutcome};
use crate::error::AppError;
use crate::geo::GeoPoint;
use crate::models::driver::Driver;
use crate::models::work_item::{AvailablePackage, WorkItem, Workboard};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/drivers", post(create_driver).get(list_drivers))
        .route("/drivers/:id", get(get_driver))
        .route("/drivers/:id/location", patch(update_location))
        .route("/drivers/:id/workboard", get(get_workboard))
        .route("/drivers/:id/workboard/next", get(get_next_recommended))
        .route("/drivers/:id/available", get(get_available))
        .route(
            "/drivers/:id/packages/:tracking_number/accept",
            post(accept_package),
        )
        .route(
            "/drivers/:id/packages/:tracking_number/pickup/initiate",
            post(initiate_pickup),
        )
        .route(
            "/drivers/:id/packages/:tracking_number/pickup/complete",
            post(complete_pickup),
        )
        .route(
            "/drivers/:id/packages/:tracking_number/out-for-delivery",
            post(mark_out_for_delivery),
        )
        .route(
            "/drivers/:id/packages/:tracking_number/delivery/verify",
            post(verify_delivery_code),
        )
        .route(
            "/drivers/:id/packages/:tracking_number/delivery/complete",
            post(complete_delivery),
        )
        .route(
            "/drivers/:id/packages/:tracking_number/fail",
            post(mark_failed),
        )
}

#[derive(Deserialize)]
pub struct CreateDriverRequest {
    pub name: String,
    pub location: Option<GeoPoint>,
}

async fn create_driver(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateDriverRequest>,
) -> Result<Json<Driver>, AppError> {
    if payload.name.trim().is_empty() {
        return Err(AppError::BadRequest("name cannot be empty".to_string()));
    }

    let driver = Driver {
        id: Uuid::new_v4(),
        name: payload.name,
        location: payload.location,
        updated_at: Utc::now(),
    };

    state.drivers.insert(driver.id, driver.clone());
    Ok(Json(driver))
}

async fn list_drivers(State(state): State<Arc<AppState>>) -> Json<Vec<Driver>> {
    let drivers = state
        .drivers
        .iter()
        .map(|entry| entry.value().clone())
        .collect();
    Json(drivers)
}

async fn get_driver(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Driver>, AppError> {
    let driver = state
        .drivers
        .get(&id)
        .ok_or_else(|| AppError::NotFound(format!("driver {id} not found")))?;
    Ok(Json(driver.clone()))
}

#[derive(Deserialize)]
pub struct UpdateLocationRequest {
    pub location: GeoPoint,
}

async fn update_location(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateLocationRequest>,
) -> Result<Json<Driver>, AppError> {
    let mut driver = state
        .drivers
        .get_mut(&id)
        .ok_or_else(|| AppError::NotFound(format!("driver {id} not found")))?;

    driver.location = Some(payload.location);
    driver.updated_at = Utc::now();

    Ok(Json(driver.clone()))
}

fn driver_location(state: &AppState, id: Uuid) -> Result<Option<GeoPoint>, AppError> {
    state
        .drivers
        .get(&id)
        .map(|driver| driver.location)
        .ok_or_else(|| AppError::NotFound(format!("driver {id} not found")))
}

async fn get_workboard(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Workboard>, AppError> {
    let location = driver_location(&state, id)?;
    Ok(Json(dispatch::build_workboard(&state.packages, id, location)))
}

async fn get_next_recommended(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Option<WorkItem>>, AppError> {
    let location = driver_location(&state, id)?;
    Ok(Json(dispatch::next_recommended(&state.packages, id, location)))
}

#[derive(Deserialize)]
pub struct AvailableQuery {
    pub max_distance_km: Option<f64>,
    pub page: Option<usize>,
    pub per_page: Option<usize>,
}

async fn get_available(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<AvailableQuery>,
) -> Result<Json<Vec<AvailablePackage>>, AppError> {
    let location = driver_location(&state, id)?.ok_or_else(|| {
        AppError::BadRequest("driver has no reported location".to_string())
    })?;

    let max_distance_km = query
        .max_distance_km
        .unwrap_or(state.config.default_search_radius_km);
    let page = query.page.unwrap_or(0);
    let per_page = query.per_page.unwrap_or(20).clamp(1, 100);

    Ok(Json(dispatch::available_for_pickup(
        &state.packages,
        &location,
        max_distance_km,
        page,
        per_page,
    )))
}

async fn accept_package(
    State(state): State<Arc<AppState>>,
    Path((id, tracking_number)): Path<(Uuid, String)>,
) -> Json<ActionOutcome> {
    Json(workboard::accept_package(&state, id, &tracking_number))
}

#[derive(Deserialize)]
pub struct CodeRequest {
    pub code: String,
}

async fn initiate_pickup(
    State(state): State<Arc<AppState>>,
    Path((id, tracking_number)): Path<(Uuid, String)>,
    Json(payload): Json<CodeRequest>,
) -> Json<ActionOutcome> {
    Json(workboard::initiate_pickup(
        &state,
        id,
        &tracking_number,
        &payload.code,
    ))
}

#[derive(Deserialize)]
pub struct CompletePickupRequest {
    pub signature: String,
    pub photo: Option<String>,
    pub notes: Option<String>,
}

async fn complete_pickup(
    State(state): State<Arc<AppState>>,
    Path((id, tracking_number)): Path<(Uuid, String)>,
    Json(payload): Json<CompletePickupRequest>,
) -> Json<ActionOutcome> {
    Json(workboard::complete_pickup(
        &state,
        id,
        &tracking_number,
        &payload.signature,
        payload.photo.as_deref().map(str::as_bytes),
        payload.notes,
    ))
}

#[derive(Deserialize)]
pub struct OutForDeliveryRequest {
    pub notes: Option<String>,
}

async fn mark_out_for_delivery(
    State(state): State<Arc<AppState>>,
    Path((id, tracking_number)): Path<(Uuid, String)>,
    Json(payload): Json<OutForDeliveryRequest>,
) -> Json<ActionOutcome> {
    Json(workboard::mark_out_for_delivery(
        &state,
        id,
        &tracking_number,
        payload.notes,
    ))
}

async fn verify_delivery_code(
    State(state): State<Arc<AppState>>,
    Path((id, tracking_number)): Path<(Uuid, String)>,
    Json(payload): Json<CodeRequest>,
) -> Json<ActionOutcome> {
    Json(workboard::verify_delivery_code(
        &state,
        id,
        &tracking_number,
        &payload.code,
    ))
}

#[derive(Deserialize)]
pub struct CompleteDeliveryRequest {
    pub recipient_name: String,
    pub recipient_id_number: Option<String>,
    pub signature: String,
    pub photo: Option<String>,
    pub notes: Option<String>,
}

async fn complete_delivery(
    State(state): State<Arc<AppState>>,
    Path((id, tracking_number)): Path<(Uuid, String)>,
    Json(payload): Json<CompleteDeliveryRequest>,
) -> Json<ActionOutcome> {
    Json(workboard::complete_delivery(
        &state,
        id,
        &tracking_number,
        &payload.recipient_name,
        payload.recipient_id_number.as_deref(),
        &payload.signature,
        payload.photo.as_deref().map(str::as_bytes),
        payload.notes,
    ))
}

#[derive(Deserialize)]
pub struct FailDeliveryRequest {
    pub reason: String,
    pub notes: Option<String>,
    pub photo: Option<String>,
}

async fn mark_failed(
    State(state): State<Arc<AppState>>,
    Path((id, tracking_number)): Path<(Uuid, String)>,
    Json(payload): Json<FailDeliveryRequest>,
) -> Json<ActionOutcome> {
    Json(workboard::mark_failed(
        &state,
        id,
        &tracking_number,
        &payload.reason,
        payload.notes,
        payload.photo.as_deref().map(str::as_bytes),
    ))
}
