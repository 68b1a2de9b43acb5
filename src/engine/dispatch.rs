//! Read-only ranking of a driver's open work. Queries take a point-in-time
//! snapshot of the store and never mutate package state, so they are safe to
//! run concurrently with any number of writers; a package assigned a moment
//! ago may still appear available and self-corrects on the next query.

use std::cmp::Ordering;

use uuid::Uuid;

use crate::geo::{haversine_km, travel_minutes, GeoPoint};
use crate::models::package::{PackageStatus, PackageView};
use crate::models::work_item::{AvailablePackage, WorkItem, WorkRole, Workboard, WorkboardStats};
use crate::store::{PackageRecord, PackageStore};

fn role_for(status: PackageStatus) -> Option<WorkRole> {
    match status {
        PackageStatus::Assigned => Some(WorkRole::Pickup),
        PackageStatus::PickedUp | PackageStatus::InTransit | PackageStatus::OutForDelivery => {
            Some(WorkRole::Delivery)
        }
        _ => None,
    }
}

fn work_item(view: &PackageView, role: WorkRole, driver_location: Option<&GeoPoint>) -> WorkItem {
    let (address, coordinates) = match role {
        WorkRole::Pickup => (view.pickup_address.clone(), view.pickup_coordinates),
        WorkRole::Delivery => (view.delivery_address.clone(), view.delivery_coordinates),
    };

    let distance_km = match (driver_location, coordinates.as_ref()) {
        (Some(here), Some(target)) => Some(haversine_km(here, target)),
        _ => None,
    };

    WorkItem {
        tracking_number: view.tracking_number.clone(),
        role,
        address,
        coordinates,
        distance_km,
        estimated_minutes: distance_km.map(travel_minutes),
        status: view.status,
        created_at: view.created_at,
    }
}

/// Known distances ascending; unknown distances after every known one (an
/// unknown distance is not zero), with creation time as the stable tie-break.
fn nearest_effort(a: &WorkItem, b: &WorkItem) -> Ordering {
    match (a.distance_km, b.distance_km) {
        (Some(da), Some(db)) => da
            .total_cmp(&db)
            .then_with(|| a.created_at.cmp(&b.created_at)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.created_at.cmp(&b.created_at),
    }
}

/// Builds the driver's ordered workboard from a store snapshot.
pub fn build_workboard(
    store: &PackageStore,
    driver_id: Uuid,
    driver_location: Option<GeoPoint>,
) -> Workboard {
    let records = store.driver_packages(driver_id);

    let mut pickups = Vec::new();
    let mut deliveries = Vec::new();

    for record in &records {
        let Some(view) = record.canonical_view() else {
            continue;
        };
        if view.assigned_driver_id != Some(driver_id) {
            continue;
        }
        let Some(role) = role_for(view.status) else {
            continue;
        };

        let item = work_item(view, role, driver_location.as_ref());
        match role {
            WorkRole::Pickup => pickups.push(item),
            WorkRole::Delivery => deliveries.push(item),
        }
    }

    pickups.sort_by(nearest_effort);
    deliveries.sort_by(nearest_effort);

    let known_distance_km = pickups
        .iter()
        .chain(deliveries.iter())
        .filter_map(|item| item.distance_km)
        .sum();

    Workboard {
        stats: WorkboardStats {
            pickup_count: pickups.len(),
            delivery_count: deliveries.len(),
            known_distance_km,
        },
        pickups,
        deliveries,
    }
}

/// The single nearest actionable item across both roles. On a distance tie a
/// delivery wins: a package already in hand should be finished before new
/// pickups. `None` when the driver has no open work.
pub fn next_recommended(
    store: &PackageStore,
    driver_id: Uuid,
    driver_location: Option<GeoPoint>,
) -> Option<WorkItem> {
    let board = build_workboard(store, driver_id, driver_location);

    board
        .deliveries
        .into_iter()
        .chain(board.pickups)
        .min_by(|a, b| {
            let by_distance = match (a.distance_km, b.distance_km) {
                (Some(da), Some(db)) => da.total_cmp(&db),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            };
            by_distance
                .then_with(|| role_rank(a.role).cmp(&role_rank(b.role)))
                .then_with(|| a.created_at.cmp(&b.created_at))
        })
}

fn role_rank(role: WorkRole) -> u8 {
    match role {
        WorkRole::Delivery => 0,
        WorkRole::Pickup => 1,
    }
}

/// Unassigned `Pending` packages within `max_distance_km` of the driver,
/// nearest first, paginated. Packages without resolved pickup coordinates are
/// excluded: "nearby" is undecidable for them.
pub fn available_for_pickup(
    store: &PackageStore,
    driver_location: &GeoPoint,
    max_distance_km: f64,
    page: usize,
    per_page: usize,
) -> Vec<AvailablePackage> {
    let mut candidates: Vec<AvailablePackage> = store
        .snapshot_all()
        .iter()
        .filter_map(|record| available_candidate(record, driver_location, max_distance_km))
        .collect();

    candidates.sort_by(|a, b| {
        a.distance_km
            .total_cmp(&b.distance_km)
            .then_with(|| a.created_at.cmp(&b.created_at))
    });

    candidates
        .into_iter()
        .skip(page.saturating_mul(per_page))
        .take(per_page)
        .collect()
}

fn available_candidate(
    record: &PackageRecord,
    driver_location: &GeoPoint,
    max_distance_km: f64,
) -> Option<AvailablePackage> {
    let view = record.canonical_view()?;
    if view.status != PackageStatus::Pending || view.assigned_driver_id.is_some() {
        return None;
    }

    let coordinates = view.pickup_coordinates?;
    let distance_km = haversine_km(driver_location, &coordinates);
    if distance_km > max_distance_km {
        return None;
    }

    Some(AvailablePackage {
        tracking_number: view.tracking_number.clone(),
        pickup_address: view.pickup_address.clone(),
        coordinates,
        distance_km,
        estimated_minutes: travel_minutes(distance_km),
        service_type: view.service_type,
        created_at: view.created_at,
    })
}
