use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::collaborators::{EvidenceStore, Geocoder, InMemoryEvidenceStore, NullGeocoder};
use crate::config::Config;
use crate::error::AppError;
use crate::models::driver::Driver;
use crate::models::package::{PackageStatus, TrackingHistoryEntry};
use crate::observability::metrics::Metrics;
use crate::store::PackageStore;

/// Fire-and-forget event emitted after every committed status transition.
/// Notification delivery failure never rolls the transition back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEvent {
    pub tracking_number: String,
    pub status: PackageStatus,
    pub location: String,
    pub timestamp: DateTime<Utc>,
}

pub struct AppState {
    pub config: Config,
    pub packages: PackageStore,
    pub drivers: DashMap<Uuid, Driver>,
    pub geocoder: Arc<dyn Geocoder>,
    pub evidence: Arc<dyn EvidenceStore>,
    pub status_events_tx: broadcast::Sender<StatusEvent>,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self::with_collaborators(
            config,
            Arc::new(NullGeocoder),
            Arc::new(InMemoryEvidenceStore::new()),
        )
    }

    pub fn with_collaborators(
        config: Config,
        geocoder: Arc<dyn Geocoder>,
        evidence: Arc<dyn EvidenceStore>,
    ) -> Self {
        let (status_events_tx, _unused_rx) = broadcast::channel(config.event_buffer_size);

        Self {
            config,
            packages: PackageStore::new(),
            drivers: DashMap::new(),
            geocoder,
            evidence,
            status_events_tx,
            metrics: Metrics::new(),
        }
    }

    /// Counts surfaced view divergences. Call on any error path that runs
    /// through the synchronizer.
    pub fn track_sync_conflict(&self, err: &AppError) {
        if matches!(err, AppError::SyncConflict { .. }) {
            self.metrics.sync_conflicts_total.inc();
        }
    }

    /// Best-effort notification; a send error only means nobody is listening.
    pub fn emit_status_event(&self, event: StatusEvent) {
        if self.status_events_tx.send(event).is_err() {
            tracing::debug!("no status event subscribers");
        }
    }

    /// Post-commit side effects of a successful transition: metrics bump and
    /// the fire-and-forget notification. Never fails the transition.
    pub fn record_transition(&self, tracking_number: &str, entry: &TrackingHistoryEntry) {
        self.metrics
            .transitions_total
            .with_label_values(&[entry.status.as_str()])
            .inc();
        if entry.status.is_terminal() {
            self.metrics.open_packages.dec();
        }

        tracing::info!(
            tracking_number,
            status = %entry.status,
            location = %entry.location,
            "status transition committed"
        );

        self.emit_status_event(StatusEvent {
            tracking_number: tracking_number.to_string(),
            status: entry.status,
            location: entry.location.clone(),
            timestamp: entry.timestamp,
        });
    }
}
