//! Code, signature, and photo checks gating the `PickedUp`, `Delivered`, and
//! `FailedDelivery` transitions. Every operation here commits all-or-nothing:
//! evidence references and the status change land in the same store commit,
//! and an evidence-storage failure aborts before anything mutates.

use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::engine::sync;
use crate::engine::transitions::{apply_transition, TransitionGate};
use crate::error::AppError;
use crate::models::package::{
    DeliveryEvidence, EvidenceKind, EvidenceStage, MergedPackage, PackageStatus, VerificationCode,
};
use crate::state::AppState;
use crate::store::PackageRecord;

/// Issues fresh pickup and delivery codes on a record, replacing any
/// previous pair. Called at intake.
pub fn issue_codes(record: &mut PackageRecord, ttl_minutes: i64) {
    let ttl = Duration::minutes(ttl_minutes);
    record.pickup_code = Some(VerificationCode::generate(ttl));
    record.delivery_code = Some(VerificationCode::generate(ttl));
}

fn ensure_owned(record: &PackageRecord, driver_id: Uuid) -> Result<(), AppError> {
    match record.assigned_driver_id() {
        Some(assigned) if assigned == driver_id => Ok(()),
        _ => Err(AppError::BadRequest(
            "you are not assigned to this package".to_string(),
        )),
    }
}

/// Expiry wins over mismatch: an expired code is `CodeExpired` even when the
/// supplied value matches. A plain mismatch leaves the code valid so a typo
/// costs the driver nothing but a retry.
fn check_code(code: &Option<VerificationCode>, supplied: &str) -> Result<(), AppError> {
    let code = code
        .as_ref()
        .ok_or_else(|| AppError::BadRequest("no active verification code".to_string()))?;

    if code.is_expired(Utc::now()) {
        return Err(AppError::CodeExpired);
    }
    if !code.matches(supplied) {
        return Err(AppError::CodeMismatch);
    }
    Ok(())
}

fn failure_reason(err: &AppError) -> Option<&'static str> {
    match err {
        AppError::CodeMismatch => Some("code_mismatch"),
        AppError::CodeExpired => Some("code_expired"),
        AppError::EvidenceStorage(_) => Some("evidence_storage"),
        _ => None,
    }
}

fn track_failure(state: &AppState, err: &AppError) {
    state.track_sync_conflict(err);
    if let Some(reason) = failure_reason(err) {
        state
            .metrics
            .verification_failures_total
            .with_label_values(&[reason])
            .inc();
    }
}

fn store_evidence(
    state: &AppState,
    bytes: &[u8],
    content_type: &str,
    kind: EvidenceKind,
    stage: EvidenceStage,
) -> Result<DeliveryEvidence, AppError> {
    let reference = state
        .evidence
        .store(bytes, content_type)
        .map_err(AppError::EvidenceStorage)?;

    Ok(DeliveryEvidence {
        id: Uuid::new_v4(),
        kind,
        stage,
        reference,
        captured_at: Utc::now(),
    })
}

/// Checks the sender's pickup code and opens a verification session for the
/// matching `complete_pickup` call.
pub fn initiate_pickup(
    state: &AppState,
    tracking_number: &str,
    driver_id: Uuid,
    supplied_code: &str,
) -> Result<(), AppError> {
    let result = sync::apply_and_sync(&state.packages, tracking_number, |record| {
        ensure_owned(record, driver_id)?;
        check_code(&record.pickup_code, supplied_code)?;
        record.pickup_verified = true;
        Ok(())
    });

    if let Err(err) = &result {
        track_failure(state, err);
    }
    result
}

/// Records pickup evidence (signature mandatory, photo optional), consumes
/// the code, and moves the package to `PickedUp` in one commit.
pub fn complete_pickup(
    state: &AppState,
    tracking_number: &str,
    driver_id: Uuid,
    signature: &str,
    photo: Option<&[u8]>,
    notes: Option<String>,
) -> Result<MergedPackage, AppError> {
    if signature.trim().is_empty() {
        return Err(AppError::BadRequest("a signature is required".to_string()));
    }

    let result = (|| {
        let mut evidence = vec![store_evidence(
            state,
            signature.as_bytes(),
            "application/octet-stream",
            EvidenceKind::Signature,
            EvidenceStage::Pickup,
        )?];
        if let Some(bytes) = photo {
            evidence.push(store_evidence(
                state,
                bytes,
                "image/jpeg",
                EvidenceKind::Photo,
                EvidenceStage::Pickup,
            )?);
        }

        sync::apply_and_sync(&state.packages, tracking_number, |record| {
            ensure_owned(record, driver_id)?;

            if !record.pickup_verified {
                return Err(AppError::BadRequest(
                    "pickup code has not been verified".to_string(),
                ));
            }

            let location = record
                .canonical_view()
                .map(|v| v.pickup_address.clone())
                .unwrap_or_default();

            let entry = apply_transition(
                record,
                PackageStatus::PickedUp,
                &location,
                notes.clone(),
                &driver_id.to_string(),
                TransitionGate::Direct,
            )?
            .ok_or_else(|| {
                AppError::Internal("pickup completion produced no transition".to_string())
            })?;

            // Single-use: the session flag and the code die with this commit,
            // so a duplicate in-flight complete cannot also succeed.
            record.pickup_verified = false;
            record.pickup_code = None;
            record.evidence.extend(evidence);

            let merged = record
                .merged()
                .ok_or_else(|| AppError::Internal("record has no view".to_string()))?;
            Ok((merged, entry))
        })
    })();

    match result {
        Ok((merged, entry)) => {
            state.record_transition(tracking_number, &entry);
            Ok(merged)
        }
        Err(err) => {
            track_failure(state, &err);
            Err(err)
        }
    }
}

/// Checks the recipient's delivery code ahead of `complete_delivery`.
pub fn verify_delivery_code(
    state: &AppState,
    tracking_number: &str,
    driver_id: Uuid,
    supplied_code: &str,
) -> Result<(), AppError> {
    let result = sync::apply_and_sync(&state.packages, tracking_number, |record| {
        ensure_owned(record, driver_id)?;
        check_code(&record.delivery_code, supplied_code)?;
        record.delivery_verified = true;
        Ok(())
    });

    if let Err(err) = &result {
        track_failure(state, err);
    }
    result
}

/// Completes delivery with recipient details and evidence, moving the package
/// to `Delivered` through the verification gate.
#[allow(clippy::too_many_arguments)]
pub fn complete_delivery(
    state: &AppState,
    tracking_number: &str,
    driver_id: Uuid,
    recipient_name: &str,
    recipient_id_number: Option<&str>,
    signature: &str,
    photo: Option<&[u8]>,
    notes: Option<String>,
) -> Result<MergedPackage, AppError> {
    if recipient_name.trim().is_empty() {
        return Err(AppError::BadRequest(
            "the recipient's name is required".to_string(),
        ));
    }
    if signature.trim().is_empty() {
        return Err(AppError::BadRequest("a signature is required".to_string()));
    }

    let result = (|| {
        let mut evidence = vec![store_evidence(
            state,
            signature.as_bytes(),
            "application/octet-stream",
            EvidenceKind::Signature,
            EvidenceStage::Delivery,
        )?];
        if let Some(bytes) = photo {
            evidence.push(store_evidence(
                state,
                bytes,
                "image/jpeg",
                EvidenceKind::Photo,
                EvidenceStage::Delivery,
            )?);
        }

        let mut delivery_notes = format!("Received by {}", recipient_name.trim());
        if let Some(id_number) = recipient_id_number {
            delivery_notes.push_str(&format!(" (ID {})", id_number.trim()));
        }
        if let Some(extra) = &notes {
            delivery_notes.push_str("; ");
            delivery_notes.push_str(extra);
        }

        sync::apply_and_sync(&state.packages, tracking_number, |record| {
            ensure_owned(record, driver_id)?;

            if !record.delivery_verified {
                return Err(AppError::BadRequest(
                    "delivery code has not been verified".to_string(),
                ));
            }

            let location = record
                .canonical_view()
                .map(|v| v.delivery_address.clone())
                .unwrap_or_default();

            let entry = apply_transition(
                record,
                PackageStatus::Delivered,
                &location,
                Some(delivery_notes.clone()),
                &driver_id.to_string(),
                TransitionGate::Verified,
            )?
            .ok_or_else(|| {
                AppError::Internal("delivery completion produced no transition".to_string())
            })?;

            record.delivery_verified = false;
            record.delivery_code = None;
            record.evidence.extend(evidence);

            let merged = record
                .merged()
                .ok_or_else(|| AppError::Internal("record has no view".to_string()))?;
            Ok((merged, entry))
        })
    })();

    match result {
        Ok((merged, entry)) => {
            state.packages.unindex_assignment(driver_id, tracking_number);
            state.record_transition(tracking_number, &entry);
            Ok(merged)
        }
        Err(err) => {
            track_failure(state, &err);
            Err(err)
        }
    }
}

/// Failure does not require recipient proof: no code, but a mandatory reason.
pub fn mark_failed_delivery(
    state: &AppState,
    tracking_number: &str,
    driver_id: Uuid,
    reason: &str,
    notes: Option<String>,
    photo: Option<&[u8]>,
) -> Result<MergedPackage, AppError> {
    if reason.trim().is_empty() {
        return Err(AppError::BadRequest(
            "a failure reason is required".to_string(),
        ));
    }

    let result = (|| {
        let mut evidence = Vec::new();
        if let Some(bytes) = photo {
            evidence.push(store_evidence(
                state,
                bytes,
                "image/jpeg",
                EvidenceKind::Photo,
                EvidenceStage::Delivery,
            )?);
        }

        let mut failure_notes = reason.trim().to_string();
        if let Some(extra) = &notes {
            failure_notes.push_str("; ");
            failure_notes.push_str(extra);
        }

        sync::apply_and_sync(&state.packages, tracking_number, |record| {
            ensure_owned(record, driver_id)?;

            let location = record
                .canonical_view()
                .map(|v| v.delivery_address.clone())
                .unwrap_or_default();

            let entry = apply_transition(
                record,
                PackageStatus::FailedDelivery,
                &location,
                Some(failure_notes.clone()),
                &driver_id.to_string(),
                TransitionGate::Verified,
            )?
            .ok_or_else(|| {
                AppError::Internal("failure marking produced no transition".to_string())
            })?;

            record.pickup_verified = false;
            record.delivery_verified = false;
            record.pickup_code = None;
            record.delivery_code = None;
            record.evidence.extend(evidence);

            let merged = record
                .merged()
                .ok_or_else(|| AppError::Internal("record has no view".to_string()))?;
            Ok((merged, entry))
        })
    })();

    match result {
        Ok((merged, entry)) => {
            state.packages.unindex_assignment(driver_id, tracking_number);
            state.record_transition(tracking_number, &entry);
            Ok(merged)
        }
        Err(err) => {
            track_failure(state, &err);
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    use super::{
        complete_delivery, complete_pickup, initiate_pickup, issue_codes, mark_failed_delivery,
        verify_delivery_code,
    };
    use crate::config::Config;
    use crate::engine::transitions::{apply_transition, assign_driver, TransitionGate};
    use crate::error::AppError;
    use crate::models::package::{PackageStatus, PackageView, ServiceType, VerificationCode};
    use crate::state::AppState;
    use crate::store::PackageRecord;

    const TN: &str = "RC0000VRFY";

    fn state_with_package(driver_id: Uuid) -> AppState {
        let state = AppState::new(Config::default());
        let mut record = PackageRecord::new(PackageView {
            tracking_number: TN.to_string(),
            status: PackageStatus::Pending,
            pickup_address: "12 Main Rd, Johannesburg".to_string(),
            pickup_coordinates: None,
            delivery_address: "5 Church St, Pretoria".to_string(),
            delivery_coordinates: None,
            assigned_driver_id: None,
            weight_kg: None,
            dimensions: None,
            service_type: ServiceType::SameDay,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        });
        issue_codes(&mut record, 60);
        state.packages.insert(record).unwrap();

        state
            .packages
            .update(TN, |record| {
                assign_driver(record, driver_id, "depot", "driver").map(|_| ())
            })
            .unwrap();

        state
    }

    fn pickup_code(state: &AppState) -> String {
        state.packages.get(TN).unwrap().pickup_code.unwrap().value
    }

    fn delivery_code(state: &AppState) -> String {
        state.packages.get(TN).unwrap().delivery_code.unwrap().value
    }

    #[test]
    fn wrong_code_is_mismatch_and_code_survives() {
        let driver = Uuid::new_v4();
        let state = state_with_package(driver);

        let err = initiate_pickup(&state, TN, driver, "WRONG1").unwrap_err();
        assert!(matches!(err, AppError::CodeMismatch));
        assert!(state.packages.get(TN).unwrap().pickup_code.is_some());

        // The correct code still works after a failed attempt.
        let code = pickup_code(&state);
        initiate_pickup(&state, TN, driver, &code).unwrap();
    }

    #[test]
    fn expired_code_beats_a_match() {
        let driver = Uuid::new_v4();
        let state = state_with_package(driver);

        state
            .packages
            .update(TN, |record| {
                record.pickup_code = Some(VerificationCode {
                    value: "OLD123".to_string(),
                    expires_at: Utc::now() - Duration::minutes(1),
                });
                Ok(())
            })
            .unwrap();

        let err = initiate_pickup(&state, TN, driver, "OLD123").unwrap_err();
        assert!(matches!(err, AppError::CodeExpired));
    }

    #[test]
    fn unassigned_driver_is_refused() {
        let driver = Uuid::new_v4();
        let state = state_with_package(driver);
        let code = pickup_code(&state);

        let err = initiate_pickup(&state, TN, Uuid::new_v4(), &code).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[test]
    fn complete_pickup_requires_a_prior_code_check() {
        let driver = Uuid::new_v4();
        let state = state_with_package(driver);

        let err = complete_pickup(&state, TN, driver, "sig", None, None).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
        assert_eq!(
            state.packages.get(TN).unwrap().status(),
            Some(PackageStatus::Assigned)
        );
    }

    #[test]
    fn pickup_flow_consumes_the_code_once() {
        let driver = Uuid::new_v4();
        let state = state_with_package(driver);
        let code = pickup_code(&state);

        initiate_pickup(&state, TN, driver, &code).unwrap();
        let merged = complete_pickup(&state, TN, driver, "sig", Some(b"photo"), None).unwrap();
        assert_eq!(merged.status, PackageStatus::PickedUp);

        let record = state.packages.get(TN).unwrap();
        assert!(record.pickup_code.is_none());
        assert!(!record.pickup_verified);
        assert_eq!(record.evidence.len(), 2);

        // A duplicate complete cannot also succeed.
        let err = complete_pickup(&state, TN, driver, "sig", None, None).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[test]
    fn evidence_storage_failure_commits_nothing() {
        use std::sync::Arc;

        use crate::collaborators::{FailingEvidenceStore, NullGeocoder};

        let driver = Uuid::new_v4();
        let state = state_with_package(driver);
        let code = pickup_code(&state);
        initiate_pickup(&state, TN, driver, &code).unwrap();

        let broken = AppState::with_collaborators(
            Config::default(),
            Arc::new(NullGeocoder),
            Arc::new(FailingEvidenceStore),
        );
        // Move the prepared record into the state with the failing backend.
        broken.packages.insert(state.packages.get(TN).unwrap()).unwrap();

        let err = complete_pickup(&broken, TN, driver, "sig", Some(b"photo"), None).unwrap_err();
        assert!(matches!(err, AppError::EvidenceStorage(_)));

        let record = broken.packages.get(TN).unwrap();
        assert_eq!(record.status(), Some(PackageStatus::Assigned));
        assert!(record.pickup_code.is_some());
        assert!(record.evidence.is_empty());
        assert!(record.history.iter().all(|e| e.status != PackageStatus::PickedUp));
    }

    #[test]
    fn delivery_flow_reaches_delivered_through_the_gate() {
        let driver = Uuid::new_v4();
        let state = state_with_package(driver);

        let code = pickup_code(&state);
        initiate_pickup(&state, TN, driver, &code).unwrap();
        complete_pickup(&state, TN, driver, "sig", None, None).unwrap();

        state
            .packages
            .update(TN, |record| {
                apply_transition(record, PackageStatus::InTransit, "N1 highway", None, "driver", TransitionGate::Direct)?;
                apply_transition(record, PackageStatus::OutForDelivery, "Pretoria", None, "driver", TransitionGate::Direct)?;
                Ok(())
            })
            .unwrap();

        let code = delivery_code(&state);
        verify_delivery_code(&state, TN, driver, &code).unwrap();
        let merged = complete_delivery(
            &state,
            TN,
            driver,
            "Thabo Mokoena",
            Some("8001015009087"),
            "sig",
            Some(b"doorstep"),
            Some("left with recipient".to_string()),
        )
        .unwrap();

        assert_eq!(merged.status, PackageStatus::Delivered);
        let record = state.packages.get(TN).unwrap();
        let last = record.history.last().unwrap();
        assert!(last.notes.as_ref().unwrap().contains("Thabo Mokoena"));
        assert!(record.delivery_code.is_none());
    }

    #[test]
    fn failed_delivery_skips_codes_but_needs_a_reason() {
        let driver = Uuid::new_v4();
        let state = state_with_package(driver);

        let err = mark_failed_delivery(&state, TN, driver, "  ", None, None).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));

        let merged =
            mark_failed_delivery(&state, TN, driver, "recipient not home", None, Some(b"gate"))
                .unwrap();
        assert_eq!(merged.status, PackageStatus::FailedDelivery);

        let record = state.packages.get(TN).unwrap();
        let last = record.history.last().unwrap();
        assert!(last.notes.as_ref().unwrap().contains("recipient not home"));
    }
}
