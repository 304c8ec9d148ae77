//! AdmissionReview handlers
//!
//! Requests arrive as `AdmissionReview<DynamicObject>` and are decoded into
//! [`PostgresqlStandalone`] before the rules run. Anything that cannot be
//! decoded is denied rather than let through.

use axum::Json;
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use pgaas_common::crd::PostgresqlStandalone;
use pgaas_common::store::from_dynamic;
use tracing::{debug, error, info, warn};

use crate::rules;

type Review = AdmissionReview<DynamicObject>;

fn into_request(body: Review) -> Result<AdmissionRequest<DynamicObject>, AdmissionResponse> {
    TryInto::<AdmissionRequest<DynamicObject>>::try_into(body).map_err(|e| {
        error!(error = %e, "failed to parse admission request");
        AdmissionResponse::invalid(e.to_string())
    })
}

fn decode(obj: &Option<DynamicObject>) -> pgaas_common::Result<Option<PostgresqlStandalone>> {
    obj.clone().map(from_dynamic).transpose()
}

/// Fill defaults on create and update
pub async fn mutate_handler(Json(body): Json<Review>) -> Json<Review> {
    let response = match into_request(body) {
        Ok(req) => mutate(&req),
        Err(invalid) => invalid,
    };
    Json(response.into_review())
}

fn mutate(req: &AdmissionRequest<DynamicObject>) -> AdmissionResponse {
    let allowed = AdmissionResponse::from(req);
    let instance = match decode(&req.object) {
        Ok(Some(instance)) => instance,
        Ok(None) => {
            debug!(uid = %req.uid, "no object in request, allowing unchanged");
            return allowed;
        }
        Err(e) => {
            warn!(uid = %req.uid, error = %e, "undecodable object");
            return allowed.deny(e.to_string());
        }
    };

    let ops = rules::defaults(&instance);
    if ops.is_empty() {
        return allowed;
    }
    info!(uid = %req.uid, instance = %req.name, patch_ops = ops.len(), "applying defaults");
    match AdmissionResponse::from(req).with_patch(json_patch::Patch(ops)) {
        Ok(response) => response,
        Err(e) => {
            error!(uid = %req.uid, error = %e, "failed to serialize patch");
            AdmissionResponse::from(req).deny(format!("patch serialization error: {e}"))
        }
    }
}

/// Reject changes that break the instance invariants
pub async fn validate_handler(Json(body): Json<Review>) -> Json<Review> {
    let response = match into_request(body) {
        Ok(req) => validate(&req),
        Err(invalid) => invalid,
    };
    Json(response.into_review())
}

fn validate(req: &AdmissionRequest<DynamicObject>) -> AdmissionResponse {
    let allowed = AdmissionResponse::from(req);
    if !matches!(req.operation, Operation::Create | Operation::Update) {
        return allowed;
    }
    let decoded = decode(&req.object).and_then(|new| Ok((decode(&req.old_object)?, new)));
    let (old, new) = match decoded {
        Ok((old, Some(new))) => (old, new),
        Ok((_, None)) => return allowed,
        Err(e) => {
            warn!(uid = %req.uid, error = %e, "undecodable object");
            return allowed.deny(e.to_string());
        }
    };

    match rules::validate(old.as_ref(), &new) {
        Ok(()) => allowed,
        Err(e) => {
            info!(uid = %req.uid, instance = %req.name, reason = %e, "denying change");
            allowed.deny(e.to_string())
        }
    }
}
