//! Admission webhooks
//!
//! Both endpoints speak `admission.k8s.io/v1` `AdmissionReview`. TLS is
//! terminated in front of this server.

use crate::crds::BootDependency;
use crate::tasks::config::ImagesConfig;
use crate::tasks::store::DependencyStore;
use axum::{extract::State, response::Json, routing::post, Router};
use k8s_openapi::api::apps::v1::Deployment;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use kube::core::DynamicObject;
use std::sync::Arc;
use tracing::error;

pub mod mutate;
pub mod validate;

pub use mutate::mutate_deployment;
pub use validate::validate_boot_dependency;

pub const MUTATE_DEPLOYMENT_PATH: &str = "/mutate-apps-v1-deployment";
pub const VALIDATE_BOOTDEPENDENCY_PATH: &str = "/validate-core-bootchain-operator-ruicoelho-dev-v1alpha1-bootdependency";

#[derive(Clone)]
pub struct AdmissionState {
    pub store: Arc<dyn DependencyStore>,
    pub images: Arc<ImagesConfig>,
}

/// Routes for both admission endpoints
pub fn router(state: AdmissionState) -> Router {
    Router::new()
        .route(MUTATE_DEPLOYMENT_PATH, post(mutate_handler))
        .route(VALIDATE_BOOTDEPENDENCY_PATH, post(validate_handler))
        .with_state(state)
}

async fn mutate_handler(
    State(state): State<AdmissionState>,
    Json(review): Json<AdmissionReview<Deployment>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let req: AdmissionRequest<Deployment> = match review.try_into() {
        Ok(req) => req,
        Err(e) => {
            error!(error = %e, "Invalid Deployment admission review");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };
    let response = mutate_deployment(&req, state.store.as_ref(), &state.images).await;
    Json(response.into_review())
}

async fn validate_handler(
    State(state): State<AdmissionState>,
    Json(review): Json<AdmissionReview<BootDependency>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let req: AdmissionRequest<BootDependency> = match review.try_into() {
        Ok(req) => req,
        Err(e) => {
            error!(error = %e, "Invalid BootDependency admission review");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };
    let response = validate_boot_dependency(&req, state.store.as_ref()).await;
    Json(response.into_review())
}
