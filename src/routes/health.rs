//! Lightweight service health endpoint used for readiness checks and tests.

use rocket::State;
use rocket::serde::json::Json;
use rocket_okapi::okapi::schemars::JsonSchema;
use rocket_okapi::openapi;
use serde::{Deserialize, Serialize};

use crate::state::MailkickState;

/// Basic response payload describing API health.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct HealthResponse {
    /// `ok`, or `degraded` when the opt-out store is unreachable.
    pub status: String,
    /// Result of pinging the opt-out store.
    pub store: String,
}

/// Health check endpoint reporting whether the opt-out store answers.
#[openapi(tag = "Health")]
#[get("/health")]
pub async fn health_check(state: &State<MailkickState>) -> Json<HealthResponse> {
    let (status, store) = match state.service.store().ping().await {
        Ok(()) => ("ok", "ok".to_string()),
        Err(err) => {
            log::warn!("health check: opt-out store unavailable: {}", err);
            ("degraded", "unavailable".to_string())
        }
    };

    Json(HealthResponse {
        status: status.to_string(),
        store,
    })
}
