//! Operator endpoints for inspecting and editing opt-outs and running bounce imports.
//!
//! Only mounted when an admin token is configured. Every handler takes an
//! [`AdminKey`], which checks `Authorization: Bearer <token>` against it.

use rocket::http::Status;
use rocket::request::{FromRequest, Outcome};
use rocket::{Request, State, catch, delete, get, post, serde::json::Json};
use rocket_okapi::okapi::schemars::JsonSchema;
use rocket_okapi::openapi;
use rocket_okapi::request::OpenApiFromRequest;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::bounce::ImportReport;
use crate::error::{ApiError, OptOutError};
use crate::models::{DEFAULT_LIST, DataResponse, OptOutRecord};
use crate::state::MailkickState;

/// Proof that the request presented the configured admin token.
#[derive(Debug, OpenApiFromRequest)]
pub struct AdminKey;

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AdminKey {
    type Error = &'static str;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let expected = match request.guard::<&State<MailkickState>>().await {
            Outcome::Success(state) => state.admin_token.clone(),
            _ => return Outcome::Error((Status::InternalServerError, "state not available")),
        };

        let Some(expected) = expected else {
            return Outcome::Error((Status::Unauthorized, "admin API disabled"));
        };

        match bearer_token(request) {
            Some(presented) if tokens_match(presented, &expected) => Outcome::Success(AdminKey),
            _ => Outcome::Error((Status::Unauthorized, "missing or invalid admin token")),
        }
    }
}

fn bearer_token<'a>(request: &'a Request<'_>) -> Option<&'a str> {
    let header = request.headers().get_one("Authorization")?;
    let mut parts = header.splitn(2, ' ');
    let scheme = parts.next().unwrap_or_default();
    let token = parts.next().unwrap_or_default().trim();
    (scheme.eq_ignore_ascii_case("Bearer") && !token.is_empty()).then_some(token)
}

/// Compare digests so the timing does not depend on where the tokens differ
/// or on their lengths.
fn tokens_match(presented: &str, expected: &str) -> bool {
    let presented = Sha256::digest(presented.as_bytes());
    let expected = Sha256::digest(expected.as_bytes());

    let mut diff: u8 = 0;
    for (x, y) in presented.iter().zip(expected.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Request body for recording or removing an opt-out.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct OptOutRequest {
    pub email: String,
    #[serde(rename = "companyId")]
    pub company_id: i64,
    /// Defaults to `marketing`.
    pub list: Option<String>,
}

impl OptOutRequest {
    fn list(&self) -> &str {
        self.list
            .as_deref()
            .filter(|list| !list.trim().is_empty())
            .unwrap_or(DEFAULT_LIST)
    }
}

/// Number of opt-outs an opt-in removed.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct OptInResponse {
    pub deleted: u64,
}

/// List opt-outs recorded for a company.
#[openapi(tag = "Opt-outs")]
#[get("/admin/companies/<company_id>/opt-outs?<list>")]
pub async fn company_opt_outs(
    _admin: AdminKey,
    state: &State<MailkickState>,
    company_id: i64,
    list: Option<String>,
) -> Result<Json<DataResponse<Vec<OptOutRecord>>>, ApiError> {
    let records = state
        .service
        .opt_outs_for_company(company_id, list.as_deref())
        .await?;

    Ok(Json(DataResponse { data: records }))
}

/// List every opt-out for an email address.
#[openapi(tag = "Opt-outs")]
#[get("/admin/opt-outs?<email>")]
pub async fn email_opt_outs(
    _admin: AdminKey,
    state: &State<MailkickState>,
    email: String,
) -> Result<Json<DataResponse<Vec<OptOutRecord>>>, ApiError> {
    let records = state.service.opt_outs_for_email(&email).await?;
    Ok(Json(DataResponse { data: records }))
}

/// Record an opt-out. Returns the existing record when one is already present.
#[openapi(tag = "Opt-outs")]
#[post("/admin/opt-outs", data = "<request>")]
pub async fn create_opt_out(
    _admin: AdminKey,
    state: &State<MailkickState>,
    request: Json<OptOutRequest>,
) -> Result<Json<OptOutRecord>, ApiError> {
    let record = state
        .service
        .opt_out(&request.email, request.company_id, request.list())
        .await?;

    Ok(Json(record))
}

/// Remove an opt-out.
#[openapi(tag = "Opt-outs")]
#[delete("/admin/opt-outs", data = "<request>")]
pub async fn delete_opt_out(
    _admin: AdminKey,
    state: &State<MailkickState>,
    request: Json<OptOutRequest>,
) -> Result<Json<OptInResponse>, ApiError> {
    let deleted = state
        .service
        .opt_in(&request.email, request.company_id, request.list())
        .await?;

    Ok(Json(OptInResponse { deleted }))
}

/// Pull events from every bounce adapter and hand them to the opt-out processor.
#[openapi(tag = "Bounces")]
#[post("/admin/bounces/import")]
pub async fn import_bounces(
    _admin: AdminKey,
    state: &State<MailkickState>,
) -> Result<Json<ImportReport>, ApiError> {
    let report = state
        .bounces
        .fetch_opt_outs(&state.service)
        .await
        .map_err(|err| match err {
            OptOutError::InvalidArgument(message) => {
                ApiError::InternalError(format!("opt-out processor rejected an event: {message}"))
            }
            other => other.into(),
        })?;
    Ok(Json(report))
}

#[catch(401)]
pub fn unauthorized() -> ApiError {
    ApiError::Unauthorized
}

#[catch(404)]
pub fn not_found() -> ApiError {
    ApiError::NotFound("No such resource".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_comparison() {
        assert!(tokens_match("s3cret", "s3cret"));
        assert!(!tokens_match("s3cret", "s3cre"));
        assert!(!tokens_match("", "s3cret"));
    }

    #[test]
    fn blank_list_falls_back_to_marketing() {
        let request = OptOutRequest {
            email: "a@example.com".into(),
            company_id: 1,
            list: Some("  ".into()),
        };
        assert_eq!(request.list(), "marketing");

        let request = OptOutRequest {
            list: Some("sales".into()),
            ..request
        };
        assert_eq!(request.list(), "sales");
    }
}
