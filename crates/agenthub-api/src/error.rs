use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

use agenthub_core::error::CoreError;

/// The one place a domain error becomes HTTP: status from
/// [`CoreError::http_status`], body in the
/// `{"detail": {"code", "message", "fields"?}}` envelope.
pub struct ApiError(pub CoreError);

impl From<CoreError> for ApiError {
    fn from(e: CoreError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let e = &self.0;
        let status =
            StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!(code = e.code(), error = %e, "internal error surfaced to client");
        }

        let fields = match e {
            CoreError::ScopeNotAttenuated { extra } => Some(json!({ "extra_scopes": extra })),
            CoreError::PolicyDenied { violations } => Some(json!({ "violations": violations })),
            CoreError::MissingField(field) => Some(json!({ "missing": [field] })),
            CoreError::InsufficientBalance {
                need_cents,
                have_cents,
            } => Some(json!({
                "need_usd": *need_cents as f64 / 100.0,
                "have_usd": *have_cents as f64 / 100.0,
            })),
            CoreError::BudgetHardStop { spend_ratio }
            | CoreError::BudgetReauthRequired { spend_ratio } => {
                Some(json!({ "spend_ratio": spend_ratio }))
            }
            CoreError::ChainInvalid { hop, reason } => {
                Some(json!({ "failing_hop": hop, "reason": reason }))
            }
            _ => None,
        };

        let mut detail = json!({
            "code": e.code(),
            "message": e.to_string(),
        });
        if let Some(fields) = fields {
            detail["fields"] = fields;
        }
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

/// Handler result alias.
pub type ApiResult<T> = Result<T, ApiError>;
