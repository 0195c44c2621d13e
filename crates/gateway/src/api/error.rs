//! REST error envelope — `{error, error_type, message, suggestion_tool?}`
//! with the HTTP status derived from the error kind.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};

use hb_domain::Error;

pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut body = serde_json::json!({
            "error": true,
            "error_type": self.0.kind(),
            "message": self.0.public_message(),
        });
        if let Some(tool) = self.0.suggestion_tool() {
            body["suggestion_tool"] = serde_json::Value::String(tool.into());
        }
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
