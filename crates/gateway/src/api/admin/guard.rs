//! Admin auth guard — an Axum extractor enforcing the admin credential.
//!
//! Handlers opt in by adding `_guard: AdminGuard` to their parameter list.
//! The credential is a password (see `server.admin_password`), so two
//! header shapes are accepted: `Authorization: Bearer <password>` for API
//! clients and `X-Admin-Password: <password>` for browser-side callers
//! that cannot set an Authorization header on a WebSocket upgrade. The
//! comparison itself lives on [`AppState::admin_credential_ok`].

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::Json;

use crate::state::AppState;

pub struct AdminGuard;

/// Pull the admin credential out of the request headers, if any.
fn admin_credential(headers: &HeaderMap) -> Option<&str> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    if bearer.is_some() {
        return bearer;
    }
    headers
        .get("x-admin-password")
        .and_then(|v| v.to_str().ok())
}

#[async_trait]
impl FromRequestParts<AppState> for AdminGuard {
    type Rejection = (StatusCode, Json<serde_json::Value>);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if state.admin_credential_ok(admin_credential(&parts.headers)) {
            Ok(AdminGuard)
        } else {
            Err((
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({
                    "error": true,
                    "message": "admin credential required",
                })),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(
                axum::http::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    #[test]
    fn bearer_header_is_preferred() {
        let map = headers(&[
            ("authorization", "Bearer from-bearer"),
            ("x-admin-password", "from-custom"),
        ]);
        assert_eq!(admin_credential(&map), Some("from-bearer"));
    }

    #[test]
    fn custom_header_is_a_fallback() {
        let map = headers(&[("x-admin-password", "hunter2")]);
        assert_eq!(admin_credential(&map), Some("hunter2"));
    }

    #[test]
    fn non_bearer_authorization_is_ignored() {
        let map = headers(&[("authorization", "Basic abc123")]);
        assert_eq!(admin_credential(&map), None);
    }

    #[test]
    fn no_headers_means_no_credential() {
        assert_eq!(admin_credential(&HeaderMap::new()), None);
    }
}
