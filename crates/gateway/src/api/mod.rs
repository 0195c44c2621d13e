pub mod admin;
pub mod error;
pub mod health;
pub mod tools;
pub mod ws;

use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::mcp::server as mcp;
use crate::state::AppState;

/// Build the full router: tool invocation, health, MCP endpoint, admin
/// surfaces, and the two notification WebSockets.
pub fn router(state: &AppState) -> Router<AppState> {
    let router = Router::new()
        // Health probe (public).
        .route("/health", get(health::health))
        // Tool invocation (the REST adapter).
        .route("/api/tools/:category/:name", post(tools::invoke))
        // MCP endpoint (streamable HTTP).
        .route(
            "/mcp",
            post(mcp::post_mcp)
                .delete(mcp::delete_mcp)
                .get(mcp::get_mcp),
        )
        // Admin: HITL
        .route("/api/admin/hitl", get(admin::hitl::list_pending))
        .route("/api/admin/hitl/:id/decide", post(admin::hitl::decide))
        // Admin: audit
        .route("/api/admin/audit", get(admin::audit::query))
        .route("/api/admin/audit/export", get(admin::audit::export))
        // Admin: secrets (key names only)
        .route("/api/admin/secrets", get(admin::secrets::list_keys))
        .route("/api/admin/secrets/reload", post(admin::secrets::reload))
        // Notification subscribers
        .route("/ws/hitl", get(ws::hitl_ws))
        .route("/ws/audit", get(ws::audit_ws));

    router
        .layer(cors_layer(state))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

fn cors_layer(state: &AppState) -> CorsLayer {
    let origins: Vec<HeaderValue> = state
        .config
        .server
        .cors
        .allowed_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any)
}
