use tower_http::cors::{Any, CorsLayer};

/// Permissive CORS so a dashboard on another origin can poll the status API
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}
