// Request logging middleware
use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;

/// One line per inbound call. Status polling is logged at debug level.
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let started = Instant::now();

    let response = next.run(request).await;

    let status = response.status().as_u16();
    let elapsed_ms = started.elapsed().as_millis() as u64;
    if uri.path().starts_with("/api/") || uri.path() == "/healthz" {
        tracing::debug!(status, elapsed_ms, "{} {}", method, uri);
    } else {
        tracing::info!(status, elapsed_ms, "{} {}", method, uri);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, routing::get, Router};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_passes_response_through() {
        let app = Router::new()
            .route(
                "/teapot",
                get(|| async { (axum::http::StatusCode::IM_A_TEAPOT, "short and stout") }),
            )
            .layer(axum::middleware::from_fn(logging_middleware));

        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/teapot")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::IM_A_TEAPOT);
    }
}
