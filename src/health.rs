//! Liveness/readiness HTTP endpoints, directly grounded in the teacher's
//! `libs/bin-shared/http_health_check.rs`.

use std::net::SocketAddr;

use anyhow::Result;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;

/// Serves `/healthz` (always 200) and `/readyz` (200 iff `is_ready()`).
pub async fn serve(
    addr: impl Into<SocketAddr>,
    is_ready: impl Fn() -> bool + Clone + Send + Sync + 'static,
) -> Result<()> {
    let addr = addr.into();
    let service = router(is_ready).into_make_service();

    tracing::info!(%addr, "Serving health checks");
    axum::serve(tokio::net::TcpListener::bind(addr).await?, service).await?;

    Ok(())
}

fn router(is_ready: impl Fn() -> bool + Clone + Send + Sync + 'static) -> Router {
    Router::new()
        .route("/healthz", get(|| async { StatusCode::OK }))
        .route(
            "/readyz",
            get(move || async move {
                if is_ready() {
                    StatusCode::OK
                } else {
                    StatusCode::SERVICE_UNAVAILABLE
                }
            }),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http::Request;
    use tower::ServiceExt;

    #[tokio::test]
    async fn healthz_always_returns_200() {
        let app = router(|| false);

        let response = app
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn readyz_reflects_readiness() {
        let app = router(|| true);
        let response = app
            .oneshot(Request::get("/readyz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let app = router(|| false);
        let response = app
            .oneshot(Request::get("/readyz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
