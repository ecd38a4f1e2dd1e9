//! Prometheus metrics layer and endpoint.

use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::routing::get;
use axum::Router;
use http::{Request, Response};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio_util::sync::CancellationToken;
use tower::{Layer, Service};

use kafgate_core::config::MetricsConfig;

use crate::error::GatewayError;

/// Tower layer that records request counts, durations and in-flight
/// requests per bound route.
#[derive(Clone, Default)]
pub struct MetricsLayer;

impl MetricsLayer {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService { inner }
    }
}

#[derive(Clone)]
pub struct MetricsService<S> {
    inner: S,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for MetricsService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send,
    ReqBody: Send + 'static,
    ResBody: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let method = req.method().to_string();
        let route = route_label(req.uri().path());

        gauge!("kafgate.gateway.active_requests").increment(1.0);
        let start = Instant::now();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let result = inner.call(req).await;
            let duration_secs = start.elapsed().as_secs_f64();

            gauge!("kafgate.gateway.active_requests").decrement(1.0);

            if let Ok(response) = &result {
                counter!(
                    "kafgate.gateway.requests",
                    "route" => route.clone(),
                    "method" => method.clone(),
                    "status" => response.status().as_u16().to_string()
                )
                .increment(1);

                histogram!(
                    "kafgate.gateway.request.duration",
                    "route" => route,
                    "method" => method
                )
                .record(duration_secs);
            }

            result
        })
    }
}

/// First path segment, a bounded label over the configured routes.
fn route_label(path: &str) -> String {
    path.trim_start_matches('/')
        .split('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .unwrap_or("root")
        .to_string()
}

/// Installs the Prometheus recorder for this process.
pub fn init_metrics_recorder() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Spawns the metrics endpoint on its own listener.
pub fn spawn_metrics_server(
    config: MetricsConfig,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<Result<(), GatewayError>> {
    let handle = Arc::new(init_metrics_recorder());

    tokio::spawn(async move {
        let app = Router::new().route(
            "/metrics",
            get(move || {
                let handle = Arc::clone(&handle);
                async move { handle.render() }
            }),
        );

        let address = config.address();
        let listener = tokio::net::TcpListener::bind(&address)
            .await
            .map_err(GatewayError::Io)?;

        tracing::info!(address = %address, "metrics listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await
            .map_err(GatewayError::Io)?;

        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http::StatusCode;
    use tower::ServiceExt;

    async fn test_service(_req: Request<Body>) -> Result<Response<Body>, std::convert::Infallible> {
        Ok(Response::builder()
            .status(StatusCode::OK)
            .body(Body::empty())
            .unwrap())
    }

    #[test]
    fn route_label_uses_first_segment() {
        assert_eq!(route_label("/echo"), "echo");
        assert_eq!(route_label("/orders/42"), "orders");
        assert_eq!(route_label("/"), "root");
    }

    #[tokio::test]
    async fn layer_passes_requests_through() {
        let service = MetricsLayer::new().layer(tower::service_fn(test_service));

        let request = Request::builder()
            .uri("/echo")
            .body(Body::empty())
            .unwrap();

        let response = service.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
