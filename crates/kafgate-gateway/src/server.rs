//! Route binding and request/reply translation.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{RawPathParams, Request};
use axum::http::{header, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, on, MethodFilter};
use axum::{Json, Router};
use tokio_util::sync::CancellationToken;
use url::form_urlencoded;

use kafgate_connector::{Connector, Reply, SendOptions};
use kafgate_core::config::{BridgeConfig, EndpointConfig};
use kafgate_core::error::ConnectorError;
use kafgate_core::headers::{HTTP_HEADER_PREFIX, RESPONSE_CODE_HEADER};
use kafgate_core::message::{new_message_id, Message, DEFAULT_ID_BYTES, HTTP_ID_PREFIX, PORT_HTTP};

use crate::error::GatewayError;
use crate::metrics;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// State carried by one bound route.
struct BridgeRoute {
    endpoint: EndpointConfig,
    connector: Arc<Connector>,
}

/// Runs the gateway until the cancellation token fires.
pub async fn run(
    config: &BridgeConfig,
    connector: Arc<Connector>,
    cancel: CancellationToken,
) -> Result<(), GatewayError> {
    let router = build_router(&config.endpoints, connector)?;

    if let Some(metrics_config) = &config.metrics {
        metrics::spawn_metrics_server(metrics_config.clone(), cancel.clone());
    }

    let address = config.server.http.address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .map_err(GatewayError::Io)?;

    tracing::info!(
        address = %address,
        endpoints = config.endpoints.len(),
        "gateway listening"
    );

    let cancel_serve = cancel.clone();
    let serve = async move {
        axum::serve(listener, router.into_make_service())
            .with_graceful_shutdown(async move { cancel_serve.cancelled().await })
            .await
    };

    // Bound the drain: connections still open past the deadline are
    // dropped rather than holding up the shutdown.
    let drain_deadline = config.server.http.shutdown_timeout();
    let deadline = async {
        cancel.cancelled().await;
        tokio::time::sleep(drain_deadline).await;
    };

    tokio::select! {
        result = serve => {
            result.map_err(GatewayError::Io)?;
            tracing::info!("gateway stopped");
        }
        () = deadline => {
            tracing::warn!(
                timeout_ms = drain_deadline.as_millis() as u64,
                "shutdown deadline exceeded, dropping open connections"
            );
        }
    }

    Ok(())
}

/// Builds the router: `/health` plus one route per non-gRPC endpoint.
pub fn build_router(
    endpoints: &[EndpointConfig],
    connector: Arc<Connector>,
) -> Result<Router, GatewayError> {
    let mut router = Router::new().route("/health", get(health_check));

    for endpoint in endpoints.iter().filter(|endpoint| !endpoint.is_grpc) {
        let filter = method_filter(endpoint.http_method())?;
        let route = Arc::new(BridgeRoute {
            endpoint: endpoint.clone(),
            connector: Arc::clone(&connector),
        });

        tracing::info!(
            path = %endpoint.path,
            method = endpoint.http_method(),
            topic = %endpoint.kafka.topic,
            reply_topic = %endpoint.kafka.reply_topic(),
            "binding endpoint"
        );

        router = router.route(
            &endpoint.path,
            on(filter, move |params: RawPathParams, request: Request| {
                let route = Arc::clone(&route);
                async move { handle_bridge(route, params, request).await }
            }),
        );
    }

    Ok(router.layer(metrics::MetricsLayer::new()))
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "healthy" }))
}

async fn handle_bridge(route: Arc<BridgeRoute>, params: RawPathParams, request: Request) -> Response {
    match bridge_request(route, params, request).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

/// The synchronous façade: publish the request envelope, then hold the
/// handler on the pending reply until exactly one outcome arrives.
async fn bridge_request(
    route: Arc<BridgeRoute>,
    params: RawPathParams,
    request: Request,
) -> Result<Response, GatewayError> {
    let (parts, body) = request.into_parts();

    let payload = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|err| GatewayError::BodyRead(err.to_string()))?;

    let variables: HashMap<String, String> = params
        .iter()
        .map(|(name, value)| (name.to_owned(), value.to_owned()))
        .collect();

    let message = build_message(&route.endpoint, &parts, variables, payload.to_vec());
    let opts = SendOptions::for_endpoint(&route.endpoint);

    tracing::debug!(
        id = %message.id,
        path = %message.path,
        topic = %opts.topic,
        "dispatching request"
    );

    let pending = route.connector.request_reply(&message, &opts).await?;
    let reply = pending.wait().await.map_err(|err| {
        tracing::error!(id = %message.id, error = %err, "reply failed");
        GatewayError::Connector(err)
    })?;

    Ok(reply_response(reply))
}

/// Translates one HTTP request into the outbound envelope.
fn build_message(
    endpoint: &EndpointConfig,
    parts: &http::request::Parts,
    variables: HashMap<String, String>,
    payload: Vec<u8>,
) -> Message {
    let mut headers = HashMap::new();
    for (name, value) in &parts.headers {
        if let Ok(text) = value.to_str() {
            // Multi-valued headers collapse to their first value.
            headers
                .entry(format!("{HTTP_HEADER_PREFIX}{name}"))
                .or_insert_with(|| text.to_owned());
        }
    }

    let mut parameters: HashMap<String, Vec<String>> = HashMap::new();
    if let Some(query) = parts.uri.query() {
        for (name, value) in form_urlencoded::parse(query.as_bytes()) {
            parameters
                .entry(name.into_owned())
                .or_default()
                .push(value.into_owned());
        }
    }

    Message {
        id: new_message_id(HTTP_ID_PREFIX, DEFAULT_ID_BYTES),
        data_type: endpoint.data_type.clone(),
        port: PORT_HTTP.to_owned(),
        path: parts.uri.path().to_owned(),
        variables,
        parameters,
        headers,
        payload,
    }
}

/// Translates a broker reply into the HTTP response: status from the
/// response-code header, passthrough headers with the prefix stripped,
/// payload as the body.
fn reply_response(reply: Reply) -> Response {
    let mut status = StatusCode::OK;
    if let Some(code) = reply.headers.get_str(RESPONSE_CODE_HEADER) {
        match code.parse::<u16>().ok().and_then(|c| StatusCode::from_u16(c).ok()) {
            Some(parsed) => status = parsed,
            None => {
                tracing::error!(value = %code, "ignoring unparseable reply status code");
            }
        }
    }

    let mut response = Response::new(Body::from(reply.payload));
    *response.status_mut() = status;

    for (name, value) in reply.headers.iter() {
        if let Some(stripped) = name.strip_prefix(HTTP_HEADER_PREFIX) {
            if let (Ok(header_name), Ok(header_value)) = (
                HeaderName::from_bytes(stripped.as_bytes()),
                HeaderValue::from_bytes(value.as_bytes()),
            ) {
                response.headers_mut().insert(header_name, header_value);
            }
        }
    }

    if !response.headers().contains_key(header::CONTENT_TYPE) {
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(DEFAULT_CONTENT_TYPE),
        );
    }

    response
}

fn method_filter(method: &str) -> Result<MethodFilter, GatewayError> {
    let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .map_err(|err| ConnectorError::Config(format!("invalid method '{method}': {err}")))?;
    MethodFilter::try_from(method)
        .map_err(|err| GatewayError::Connector(ConnectorError::Config(err.to_string())))
}
