use std::time::Instant;

use axum::{
    body::Body,
    http::{HeaderValue, Method, Request, StatusCode, Uri, header::CONTENT_LENGTH},
    middleware::Next,
    response::Response,
};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::application::error::ErrorReport;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Per-request identifier, echoed back in [`REQUEST_ID_HEADER`].
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

pub async fn set_request_id(mut request: Request<Body>, next: Next) -> Response {
    let id = RequestId(Uuid::new_v4().to_string());
    request.extensions_mut().insert(id.clone());

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&id.0) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// What the log line of one finished request needs.
struct Finished {
    method: Method,
    uri: Uri,
    status: StatusCode,
    request_id: String,
    elapsed_ms: u64,
}

pub async fn log_responses(request: Request<Body>, next: Next) -> Response {
    let started_at = Instant::now();
    let method = request.method().clone();
    let uri = request.uri().clone();
    let request_id = request
        .extensions()
        .get::<RequestId>()
        .map(|id| id.0.clone())
        .unwrap_or_default();

    let mut response = next.run(request).await;
    let finished = Finished {
        method,
        uri,
        status: response.status(),
        request_id,
        elapsed_ms: started_at.elapsed().as_millis() as u64,
    };

    if finished.status.is_client_error() || finished.status.is_server_error() {
        let report = response.extensions_mut().remove::<ErrorReport>();
        log_failure(&finished, report);
    } else {
        let bytes = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("0");
        debug!(
            target = "tessera::http::response",
            status = finished.status.as_u16(),
            method = %finished.method,
            path = %finished.uri.path(),
            bytes,
            elapsed_ms = finished.elapsed_ms,
            request_id = %finished.request_id,
            "request served",
        );
    }

    response
}

fn log_failure(finished: &Finished, report: Option<ErrorReport>) {
    let (source, chain) = report
        .map(|report| (report.source, report.messages))
        .unwrap_or(("unknown", Vec::new()));
    let detail = chain.first().map_or("no diagnostic available", String::as_str);
    let query = finished.uri.query().unwrap_or("");

    if finished.status.is_server_error() {
        error!(
            target = "tessera::http::response",
            status = finished.status.as_u16(),
            method = %finished.method,
            path = %finished.uri.path(),
            query,
            elapsed_ms = finished.elapsed_ms,
            source,
            detail,
            chain = ?chain,
            request_id = %finished.request_id,
            "request failed",
        );
    } else {
        warn!(
            target = "tessera::http::response",
            status = finished.status.as_u16(),
            method = %finished.method,
            path = %finished.uri.path(),
            query,
            elapsed_ms = finished.elapsed_ms,
            source,
            detail,
            chain = ?chain,
            request_id = %finished.request_id,
            "client request error",
        );
    }
}
