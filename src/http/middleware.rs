//! Middleware installed on the HTTP router.
//!
//! `request_logger` and the panic catcher are installed unless the server is
//! configured with `http-no-default`; `allow_cors` is opt-in through
//! `HttpServer::add_middleware`.

use super::error::AppError;
use axum::extract::{ConnectInfo, Request};
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, CONTENT_LENGTH, REFERER, USER_AGENT,
};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::any::Any;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

const CORS_ALLOW_HEADERS: &str = "Content-Type, Content-Length, Accept-Encoding, X-CSRF-Token, \
     Authorization, accept, origin, Cache-Control, X-Requested-With, app_name, app_api_key";
const CORS_ALLOW_METHODS: &str = "POST, OPTIONS, GET, PUT, DELETE";

/// One log line per request, at a level depending on the response status
pub async fn request_logger(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let client_ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "-".to_string());
    let referer = header_text(request.headers(), &REFERER);
    let user_agent = header_text(request.headers(), &USER_AGENT);

    let response = next.run(request).await;

    let latency_us = latency_micros(start.elapsed());
    let status = response.status().as_u16();
    let data_length = header_text(response.headers(), &CONTENT_LENGTH)
        .parse::<u64>()
        .unwrap_or(0);

    match status {
        500.. => error!(
            status, latency_us, %client_ip, %method, %path, %referer, data_length, %user_agent,
            "request"
        ),
        400..=499 => warn!(
            status, latency_us, %client_ip, %method, %path, %referer, data_length, %user_agent,
            "request"
        ),
        _ => info!(
            status, latency_us, %client_ip, %method, %path, %referer, data_length, %user_agent,
            "request"
        ),
    }

    response
}

/// Permissive CORS headers; preflight requests are answered with 201
pub async fn allow_cors(request: Request, next: Next) -> Response {
    let mut response = if request.method() == Method::OPTIONS {
        StatusCode::CREATED.into_response()
    } else {
        next.run(request).await
    };

    let headers = response.headers_mut();
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        ACCESS_CONTROL_ALLOW_CREDENTIALS,
        HeaderValue::from_static("true"),
    );
    headers.insert(
        ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(CORS_ALLOW_HEADERS),
    );
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(CORS_ALLOW_METHODS),
    );
    response
}

/// Response for a panicking handler. A panic carrying an [`AppError`]
/// (raised with `std::panic::panic_any`) is rendered as is, anything else
/// becomes a 500.
pub(crate) fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    match panic.downcast::<AppError>() {
        Ok(app_error) => {
            warn!("Handler aborted with {}: {}", app_error.status_code, app_error);
            (*app_error).into_response()
        }
        Err(panic) => {
            let detail = if let Some(message) = panic.downcast_ref::<String>() {
                message.clone()
            } else if let Some(message) = panic.downcast_ref::<&str>() {
                message.to_string()
            } else {
                "unknown panic payload".to_string()
            };
            error!("Handler panicked: {}", detail);
            AppError::internal().into_response()
        }
    }
}

/// Elapsed time in microseconds, saturating at `u64::MAX`
pub(crate) fn latency_micros(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX)
}

fn header_text(headers: &HeaderMap, name: &HeaderName) -> String {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string()
}
