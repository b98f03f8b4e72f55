//! REST route handlers
//!
//! Thin presentation glue over the protocol client: JSON shaping, status
//! mapping, gateway/zone views over the login payload.

pub mod gateways;
pub mod health;

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;

use crate::types::AwlError;

pub type RouteResponse = Response<Full<Bytes>>;

/// Map client error kinds onto REST status codes.
///
/// A stalled upstream (timeout or no session) is a gateway timeout; an
/// explicit upstream error is service-unavailable.
pub fn status_for(err: &AwlError) -> StatusCode {
    match err {
        AwlError::TransactionTimeout | AwlError::NotConnected => StatusCode::GATEWAY_TIMEOUT,
        AwlError::Transaction(_) | AwlError::Capacity => StatusCode::SERVICE_UNAVAILABLE,
        AwlError::Connection(_) | AwlError::Login(_) => StatusCode::BAD_GATEWAY,
        AwlError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> RouteResponse {
    let bytes = serde_json::to_vec(body).unwrap_or_else(|_| b"null".to_vec());
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Full::new(Bytes::from(bytes)))
        .unwrap_or_default()
}

pub fn error_response(status: StatusCode, message: &str) -> RouteResponse {
    json_response(status, &serde_json::json!({ "error": message }))
}

pub fn awl_error_response(err: &AwlError) -> RouteResponse {
    error_response(status_for(err), &err.to_string())
}

pub fn not_found() -> RouteResponse {
    error_response(StatusCode::NOT_FOUND, "not found")
}
