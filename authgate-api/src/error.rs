//! The error type returned by every handler on both listeners.
//!
//! There are exactly six observable error classes at the HTTP boundary; each
//! [`ErrorKind`] maps onto one status code. The JSON body is a bare
//! `{"error": "..."}` object so that clients never have to parse a status
//! line out of a string body.

use std::fmt;

use axum::response::IntoResponse;
use http::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};

/// The observable error classes of the API.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// Malformed or invalid input, or an unknown refresh token.
    BadRequest,
    /// Authentication failed. The message never distinguishes an unknown
    /// account from a wrong password.
    Unauthorized,
    /// Unknown resource or confirmation token.
    NotFound,
    /// Email collision or in-flight reservation.
    Conflict,
    /// Unexpected internal failure.
    Internal,
    /// The upstream could not be reached.
    UpstreamUnavailable,
}

impl ErrorKind {
    pub fn to_http_status(self) -> StatusCode {
        match self {
            Self::BadRequest => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Conflict => StatusCode::CONFLICT,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            Self::UpstreamUnavailable => StatusCode::BAD_GATEWAY,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::BadRequest => "bad request",
            Self::Unauthorized => "unauthorized",
            Self::NotFound => "not found",
            Self::Conflict => "conflict",
            Self::Internal => "internal error",
            Self::UpstreamUnavailable => "upstream unavailable",
        };
        write!(f, "{s}")
    }
}

/// An error which renders as `{status}` + JSON [`ErrorResponse`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("{kind}: {msg}")]
pub struct ApiError {
    pub kind: ErrorKind,
    pub msg: String,
}

/// The JSON-serialized representation of every [`ApiError`].
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ApiError {
    pub fn new(kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            msg: msg.into(),
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, msg)
    }

    /// A uniform 401. Callers must not leak whether the account exists, so
    /// there is no message parameter.
    pub fn unauthorized() -> Self {
        Self::new(ErrorKind::Unauthorized, "authentication failed")
    }

    pub fn not_found() -> Self {
        Self::new(ErrorKind::NotFound, "not found")
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, msg)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, msg)
    }

    pub fn upstream(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::UpstreamUnavailable, msg)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.kind.to_http_status();
        if status.is_server_error() {
            error!("{status} response: {self}");
        } else {
            warn!("{status} response: {self}");
        }
        let body = ErrorResponse { error: self.msg };
        (status, axum::Json(body)).into_response()
    }
}

/// A `201 Created` response carrying the new record's identifier in the
/// `X-Object-ID` header, with an empty body.
pub struct Created(pub String);

/// Header carrying the identifier of a freshly created record.
pub static X_OBJECT_ID: http::HeaderName =
    http::HeaderName::from_static("x-object-id");

impl IntoResponse for Created {
    fn into_response(self) -> axum::response::Response {
        let mut response = StatusCode::CREATED.into_response();
        match http::HeaderValue::from_str(&self.0) {
            Ok(value) => {
                response.headers_mut().insert(&X_OBJECT_ID, value);
                response
            }
            // Ids are generated by us and always header-safe; don't 500 the
            // creation over a header we couldn't encode.
            Err(err) => {
                error!("Unencodable X-Object-ID {:?}: {err}", self.0);
                response
            }
        }
    }
}
