//! The per-request authentication middleware wrapped around the entire
//! public router.
//!
//! Decision tree, in order:
//!
//! 1. Whitelist match (built-in anonymous auth endpoints + operator
//!    prefixes, matched against the raw request URI): strip any
//!    client-supplied `Authorization` and `X-Auth-UserID` headers and pass
//!    through without identity. The strip matters: a whitelisted path must
//!    never carry attacker-chosen identity claims to the upstream.
//! 2. Otherwise require `Authorization: Bearer <credential>`.
//! 3. Verify the credential (HS512 only). Any parse / signature / expiry /
//!    algorithm failure is a uniform 401.
//! 4. Attach the verified identity to the request for handlers and the
//!    proxy.

use std::sync::Arc;

use authgate_api::error::ApiError;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use http::{HeaderMap, HeaderName, header::AUTHORIZATION};
use tracing::{debug, warn};

use crate::app::AppState;

/// The trusted identity header injected for the upstream. Inbound values
/// are always stripped or overwritten; only this process assigns it.
pub static X_AUTH_USER_ID: HeaderName =
    HeaderName::from_static("x-auth-userid");

/// The verified identity of the requester, attached as a request extension
/// by the gate.
#[derive(Clone, Debug)]
pub struct AuthedUser {
    pub user_id: String,
    pub email: String,
}

pub async fn require_access_token(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let request_uri = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_owned())
        .unwrap_or_else(|| request.uri().path().to_owned());

    if is_whitelisted(
        &state.anonymous_prefixes,
        &state.config.proxy_whitelist,
        &request_uri,
    ) {
        let headers = request.headers_mut();
        headers.remove(AUTHORIZATION);
        headers.remove(&X_AUTH_USER_ID);
        return next.run(request).await;
    }

    let Some(bearer) = bearer_token(request.headers()) else {
        warn!("Gate: missing or malformed Authorization header");
        return ApiError::unauthorized().into_response();
    };

    match state.token_mint.verify(bearer) {
        Ok(claims) => {
            debug!("Gate: verified access credential for {}", claims.user_id);
            request.extensions_mut().insert(AuthedUser {
                user_id: claims.user_id,
                email: claims.email,
            });
            next.run(request).await
        }
        Err(err) => {
            warn!("Gate: credential verification failed: {err}");
            ApiError::unauthorized().into_response()
        }
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// Prefix-match the raw request URI against both whitelists.
fn is_whitelisted(
    anonymous_prefixes: &[String],
    operator_whitelist: &[String],
    request_uri: &str,
) -> bool {
    anonymous_prefixes
        .iter()
        .chain(operator_whitelist)
        .any(|prefix| request_uri.starts_with(prefix))
}
