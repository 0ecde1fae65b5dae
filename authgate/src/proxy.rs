//! Forwarding authenticated (or whitelisted) requests to the upstream.
//!
//! The rewrite: scheme and host become the target's, the path becomes the
//! single-slash join of the target path and the request path, and the query
//! strings merge (`targetQuery&requestQuery`, empty parts elided). The
//! shared HTTP client suppresses its default `User-Agent` when the inbound
//! request carried none, and the upstream sees the standard forwarding
//! headers plus `X-Auth-UserID`.

use std::{net::SocketAddr, sync::Arc};

use authgate_api::error::ApiError;
use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    response::{IntoResponse, Response},
};
use http::{
    HeaderMap, HeaderName, HeaderValue,
    header::{
        CONNECTION, CONTENT_LENGTH, HOST, PROXY_AUTHENTICATE,
        PROXY_AUTHORIZATION, TE, TRAILER, TRANSFER_ENCODING, UPGRADE,
        USER_AGENT,
    },
};
use tracing::{debug, warn};

use crate::{
    app::AppState,
    gate::{AuthedUser, X_AUTH_USER_ID},
};

static KEEP_ALIVE: HeaderName = HeaderName::from_static("keep-alive");
static X_FORWARDED_FOR: HeaderName =
    HeaderName::from_static("x-forwarded-for");
static X_FORWARDED_HOST: HeaderName =
    HeaderName::from_static("x-forwarded-host");
static X_FORWARDED_PROTO: HeaderName =
    HeaderName::from_static("x-forwarded-proto");
static FORWARDED: HeaderName = HeaderName::from_static("forwarded");

/// Headers scoped to a single connection; never forwarded.
fn is_hop_by_hop(name: &HeaderName) -> bool {
    [
        &CONNECTION,
        &KEEP_ALIVE,
        &PROXY_AUTHENTICATE,
        &PROXY_AUTHORIZATION,
        &TE,
        &TRAILER,
        &TRANSFER_ENCODING,
        &UPGRADE,
    ]
    .contains(&name)
}

/// Fallback handler on the public router: everything the auth API doesn't
/// claim goes to the upstream.
pub async fn forward_to_upstream(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Response {
    match forward(state, request).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn forward(
    state: Arc<AppState>,
    request: Request,
) -> Result<Response, ApiError> {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_default();
    let user_id = request
        .extensions()
        .get::<AuthedUser>()
        .map(|authed| authed.user_id.clone())
        .unwrap_or_default();

    let (parts, body) = request.into_parts();
    debug!("Proxying request for {}", parts.uri);

    let host = parts
        .headers
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
        .or_else(|| parts.uri.authority().map(|a| a.to_string()))
        .unwrap_or_default();
    let proto = parts.uri.scheme_str().unwrap_or("http").to_owned();

    let target = &state.config.proxy_target;
    let path = single_joining_slash(target.path(), parts.uri.path());
    let merged_query = merge_queries(target.query(), parts.uri.query());
    let mut url = target.clone();
    url.set_path(&path);
    url.set_query(merged_query.as_deref());

    let mut headers = parts.headers.clone();
    headers.remove(HOST);
    headers.remove(CONTENT_LENGTH);
    let hop_by_hop = headers
        .keys()
        .filter(|name| is_hop_by_hop(name))
        .cloned()
        .collect::<Vec<_>>();
    for name in hop_by_hop {
        headers.remove(name);
    }

    // Explicitly disable User-Agent so the client library doesn't insert
    // its own default.
    if !headers.contains_key(USER_AGENT) {
        headers.insert(USER_AGENT, HeaderValue::from_static(""));
    }

    insert_str(&mut headers, &X_FORWARDED_FOR, &peer);
    insert_str(&mut headers, &X_FORWARDED_HOST, &host);
    insert_str(&mut headers, &X_FORWARDED_PROTO, &proto);
    insert_str(
        &mut headers,
        &FORWARDED,
        &format!("for={peer};host={host};proto={proto}"),
    );
    // Empty for whitelisted requests: the upstream must never see a
    // client-chosen value here.
    insert_str(&mut headers, &X_AUTH_USER_ID, &user_id);

    let body = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|err| {
            ApiError::bad_request(format!("could not read request body: {err}"))
        })?;

    let upstream_response = state
        .upstream
        .request(parts.method, url)
        .headers(headers)
        .body(body)
        .send()
        .await
        .map_err(|err| {
            warn!("Upstream request failed: {err}");
            ApiError::upstream("upstream request failed")
        })?;

    let mut response = Response::builder().status(upstream_response.status());
    for (name, value) in upstream_response.headers() {
        if !is_hop_by_hop(name) {
            response = response.header(name, value);
        }
    }
    response
        .body(Body::from_stream(upstream_response.bytes_stream()))
        .map_err(|err| {
            ApiError::internal(format!("could not build response: {err}"))
        })
}

fn insert_str(headers: &mut HeaderMap, name: &HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(_) => {
            // Drop the inbound garbage rather than forwarding it.
            warn!("Unencodable {name} header value; sending empty");
            headers.insert(name, HeaderValue::from_static(""));
        }
    }
}

/// Join two URL path segments with exactly one slash between them.
fn single_joining_slash(a: &str, b: &str) -> String {
    let a_slash = a.ends_with('/');
    let b_slash = b.starts_with('/');
    match (a_slash, b_slash) {
        (true, true) => format!("{a}{}", &b[1..]),
        (false, false) => format!("{a}/{b}"),
        _ => format!("{a}{b}"),
    }
}

/// `targetQuery`, then `&`, then `requestQuery`, each elided when empty.
fn merge_queries(
    target: Option<&str>,
    request: Option<&str>,
) -> Option<String> {
    let target = target.filter(|q| !q.is_empty());
    let request = request.filter(|q| !q.is_empty());
    match (target, request) {
        (Some(t), Some(r)) => Some(format!("{t}&{r}")),
        (Some(t), None) => Some(t.to_owned()),
        (None, Some(r)) => Some(r.to_owned()),
        (None, None) => None,
    }
}
