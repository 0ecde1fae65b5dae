//! Binding and serving the two listeners.
//!
//! [`spawn_server`] binds a TCP listener, wraps the given [`Router`] with
//! request tracing, and drives it (plaintext or TLS) inside a
//! [`NamedTask`]. A signal on the [`ShutdownChannel`] starts a graceful
//! drain: new connections are refused, in-flight requests get
//! [`GRACE_PERIOD`] to finish, and the whole server future is abandoned at
//! [`SERVER_SHUTDOWN_TIMEOUT`] if it still hasn't returned.

use std::{
    net::{SocketAddr, TcpListener},
    sync::Arc,
    time::Duration,
};

use anyhow::Context;
use authgate_tokio::{shutdown::ShutdownChannel, task::NamedTask};
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

/// How long in-flight connections get to finish after a shutdown signal
/// before the listener hard-closes them.
const GRACE_PERIOD: Duration = Duration::from_secs(15);
/// The maximum time we'll wait for a server to complete shutdown. Must
/// exceed [`GRACE_PERIOD`] and stay under the deadline the app passes to
/// `join_all_with_deadline`.
pub const SERVER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(20);

/// Bind `addr` and serve `router` on it in a named background task.
///
/// With `tls: Some(..)` the listener speaks TLS with the given server config
/// (the management listener's mTLS config lives in `authgate-tls`); with
/// `None` it speaks plaintext HTTP.
///
/// Returns the server task along with the actually bound address, which
/// matters when `addr` had port 0.
pub fn spawn_server(
    name: &'static str,
    addr: SocketAddr,
    router: Router<()>,
    tls: Option<Arc<rustls::ServerConfig>>,
    shutdown: ShutdownChannel,
) -> anyhow::Result<(NamedTask, SocketAddr)> {
    let listener = TcpListener::bind(addr)
        .with_context(|| format!("Could not bind {name} listener on {addr}"))?;
    listener
        .set_nonblocking(true)
        .context("Could not set listener nonblocking")?;
    let local_addr = listener
        .local_addr()
        .context("Could not read listener local addr")?;

    let scheme = if tls.is_some() { "https" } else { "http" };
    info!("{name} listening on {scheme}://{local_addr}");

    let service = router
        .layer(TraceLayer::new_for_http())
        .into_make_service_with_connect_info::<SocketAddr>();

    let handle = axum_server::Handle::new();
    let serve_handle = handle.clone();
    let server_fut = async move {
        let result = match tls {
            Some(config) =>
                axum_server::from_tcp_rustls(
                    listener,
                    RustlsConfig::from_config(config),
                )
                .handle(serve_handle)
                .serve(service)
                .await,
            None =>
                axum_server::from_tcp(listener)
                    .handle(serve_handle)
                    .serve(service)
                    .await,
        };
        if let Err(err) = result {
            error!("{name} server error: {err:#}");
        }
    };

    let task = NamedTask::spawn(name, async move {
        tokio::pin!(server_fut);
        tokio::select! {
            // Make sure the shutdown branch wins a race against the server
            // future erroring out at the same instant.
            biased;
            () = shutdown.recv_owned() => {
                info!("Shutting down {name} server");
                handle.graceful_shutdown(Some(GRACE_PERIOD));
            }
            () = &mut server_fut => {
                return error!("{name} server exited prematurely");
            }
        }
        match tokio::time::timeout(SERVER_SHUTDOWN_TIMEOUT, server_fut).await {
            Ok(()) => debug!("{name} server drained"),
            Err(_) => warn!("{name} server timed out during shutdown"),
        }
    });

    Ok((task, local_addr))
}
