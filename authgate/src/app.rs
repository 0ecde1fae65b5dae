//! Wiring: shared state, the two routers, the two listeners, the sweepers,
//! and ordered shutdown.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use authgate_api::server::spawn_server;
use authgate_tls::bootstrap;
use authgate_tokio::{
    shutdown::ShutdownChannel,
    task::{self, NamedTask},
};
use axum::{Router, middleware};
use futures::{StreamExt, stream::FuturesUnordered};
use http::{HeaderName, HeaderValue};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::{
    admin_routes, auth_routes,
    config::Config,
    crypt::SecretCipher,
    gate,
    mail::{MailTemplates, Mailer},
    proxy,
    repository::{PendingActionRepo, RefreshTokenRepo, UserRepo},
    store::Store,
    sweeper,
    token::AccessTokenMint,
};

/// How long the process waits for every task after a shutdown signal.
/// Slightly above the listeners' own drain timeout so a hung connection is
/// attributed to its server task rather than to this outer deadline.
pub const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(25);

/// Everything a request handler can reach: read-only configuration, the
/// repositories, and the shared clients. Constructed once, shared as an
/// `Arc`, never mutated.
pub struct AppState {
    pub config: Config,
    /// Auth endpoints reachable without a credential, precomputed from the
    /// API prefix.
    pub anonymous_prefixes: Vec<String>,
    pub users: UserRepo,
    pub refresh_tokens: RefreshTokenRepo,
    pub pending_actions: PendingActionRepo,
    pub token_mint: AccessTokenMint,
    pub cipher: SecretCipher,
    pub templates: MailTemplates,
    pub mailer: Arc<dyn Mailer>,
    /// Shared client for upstream forwarding; safe for concurrent use.
    pub upstream: reqwest::Client,
}

impl AppState {
    pub fn new(
        config: Config,
        store: Arc<dyn Store>,
        mailer: Arc<dyn Mailer>,
        templates: MailTemplates,
    ) -> anyhow::Result<Self> {
        let cipher = SecretCipher::new(config.totp_encryption_key.as_bytes())
            .context("TOTP_ENCRYPTION_KEY rejected")?;
        let token_mint = AccessTokenMint::new(
            &config.jwt_signing_key,
            config.access_token_lifetime,
        );
        let upstream = reqwest::Client::builder()
            .build()
            .context("Could not build upstream HTTP client")?;
        let anonymous_prefixes = config.anonymous_prefixes().to_vec();

        Ok(Self {
            anonymous_prefixes,
            users: UserRepo::new(store.clone()),
            refresh_tokens: RefreshTokenRepo::new(store.clone()),
            pending_actions: PendingActionRepo::new(store),
            token_mint,
            cipher,
            templates,
            mailer,
            upstream,
            config,
        })
    }
}

/// The plaintext router for end users: the auth API under its prefix,
/// everything else forwarded upstream, the whole thing behind the gate
/// (and CORS, when enabled, outside of that so preflights always answer).
pub fn public_router(state: Arc<AppState>) -> anyhow::Result<Router<()>> {
    let prefix = state.config.public_api_path.trim_end_matches('/').to_owned();
    anyhow::ensure!(
        !prefix.is_empty(),
        "PUBLIC_API_PATH must not be the root path"
    );

    let mut router = Router::new()
        .nest(&prefix, auth_routes::router(&state.config))
        .fallback(proxy::forward_to_upstream)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            gate::require_access_token,
        ));
    if state.config.enable_cors {
        router = router.layer(cors_layer(&state.config)?);
    }
    Ok(router.with_state(state))
}

/// The management router served behind mTLS. No bearer middleware; the
/// verified client certificate is the authentication.
pub fn backend_router(state: Arc<AppState>) -> Router<()> {
    Router::new()
        .nest("/users", admin_routes::router())
        .with_state(state)
}

fn cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let layer = CorsLayer::new().allow_methods(Any);

    let layer = if config.cors_origin == "*" {
        layer.allow_origin(Any)
    } else {
        let origin = config
            .cors_origin
            .parse::<HeaderValue>()
            .context("Bad CORS_ORIGIN")?;
        layer.allow_origin(origin)
    };

    let layer = if config.cors_headers == "*" {
        layer.allow_headers(Any)
    } else {
        let headers = config
            .cors_headers
            .split(',')
            .map(|header| header.trim().parse::<HeaderName>())
            .collect::<Result<Vec<_>, _>>()
            .context("Bad CORS_HEADERS")?;
        layer.allow_headers(headers)
    };

    Ok(layer)
}

pub struct App {
    static_tasks: Vec<NamedTask>,
    shutdown: ShutdownChannel,
    public_addr: SocketAddr,
    backend_addr: SocketAddr,
}

impl App {
    /// Bootstrap certificates if needed, assemble the shared state, and
    /// spawn both listeners plus the sweepers.
    pub async fn init(
        config: Config,
        store: Arc<dyn Store>,
        mailer: Arc<dyn Mailer>,
    ) -> anyhow::Result<Self> {
        if config.backend_generate_cert
            && !bootstrap::certs_exist(&config.backend_cert_dir)
        {
            info!("Generating management channel certificates (first start)");
            bootstrap::generate_backend_certs(
                &config.backend_cert_dir,
                &config.backend_cert_ips,
                &config.backend_cert_hostnames,
            )
            .context("Certificate bootstrap failed")?;
        }
        let tls_config =
            authgate_tls::config::backend_server_config(&config.backend_cert_dir)
                .context("Could not load management channel TLS config")?;

        let templates = MailTemplates::load(&config)
            .context("Could not load mail templates")?;
        let state = Arc::new(AppState::new(config, store, mailer, templates)?);

        let shutdown = ShutdownChannel::new();
        let (public_task, public_addr) = spawn_server(
            "public-api",
            state.config.public_listen_addr,
            public_router(state.clone())?,
            None,
            shutdown.clone(),
        )?;
        let (backend_task, backend_addr) = spawn_server(
            "backend-api",
            state.config.backend_listen_addr,
            backend_router(state.clone()),
            Some(tls_config),
            shutdown.clone(),
        )?;

        let mut static_tasks = vec![public_task, backend_task];
        static_tasks.extend(sweeper::spawn_sweepers(
            state.refresh_tokens.clone(),
            state.pending_actions.clone(),
            &shutdown,
        ));

        Ok(Self {
            static_tasks,
            shutdown,
            public_addr,
            backend_addr,
        })
    }

    /// The actually bound public address (relevant with port 0).
    pub fn public_addr(&self) -> SocketAddr {
        self.public_addr
    }

    pub fn backend_addr(&self) -> SocketAddr {
        self.backend_addr
    }

    /// A handle for shutting the app down programmatically.
    pub fn shutdown_channel(&self) -> ShutdownChannel {
        self.shutdown.clone()
    }

    /// Run until a shutdown signal, then drain everything with a deadline.
    /// A static task finishing prematurely also triggers shutdown.
    pub async fn run(self, spawn_ctrlc_handler: bool) -> anyhow::Result<()> {
        if spawn_ctrlc_handler {
            let shutdown = self.shutdown.clone();
            NamedTask::spawn("ctrlc-handler", async move {
                use tokio::signal::ctrl_c;

                ctrl_c().await.expect("Error waiting for first Ctrl+C");
                info!(
                    "Ctrl+C received, starting graceful shutdown. \
                     Hit Ctrl+C again to quit immediately."
                );
                shutdown.send();
                ctrl_c().await.expect("Error waiting for second Ctrl+C");
                std::process::exit(1);
            })
            .detach();
        }

        let mut static_tasks = self
            .static_tasks
            .into_iter()
            .collect::<FuturesUnordered<_>>();
        tokio::select! {
            biased;
            () = self.shutdown.recv() => info!("Shutting down"),
            Some(name) = static_tasks.next() => {
                error!("Task finished prematurely: {name}");
                self.shutdown.send();
            }
        }

        task::join_all_with_deadline(static_tasks, SHUTDOWN_DEADLINE).await;
        info!("Shutdown complete");
        Ok(())
    }
}
