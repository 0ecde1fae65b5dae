//! rustls configs for the management channel, built from the PEM artifacts
//! the bootstrap wrote to the cert directory.
//!
//! The server trusts exactly one root, the bootstrapped CA, and requires a
//! verified client certificate on every connection. rustls itself refuses
//! anything below TLS 1.2 and always prefers the server's cipher order, so
//! no further hardening knobs are needed here.

use std::{fs, io::BufReader, path::Path, sync::Arc};

use anyhow::Context;
use rustls::{
    RootCertStore,
    pki_types::{CertificateDer, PrivateKeyDer},
    server::WebPkiClientVerifier,
};

use crate::bootstrap::{
    CA_CERT_FILE, CLIENT_CERT_FILE, CLIENT_KEY_FILE, SERVER_CERT_FILE,
    SERVER_KEY_FILE,
};

/// Server config for the mTLS listener: present `server.crt`/`server.key`,
/// require a client cert signed by `ca.crt`.
pub fn backend_server_config(
    dir: &Path,
) -> anyhow::Result<Arc<rustls::ServerConfig>> {
    let roots = ca_root_store(dir)?;
    let client_verifier =
        WebPkiClientVerifier::builder_with_provider(
            Arc::new(roots),
            crate::crypto_provider(),
        )
        .build()
        .context("Could not build client cert verifier")?;

    let cert_chain = load_certs(&dir.join(SERVER_CERT_FILE))?;
    let key = load_key(&dir.join(SERVER_KEY_FILE))?;

    let config = rustls::ServerConfig::builder_with_provider(
        crate::crypto_provider(),
    )
    .with_safe_default_protocol_versions()
    .context("Bad protocol versions")?
    .with_client_cert_verifier(client_verifier)
    .with_single_cert(cert_chain, key)
    .context("Invalid server cert/key")?;

    Ok(Arc::new(config))
}

/// Client config for talking to the mTLS listener: trust only `ca.crt`,
/// present `client.crt`/`client.key`.
pub fn backend_client_config(
    dir: &Path,
) -> anyhow::Result<Arc<rustls::ClientConfig>> {
    let roots = ca_root_store(dir)?;

    let cert_chain = load_certs(&dir.join(CLIENT_CERT_FILE))?;
    let key = load_key(&dir.join(CLIENT_KEY_FILE))?;

    let config = rustls::ClientConfig::builder_with_provider(
        crate::crypto_provider(),
    )
    .with_safe_default_protocol_versions()
    .context("Bad protocol versions")?
    .with_root_certificates(roots)
    .with_client_auth_cert(cert_chain, key)
    .context("Invalid client cert/key")?;

    Ok(Arc::new(config))
}

/// A root store containing only the bootstrapped CA.
fn ca_root_store(dir: &Path) -> anyhow::Result<RootCertStore> {
    let ca_path = dir.join(CA_CERT_FILE);
    let ca_certs = load_certs(&ca_path)?;
    let mut roots = RootCertStore::empty();
    for cert in ca_certs {
        roots
            .add(cert)
            .with_context(|| format!("Invalid CA cert in {ca_path:?}"))?;
    }
    anyhow::ensure!(!roots.is_empty(), "No CA cert found in {ca_path:?}");
    Ok(roots)
}

fn load_certs(
    path: &Path,
) -> anyhow::Result<Vec<CertificateDer<'static>>> {
    let file = fs::File::open(path)
        .with_context(|| format!("Could not open {path:?}"))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("Could not parse certs in {path:?}"))?;
    Ok(certs)
}

fn load_key(path: &Path) -> anyhow::Result<PrivateKeyDer<'static>> {
    let file = fs::File::open(path)
        .with_context(|| format!("Could not open {path:?}"))?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .with_context(|| format!("Could not parse key in {path:?}"))?
        .with_context(|| format!("No private key found in {path:?}"))
}
