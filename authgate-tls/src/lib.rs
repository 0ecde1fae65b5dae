//! TLS for the management channel.
//!
//! [`bootstrap`] generates the self-signed CA and the server / client leaf
//! certs on first start; [`config`] builds the rustls server config (client
//! certs required, CA as the only trust root) and the matching client
//! config from the PEM files on disk.

use std::sync::{Arc, LazyLock};

use rcgen::{DistinguishedName, DnType};
use rustls::crypto::CryptoProvider;

/// First-run generation of the CA and leaf certificates.
pub mod bootstrap;
/// rustls configs for the mTLS listener and its clients.
pub mod config;

/// The crypto provider backing every TLS config in this process. Pinned so
/// server and client sides can never disagree on available suites.
pub fn crypto_provider() -> Arc<CryptoProvider> {
    static PROVIDER: LazyLock<Arc<CryptoProvider>> =
        LazyLock::new(|| Arc::new(rustls::crypto::ring::default_provider()));
    PROVIDER.clone()
}

/// The Distinguished Name stamped into every bootstrapped certificate.
fn distinguished_name(common_name: &str) -> DistinguishedName {
    let mut name = DistinguishedName::new();
    name.push(DnType::OrganizationName, "authgate");
    name.push(DnType::CommonName, common_name);
    name
}
