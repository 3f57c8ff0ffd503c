//! TLS root certificate handling.
//!
//! Native OS root lookups can be slow on some platforms, so the result of
//! the first load is cached for the lifetime of the process.

use crate::error::HttpError;
use rustls_pki_types::CertificateDer;
use std::sync::{Arc, OnceLock};

static NATIVE_ROOTS: OnceLock<Vec<CertificateDer<'static>>> = OnceLock::new();

fn load_native_roots() -> Vec<CertificateDer<'static>> {
    let loaded = rustls_native_certs::load_native_certs();

    for err in &loaded.errors {
        tracing::warn!(error = %err, "failed to load a native root certificate");
    }

    if loaded.certs.is_empty() {
        tracing::warn!("no native root CA certificates found");
    } else {
        tracing::debug!(count = loaded.certs.len(), "loaded native root certificates");
    }

    loaded.certs
}

/// Cached native root certificates; loaded lazily on first use.
#[must_use]
pub fn native_root_certs() -> &'static [CertificateDer<'static>] {
    NATIVE_ROOTS.get_or_init(load_native_roots).as_slice()
}

/// The crypto provider to use for TLS connections.
///
/// Respects a globally installed default provider when one exists, falling
/// back to aws-lc-rs without installing it globally.
#[must_use]
pub fn crypto_provider() -> Arc<rustls::crypto::CryptoProvider> {
    rustls::crypto::CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
}

/// Build a rustls client config trusting the cached native roots.
///
/// # Errors
///
/// Returns [`HttpError::TlsConfig`] when the OS store is empty or none of
/// its certificates parse. Failing here, at client construction, beats
/// failing later on the first handshake.
pub fn native_roots_client_config() -> Result<rustls::ClientConfig, HttpError> {
    let certs = native_root_certs();
    if certs.is_empty() {
        return Err(HttpError::TlsConfig(
            "no native root CA certificates found in OS certificate store".to_owned(),
        ));
    }

    let mut roots = rustls::RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(certs.iter().cloned());
    if ignored > 0 {
        tracing::warn!(added, ignored, "some native root certificates failed to parse");
    }
    if added == 0 {
        return Err(HttpError::TlsConfig(format!(
            "none of the {} native root CA certificates could be parsed",
            certs.len()
        )));
    }

    let config = rustls::ClientConfig::builder_with_provider(crypto_provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| HttpError::TlsConfig(format!("failed to set TLS protocol versions: {e}")))?
        .with_root_certificates(roots)
        .with_no_client_auth();

    Ok(config)
}
