//! Certificate verification for the HTTP and WebSocket paths.
//!
//! Both paths honor the same [`TlsVerification`] mode: the HTTP client
//! through `reqwest`'s builder, the subscription socket through a rustls
//! [`ClientConfig`] handed to `tokio-tungstenite`.
//!
//! Unraid servers commonly present self-signed certificates, so besides the
//! default web PKI roots a private CA bundle can be trusted, or verification
//! switched off entirely.

use std::io::{BufReader, Cursor};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::crypto::CryptoProvider;
use rustls::{ClientConfig, RootCertStore};
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};

/// Errors raised while preparing TLS state.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("Failed to read CA bundle '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse CA bundle '{path}': {message}")]
    Parse { path: PathBuf, message: String },

    #[error("No certificates found in CA bundle '{0}'")]
    Empty(PathBuf),

    #[error("TLS configuration rejected: {0}")]
    Rustls(#[from] rustls::Error),
}

/// How the server certificate is checked.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TlsVerification {
    /// Verify against the bundled web PKI roots.
    #[default]
    Verify,
    /// Verify against the web PKI roots plus the certificates in a PEM file.
    CaBundle(PathBuf),
    /// Accept any certificate (self-signed servers on a trusted LAN).
    Disabled,
}

impl TlsVerification {
    /// Whether certificate checks are switched off.
    pub fn is_disabled(&self) -> bool {
        matches!(self, Self::Disabled)
    }
}

/// Load every certificate from a PEM bundle.
pub fn load_ca_bundle(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let pem = std::fs::read(path).map_err(|source| TlsError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut reader = BufReader::new(Cursor::new(pem));
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
    if certs.is_empty() {
        return Err(TlsError::Empty(path.to_path_buf()));
    }
    Ok(certs)
}

/// Apply a verification mode to a `reqwest` client builder.
pub(crate) fn configure_reqwest(
    mut builder: reqwest::ClientBuilder,
    verification: &TlsVerification,
) -> Result<reqwest::ClientBuilder, TlsError> {
    match verification {
        TlsVerification::Verify => {}
        TlsVerification::CaBundle(path) => {
            for cert in load_ca_bundle(path)? {
                let cert = reqwest::Certificate::from_der(cert.as_ref()).map_err(|e| {
                    TlsError::Parse {
                        path: path.clone(),
                        message: e.to_string(),
                    }
                })?;
                builder = builder.add_root_certificate(cert);
            }
        }
        TlsVerification::Disabled => {
            builder = builder.danger_accept_invalid_certs(true);
        }
    }
    Ok(builder)
}

/// Build the rustls configuration for `wss://` connections.
///
/// Uses the ring provider explicitly so no process-wide default has to be
/// installed first.
pub(crate) fn rustls_config(verification: &TlsVerification) -> Result<Arc<ClientConfig>, TlsError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()?;

    let config = match verification {
        TlsVerification::Disabled => builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(DangerousVerifier { provider }))
            .with_no_client_auth(),
        TlsVerification::Verify => builder
            .with_root_certificates(root_store(None)?)
            .with_no_client_auth(),
        TlsVerification::CaBundle(path) => builder
            .with_root_certificates(root_store(Some(path))?)
            .with_no_client_auth(),
    };
    Ok(Arc::new(config))
}

fn root_store(extra: Option<&Path>) -> Result<RootCertStore, TlsError> {
    let mut store = RootCertStore::empty();
    store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    if let Some(path) = extra {
        for cert in load_ca_bundle(path)? {
            store.add(cert)?;
        }
    }
    Ok(store)
}

/// Accepts every server certificate; signatures are still checked.
#[derive(Debug)]
struct DangerousVerifier {
    provider: Arc<CryptoProvider>,
}

impl rustls::client::danger::ServerCertVerifier for DangerousVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    // Self-signed throwaway certificate, only parsed, never trusted for anything.
    const TEST_PEM: &str = "-----BEGIN CERTIFICATE-----
MIIBkTCB+wIJAKHBfpegE3jEMA0GCSqGSIb3DQEBCwUAMBExDzANBgNVBAMMBnRl
c3RjYTAeFw0yMzAxMDEwMDAwMDBaFw0yNDAxMDEwMDAwMDBaMBExDzANBgNVBAMM
BnRlc3RjYTBcMA0GCSqGSIb3DQEBAQUAA0sAMEgCQQC7o96HtiK7onnPevKSE2LL
oSXwnmfYwZPV2bvfGS18lK8F+DL+42IjT3ucMXnLBhzNCLNKE8yCVK6LPlsvpNlX
AgMBAAGjUzBRMB0GA1UdDgQWBBQgHGHqPcVi1N4CG7IxDJaFMvP6XTAfBgNVHSME
GDAWgBQgHGHqPcVi1N4CG7IxDJaFMvP6XTAPBgNVHRMBAf8EBTADAQH/MA0GCSqG
SIb3DQEBCwUAA0EAGLJHfg9dS/T39L6VQLJeZcpH7mY8vKaM9dM/Zn3HMhfc0Yjv
3hxMPmPGjjpQ9JKaLI0Rq7n5oEUP+xluoAAfrQ==
-----END CERTIFICATE-----
";

    #[test]
    fn test_load_ca_bundle() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(TEST_PEM.as_bytes()).unwrap();

        let certs = load_ca_bundle(file.path()).unwrap();
        assert_eq!(certs.len(), 1);
    }

    #[test]
    fn test_load_ca_bundle_empty() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"not a certificate\n").unwrap();

        assert!(matches!(
            load_ca_bundle(file.path()),
            Err(TlsError::Empty(_))
        ));
    }

    #[test]
    fn test_load_ca_bundle_missing_file() {
        let err = load_ca_bundle(Path::new("/nonexistent/unraid-ca.pem")).unwrap_err();
        assert!(matches!(err, TlsError::Read { .. }));
        assert!(err.to_string().contains("/nonexistent/unraid-ca.pem"));
    }

    #[test]
    fn test_rustls_config_modes() {
        assert!(rustls_config(&TlsVerification::Verify).is_ok());
        assert!(rustls_config(&TlsVerification::Disabled).is_ok());
        assert!(
            rustls_config(&TlsVerification::CaBundle("/nonexistent/ca.pem".into())).is_err()
        );
    }

    #[test]
    fn test_configure_reqwest_disabled() {
        let builder = configure_reqwest(reqwest::Client::builder(), &TlsVerification::Disabled)
            .unwrap();
        assert!(builder.build().is_ok());
    }
}
