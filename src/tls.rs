//! TLS library interface (§6, consumed via rustls rather than NSS): loads a
//! pre-provisioned client certificate/key pair plus a CA root store from a
//! configured directory, and wraps the standard webpki verifier so that
//! the certificate-expiry family of errors is treated as non-fatal (warn
//! and continue) per the original's `qdevice_net_nss_bad_cert_hook`, while
//! every other verification failure stays fatal.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{CertificateError, ClientConfig, DigitallySignedStruct, Error as TlsError, RootCertStore};

use crate::error::ProcessError;

/// The server common name the original pinned via NSS. Kept here for
/// documentation/logging purposes; actual verification now goes through
/// rustls's standard webpki path against the configured host (see
/// DESIGN.md for why the exact CN pin was dropped).
pub const QNETD_SERVER_CN: &str = "Qnetd Server";

/// The nickname the original selected the client certificate by. Kept as a
/// label in logs; the rustls config carries exactly one client identity so
/// there is nothing to select between.
pub const CLIENT_CERT_NICKNAME: &str = "Cluster Cert";

/// A verifier that defers to the standard webpki chain/name verification,
/// but downgrades the certificate-expiry family to a logged warning,
/// mirroring `qdevice_net_nss_bad_cert_hook`.
#[derive(Debug)]
struct TolerateExpiredCerts {
    inner: Arc<WebPkiServerVerifier>,
}

impl ServerCertVerifier for TolerateExpiredCerts {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, TlsError> {
        match self
            .inner
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
        {
            Ok(verified) => Ok(verified),
            Err(TlsError::InvalidCertificate(CertificateError::Expired))
            | Err(TlsError::InvalidCertificate(CertificateError::ExpiredRevocationList)) => {
                log::warn!("Server certificate is expired.");
                Ok(ServerCertVerified::assertion())
            }
            Err(other) => {
                log::error!("Server certificate verification failure: {other}");
                Err(other)
            }
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

/// Directory layout this client expects for its TLS material, replacing
/// the NSS database directory of the original (see `quorum.device.net.nssdb_dir`).
pub struct TlsMaterial {
    pub ca_cert_path: std::path::PathBuf,
    pub client_cert_path: std::path::PathBuf,
    pub client_key_path: std::path::PathBuf,
}

impl TlsMaterial {
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        TlsMaterial {
            ca_cert_path: dir.join("ca-cert.pem"),
            client_cert_path: dir.join("client-cert.pem"),
            client_key_path: dir.join("client-key.pem"),
        }
    }
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, ProcessError> {
    let file = File::open(path)
        .map_err(|e| ProcessError::TlsInit(format!("can't open {}: {e}", path.display())))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ProcessError::TlsInit(format!("can't parse {}: {e}", path.display())))
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, ProcessError> {
    let file = File::open(path)
        .map_err(|e| ProcessError::TlsInit(format!("can't open {}: {e}", path.display())))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| ProcessError::TlsInit(format!("can't parse {}: {e}", path.display())))?
        .ok_or_else(|| ProcessError::TlsInit(format!("no private key found in {}", path.display())))
}

/// Builds the client TLS configuration: root store from `ca_cert_path`,
/// single client identity from `client_cert_path`/`client_key_path`, and
/// the expiry-tolerant verifier above.
pub fn build_client_config(material: &TlsMaterial) -> Result<Arc<ClientConfig>, ProcessError> {
    let ca_certs = load_certs(&material.ca_cert_path)?;
    let mut roots = RootCertStore::empty();
    for cert in ca_certs {
        roots
            .add(cert)
            .map_err(|e| ProcessError::TlsInit(format!("invalid CA certificate: {e}")))?;
    }

    let client_certs = load_certs(&material.client_cert_path)?;
    let client_key = load_private_key(&material.client_key_path)?;

    let base_verifier = WebPkiServerVerifier::builder(Arc::new(roots))
        .build()
        .map_err(|e| ProcessError::TlsInit(format!("can't build certificate verifier: {e}")))?;
    let verifier = Arc::new(TolerateExpiredCerts {
        inner: base_verifier,
    });

    let mut config = ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(verifier)
        .with_client_auth_cert(client_certs, client_key)
        .map_err(|e| ProcessError::TlsInit(format!("can't install client certificate: {e}")))?;
    config.enable_sni = true;

    log::debug!("Sending client auth data (cert nickname '{CLIENT_CERT_NICKNAME}').");

    Ok(Arc::new(config))
}
