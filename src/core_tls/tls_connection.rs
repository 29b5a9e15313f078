// Gestion des connexions TLS (côté client) pour rouilleftp
use crate::core_network::stream::{BoxedStream, ControlStream};
use crate::core_tls::error::TlsError;
use crate::core_tls::tls_config::TlsConfig;
use log::{debug, warn};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{ring, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

pub type PeerCertificates = Arc<Vec<CertificateDer<'static>>>;

pub struct TlsConnection {
    tls_connector: TlsConnector,
}

impl TlsConnection {
    pub fn new(config: &TlsConfig) -> Result<Self, TlsError> {
        config.validate()?;

        let provider = Arc::new(ring::default_provider());
        let builder = rustls::ClientConfig::builder_with_provider(Arc::clone(&provider))
            .with_safe_default_protocol_versions()
            .map_err(|e| TlsError::TlsConfigError(e.to_string()))?;

        let client_config = if config.accept_invalid_certs {
            warn!("TLS certificate verification disabled");
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate { provider }))
                .with_no_client_auth()
        } else {
            builder
                .with_root_certificates(load_root_store(config.ca_file.as_deref())?)
                .with_no_client_auth()
        };

        Ok(Self {
            tls_connector: TlsConnector::from(Arc::new(client_config)),
        })
    }

    /// Runs the client handshake over an already connected control stream.
    pub async fn connect_tls(
        &self,
        host: &str,
        stream: BoxedStream,
    ) -> Result<(BoxedStream, Option<PeerCertificates>), TlsError> {
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|e| TlsError::InvalidServerName(e.to_string()))?;

        let tls_stream = match self.tls_connector.connect(server_name, stream).await {
            Ok(s) => s,
            Err(e) => return Err(TlsError::TlsHandshakeError(e.to_string())),
        };

        let certificates = tls_stream.get_ref().1.peer_certificates().map(|chain| {
            Arc::new(
                chain
                    .iter()
                    .map(|c| c.clone().into_owned())
                    .collect::<Vec<_>>(),
            )
        });
        debug!(
            "TLS handshake with {} done ({} peer certificates)",
            host,
            certificates.as_ref().map_or(0, |c| c.len())
        );
        Ok((Box::new(tls_stream), certificates))
    }
}

fn load_root_store(ca_file: Option<&Path>) -> Result<rustls::RootCertStore, TlsError> {
    let mut roots = rustls::RootCertStore::empty();
    match ca_file {
        Some(path) => {
            let pem = match std::fs::read(path) {
                Ok(p) => p,
                Err(e) => return Err(TlsError::CertificateLoadError(e.to_string())),
            };
            for cert in rustls_pemfile::certs(&mut &pem[..]) {
                let cert = cert.map_err(|e| TlsError::CertificateLoadError(e.to_string()))?;
                roots
                    .add(cert)
                    .map_err(|e| TlsError::CertificateLoadError(e.to_string()))?;
            }
        }
        None => {
            let native = rustls_native_certs::load_native_certs();
            for e in &native.errors {
                warn!("Could not load a native root certificate: {}", e);
            }
            let (added, ignored) = roots.add_parsable_certificates(native.certs);
            debug!("Loaded {} native root certificates ({} ignored)", added, ignored);
        }
    }
    if roots.is_empty() {
        return Err(TlsError::CertificateLoadError(
            "no root certificate available".to_string(),
        ));
    }
    Ok(roots)
}

/// Urgent data cannot be sent through TLS, the abort sequence goes in-band only.
impl ControlStream for TlsStream<BoxedStream> {
    fn local_addr(&self) -> Option<SocketAddr> {
        self.get_ref().0.local_addr()
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.get_ref().0.peer_addr()
    }

    fn send_urgent(&mut self, _data: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "urgent data not available on an encrypted control connection",
        ))
    }
}

#[derive(Debug)]
struct AcceptAnyCertificate {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
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
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
