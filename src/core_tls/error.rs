// Gestion des erreurs pour le module TLS
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TlsError {
    #[error("Failed to load CA certificate: {0}")]
    CertificateLoadError(String),

    #[error("Invalid server name for TLS: {0}")]
    InvalidServerName(String),

    #[error("TLS handshake failed: {0}")]
    TlsHandshakeError(String),

    #[error("TLS configuration error: {0}")]
    TlsConfigError(String),

    #[error("TLS not configured")]
    TlsNotConfigured,
}

impl TlsError {
    /// Handshake failures are worth a reconnect, configuration problems are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TlsError::TlsHandshakeError(_))
    }

    pub fn to_log_message(&self) -> String {
        match self {
            TlsError::TlsNotConfigured => {
                "Unable to encrypt connection: TLS is not configured.".to_string()
            }
            _ => format!("Unable to encrypt connection: {}", self),
        }
    }
}
