// Configuration TLS pour rouilleftp
use crate::core_tls::error::TlsError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Chiffrement de la connexion de contrôle (AUTH TLS)
    pub encrypt_control: bool,

    /// Chiffrement des connexions de données (PBSZ 0 + PROT P)
    pub encrypt_data: bool,

    /// Certificat(s) CA au format PEM, sinon les racines du système
    pub ca_file: Option<PathBuf>,

    /// Accepte les certificats invalides (serveurs auto-signés)
    pub accept_invalid_certs: bool,
}

impl TlsConfig {
    /// Vérifie si la configuration TLS est valide
    pub fn validate(&self) -> Result<(), TlsError> {
        if self.encrypt_data && !self.encrypt_control {
            return Err(TlsError::TlsConfigError(
                "data encryption requires an encrypted control connection".to_string(),
            ));
        }

        if let Some(ca_file) = &self.ca_file {
            if !ca_file.exists() {
                return Err(TlsError::CertificateLoadError(format!(
                    "CA file not found: {:?}",
                    ca_file
                )));
            }
        }

        Ok(())
    }
}
