use std::path::Path;

use crate::certificate_spec::{CertificateSpec, KeySpec};
use crate::errors::BackendError;
use crate::handles::{Certificate, Keypair};

/// Loads persisted private keys, generating and persisting them on first use.
pub trait KeyBackend: Send + Sync {
    /// A second call with the same `path` returns equivalent key material.
    fn load_or_create_key(&self, spec: &KeySpec, path: &Path) -> Result<Keypair, BackendError>;
}

/// Builds and signs X.509 certificates from a [`CertificateSpec`].
pub trait CertificateBackend: Send + Sync {
    /// Loads the certificate stored at `path`, or creates, signs and persists it.
    fn load_or_create_certificate(
        &self,
        spec: &CertificateSpec<'_>,
        path: &Path,
    ) -> Result<Certificate, BackendError>;

    /// Always builds a fresh certificate; nothing is persisted.
    fn create_certificate(&self, spec: &CertificateSpec<'_>) -> Result<Certificate, BackendError>;
}
