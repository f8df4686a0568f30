use crate::backend::CertificateBackend;
use crate::certificate_spec::{
    CertificateSpec, ROOT_KEY_DESCRIPTION, ROOT_VALIDITY, VALIDITY_PREDATE,
};
use crate::config::ForgeConfig;
use crate::errors::InitError;
use crate::handles::{Certificate, CertificateIssuer, Keypair};
use crate::key_store::KeyStore;
use crate::paths::ConfigPaths;

/// The self-signed root certificate every forged leaf chains to.
///
/// The root is prepared for signing once, here, and reused for every leaf.
#[derive(Debug)]
pub struct RootTrustAnchor {
    issuer: CertificateIssuer,
}

impl RootTrustAnchor {
    /// Loads `root.crt` or creates it from the root keypair. Must run after
    /// [`KeyStore::initialize`].
    pub fn initialize(
        paths: &ConfigPaths,
        keys: &KeyStore,
        config: &ForgeConfig,
        backend: &dyn CertificateBackend,
    ) -> Result<Self, InitError> {
        let path = paths.root_certificate();
        let root_key = keys.root_key();
        let spec = CertificateSpec {
            description: ROOT_KEY_DESCRIPTION,
            subject_key: &root_key,
            issuer_key: &root_key,
            issuer: None,
            common_name: config.root_common_name.clone(),
            san_dns_hostname: None,
            san_ipv4_address: None,
            is_ca: true,
            mark_forged: config.mark_forged_certificates,
            validity_predate: VALIDITY_PREDATE,
            validity: ROOT_VALIDITY,
            crl_uri: None,
            ocsp_responder_uri: None,
        };

        let certificate = backend
            .load_or_create_certificate(&spec, &path)
            .map_err(|source| {
                tracing::error!(
                    path = %path.display(),
                    error = %source,
                    "unable to load or create root certificate"
                );
                InitError::RootCertificate {
                    path: path.clone(),
                    source,
                }
            })?;
        tracing::debug!(
            path = %path.display(),
            summary = %certificate.summary(),
            "using root certificate"
        );

        let issuer = CertificateIssuer::new(certificate, root_key).map_err(|source| {
            tracing::error!(
                path = %path.display(),
                error = %source,
                "unable to prepare root certificate for signing"
            );
            InitError::RootCertificate {
                path: path.clone(),
                source,
            }
        })?;
        Ok(Self { issuer })
    }

    pub fn root_certificate(&self) -> Certificate {
        self.issuer.certificate().clone()
    }

    pub fn root_key(&self) -> Keypair {
        self.issuer.key().clone()
    }

    pub(crate) fn certificate_ref(&self) -> &Certificate {
        self.issuer.certificate()
    }

    pub(crate) fn issuer_ref(&self) -> &CertificateIssuer {
        &self.issuer
    }
}
