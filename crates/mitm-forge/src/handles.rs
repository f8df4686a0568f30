use std::fmt;
use std::sync::Arc;

use openssl::pkey::{Id, PKey, PKeyRef, Private};
use openssl::x509::X509;
use rcgen::{Issuer, PublicKeyData};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use time::OffsetDateTime;
use x509_parser::parse_x509_certificate;

use crate::config::{EcCurve, KeyAlgorithm};
use crate::errors::BackendError;

/// Shared handle to a private/public keypair.
///
/// Cloning acquires another reference; the key material is released when the
/// last clone is dropped.
#[derive(Clone)]
pub struct Keypair(Arc<KeyMaterial>);

struct KeyMaterial {
    description: String,
    algorithm: KeyAlgorithm,
    private_key: PKey<Private>,
    signing_key: rcgen::KeyPair,
}

impl Keypair {
    pub fn from_private_key(
        description: impl Into<String>,
        private_key: PKey<Private>,
    ) -> Result<Self, BackendError> {
        let algorithm = algorithm_of(&private_key)?;
        let pkcs8_pem = private_key.private_key_to_pem_pkcs8()?;
        let pkcs8_pem = String::from_utf8(pkcs8_pem)
            .map_err(|error| BackendError::InvalidMaterial(error.to_string()))?;
        let signing_key = rcgen::KeyPair::from_pem(&pkcs8_pem)?;
        Ok(Self(Arc::new(KeyMaterial {
            description: description.into(),
            algorithm,
            private_key,
            signing_key,
        })))
    }

    pub fn description(&self) -> &str {
        &self.0.description
    }

    pub fn algorithm(&self) -> KeyAlgorithm {
        self.0.algorithm
    }

    pub fn private_key(&self) -> &PKeyRef<Private> {
        &self.0.private_key
    }

    /// PKCS#8 encoding, suitable for a TLS server or client configuration.
    pub fn private_key_der(&self) -> PrivateKeyDer<'static> {
        PrivateKeyDer::from(PrivatePkcs8KeyDer::from(self.0.signing_key.serialize_der()))
    }

    pub fn private_key_pem(&self) -> String {
        self.0.signing_key.serialize_pem()
    }

    /// DER-encoded SubjectPublicKeyInfo.
    pub fn public_key_der(&self) -> Vec<u8> {
        self.0.signing_key.subject_public_key_info()
    }

    pub fn ptr_eq(left: &Self, right: &Self) -> bool {
        Arc::ptr_eq(&left.0, &right.0)
    }

    /// Number of live handles to this keypair, the engine's own included.
    pub fn holders(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    pub(crate) fn signing_key(&self) -> &rcgen::KeyPair {
        &self.0.signing_key
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("description", &self.0.description)
            .field("algorithm", &self.0.algorithm)
            .finish_non_exhaustive()
    }
}

fn algorithm_of(private_key: &PKeyRef<Private>) -> Result<KeyAlgorithm, BackendError> {
    match private_key.id() {
        Id::RSA => Ok(KeyAlgorithm::Rsa {
            modulus_bits: private_key.bits(),
        }),
        Id::EC => {
            let curve = private_key
                .ec_key()?
                .group()
                .curve_name()
                .and_then(EcCurve::from_nid)
                .ok_or_else(|| {
                    BackendError::UnsupportedKey("elliptic curve is not supported".to_string())
                })?;
            Ok(KeyAlgorithm::Ecc { curve })
        }
        other => Err(BackendError::UnsupportedKey(format!(
            "key type {} is not supported",
            other.as_raw()
        ))),
    }
}

/// Shared handle to an X.509 certificate, with the same ownership discipline as
/// [`Keypair`].
#[derive(Clone)]
pub struct Certificate(Arc<CertificateMaterial>);

struct CertificateMaterial {
    der: CertificateDer<'static>,
    pem: String,
    summary: CertificateSummary,
}

impl Certificate {
    pub fn from_parts(der: CertificateDer<'static>, pem: String) -> Result<Self, BackendError> {
        let summary = CertificateSummary::parse(&der)?;
        Ok(Self(Arc::new(CertificateMaterial { der, pem, summary })))
    }

    pub fn from_pem(pem: &str) -> Result<Self, BackendError> {
        let der = CertificateDer::from_pem_slice(pem.as_bytes()).map_err(|error| {
            BackendError::InvalidMaterial(format!("failed to parse certificate PEM: {error}"))
        })?;
        Self::from_parts(der, pem.to_string())
    }

    pub fn der(&self) -> &CertificateDer<'static> {
        &self.0.der
    }

    pub fn pem(&self) -> &str {
        &self.0.pem
    }

    pub fn summary(&self) -> &CertificateSummary {
        &self.0.summary
    }

    pub fn ptr_eq(left: &Self, right: &Self) -> bool {
        Arc::ptr_eq(&left.0, &right.0)
    }

    /// True when the certificate's public key is the public half of `key`.
    pub fn matches_key(&self, key: &Keypair) -> bool {
        X509::from_der(self.0.der.as_ref())
            .and_then(|parsed| parsed.public_key())
            .map(|public| public.public_eq(key.private_key()))
            .unwrap_or(false)
    }

    /// Number of live handles to this certificate, the cache's own included.
    pub fn holders(&self) -> usize {
        Arc::strong_count(&self.0)
    }
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Certificate").field(&self.0.summary).finish()
    }
}

/// A CA certificate and its keypair, parsed once into the form that signs
/// subordinate certificates.
#[derive(Clone)]
pub struct CertificateIssuer(Arc<IssuerMaterial>);

struct IssuerMaterial {
    certificate: Certificate,
    key: Keypair,
    signer: Issuer<'static, rcgen::KeyPair>,
}

impl CertificateIssuer {
    pub fn new(certificate: Certificate, key: Keypair) -> Result<Self, BackendError> {
        if !certificate.matches_key(&key) {
            return Err(BackendError::InvalidMaterial(format!(
                "issuer certificate does not belong to the {} keypair",
                key.description()
            )));
        }
        let signing_key = rcgen::KeyPair::from_pem(&key.private_key_pem())?;
        let signer = Issuer::from_ca_cert_der(certificate.der(), signing_key)?;
        Ok(Self(Arc::new(IssuerMaterial {
            certificate,
            key,
            signer,
        })))
    }

    pub fn certificate(&self) -> &Certificate {
        &self.0.certificate
    }

    pub fn key(&self) -> &Keypair {
        &self.0.key
    }

    pub fn ptr_eq(left: &Self, right: &Self) -> bool {
        Arc::ptr_eq(&left.0, &right.0)
    }

    pub(crate) fn signer(&self) -> &Issuer<'static, rcgen::KeyPair> {
        &self.0.signer
    }
}

impl fmt::Debug for CertificateIssuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateIssuer")
            .field("certificate", &self.0.certificate)
            .field("key", &self.0.key)
            .finish_non_exhaustive()
    }
}

/// Fields logged when a certificate is dumped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateSummary {
    pub subject: String,
    pub issuer: String,
    pub serial_hex: String,
    pub not_before: OffsetDateTime,
    pub not_after: OffsetDateTime,
    pub is_ca: bool,
}

impl CertificateSummary {
    fn parse(der: &CertificateDer<'_>) -> Result<Self, BackendError> {
        let (_, cert) = parse_x509_certificate(der.as_ref()).map_err(|error| {
            BackendError::InvalidMaterial(format!("failed to parse certificate DER: {error}"))
        })?;
        Ok(Self {
            subject: cert.subject().to_string(),
            issuer: cert.issuer().to_string(),
            serial_hex: cert.raw_serial_as_string(),
            not_before: cert.validity().not_before.to_datetime(),
            not_after: cert.validity().not_after.to_datetime(),
            is_ca: cert.is_ca(),
        })
    }
}

impl fmt::Display for CertificateSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "subject=\"{}\" issuer=\"{}\" serial={} valid={}..{}",
            self.subject, self.issuer, self.serial_hex, self.not_before, self.not_after
        )
    }
}
