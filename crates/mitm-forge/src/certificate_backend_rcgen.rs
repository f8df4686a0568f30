use std::fs;
use std::io::ErrorKind;
use std::net::IpAddr;
use std::path::Path;

use rcgen::{
    BasicConstraints, CertificateParams, CrlDistributionPoint, DistinguishedName, DnType,
    ExtendedKeyUsagePurpose, IsCa, KeyUsagePurpose, SanType, SerialNumber,
};
use time::OffsetDateTime;

use crate::backend::CertificateBackend;
use crate::certificate_spec::CertificateSpec;
use crate::errors::BackendError;
use crate::extensions::{forged_mark_extension, ocsp_responder_extension};
use crate::handles::Certificate;
use crate::paths::write_new_file;

pub const FORGED_MARK_TEXT: &str = "mitm-forge forged certificate";

const SERIAL_NUMBER_BYTES: usize = 16;

/// Builds certificates with rcgen and persists them as PEM.
#[derive(Debug, Clone, Copy, Default)]
pub struct RcgenCertificateBackend;

impl CertificateBackend for RcgenCertificateBackend {
    fn load_or_create_certificate(
        &self,
        spec: &CertificateSpec<'_>,
        path: &Path,
    ) -> Result<Certificate, BackendError> {
        match fs::read_to_string(path) {
            Ok(pem) => load_stored_certificate(spec, path, &pem),
            Err(error) if error.kind() == ErrorKind::NotFound => {
                tracing::info!(
                    description = spec.description,
                    path = %path.display(),
                    self_signed = spec.is_self_signed(),
                    "creating certificate"
                );
                let certificate = self.create_certificate(spec)?;
                write_new_file(path, certificate.pem().as_bytes(), None)?;
                Ok(certificate)
            }
            Err(error) => Err(BackendError::io(path, error)),
        }
    }

    fn create_certificate(&self, spec: &CertificateSpec<'_>) -> Result<Certificate, BackendError> {
        let params = build_params(spec)?;
        let certificate = match spec.issuer {
            None => {
                if spec.subject_key.public_key_der() != spec.issuer_key.public_key_der() {
                    return Err(BackendError::InvalidMaterial(format!(
                        "self-signed {} certificate needs identical subject and issuer keys",
                        spec.description
                    )));
                }
                params.self_signed(spec.issuer_key.signing_key())?
            }
            Some(issuer) => {
                if issuer.key().public_key_der() != spec.issuer_key.public_key_der() {
                    return Err(BackendError::InvalidMaterial(format!(
                        "issuer for {} does not belong to the issuer key",
                        spec.description
                    )));
                }
                params.signed_by(spec.subject_key.signing_key(), issuer.signer())?
            }
        };
        Certificate::from_parts(certificate.der().clone(), certificate.pem())
    }
}

fn load_stored_certificate(
    spec: &CertificateSpec<'_>,
    path: &Path,
    pem: &str,
) -> Result<Certificate, BackendError> {
    let certificate = Certificate::from_pem(pem).map_err(|error| {
        BackendError::InvalidMaterial(format!("{}: {error}", path.display()))
    })?;
    // The stored certificate must belong to the key that will sign with it.
    if !certificate.matches_key(spec.subject_key) {
        return Err(BackendError::KeyMismatch {
            path: path.to_path_buf(),
        });
    }
    tracing::debug!(
        description = spec.description,
        path = %path.display(),
        "loaded stored certificate"
    );
    Ok(certificate)
}

fn build_params(spec: &CertificateSpec<'_>) -> Result<CertificateParams, BackendError> {
    let mut params = CertificateParams::default();

    let mut distinguished_name = DistinguishedName::new();
    distinguished_name.push(DnType::CommonName, spec.common_name.clone());
    params.distinguished_name = distinguished_name;

    if let Some(hostname) = spec.san_dns_hostname {
        params
            .subject_alt_names
            .push(SanType::DnsName(hostname.try_into()?));
    }
    if let Some(address) = spec.san_ipv4_address {
        params
            .subject_alt_names
            .push(SanType::IpAddress(IpAddr::V4(address)));
    }

    let not_before = OffsetDateTime::now_utc() - spec.validity_predate;
    params.not_before = not_before;
    params.not_after = not_before + spec.validity;
    params.serial_number = Some(random_serial_number()?);

    if spec.is_ca {
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
        ];
    } else {
        params.is_ca = IsCa::ExplicitNoCa;
        params.use_authority_key_identifier_extension = true;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
    }

    if let Some(crl_uri) = spec.crl_uri {
        params.crl_distribution_points = vec![CrlDistributionPoint {
            uris: vec![crl_uri.to_string()],
        }];
    }
    if let Some(ocsp_uri) = spec.ocsp_responder_uri {
        params
            .custom_extensions
            .push(ocsp_responder_extension(ocsp_uri)?);
    }
    if spec.mark_forged {
        params
            .custom_extensions
            .push(forged_mark_extension(FORGED_MARK_TEXT)?);
    }

    Ok(params)
}

fn random_serial_number() -> Result<SerialNumber, BackendError> {
    let mut bytes = [0u8; SERIAL_NUMBER_BYTES];
    openssl::rand::rand_bytes(&mut bytes)?;
    // positive, and no leading zero octet
    bytes[0] = (bytes[0] & 0x7f) | 0x01;
    Ok(SerialNumber::from_slice(&bytes))
}
