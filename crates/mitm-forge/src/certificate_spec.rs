use std::net::Ipv4Addr;
use std::time::Duration;

use crate::config::KeyAlgorithm;
use crate::handles::{CertificateIssuer, Keypair};

const DAY: Duration = Duration::from_secs(86_400);

/// Validity starts this long before "now" to tolerate client clock skew.
pub const VALIDITY_PREDATE: Duration = DAY;
pub const ROOT_VALIDITY: Duration = Duration::from_secs(DAY.as_secs() * 365 * 5);
pub const LEAF_VALIDITY: Duration = Duration::from_secs(DAY.as_secs() * 365);

pub const ROOT_KEY_DESCRIPTION: &str = "root";
pub const SERVER_KEY_DESCRIPTION: &str = "TLS server";
pub const CLIENT_KEY_DESCRIPTION: &str = "TLS client";

/// What to generate when a persisted key is missing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpec {
    pub algorithm: KeyAlgorithm,
    pub description: String,
}

impl KeySpec {
    pub fn new(algorithm: KeyAlgorithm, description: impl Into<String>) -> Self {
        Self {
            algorithm,
            description: description.into(),
        }
    }
}

/// Everything a certificate backend needs to build and sign one certificate.
///
/// `issuer` is `None` only for the self-signed root.
#[derive(Debug, Clone)]
pub struct CertificateSpec<'a> {
    pub description: &'a str,
    pub subject_key: &'a Keypair,
    pub issuer_key: &'a Keypair,
    pub issuer: Option<&'a CertificateIssuer>,
    pub common_name: String,
    pub san_dns_hostname: Option<&'a str>,
    pub san_ipv4_address: Option<Ipv4Addr>,
    pub is_ca: bool,
    pub mark_forged: bool,
    pub validity_predate: Duration,
    pub validity: Duration,
    pub crl_uri: Option<&'a str>,
    pub ocsp_responder_uri: Option<&'a str>,
}

impl CertificateSpec<'_> {
    pub fn is_self_signed(&self) -> bool {
        self.issuer.is_none()
    }
}
