use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use openssl::nid::Nid;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_CONFIG_DIR: &str = "mitm-forge";
pub const DEFAULT_ROOT_COMMON_NAME: &str = "mitm-forge root CA";

const RSA_MIN_MODULUS_BITS: u32 = 2048;
// ring, which signs for rcgen, loads RSA keys up to 4096 bits
const RSA_MAX_MODULUS_BITS: u32 = 4096;

/// Named curves usable for forged identities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EcCurve {
    Secp256r1,
    Secp384r1,
}

impl EcCurve {
    pub fn name(self) -> &'static str {
        match self {
            Self::Secp256r1 => "secp256r1",
            Self::Secp384r1 => "secp384r1",
        }
    }

    pub(crate) fn nid(self) -> Nid {
        match self {
            Self::Secp256r1 => Nid::X9_62_PRIME256V1,
            Self::Secp384r1 => Nid::SECP384R1,
        }
    }

    pub(crate) fn from_nid(nid: Nid) -> Option<Self> {
        if nid == Nid::X9_62_PRIME256V1 {
            Some(Self::Secp256r1)
        } else if nid == Nid::SECP384R1 {
            Some(Self::Secp384r1)
        } else {
            None
        }
    }
}

impl FromStr for EcCurve {
    type Err = ForgeConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "secp256r1" | "prime256v1" | "p-256" => Ok(Self::Secp256r1),
            "secp384r1" | "p-384" => Ok(Self::Secp384r1),
            other => Err(ForgeConfigError::UnsupportedCurve(other.to_string())),
        }
    }
}

/// Cryptosystem and parameters shared by the root, server and client keys.
///
/// The textual form is `rsa:<modulus bits>` or `ecc:<curve name>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum KeyAlgorithm {
    Rsa { modulus_bits: u32 },
    Ecc { curve: EcCurve },
}

impl Default for KeyAlgorithm {
    fn default() -> Self {
        Self::Ecc {
            curve: EcCurve::Secp384r1,
        }
    }
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rsa { modulus_bits } => write!(f, "rsa:{modulus_bits}"),
            Self::Ecc { curve } => write!(f, "ecc:{}", curve.name()),
        }
    }
}

impl FromStr for KeyAlgorithm {
    type Err = ForgeConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let Some((kind, parameter)) = value.trim().split_once(':') else {
            return Err(ForgeConfigError::InvalidKeySpec(value.to_string()));
        };
        match kind.to_ascii_lowercase().as_str() {
            "rsa" => {
                let modulus_bits = parameter
                    .trim()
                    .parse::<u32>()
                    .map_err(|_| ForgeConfigError::InvalidKeySpec(value.to_string()))?;
                if !(RSA_MIN_MODULUS_BITS..=RSA_MAX_MODULUS_BITS).contains(&modulus_bits) {
                    return Err(ForgeConfigError::RsaModulusOutOfRange(modulus_bits));
                }
                Ok(Self::Rsa { modulus_bits })
            }
            "ecc" | "ec" => Ok(Self::Ecc {
                curve: parameter.parse()?,
            }),
            _ => Err(ForgeConfigError::InvalidKeySpec(value.to_string())),
        }
    }
}

impl TryFrom<String> for KeyAlgorithm {
    type Error = ForgeConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<KeyAlgorithm> for String {
    fn from(value: KeyAlgorithm) -> Self {
        value.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ForgeConfig {
    pub config_dir: PathBuf,
    pub keyspec: KeyAlgorithm,
    pub root_common_name: String,
    pub mark_forged_certificates: bool,
    pub crl_uri: Option<String>,
    pub ocsp_responder_uri: Option<String>,
    pub dump_certificates: bool,
    /// Upper bound on cached server certificates; unbounded when absent.
    pub max_cached_certificates: Option<usize>,
}

impl Default for ForgeConfig {
    fn default() -> Self {
        Self {
            config_dir: PathBuf::from(DEFAULT_CONFIG_DIR),
            keyspec: KeyAlgorithm::default(),
            root_common_name: DEFAULT_ROOT_COMMON_NAME.to_string(),
            mark_forged_certificates: true,
            crl_uri: None,
            ocsp_responder_uri: None,
            dump_certificates: false,
            max_cached_certificates: None,
        }
    }
}

impl ForgeConfig {
    pub fn with_config_dir(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
            ..Self::default()
        }
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ForgeConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|error| ForgeConfigError::Read {
            path: path.to_path_buf(),
            detail: error.to_string(),
        })?;
        let config = serde_json::from_str::<Self>(&raw)
            .map_err(|error| ForgeConfigError::Parse(error.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ForgeConfigError> {
        if self.config_dir.as_os_str().is_empty() {
            return Err(ForgeConfigError::EmptyConfigDir);
        }
        if self.root_common_name.trim().is_empty() {
            return Err(ForgeConfigError::EmptyRootCommonName);
        }
        require_non_empty_if_set(self.crl_uri.as_deref(), "crl_uri")?;
        require_non_empty_if_set(self.ocsp_responder_uri.as_deref(), "ocsp_responder_uri")?;
        if self.max_cached_certificates == Some(0) {
            return Err(ForgeConfigError::ZeroCacheLimit);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ForgeConfigError {
    #[error("config_dir must not be empty")]
    EmptyConfigDir,
    #[error("root_common_name must not be empty")]
    EmptyRootCommonName,
    #[error("{field} must not be empty when set")]
    EmptyUri { field: &'static str },
    #[error("invalid keyspec {0:?}: expected rsa:<bits> or ecc:<curve>")]
    InvalidKeySpec(String),
    #[error("unsupported elliptic curve {0:?}: expected secp256r1 or secp384r1")]
    UnsupportedCurve(String),
    #[error("RSA modulus of {0} bits is outside 2048..=4096")]
    RsaModulusOutOfRange(u32),
    #[error("max_cached_certificates must be greater than zero when set")]
    ZeroCacheLimit,
    #[error("failed to read config file {}: {detail}", path.display())]
    Read { path: PathBuf, detail: String },
    #[error("failed to parse config file: {0}")]
    Parse(String),
}

fn require_non_empty_if_set(
    value: Option<&str>,
    field: &'static str,
) -> Result<(), ForgeConfigError> {
    match value {
        Some(text) if text.trim().is_empty() => Err(ForgeConfigError::EmptyUri { field }),
        _ => Ok(()),
    }
}
