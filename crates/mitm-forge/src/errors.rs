use std::path::PathBuf;

use thiserror::Error;

use crate::cache::CacheInsertError;
use crate::config::ForgeConfigError;

/// Failure reported by a key or certificate backend.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("openssl error: {0}")]
    Openssl(#[from] openssl::error::ErrorStack),
    #[error("certificate construction failed: {0}")]
    Rcgen(#[from] rcgen::Error),
    #[error("invalid key or certificate material: {0}")]
    InvalidMaterial(String),
    #[error("unsupported key: {0}")]
    UnsupportedKey(String),
    #[error("certificate {} does not match its private key", path.display())]
    KeyMismatch { path: PathBuf },
}

impl BackendError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Startup failure. The proxy must not intercept anything after one of these.
#[derive(Debug, Error)]
pub enum InitError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ForgeConfigError),
    #[error("cannot create configuration directory {}: {source}", path.display())]
    ConfigDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unable to load or create {description} private keypair at {}: {source}", path.display())]
    Key {
        description: String,
        path: PathBuf,
        #[source]
        source: BackendError,
    },
    #[error("unable to load or create root certificate at {}: {source}", path.display())]
    RootCertificate {
        path: PathBuf,
        #[source]
        source: BackendError,
    },
}

/// Per-connection failure. Only the affected connection is aborted.
#[derive(Debug, Error)]
pub enum ForgeError {
    #[error("could not create server certificate for {identity}: {source}")]
    Construction {
        identity: String,
        #[source]
        source: BackendError,
    },
    #[error("failed to add server certificate for {identity} to the cache: {source}")]
    CacheExhausted {
        identity: String,
        #[source]
        source: CacheInsertError,
    },
    #[error("failed to build TLS server configuration: {0}")]
    ServerConfig(#[from] rustls::Error),
    #[error("certificate cache lock poisoned")]
    LockPoisoned,
}
