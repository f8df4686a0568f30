//! Certificate forgery for a transparent TLS-intercepting proxy.
//!
//! [`ForgeryEngine`] owns a root CA plus one shared server and one shared
//! client keypair, all persisted below a configuration directory. For every
//! intercepted destination it forges a leaf certificate signed by that root and
//! caches it, so repeated connections to the same destination see the same
//! certificate.

mod backend;
mod cache;
mod certificate_backend_rcgen;
mod certificate_spec;
mod config;
mod engine;
mod errors;
mod extensions;
mod handles;
mod key_backend_openssl;
mod key_store;
mod paths;
mod trust_anchor;

pub use backend::{CertificateBackend, KeyBackend};
pub use cache::{CacheInsertError, CertificateCache, DestinationIdentity, ServerCertificateEntry};
pub use certificate_backend_rcgen::{RcgenCertificateBackend, FORGED_MARK_TEXT};
pub use certificate_spec::{
    CertificateSpec, KeySpec, CLIENT_KEY_DESCRIPTION, LEAF_VALIDITY, ROOT_KEY_DESCRIPTION,
    ROOT_VALIDITY, SERVER_KEY_DESCRIPTION, VALIDITY_PREDATE,
};
pub use config::{
    EcCurve, ForgeConfig, ForgeConfigError, KeyAlgorithm, DEFAULT_CONFIG_DIR,
    DEFAULT_ROOT_COMMON_NAME,
};
pub use engine::{ForgeMetricsSnapshot, ForgeryEngine};
pub use errors::{BackendError, ForgeError, InitError};
pub use handles::{Certificate, CertificateIssuer, CertificateSummary, Keypair};
pub use key_backend_openssl::OpensslKeyBackend;
pub use key_store::KeyStore;
pub use paths::{
    ensure_directory_exists, ConfigPaths, CLIENT_KEY_FILE, ROOT_CERTIFICATE_FILE, ROOT_KEY_FILE,
    SERVER_KEY_FILE,
};
pub use trust_anchor::RootTrustAnchor;
