use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use rustls::crypto::ring::default_provider;
use rustls::pki_types::CertificateDer;
use rustls::ServerConfig;

use crate::backend::{CertificateBackend, KeyBackend};
use crate::cache::{CertificateCache, DestinationIdentity};
use crate::certificate_backend_rcgen::RcgenCertificateBackend;
use crate::certificate_spec::{
    CertificateSpec, LEAF_VALIDITY, SERVER_KEY_DESCRIPTION, VALIDITY_PREDATE,
};
use crate::config::ForgeConfig;
use crate::errors::{ForgeError, InitError};
use crate::handles::{Certificate, Keypair};
use crate::key_backend_openssl::OpensslKeyBackend;
use crate::key_store::KeyStore;
use crate::paths::ConfigPaths;
use crate::trust_anchor::RootTrustAnchor;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForgeMetricsSnapshot {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub certificates_forged: u64,
    pub forge_failures: u64,
}

/// Issues forged server certificates for intercepted destinations.
///
/// One engine holds the three long-lived keypairs, the root trust anchor and
/// the cache of everything forged so far. It is shared across connection
/// handlers; forging for a given identity is serialized so every caller asking
/// for that identity receives the same certificate.
pub struct ForgeryEngine {
    config: ForgeConfig,
    keys: KeyStore,
    root: RootTrustAnchor,
    certificates: Arc<dyn CertificateBackend>,
    cache: Mutex<CertificateCache>,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    certificates_forged: AtomicU64,
    forge_failures: AtomicU64,
}

impl ForgeryEngine {
    /// Validates `config`, then loads or creates the keys and root certificate
    /// below `config.config_dir` with the openssl and rcgen backends.
    pub fn initialize(config: ForgeConfig) -> Result<Self, InitError> {
        Self::with_backends(
            config,
            &OpensslKeyBackend,
            Arc::new(RcgenCertificateBackend),
        )
    }

    pub fn with_backends(
        config: ForgeConfig,
        key_backend: &dyn KeyBackend,
        certificates: Arc<dyn CertificateBackend>,
    ) -> Result<Self, InitError> {
        config.validate()?;
        let paths = ConfigPaths::new(&config.config_dir);
        tracing::info!(
            config_dir = %paths.dir().display(),
            keyspec = %config.keyspec,
            "initializing certificate forgery"
        );

        let keys = KeyStore::initialize(&paths, config.keyspec, key_backend)?;
        let root = RootTrustAnchor::initialize(&paths, &keys, &config, certificates.as_ref())?;
        let cache = match config.max_cached_certificates {
            Some(limit) => CertificateCache::with_max_entries(limit),
            None => CertificateCache::new(),
        };

        Ok(Self {
            config,
            keys,
            root,
            certificates,
            cache: Mutex::new(cache),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            certificates_forged: AtomicU64::new(0),
            forge_failures: AtomicU64::new(0),
        })
    }

    /// Returns the certificate to present for `hostname` at `address`,
    /// forging and caching it on first use.
    ///
    /// `None` means the client sent no SNI. Such requests are matched by
    /// address alone and never share a certificate with a named request.
    pub fn forge_certificate_for_server(
        &self,
        hostname: Option<&str>,
        address: Ipv4Addr,
    ) -> Result<Certificate, ForgeError> {
        let mut cache = self.cache.lock().map_err(|_| ForgeError::LockPoisoned)?;

        if let Some(entry) = cache.lookup(hostname, address) {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(hostname, %address, "reusing forged certificate");
            return Ok(entry.certificate().clone());
        }
        self.cache_misses.fetch_add(1, Ordering::Relaxed);

        let identity = DestinationIdentity::new(hostname, address);
        tracing::debug!(hostname, %address, "forging certificate for {identity}");

        let spec = self.leaf_spec(hostname, address);
        let certificate = self.certificates.create_certificate(&spec).map_err(|source| {
            self.forge_failures.fetch_add(1, Ordering::Relaxed);
            tracing::error!(
                hostname,
                %address,
                error = %source,
                "could not create server certificate"
            );
            ForgeError::Construction {
                identity: identity.to_string(),
                source,
            }
        })?;

        let entry = cache.insert(hostname, address, certificate).map_err(|source| {
            self.forge_failures.fetch_add(1, Ordering::Relaxed);
            tracing::error!(
                hostname,
                %address,
                error = %source,
                "failed to add server certificate to the cache"
            );
            ForgeError::CacheExhausted {
                identity: identity.to_string(),
                source,
            }
        })?;
        self.certificates_forged.fetch_add(1, Ordering::Relaxed);

        if self.config.dump_certificates {
            let certificate = entry.certificate();
            tracing::debug!(
                hostname,
                %address,
                summary = %certificate.summary(),
                pem = certificate.pem(),
                "forged certificate"
            );
        }
        Ok(entry.certificate().clone())
    }

    /// TLS server configuration presenting the forged chain for a destination
    /// with the shared server key.
    pub fn server_config_for(
        &self,
        hostname: Option<&str>,
        address: Ipv4Addr,
    ) -> Result<Arc<ServerConfig>, ForgeError> {
        let certificate = self.forge_certificate_for_server(hostname, address)?;
        let server_config = ServerConfig::builder_with_provider(Arc::new(default_provider()))
            .with_safe_default_protocol_versions()?
            .with_no_client_auth()
            .with_single_cert(
                self.presented_chain(&certificate),
                self.keys.server_key_ref().private_key_der(),
            )?;
        Ok(Arc::new(server_config))
    }

    /// The chain a handshake layer presents: the leaf followed by the root.
    pub fn presented_chain(&self, leaf: &Certificate) -> Vec<CertificateDer<'static>> {
        vec![leaf.der().clone(), self.root.certificate_ref().der().clone()]
    }

    pub fn tls_server_key(&self) -> Keypair {
        self.keys.server_key()
    }

    pub fn tls_client_key(&self) -> Keypair {
        self.keys.client_key()
    }

    pub fn forged_root_certificate(&self) -> Certificate {
        self.root.root_certificate()
    }

    pub fn forged_root_key(&self) -> Keypair {
        self.root.root_key()
    }

    pub fn config(&self) -> &ForgeConfig {
        &self.config
    }

    /// Identities with a cached certificate, oldest first.
    pub fn cached_identities(&self) -> Result<Vec<DestinationIdentity>, ForgeError> {
        let cache = self.cache.lock().map_err(|_| ForgeError::LockPoisoned)?;
        Ok(cache
            .entries()
            .map(|entry| entry.identity().clone())
            .collect())
    }

    pub fn metrics_snapshot(&self) -> ForgeMetricsSnapshot {
        ForgeMetricsSnapshot {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            certificates_forged: self.certificates_forged.load(Ordering::Relaxed),
            forge_failures: self.forge_failures.load(Ordering::Relaxed),
        }
    }

    /// Releases the engine's references to every key and certificate. Handles
    /// still held by callers stay valid.
    pub fn shutdown(self) {
        let cached = match self.cache.lock() {
            Ok(cache) => cache.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        };
        tracing::info!(
            cached_certificates = cached,
            forged = self.certificates_forged.load(Ordering::Relaxed),
            "shutting down certificate forgery"
        );
    }

    fn leaf_spec<'a>(&'a self, hostname: Option<&'a str>, address: Ipv4Addr) -> CertificateSpec<'a> {
        CertificateSpec {
            description: SERVER_KEY_DESCRIPTION,
            subject_key: self.keys.server_key_ref(),
            issuer_key: self.keys.root_key_ref(),
            issuer: Some(self.root.issuer_ref()),
            common_name: hostname.map_or_else(|| address.to_string(), str::to_string),
            san_dns_hostname: hostname,
            san_ipv4_address: Some(address),
            is_ca: false,
            mark_forged: self.config.mark_forged_certificates,
            validity_predate: VALIDITY_PREDATE,
            validity: LEAF_VALIDITY,
            crl_uri: self.config.crl_uri.as_deref(),
            ocsp_responder_uri: self.config.ocsp_responder_uri.as_deref(),
        }
    }
}

impl std::fmt::Debug for ForgeryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForgeryEngine")
            .field("config", &self.config)
            .field("root", &self.root)
            .field("metrics", &self.metrics_snapshot())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::{ForgeMetricsSnapshot, ForgeryEngine};
    use crate::backend::CertificateBackend;
    use crate::cache::{CacheInsertError, DestinationIdentity};
    use crate::certificate_backend_rcgen::RcgenCertificateBackend;
    use crate::certificate_spec::CertificateSpec;
    use crate::config::ForgeConfig;
    use crate::errors::{BackendError, ForgeError};
    use crate::handles::Certificate;
    use crate::key_backend_openssl::OpensslKeyBackend;

    const ADDR: Ipv4Addr = Ipv4Addr::new(203, 0, 113, 7);

    #[derive(Default)]
    struct CountingCertificateBackend {
        fail_leaves: AtomicBool,
        leaves_created: AtomicUsize,
    }

    impl CertificateBackend for CountingCertificateBackend {
        fn load_or_create_certificate(
            &self,
            spec: &CertificateSpec<'_>,
            path: &Path,
        ) -> Result<Certificate, BackendError> {
            RcgenCertificateBackend.load_or_create_certificate(spec, path)
        }

        fn create_certificate(
            &self,
            spec: &CertificateSpec<'_>,
        ) -> Result<Certificate, BackendError> {
            if self.fail_leaves.load(Ordering::SeqCst) {
                return Err(BackendError::InvalidMaterial("injected failure".to_string()));
            }
            self.leaves_created.fetch_add(1, Ordering::SeqCst);
            RcgenCertificateBackend.create_certificate(spec)
        }
    }

    fn engine_with(
        config: ForgeConfig,
        backend: Arc<CountingCertificateBackend>,
    ) -> ForgeryEngine {
        ForgeryEngine::with_backends(config, &OpensslKeyBackend, backend).expect("engine")
    }

    #[test]
    fn engine_is_shareable_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ForgeryEngine>();
    }

    #[test]
    fn repeated_requests_construct_once() {
        let temp = tempfile::tempdir().expect("temp dir");
        let backend = Arc::new(CountingCertificateBackend::default());
        let engine = engine_with(ForgeConfig::with_config_dir(temp.path()), backend.clone());

        let first = engine
            .forge_certificate_for_server(Some("a.example"), ADDR)
            .expect("first");
        let second = engine
            .forge_certificate_for_server(Some("a.example"), ADDR)
            .expect("second");
        assert!(Certificate::ptr_eq(&first, &second));
        assert_eq!(backend.leaves_created.load(Ordering::SeqCst), 1);
        assert_eq!(
            engine.metrics_snapshot(),
            ForgeMetricsSnapshot {
                cache_hits: 1,
                cache_misses: 1,
                certificates_forged: 1,
                forge_failures: 0,
            }
        );
    }

    #[test]
    fn construction_failure_leaves_cache_untouched() {
        let temp = tempfile::tempdir().expect("temp dir");
        let backend = Arc::new(CountingCertificateBackend::default());
        let engine = engine_with(ForgeConfig::with_config_dir(temp.path()), backend.clone());

        backend.fail_leaves.store(true, Ordering::SeqCst);
        let error = engine
            .forge_certificate_for_server(Some("a.example"), ADDR)
            .expect_err("injected failure");
        match error {
            ForgeError::Construction { identity, .. } => {
                assert_eq!(identity, "a.example (203.0.113.7)")
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(engine.cached_identities().expect("identities").is_empty());
        assert_eq!(engine.metrics_snapshot().forge_failures, 1);

        backend.fail_leaves.store(false, Ordering::SeqCst);
        engine
            .forge_certificate_for_server(Some("a.example"), ADDR)
            .expect("retry succeeds");
        assert_eq!(backend.leaves_created.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn full_cache_fails_request_without_keeping_certificate() {
        let temp = tempfile::tempdir().expect("temp dir");
        let config = ForgeConfig {
            max_cached_certificates: Some(1),
            ..ForgeConfig::with_config_dir(temp.path())
        };
        let engine = engine_with(config, Arc::new(CountingCertificateBackend::default()));

        let kept = engine
            .forge_certificate_for_server(None, ADDR)
            .expect("first fits");
        let error = engine
            .forge_certificate_for_server(Some("b.example"), ADDR)
            .expect_err("cache full");
        assert!(
            matches!(
                error,
                ForgeError::CacheExhausted {
                    source: CacheInsertError::Full { limit: 1 },
                    ..
                }
            ),
            "{error}"
        );
        assert_eq!(
            engine.cached_identities().expect("identities"),
            vec![DestinationIdentity::new(None, ADDR)]
        );
        assert_eq!(
            engine.metrics_snapshot(),
            ForgeMetricsSnapshot {
                cache_hits: 0,
                cache_misses: 2,
                certificates_forged: 1,
                forge_failures: 1,
            }
        );
        let again = engine
            .forge_certificate_for_server(None, ADDR)
            .expect("cached entry still served");
        assert!(Certificate::ptr_eq(&kept, &again));
    }

    #[test]
    fn dumping_certificates_does_not_change_the_result() {
        let temp = tempfile::tempdir().expect("temp dir");
        let config = ForgeConfig {
            dump_certificates: true,
            ..ForgeConfig::with_config_dir(temp.path())
        };
        let engine = engine_with(config, Arc::new(CountingCertificateBackend::default()));

        let leaf = engine
            .forge_certificate_for_server(Some("dump.example"), ADDR)
            .expect("leaf");
        assert!(leaf.summary().subject.contains("dump.example"));
        assert!(leaf.pem().starts_with("-----BEGIN CERTIFICATE-----"));
        let again = engine
            .forge_certificate_for_server(Some("dump.example"), ADDR)
            .expect("cached leaf");
        assert!(Certificate::ptr_eq(&leaf, &again));
        assert_eq!(engine.metrics_snapshot().certificates_forged, 1);
    }

    #[test]
    fn handles_outlive_shutdown() {
        let temp = tempfile::tempdir().expect("temp dir");
        let engine = engine_with(
            ForgeConfig::with_config_dir(temp.path()),
            Arc::new(CountingCertificateBackend::default()),
        );
        let leaf = engine
            .forge_certificate_for_server(Some("keep.example"), ADDR)
            .expect("leaf");
        let root = engine.forged_root_certificate();
        let server_key = engine.tls_server_key();
        assert!(leaf.holders() >= 2);

        engine.shutdown();
        assert_eq!(leaf.holders(), 1);
        assert_eq!(root.holders(), 1);
        assert_eq!(server_key.holders(), 1);
        assert!(leaf.summary().subject.contains("keep.example"));
    }

    #[test]
    fn server_config_presents_leaf_then_root() {
        let temp = tempfile::tempdir().expect("temp dir");
        let engine = engine_with(
            ForgeConfig::with_config_dir(temp.path()),
            Arc::new(CountingCertificateBackend::default()),
        );
        let leaf = engine
            .forge_certificate_for_server(Some("tls.example"), ADDR)
            .expect("leaf");
        let chain = engine.presented_chain(&leaf);
        assert_eq!(chain.len(), 2);
        assert_eq!(&chain[0], leaf.der());
        assert_eq!(&chain[1], engine.forged_root_certificate().der());

        engine
            .server_config_for(Some("tls.example"), ADDR)
            .expect("server config");
        assert_eq!(engine.metrics_snapshot().certificates_forged, 1);
    }
}
