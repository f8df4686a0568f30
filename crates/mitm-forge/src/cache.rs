use std::collections::{HashMap, TryReserveError};
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Arc;

use thiserror::Error;

use crate::handles::Certificate;

/// Who a forged certificate was made for.
///
/// An absent hostname means the destination was identified by address only;
/// it never equals any present hostname, and hostnames compare exactly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DestinationIdentity {
    hostname: Option<String>,
    address: Ipv4Addr,
}

impl DestinationIdentity {
    pub fn new(hostname: Option<&str>, address: Ipv4Addr) -> Self {
        Self {
            hostname: hostname.map(str::to_string),
            address,
        }
    }

    pub fn hostname(&self) -> Option<&str> {
        self.hostname.as_deref()
    }

    pub fn address(&self) -> Ipv4Addr {
        self.address
    }
}

impl fmt::Display for DestinationIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.hostname {
            Some(hostname) => write!(f, "{hostname} ({})", self.address),
            None => write!(f, "{}", self.address),
        }
    }
}

#[derive(Debug)]
pub struct ServerCertificateEntry {
    identity: DestinationIdentity,
    certificate: Certificate,
}

impl ServerCertificateEntry {
    pub fn identity(&self) -> &DestinationIdentity {
        &self.identity
    }

    pub fn hostname(&self) -> Option<&str> {
        self.identity.hostname()
    }

    pub fn address(&self) -> Ipv4Addr {
        self.identity.address()
    }

    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }
}

#[derive(Debug, Error)]
pub enum CacheInsertError {
    #[error("cache growth allocation failed: {0}")]
    Allocation(#[from] TryReserveError),
    #[error("cache already holds the configured maximum of {limit} certificates")]
    Full { limit: usize },
}

/// Append-only table of forged server certificates.
///
/// Entries keep insertion order and are never evicted. The index maps each
/// identity to its first entry, so lookups behave like an in-order scan.
#[derive(Debug, Default)]
pub struct CertificateCache {
    entries: Vec<Arc<ServerCertificateEntry>>,
    index: HashMap<DestinationIdentity, usize>,
    max_entries: Option<usize>,
}

impl CertificateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// A cache that refuses to grow beyond `limit` entries.
    pub fn with_max_entries(limit: usize) -> Self {
        Self {
            max_entries: Some(limit),
            ..Self::default()
        }
    }

    pub fn lookup(
        &self,
        hostname: Option<&str>,
        address: Ipv4Addr,
    ) -> Option<Arc<ServerCertificateEntry>> {
        let identity = DestinationIdentity::new(hostname, address);
        self.index
            .get(&identity)
            .map(|position| Arc::clone(&self.entries[*position]))
    }

    /// Appends an entry without checking for an existing one; callers look up
    /// first. On error the certificate is dropped with the call.
    pub fn insert(
        &mut self,
        hostname: Option<&str>,
        address: Ipv4Addr,
        certificate: Certificate,
    ) -> Result<Arc<ServerCertificateEntry>, CacheInsertError> {
        if let Some(limit) = self.max_entries {
            if self.entries.len() >= limit {
                return Err(CacheInsertError::Full { limit });
            }
        }
        self.entries.try_reserve(1)?;
        self.index.try_reserve(1)?;

        let identity = DestinationIdentity::new(hostname, address);
        let entry = Arc::new(ServerCertificateEntry {
            identity: identity.clone(),
            certificate,
        });
        let position = self.entries.len();
        self.entries.push(Arc::clone(&entry));
        self.index.entry(identity).or_insert(position);
        Ok(entry)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in insertion order.
    pub fn entries(&self) -> impl Iterator<Item = &Arc<ServerCertificateEntry>> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::sync::{Arc, OnceLock};

    use rcgen::{CertificateParams, KeyPair};

    use super::{CacheInsertError, CertificateCache, DestinationIdentity};
    use crate::handles::Certificate;

    const ADDR_1: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
    const ADDR_2: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);

    fn certificate() -> Certificate {
        static KEY: OnceLock<KeyPair> = OnceLock::new();
        let key = KEY.get_or_init(|| KeyPair::generate().expect("key"));
        let cert = CertificateParams::default()
            .self_signed(key)
            .expect("self signed");
        Certificate::from_parts(cert.der().clone(), cert.pem()).expect("certificate")
    }

    #[test]
    fn address_only_and_hostname_identities_do_not_collide() {
        let mut cache = CertificateCache::new();
        let by_address = cache.insert(None, ADDR_1, certificate()).expect("insert");
        assert!(cache.lookup(Some("example.com"), ADDR_1).is_none());

        let by_name = cache
            .insert(Some("example.com"), ADDR_1, certificate())
            .expect("insert");
        let found_address = cache.lookup(None, ADDR_1).expect("address entry");
        let found_name = cache.lookup(Some("example.com"), ADDR_1).expect("name entry");
        assert!(Arc::ptr_eq(&found_address, &by_address));
        assert!(Arc::ptr_eq(&found_name, &by_name));
        assert!(!Certificate::ptr_eq(
            found_address.certificate(),
            found_name.certificate()
        ));
    }

    #[test]
    fn same_hostname_on_other_address_misses() {
        let mut cache = CertificateCache::new();
        cache.insert(Some("a.com"), ADDR_1, certificate()).expect("insert");
        assert!(cache.lookup(Some("a.com"), ADDR_2).is_none());
        assert!(cache.lookup(None, ADDR_2).is_none());
    }

    #[test]
    fn hostname_match_is_exact() {
        let mut cache = CertificateCache::new();
        cache.insert(Some("a.com"), ADDR_1, certificate()).expect("insert");
        assert!(cache.lookup(Some("A.com"), ADDR_1).is_none());
        assert!(cache.lookup(Some("a.com."), ADDR_1).is_none());
        assert!(cache.lookup(Some(""), ADDR_1).is_none());
    }

    #[test]
    fn empty_hostname_is_still_a_present_hostname() {
        let mut cache = CertificateCache::new();
        cache.insert(Some(""), ADDR_1, certificate()).expect("insert");
        assert!(cache.lookup(None, ADDR_1).is_none());
        assert!(cache.lookup(Some(""), ADDR_1).is_some());
    }

    #[test]
    fn duplicate_insert_keeps_first_entry_visible() {
        let mut cache = CertificateCache::new();
        let first = cache.insert(Some("a.com"), ADDR_1, certificate()).expect("insert");
        cache.insert(Some("a.com"), ADDR_1, certificate()).expect("insert");
        assert_eq!(cache.len(), 2);
        let found = cache.lookup(Some("a.com"), ADDR_1).expect("entry");
        assert!(Arc::ptr_eq(&found, &first));
    }

    #[test]
    fn entries_survive_growth_and_keep_insertion_order() {
        let mut cache = CertificateCache::new();
        let first = cache.insert(None, ADDR_1, certificate()).expect("insert");
        for octet in 0..64u8 {
            cache
                .insert(None, Ipv4Addr::new(192, 0, 2, octet), certificate())
                .expect("insert");
        }
        assert_eq!(first.address(), ADDR_1);
        let identities: Vec<DestinationIdentity> = cache
            .entries()
            .map(|entry| entry.identity().clone())
            .take(3)
            .collect();
        assert_eq!(
            identities,
            vec![
                DestinationIdentity::new(None, ADDR_1),
                DestinationIdentity::new(None, Ipv4Addr::new(192, 0, 2, 0)),
                DestinationIdentity::new(None, Ipv4Addr::new(192, 0, 2, 1)),
            ]
        );
    }

    #[test]
    fn bounded_cache_reports_exhaustion_and_drops_certificate() {
        let mut cache = CertificateCache::with_max_entries(1);
        cache.insert(None, ADDR_1, certificate()).expect("insert");

        let rejected = certificate();
        let observer = rejected.clone();
        let error = cache
            .insert(None, ADDR_2, rejected)
            .expect_err("full cache");
        assert!(matches!(error, CacheInsertError::Full { limit: 1 }), "{error}");
        assert_eq!(observer.holders(), 1);
        assert!(cache.lookup(None, ADDR_2).is_none());
    }

    #[test]
    fn identity_display_distinguishes_address_only() {
        assert_eq!(
            DestinationIdentity::new(Some("host.example"), ADDR_1).to_string(),
            "host.example (10.0.0.1)"
        );
        assert_eq!(DestinationIdentity::new(None, ADDR_1).to_string(), "10.0.0.1");
    }
}
