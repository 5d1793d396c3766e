pub mod geoip;
pub mod resolver;

use std::collections::HashMap;
use std::hash::Hash;
use std::net::IpAddr;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

use crate::core::connection::Connection;
pub use geoip::{country_flag, is_local_or_private, GeoInfo, GeoLookup, IpApiLookup, NoGeoLookup};
pub use resolver::{NameResolver, SystemResolver};

/// Labels resolved for one connection, for the detail view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Enrichment {
    pub local_host: String,
    pub local_service: String,
    pub remote_host: String,
    pub remote_service: String,
    pub geo: Option<GeoInfo>,
}

#[derive(Debug)]
struct Memo<K, V> {
    entries: RwLock<HashMap<K, V>>,
}

impl<K: Eq + Hash, V: Clone> Memo<K, V> {
    fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn get(&self, key: &K) -> Option<V> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn insert(&self, key: K, value: V) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, value);
    }

    fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Process-lifetime memo of name and geo lookups, safe to share between
/// threads. Entries are never evicted.
///
/// `None` entries record a finished lookup with nothing better than the raw
/// value. Failed or timed-out name lookups are not stored, so they are
/// retried on the next call.
pub struct EnrichmentCache {
    resolver: Arc<dyn NameResolver>,
    geo: Arc<dyn GeoLookup>,
    hosts: Memo<String, Option<String>>,
    services: Memo<(u16, bool), Option<String>>,
    geos: Memo<String, GeoInfo>,
}

impl EnrichmentCache {
    pub fn new(resolver: Arc<dyn NameResolver>, geo: Arc<dyn GeoLookup>) -> Self {
        Self {
            resolver,
            geo,
            hosts: Memo::new(),
            services: Memo::new(),
            geos: Memo::new(),
        }
    }

    /// Hostname for `addr`, or `addr` itself. May block up to the resolver's
    /// timeout on a cache miss.
    pub fn host_label(&self, addr: &str) -> String {
        if let Some(hit) = self.hosts.get(&addr.to_string()) {
            return hit.unwrap_or_else(|| addr.to_string());
        }
        let Ok(ip) = addr.parse::<IpAddr>() else {
            return addr.to_string();
        };
        match self.resolver.reverse(ip) {
            Ok(name) => {
                self.hosts.insert(addr.to_string(), name.clone());
                name.unwrap_or_else(|| addr.to_string())
            }
            Err(e) => {
                debug!(%addr, error = %e, "reverse lookup fell back to address");
                addr.to_string()
            }
        }
    }

    /// Cached hostname without triggering a lookup.
    pub fn cached_host(&self, addr: &str) -> Option<String> {
        self.hosts.get(&addr.to_string()).flatten()
    }

    pub fn is_host_cached(&self, addr: &str) -> bool {
        self.hosts.get(&addr.to_string()).is_some()
    }

    /// Service name for `port`, or the port number as text.
    pub fn service_label(&self, port: u16, proto: &str) -> String {
        let udp = proto.starts_with("udp");
        if port == 0 {
            return "*".to_string();
        }
        if let Some(hit) = self.services.get(&(port, udp)) {
            return hit.unwrap_or_else(|| port.to_string());
        }
        match self.resolver.service(port, udp) {
            Ok(name) => {
                self.services.insert((port, udp), name.clone());
                name.unwrap_or_else(|| port.to_string())
            }
            Err(e) => {
                debug!(port, error = %e, "service lookup fell back to port");
                port.to_string()
            }
        }
    }

    /// Geo data for a public address; local and private addresses return an
    /// empty result without touching the lookup service or the cache.
    pub fn geo(&self, addr: &str) -> GeoInfo {
        if is_local_or_private(addr) {
            return GeoInfo::default();
        }
        if let Some(hit) = self.geos.get(&addr.to_string()) {
            return hit;
        }
        let Ok(ip) = addr.parse::<IpAddr>() else {
            return GeoInfo::default();
        };
        let info = self.geo.lookup(ip);
        self.geos.insert(addr.to_string(), info.clone());
        info
    }

    pub fn cached_geo(&self, addr: &str) -> Option<GeoInfo> {
        self.geos.get(&addr.to_string())
    }

    /// Geo data for the address that best represents `conn`: the remote
    /// side, else the local side, else nothing.
    pub fn geo_for(&self, conn: &Connection) -> Option<GeoInfo> {
        geo_address(conn).map(|addr| self.geo(addr))
    }

    pub fn enrich(&self, conn: &Connection) -> Enrichment {
        let (remote_host, remote_service) = if conn.has_remote() {
            (
                self.host_label(&conn.raddr),
                self.service_label(conn.rport, &conn.proto),
            )
        } else {
            ("*".to_string(), "*".to_string())
        };
        Enrichment {
            local_host: self.host_label(&conn.laddr),
            local_service: self.service_label(conn.lport, &conn.proto),
            remote_host,
            remote_service,
            geo: self.geo_for(conn).filter(|geo| !geo.is_empty()),
        }
    }

    pub fn host_entries(&self) -> usize {
        self.hosts.len()
    }

    pub fn geo_entries(&self) -> usize {
        self.geos.len()
    }
}

/// The remote address when it is public, else the local one when public.
pub fn geo_address(conn: &Connection) -> Option<&str> {
    if conn.has_remote() && !is_local_or_private(&conn.raddr) {
        return Some(conn.raddr.as_str());
    }
    if !is_local_or_private(&conn.laddr) {
        return Some(conn.laddr.as_str());
    }
    None
}
