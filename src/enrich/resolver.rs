use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use crate::error::LookupError;

/// Best-effort name lookups. `Ok(None)` means the lookup worked but there
/// is no better label than the raw value.
pub trait NameResolver: Send + Sync {
    fn reverse(&self, ip: IpAddr) -> Result<Option<String>, LookupError>;
    fn service(&self, port: u16, udp: bool) -> Result<Option<String>, LookupError>;
}

/// System resolver: reverse DNS through `getnameinfo`, service names from
/// the local services database.
pub struct SystemResolver {
    timeout: Duration,
}

impl SystemResolver {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for SystemResolver {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

impl NameResolver for SystemResolver {
    fn reverse(&self, ip: IpAddr) -> Result<Option<String>, LookupError> {
        let skip = match ip {
            IpAddr::V4(v4) => v4.is_link_local() || v4.is_unspecified(),
            IpAddr::V6(v6) => v6.is_unicast_link_local() || v6.is_unspecified(),
        };
        if skip {
            return Ok(None);
        }
        let name = resolve_with_timeout(ip, self.timeout)?;
        Ok((name != ip.to_string()).then_some(name))
    }

    fn service(&self, port: u16, udp: bool) -> Result<Option<String>, LookupError> {
        let mut flags = libc::NI_NUMERICHOST;
        if udp {
            flags |= libc::NI_DGRAM;
        }
        let sock = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
        let (_, service) = dns_lookup::getnameinfo(&sock, flags)
            .map_err(|e| LookupError::Failed(std::io::Error::from(e).to_string()))?;
        Ok((service != port.to_string()).then_some(service))
    }
}

/// Runs the blocking reverse lookup on a short-lived thread and gives up
/// after `timeout`. The thread is left to finish on its own.
fn resolve_with_timeout(ip: IpAddr, timeout: Duration) -> Result<String, LookupError> {
    let (tx, rx) = mpsc::sync_channel(1);

    thread::Builder::new()
        .name("rdns-query".into())
        .spawn(move || {
            let _ = tx.send(dns_lookup::lookup_addr(&ip));
        })
        .map_err(|e| LookupError::Failed(format!("spawn rdns thread: {e}")))?;

    match rx.recv_timeout(timeout) {
        Ok(Ok(name)) => Ok(name),
        Ok(Err(e)) => Err(LookupError::Failed(e.to_string())),
        Err(_) => Err(LookupError::Timeout),
    }
}
