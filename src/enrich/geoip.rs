use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

const IP_API_URL: &str = "http://ip-api.com/json";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeoInfo {
    pub country_code: String,
    pub organization: String,
}

impl GeoInfo {
    pub fn is_empty(&self) -> bool {
        self.country_code.is_empty() && self.organization.is_empty()
    }

    pub fn flag(&self) -> String {
        country_flag(&self.country_code)
    }
}

/// Geo-IP provider. Unreachable services yield an empty `GeoInfo`.
pub trait GeoLookup: Send + Sync {
    fn lookup(&self, ip: IpAddr) -> GeoInfo;
}

/// Stand-in used when geo lookups are disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoGeoLookup;

impl GeoLookup for NoGeoLookup {
    fn lookup(&self, _ip: IpAddr) -> GeoInfo {
        GeoInfo::default()
    }
}

#[derive(Deserialize)]
struct IpApiItem {
    status: String,
    #[serde(rename = "countryCode", default)]
    country_code: Option<String>,
    #[serde(default)]
    org: Option<String>,
}

/// ip-api.com single-address lookups.
pub struct IpApiLookup {
    client: reqwest::blocking::Client,
}

impl IpApiLookup {
    pub fn new(timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::blocking::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

impl GeoLookup for IpApiLookup {
    fn lookup(&self, ip: IpAddr) -> GeoInfo {
        let url = format!("{IP_API_URL}/{ip}?fields=status,countryCode,org");
        let item = match self
            .client
            .get(&url)
            .send()
            .and_then(|resp| resp.error_for_status())
            .and_then(|resp| resp.json::<IpApiItem>())
        {
            Ok(item) => item,
            Err(e) => {
                debug!(%ip, error = %e, "geo lookup failed");
                return GeoInfo::default();
            }
        };
        if item.status != "success" {
            return GeoInfo::default();
        }
        GeoInfo {
            country_code: item.country_code.unwrap_or_default(),
            organization: item.org.map(|s| s.trim().to_string()).unwrap_or_default(),
        }
    }
}

/// Addresses that never leave the host or site: loopback, link-local,
/// unspecified, private ranges and carrier-grade NAT. Unparsable input
/// counts as local.
pub fn is_local_or_private(addr: &str) -> bool {
    match addr.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => is_local_v4(&v4),
        Ok(IpAddr::V6(v6)) => is_local_v6(&v6),
        Err(_) => true,
    }
}

fn is_local_v4(ip: &Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    ip.is_loopback()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_private()
        || ip.is_broadcast()
        || (a == 100 && (b & 0xC0) == 64)
}

fn is_local_v6(ip: &Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_local_v4(&v4);
    }
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        || (first & 0xffc0) == 0xfe80
        || (first & 0xfe00) == 0xfc00
}

/// Regional-indicator pair for a two-letter country code; empty otherwise.
pub fn country_flag(code: &str) -> String {
    if code.len() != 2 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return String::new();
    }
    code.chars()
        .filter_map(|c| char::from_u32(0x1F1E6 + (c.to_ascii_uppercase() as u32 - 'A' as u32)))
        .collect()
}
