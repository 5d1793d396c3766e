use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One socket observed at a point in time, joined with its owning process.
///
/// Field names double as the stable keys of the structured output, so their
/// order here is the order consumers see.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Connection {
    pub pid: u32,
    pub process: String,
    pub user: String,
    pub uid: u32,
    pub proto: String,
    #[serde(rename = "ipversion")]
    pub ip_version: String,
    pub state: String,
    pub laddr: String,
    pub lport: u16,
    pub raddr: String,
    pub rport: u16,
    #[serde(rename = "if")]
    pub interface: String,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub rtt_ms: f64,
    pub mark: String,
    pub namespace: String,
    pub inode: u64,
    #[serde(with = "timestamp")]
    pub ts: DateTime<Utc>,
}

/// Key used to decide that two records from consecutive snapshots are the
/// same logical connection.
///
/// A pid or port reused within one poll interval looks like continuity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionIdentity {
    pub proto: String,
    pub laddr: String,
    pub lport: u16,
    pub raddr: String,
    pub rport: u16,
    pub pid: u32,
}

impl fmt::Display for ConnectionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}:{}|{}:{}|{}",
            self.proto, self.laddr, self.lport, self.raddr, self.rport, self.pid
        )
    }
}

impl Connection {
    pub fn identity(&self) -> ConnectionIdentity {
        ConnectionIdentity {
            proto: self.proto.clone(),
            laddr: self.laddr.clone(),
            lport: self.lport,
            raddr: self.raddr.clone(),
            rport: self.rport,
            pid: self.pid,
        }
    }

    pub fn is_tcp(&self) -> bool {
        self.proto == "tcp" || self.proto == "tcp6"
    }

    pub fn is_udp(&self) -> bool {
        self.proto == "udp" || self.proto == "udp6"
    }

    pub fn is_listening(&self) -> bool {
        self.state == "LISTEN"
    }

    pub fn is_established(&self) -> bool {
        self.state == "ESTABLISHED"
    }

    /// True when the remote side is a wildcard, i.e. nothing is connected.
    pub fn has_remote(&self) -> bool {
        !(self.raddr.is_empty() || self.raddr == "*" || self.rport == 0)
    }

    pub fn local_endpoint(&self) -> String {
        format!("{}:{}", self.laddr, self.lport)
    }

    /// `addr:port` of the peer, or `-` for unconnected sockets.
    pub fn remote_endpoint(&self) -> String {
        if self.has_remote() {
            format!("{}:{}", self.raddr, self.rport)
        } else {
            "-".to_string()
        }
    }
}

/// Millisecond-precision RFC 3339 timestamps for every serialized `ts` field.
pub mod timestamp {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub const FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f%:z";

    pub fn format(ts: &DateTime<Utc>) -> String {
        ts.format(FORMAT).to_string()
    }

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> Connection {
        Connection {
            pid: 1234,
            process: "nginx".to_string(),
            proto: "tcp".to_string(),
            state: "LISTEN".to_string(),
            laddr: "0.0.0.0".to_string(),
            lport: 80,
            raddr: "*".to_string(),
            ts: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            ..Default::default()
        }
    }

    #[test]
    fn identity_ignores_volatile_fields() {
        let a = sample();
        let mut b = sample();
        b.state = "CLOSE_WAIT".to_string();
        b.rx_bytes = 4096;
        b.ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 5).unwrap();
        assert_eq!(a.identity(), b.identity());
    }

    #[test]
    fn identity_includes_pid() {
        let a = sample();
        let mut b = sample();
        b.pid = 4321;
        assert_ne!(a.identity(), b.identity());
    }

    #[test]
    fn serializes_stable_field_names_in_order() {
        let json = serde_json::to_string(&sample()).unwrap();
        let keys = [
            "\"pid\"", "\"process\"", "\"user\"", "\"uid\"", "\"proto\"", "\"ipversion\"",
            "\"state\"", "\"laddr\"", "\"lport\"", "\"raddr\"", "\"rport\"", "\"if\"",
            "\"rx_bytes\"", "\"tx_bytes\"", "\"rtt_ms\"", "\"mark\"", "\"namespace\"",
            "\"inode\"", "\"ts\"",
        ];
        let mut last = 0;
        for key in keys {
            let pos = json.find(key).unwrap_or_else(|| panic!("missing {key} in {json}"));
            assert!(pos >= last, "{key} out of order");
            last = pos;
        }
        assert!(json.contains("\"ts\":\"2024-05-01T12:00:00.000+00:00\""));
    }

    #[test]
    fn missing_fields_default_on_load() {
        let conn: Connection =
            serde_json::from_str(r#"{"pid":7,"proto":"udp","lport":53}"#).unwrap();
        assert_eq!(conn.pid, 7);
        assert_eq!(conn.lport, 53);
        assert!(conn.process.is_empty());
        assert!(!conn.has_remote());
        assert_eq!(conn.remote_endpoint(), "-");
    }
}
