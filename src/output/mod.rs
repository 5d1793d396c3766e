pub mod csv;
pub mod json;
pub mod plain;
pub mod stats;
pub mod table;

use std::fmt;
use std::str::FromStr;

use chrono::Local;

use crate::core::connection::{timestamp, Connection};
use crate::core::trace::{EventKind, TraceEvent};
use crate::enrich::EnrichmentCache;
use crate::error::QueryError;

/// Every field a listing can show. All but the last two are JSON keys.
pub const FIELDS: &[&str] = &[
    "pid", "process", "user", "uid", "proto", "ipversion", "state", "laddr", "lport", "raddr", "rport", "if",
    "rx_bytes", "tx_bytes", "rtt_ms", "mark", "namespace", "inode", "ts", "country", "org",
];

pub const TABLE_FIELDS: &[&str] = &["process", "pid", "proto", "state", "laddr", "lport", "raddr", "rport"];
pub const PLAIN_FIELDS: &[&str] = &["pid", "process", "user", "proto", "state", "laddr", "lport", "raddr", "rport"];
pub const CSV_FIELDS: &[&str] = &["pid", "process", "user", "uid", "proto", "state", "laddr", "lport", "raddr", "rport"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Table,
    Plain,
    Json,
    Csv,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "table" | "wide" => Ok(Self::Table),
            "plain" => Ok(Self::Plain),
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            other => Err(format!("invalid output format: {other} (expected table, plain, json or csv)")),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Table => "table",
            Self::Plain => "plain",
            Self::Json => "json",
            Self::Csv => "csv",
        };
        f.write_str(name)
    }
}

/// Splits a comma separated `--fields` value, rejecting unknown names.
pub fn parse_fields(spec: &str) -> Result<Vec<String>, QueryError> {
    spec.split(',')
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(|f| {
            let field = f.to_ascii_lowercase();
            if FIELDS.contains(&field.as_str()) {
                Ok(field)
            } else {
                Err(QueryError::UnknownField(f.to_string()))
            }
        })
        .collect()
}

/// The fields to print: the explicit selection, else `defaults` with `ts`
/// in front when asked for.
pub fn select_fields(selected: &[String], defaults: &[&str], with_ts: bool) -> Vec<String> {
    if !selected.is_empty() {
        return selected.to_vec();
    }
    let ts = with_ts.then(|| "ts".to_string());
    ts.into_iter().chain(defaults.iter().map(|f| f.to_string())).collect()
}

/// Text value of a field for the text renderers. Names and services are
/// looked up only when a cache is attached with name resolution on; geo
/// fields need a cache but not name resolution.
#[derive(Clone, Copy, Default)]
pub struct FieldMap<'a> {
    cache: Option<&'a EnrichmentCache>,
    names: bool,
    cached_only: bool,
}

impl<'a> FieldMap<'a> {
    /// Raw values only.
    pub fn numeric() -> Self {
        Self::default()
    }

    pub fn new(cache: &'a EnrichmentCache, names: bool) -> Self {
        Self {
            cache: Some(cache),
            names,
            cached_only: false,
        }
    }

    /// Names from what `cache` already holds; never starts a reverse lookup.
    pub fn cached(cache: &'a EnrichmentCache) -> Self {
        Self {
            cache: Some(cache),
            names: true,
            cached_only: true,
        }
    }

    fn names(&self) -> Option<&'a EnrichmentCache> {
        self.cache.filter(|_| self.names)
    }

    pub fn host(&self, addr: &str) -> String {
        match self.names() {
            Some(cache) if self.cached_only => cache.cached_host(addr).unwrap_or_else(|| addr.to_string()),
            Some(cache) if !addr.is_empty() && addr != "*" => cache.host_label(addr),
            _ => addr.to_string(),
        }
    }

    pub fn port(&self, port: u16, proto: &str) -> String {
        match self.names() {
            Some(cache) if port != 0 => cache.service_label(port, proto),
            _ => port.to_string(),
        }
    }

    pub fn value(&self, conn: &Connection, field: &str) -> String {
        match field {
            "pid" => conn.pid.to_string(),
            "process" => conn.process.clone(),
            "user" => conn.user.clone(),
            "uid" => conn.uid.to_string(),
            "proto" => conn.proto.clone(),
            "ipversion" => conn.ip_version.clone(),
            "state" => conn.state.clone(),
            "laddr" => self.host(&conn.laddr),
            "lport" => self.port(conn.lport, &conn.proto),
            "raddr" => self.host(&conn.raddr),
            "rport" => self.port(conn.rport, &conn.proto),
            "if" => conn.interface.clone(),
            "rx_bytes" => conn.rx_bytes.to_string(),
            "tx_bytes" => conn.tx_bytes.to_string(),
            "rtt_ms" => format!("{:.1}", conn.rtt_ms),
            "mark" => conn.mark.clone(),
            "namespace" => conn.namespace.clone(),
            "inode" => conn.inode.to_string(),
            "ts" => timestamp::format(&conn.ts),
            "country" => self.geo(conn).map(|g| g.country_code).unwrap_or_default(),
            "org" => self.geo(conn).map(|g| g.organization).unwrap_or_default(),
            _ => String::new(),
        }
    }

    fn geo(&self, conn: &Connection) -> Option<crate::enrich::GeoInfo> {
        self.cache.and_then(|cache| cache.geo_for(conn))
    }

    pub fn row(&self, conn: &Connection, fields: &[String]) -> Vec<String> {
        fields.iter().map(|f| self.value(conn, f)).collect()
    }
}

pub fn headers(fields: &[String]) -> Vec<String> {
    fields.iter().map(|f| f.to_uppercase()).collect()
}

/// One line per trace event: `[HH:MM:SS.mmm ]+|- PROTO STATE endpoints (proc[pid])`.
pub fn format_trace_event(event: &TraceEvent, values: &FieldMap<'_>, with_ts: bool) -> String {
    let conn = &event.connection;
    let ts = if with_ts {
        format!("{} ", event.ts.with_timezone(&Local).format("%H:%M:%S%.3f"))
    } else {
        String::new()
    };
    let icon = match event.event {
        EventKind::Opened => '+',
        EventKind::Closed => '-',
    };
    let state = if conn.state.is_empty() { "UNKNOWN" } else { &conn.state };

    let local = format!("{}:{}", values.host(&conn.laddr), values.port(conn.lport, &conn.proto));
    let endpoints = if conn.raddr.is_empty() || conn.raddr == "*" {
        local
    } else {
        format!(
            "{local}->{}:{}",
            values.host(&conn.raddr),
            values.port(conn.rport, &conn.proto)
        )
    };
    let process = if conn.process.is_empty() {
        String::new()
    } else {
        format!(" ({}[{}])", conn.process, conn.pid)
    };

    format!("{ts}{icon} {} {state} {endpoints}{process}", conn.proto.to_uppercase())
}

#[cfg(test)]
mod tests {
    use std::net::IpAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::enrich::{NameResolver, NoGeoLookup};
    use crate::error::LookupError;
    use chrono::Utc;

    /// Names every address and counts the reverse lookups.
    #[derive(Default)]
    struct CountingResolver {
        reverse: AtomicUsize,
    }

    impl NameResolver for CountingResolver {
        fn reverse(&self, _ip: IpAddr) -> Result<Option<String>, LookupError> {
            self.reverse.fetch_add(1, Ordering::SeqCst);
            Ok(Some("example.net".to_string()))
        }

        fn service(&self, port: u16, _udp: bool) -> Result<Option<String>, LookupError> {
            Ok((port == 443).then(|| "https".to_string()))
        }
    }

    fn conn() -> Connection {
        Connection {
            pid: 42,
            process: "curl".to_string(),
            proto: "tcp".to_string(),
            state: "ESTABLISHED".to_string(),
            laddr: "10.0.0.2".to_string(),
            lport: 51000,
            raddr: "93.184.216.34".to_string(),
            rport: 443,
            rtt_ms: 12.345,
            ..Default::default()
        }
    }

    #[test]
    fn fields_are_validated() {
        assert_eq!(parse_fields("pid, Process,,country").unwrap(), vec!["pid", "process", "country"]);
        assert_eq!(parse_fields("pid,bogus"), Err(QueryError::UnknownField("bogus".to_string())));
        assert!(parse_fields("").unwrap().is_empty());
    }

    #[test]
    fn default_selection_with_timestamp() {
        let fields = select_fields(&[], &["pid", "process"], true);
        assert_eq!(fields, vec!["ts", "pid", "process"]);
        let chosen = vec!["uid".to_string()];
        assert_eq!(select_fields(&chosen, &["pid"], true), chosen);
    }

    #[test]
    fn numeric_values_are_raw() {
        let values = FieldMap::numeric();
        assert_eq!(values.value(&conn(), "rport"), "443");
        assert_eq!(values.value(&conn(), "rtt_ms"), "12.3");
        assert_eq!(values.value(&conn(), "country"), "");
        assert_eq!(headers(&["if".to_string()]), vec!["IF"]);
    }

    #[test]
    fn trace_line_layout() {
        let mut event = TraceEvent {
            ts: Utc::now(),
            event: EventKind::Opened,
            connection: conn(),
        };
        let values = FieldMap::numeric();
        assert_eq!(
            format_trace_event(&event, &values, false),
            "+ TCP ESTABLISHED 10.0.0.2:51000->93.184.216.34:443 (curl[42])"
        );

        event.event = EventKind::Closed;
        event.connection.raddr = "*".to_string();
        event.connection.state.clear();
        event.connection.process.clear();
        assert_eq!(format_trace_event(&event, &values, false), "- TCP UNKNOWN 10.0.0.2:51000");

        let stamped = format_trace_event(&event, &values, true);
        assert_eq!(stamped.find(' '), Some(12));
        assert!(stamped.ends_with("- TCP UNKNOWN 10.0.0.2:51000"));
    }

    #[test]
    fn cached_values_skip_reverse_lookups() {
        let resolver = Arc::new(CountingResolver::default());
        let cache = EnrichmentCache::new(resolver.clone(), Arc::new(NoGeoLookup));
        let event = TraceEvent {
            ts: Utc::now(),
            event: EventKind::Opened,
            connection: conn(),
        };

        let line = format_trace_event(&event, &FieldMap::cached(&cache), false);
        assert_eq!(line, "+ TCP ESTABLISHED 10.0.0.2:51000->93.184.216.34:https (curl[42])");
        assert_eq!(resolver.reverse.load(Ordering::SeqCst), 0);

        cache.host_label("93.184.216.34");
        let line = format_trace_event(&event, &FieldMap::cached(&cache), false);
        assert!(line.contains("->example.net:https"), "{line}");
        assert_eq!(resolver.reverse.load(Ordering::SeqCst), 1);
    }
}
