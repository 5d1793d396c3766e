use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};

use super::connection::Connection;
use crate::error::QueryError;

pub const FILTER_KEYS: &str =
    "proto, state, pid, proc, lport, rport, user, laddr, raddr, contains, if, mark, namespace, inode, since";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpFamily {
    V4,
    V6,
}

/// Lower bound on a connection's capture time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeBound {
    At(DateTime<Utc>),
    Within(Duration),
}

impl TimeBound {
    pub fn parse(value: &str) -> Option<Self> {
        if let Some(duration) = parse_duration(value) {
            return Some(TimeBound::Within(duration));
        }
        if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
            return Some(TimeBound::At(ts.with_timezone(&Utc)));
        }
        let naive = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
            .ok()
            .or_else(|| {
                NaiveDate::parse_from_str(value, "%Y-%m-%d")
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
            })?;
        Local
            .from_local_datetime(&naive)
            .earliest()
            .map(|ts| TimeBound::At(ts.with_timezone(&Utc)))
    }

    pub fn resolve(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            TimeBound::At(ts) => *ts,
            TimeBound::Within(window) => chrono::Duration::from_std(*window)
                .ok()
                .and_then(|w| now.checked_sub_signed(w))
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
        }
    }
}

/// `<digits><unit>` with unit `ms`, `s`, `m`, `h` or `d`.
pub fn parse_duration(value: &str) -> Option<Duration> {
    let split = value.find(|c: char| !c.is_ascii_digit())?;
    let (amount, unit) = value.split_at(split);
    let amount: u64 = amount.parse().ok()?;
    let seconds = match unit {
        "ms" => return Some(Duration::from_millis(amount)),
        "s" => amount,
        "m" => amount.checked_mul(60)?,
        "h" => amount.checked_mul(3_600)?,
        "d" => amount.checked_mul(86_400)?,
        _ => return None,
    };
    Some(Duration::from_secs(seconds))
}

/// A single populated filter key. Text values are stored already normalized.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Proto(String),
    State(String),
    Pid(u32),
    Process(String),
    LocalPort(u16),
    RemotePort(u16),
    Uid(u32),
    User(String),
    LocalAddr(String),
    RemoteAddr(String),
    Contains(String),
    Interface(String),
    Mark(String),
    Namespace(String),
    Inode(u64),
    Since(TimeBound),
    Family(IpFamily),
}

impl Predicate {
    /// Parses one `key=value` pair. An empty value yields `None`: the key is
    /// present but unset.
    pub fn parse(key: &str, value: &str) -> Result<Option<Self>, QueryError> {
        let key = key.to_ascii_lowercase();
        let invalid = || QueryError::InvalidValue {
            key: key.clone(),
            value: value.to_string(),
        };
        let known = matches!(
            key.as_str(),
            "proto" | "state" | "pid" | "proc" | "lport" | "rport" | "user" | "laddr" | "raddr"
                | "contains" | "if" | "interface" | "mark" | "namespace" | "inode" | "since"
        );
        if !known {
            return Err(QueryError::UnknownKey(key));
        }
        if value.is_empty() {
            return Ok(None);
        }

        let predicate = match key.as_str() {
            "proto" => Predicate::Proto(value.to_ascii_lowercase()),
            "state" => Predicate::State(canonical_state(value)),
            "pid" => Predicate::Pid(value.parse().map_err(|_| invalid())?),
            "proc" => Predicate::Process(value.to_lowercase()),
            "lport" => Predicate::LocalPort(value.parse().map_err(|_| invalid())?),
            "rport" => Predicate::RemotePort(value.parse().map_err(|_| invalid())?),
            "user" => match value.parse::<u32>() {
                Ok(uid) => Predicate::Uid(uid),
                Err(_) => Predicate::User(value.to_lowercase()),
            },
            "laddr" => Predicate::LocalAddr(value.to_string()),
            "raddr" => Predicate::RemoteAddr(value.to_string()),
            "contains" => Predicate::Contains(value.to_lowercase()),
            "if" | "interface" => Predicate::Interface(value.to_string()),
            "mark" => Predicate::Mark(value.to_string()),
            "namespace" => Predicate::Namespace(value.to_string()),
            "inode" => Predicate::Inode(value.parse().map_err(|_| invalid())?),
            _ => Predicate::Since(TimeBound::parse(value).ok_or_else(invalid)?),
        };
        Ok(Some(predicate))
    }

    pub fn matches_at(&self, conn: &Connection, now: DateTime<Utc>) -> bool {
        match self {
            Predicate::Proto(proto) => {
                let have = conn.proto.to_ascii_lowercase();
                have == *proto || have.strip_suffix('6') == Some(proto.as_str())
            }
            Predicate::State(state) => canonical_state(&conn.state) == *state,
            Predicate::Pid(pid) => conn.pid == *pid,
            Predicate::Process(name) => conn.process.to_lowercase().contains(name.as_str()),
            Predicate::LocalPort(port) => conn.lport == *port,
            Predicate::RemotePort(port) => conn.rport == *port,
            Predicate::Uid(uid) => conn.uid == *uid,
            Predicate::User(name) => conn.user.to_lowercase().contains(name.as_str()),
            Predicate::LocalAddr(addr) => conn.laddr.contains(addr.as_str()),
            Predicate::RemoteAddr(addr) => conn.raddr.contains(addr.as_str()),
            Predicate::Contains(needle) => displayed_fields(conn)
                .iter()
                .any(|field| field.to_lowercase().contains(needle.as_str())),
            Predicate::Interface(name) => conn.interface == *name,
            Predicate::Mark(mark) => conn.mark == *mark,
            Predicate::Namespace(ns) => conn.namespace == *ns,
            Predicate::Inode(inode) => conn.inode == *inode,
            Predicate::Since(bound) => conn.ts >= bound.resolve(now),
            Predicate::Family(family) => family_of(conn) == *family,
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Proto(v) => write!(f, "proto={v}"),
            Predicate::State(v) => write!(f, "state={v}"),
            Predicate::Pid(v) => write!(f, "pid={v}"),
            Predicate::Process(v) => write!(f, "proc={v}"),
            Predicate::LocalPort(v) => write!(f, "lport={v}"),
            Predicate::RemotePort(v) => write!(f, "rport={v}"),
            Predicate::Uid(v) => write!(f, "user={v}"),
            Predicate::User(v) => write!(f, "user={v}"),
            Predicate::LocalAddr(v) => write!(f, "laddr={v}"),
            Predicate::RemoteAddr(v) => write!(f, "raddr={v}"),
            Predicate::Contains(v) => write!(f, "contains={v}"),
            Predicate::Interface(v) => write!(f, "if={v}"),
            Predicate::Mark(v) => write!(f, "mark={v}"),
            Predicate::Namespace(v) => write!(f, "namespace={v}"),
            Predicate::Inode(v) => write!(f, "inode={v}"),
            Predicate::Since(TimeBound::At(ts)) => write!(f, "since={}", ts.to_rfc3339()),
            Predicate::Since(TimeBound::Within(d)) if d.subsec_nanos() != 0 => write!(f, "since={}ms", d.as_millis()),
            Predicate::Since(TimeBound::Within(d)) => write!(f, "since={}s", d.as_secs()),
            Predicate::Family(IpFamily::V4) => write!(f, "ipv4"),
            Predicate::Family(IpFamily::V6) => write!(f, "ipv6"),
        }
    }
}

/// Upper-cases a state token and folds the common spellings onto the names
/// the socket sources report.
pub fn canonical_state(state: &str) -> String {
    let upper = state.trim().to_ascii_uppercase().replace('-', "_");
    match upper.as_str() {
        "LISTENING" => "LISTEN".to_string(),
        "ESTAB" => "ESTABLISHED".to_string(),
        "SYN_RECEIVED" => "SYN_RECV".to_string(),
        "FIN_WAIT_1" => "FIN_WAIT1".to_string(),
        "FIN_WAIT_2" => "FIN_WAIT2".to_string(),
        "CLOSED" => "CLOSE".to_string(),
        _ => upper,
    }
}

fn family_of(conn: &Connection) -> IpFamily {
    let v6 = conn.ip_version.eq_ignore_ascii_case("ipv6")
        || conn.proto.ends_with('6')
        || conn.laddr.contains(':');
    if v6 {
        IpFamily::V6
    } else {
        IpFamily::V4
    }
}

fn displayed_fields(conn: &Connection) -> [String; 10] {
    [
        conn.pid.to_string(),
        conn.process.clone(),
        conn.user.clone(),
        conn.proto.clone(),
        conn.state.clone(),
        conn.laddr.clone(),
        conn.lport.to_string(),
        conn.raddr.clone(),
        conn.rport.to_string(),
        conn.interface.clone(),
    ]
}

/// Conjunction of predicates. The empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionFilter {
    predicates: Vec<Predicate>,
}

impl ConnectionFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a filter from `key=value` arguments. The first bad argument
    /// fails the whole filter.
    pub fn parse<I, S>(args: I) -> Result<Self, QueryError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut filter = Self::new();
        for arg in args {
            let arg = arg.as_ref();
            let (key, value) = arg
                .split_once('=')
                .ok_or_else(|| QueryError::Malformed(arg.to_string()))?;
            if let Some(predicate) = Predicate::parse(key, value)? {
                filter.predicates.push(predicate);
            }
        }
        Ok(filter)
    }

    pub fn with(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn with_pid(self, pid: u32) -> Self {
        self.with(Predicate::Pid(pid))
    }

    pub fn with_process_name(self, name: &str) -> Self {
        self.with(Predicate::Process(name.to_lowercase()))
    }

    pub fn with_proto(self, proto: &str) -> Self {
        self.with(Predicate::Proto(proto.to_ascii_lowercase()))
    }

    pub fn with_state(self, state: &str) -> Self {
        self.with(Predicate::State(canonical_state(state)))
    }

    pub fn with_family(self, family: IpFamily) -> Self {
        self.with(Predicate::Family(family))
    }

    /// Merges two filters; the result matches what both match.
    pub fn and(mut self, other: ConnectionFilter) -> Self {
        self.predicates.extend(other.predicates);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn matches_connection(&self, conn: &Connection) -> bool {
        self.matches_at(conn, Utc::now())
    }

    pub fn matches_at(&self, conn: &Connection, now: DateTime<Utc>) -> bool {
        self.predicates.iter().all(|p| p.matches_at(conn, now))
    }

    /// Keeps the matching connections, resolving relative time bounds once.
    pub fn apply(&self, connections: Vec<Connection>) -> Vec<Connection> {
        if self.is_empty() {
            return connections;
        }
        let now = Utc::now();
        connections
            .into_iter()
            .filter(|conn| self.matches_at(conn, now))
            .collect()
    }
}

impl fmt::Display for ConnectionFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.predicates.is_empty() {
            return write!(f, "No filters");
        }
        let parts: Vec<String> = self.predicates.iter().map(ToString::to_string).collect();
        write!(f, "{}", parts.join(", "))
    }
}
