use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use super::connection::Connection;
use crate::error::QueryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortField {
    #[default]
    Port,
    Process,
    Pid,
    State,
    Proto,
}

impl SortField {
    /// Next field in the interactive cycle.
    pub fn next(self) -> Self {
        match self {
            SortField::Port => SortField::Process,
            SortField::Process => SortField::Pid,
            SortField::Pid => SortField::State,
            SortField::State => SortField::Proto,
            SortField::Proto => SortField::Port,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SortField::Port => "port",
            SortField::Process => "proc",
            SortField::Pid => "pid",
            SortField::State => "state",
            SortField::Proto => "proto",
        }
    }

    fn compare(self, a: &Connection, b: &Connection) -> Ordering {
        match self {
            SortField::Port => a.lport.cmp(&b.lport),
            SortField::Process => a.process.to_lowercase().cmp(&b.process.to_lowercase()),
            SortField::Pid => a.pid.cmp(&b.pid),
            SortField::State => a.state.cmp(&b.state),
            SortField::Proto => a.proto.cmp(&b.proto),
        }
    }
}

impl FromStr for SortField {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "port" | "lport" => Ok(SortField::Port),
            "process" | "proc" => Ok(SortField::Process),
            "pid" => Ok(SortField::Pid),
            "state" => Ok(SortField::State),
            "proto" | "protocol" => Ok(SortField::Proto),
            _ => Err(QueryError::UnknownSortField(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SortSpec {
    pub field: SortField,
    pub descending: bool,
}

impl SortSpec {
    pub fn new(field: SortField, descending: bool) -> Self {
        Self { field, descending }
    }

    /// Parses `field[:asc|desc]`.
    pub fn parse(spec: &str) -> Result<Self, QueryError> {
        let (field, direction) = match spec.split_once(':') {
            Some((field, direction)) => (field, Some(direction)),
            None => (spec, None),
        };
        let descending = match direction.map(str::to_ascii_lowercase).as_deref() {
            None | Some("asc") => false,
            Some("desc") => true,
            Some(_) => {
                return Err(QueryError::UnknownSortDirection(
                    direction.unwrap_or_default().to_string(),
                ))
            }
        };
        Ok(Self::new(field.parse()?, descending))
    }

    pub fn reversed(self) -> Self {
        Self {
            descending: !self.descending,
            ..self
        }
    }

    /// Stable sort. Descending flips the key order only; ties keep their
    /// input order in both directions.
    pub fn apply(&self, connections: &mut [Connection]) {
        let field = self.field;
        if self.descending {
            connections.sort_by(|a, b| field.compare(b, a));
        } else {
            connections.sort_by(|a, b| field.compare(a, b));
        }
    }

    pub fn sorted(&self, mut connections: Vec<Connection>) -> Vec<Connection> {
        self.apply(&mut connections);
        connections
    }
}

impl fmt::Display for SortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let arrow = if self.descending { "↓" } else { "↑" };
        write!(f, "{}{}", self.field.label(), arrow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn conn(pid: u32, process: &str, lport: u16) -> Connection {
        Connection {
            pid,
            process: process.to_string(),
            proto: "tcp".to_string(),
            lport,
            ..Default::default()
        }
    }

    #[test]
    fn parses_field_and_direction() {
        assert_eq!(SortSpec::parse("pid").unwrap(), SortSpec::new(SortField::Pid, false));
        assert_eq!(
            SortSpec::parse("proc:desc").unwrap(),
            SortSpec::new(SortField::Process, true)
        );
        assert_eq!(
            SortSpec::parse("nope"),
            Err(QueryError::UnknownSortField("nope".to_string()))
        );
        assert_eq!(
            SortSpec::parse("pid:sideways"),
            Err(QueryError::UnknownSortDirection("sideways".to_string()))
        );
    }

    #[test]
    fn default_is_port_ascending() {
        let sorted = SortSpec::default().sorted(vec![conn(1, "b", 443), conn(2, "a", 22)]);
        assert_eq!(sorted[0].lport, 22);
    }

    #[test]
    fn cycle_returns_to_port() {
        let mut field = SortField::Port;
        for _ in 0..5 {
            field = field.next();
        }
        assert_eq!(field, SortField::Port);
    }

    #[test]
    fn descending_keeps_tie_order() {
        let input = vec![conn(1, "a", 80), conn(2, "b", 80), conn(3, "c", 22)];
        let sorted = SortSpec::new(SortField::Port, true).sorted(input);
        let pids: Vec<u32> = sorted.iter().map(|c| c.pid).collect();
        assert_eq!(pids, vec![1, 2, 3]);
    }

    fn arb_conns() -> impl Strategy<Value = Vec<Connection>> {
        prop::collection::vec(
            (0u32..50, prop::sample::select(vec!["nginx", "sshd", "Chrome"]), 0u16..6),
            0..30,
        )
        .prop_map(|rows| {
            rows.into_iter()
                .map(|(pid, process, lport)| conn(pid, process, lport))
                .collect()
        })
    }

    fn arb_spec() -> impl Strategy<Value = SortSpec> {
        (
            prop::sample::select(vec![
                SortField::Port,
                SortField::Process,
                SortField::Pid,
                SortField::State,
                SortField::Proto,
            ]),
            any::<bool>(),
        )
            .prop_map(|(field, descending)| SortSpec::new(field, descending))
    }

    proptest! {
        #[test]
        fn sort_is_idempotent(conns in arb_conns(), spec in arb_spec()) {
            let once = spec.sorted(conns);
            let twice = spec.sorted(once.clone());
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn reverse_flips_keys_but_not_ties(conns in arb_conns()) {
            // pid is unique per index so ties are observable by position.
            let tagged: Vec<Connection> = conns
                .into_iter()
                .enumerate()
                .map(|(i, mut c)| { c.pid = i as u32; c })
                .collect();
            let asc = SortSpec::new(SortField::Port, false).sorted(tagged.clone());
            let desc = SortSpec::new(SortField::Port, true).sorted(tagged);
            for window in asc.windows(2) {
                prop_assert!(window[0].lport <= window[1].lport);
                if window[0].lport == window[1].lport {
                    prop_assert!(window[0].pid < window[1].pid);
                }
            }
            for window in desc.windows(2) {
                prop_assert!(window[0].lport >= window[1].lport);
                if window[0].lport == window[1].lport {
                    prop_assert!(window[0].pid < window[1].pid);
                }
            }
        }
    }
}
