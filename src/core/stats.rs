use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::connection::{timestamp, Connection};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessCount {
    pub pid: u32,
    pub process: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterfaceCount {
    #[serde(rename = "if")]
    pub interface: String,
    pub count: usize,
}

/// Aggregate counters over one snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stats {
    #[serde(with = "timestamp")]
    pub ts: DateTime<Utc>,
    pub total: usize,
    pub by_proto: BTreeMap<String, usize>,
    pub by_state: BTreeMap<String, usize>,
    pub by_proc: Vec<ProcessCount>,
    #[serde(rename = "by_if")]
    pub by_interface: Vec<InterfaceCount>,
}

impl Stats {
    pub fn collect(connections: &[Connection], ts: DateTime<Utc>) -> Self {
        let mut by_proto = BTreeMap::new();
        let mut by_state = BTreeMap::new();
        let mut procs: HashMap<(u32, &str), usize> = HashMap::new();
        let mut interfaces: HashMap<&str, usize> = HashMap::new();

        for conn in connections {
            *by_proto.entry(conn.proto.clone()).or_insert(0) += 1;
            if !conn.state.is_empty() {
                *by_state.entry(conn.state.clone()).or_insert(0) += 1;
            }
            *procs.entry((conn.pid, conn.process.as_str())).or_insert(0) += 1;
            if !conn.interface.is_empty() {
                *interfaces.entry(conn.interface.as_str()).or_insert(0) += 1;
            }
        }

        let mut by_proc: Vec<ProcessCount> = procs
            .into_iter()
            .map(|((pid, process), count)| ProcessCount {
                pid,
                process: process.to_string(),
                count,
            })
            .collect();
        by_proc.sort_by(|a, b| b.count.cmp(&a.count).then(a.pid.cmp(&b.pid)));

        let mut by_interface: Vec<InterfaceCount> = interfaces
            .into_iter()
            .map(|(interface, count)| InterfaceCount {
                interface: interface.to_string(),
                count,
            })
            .collect();
        by_interface.sort_by(|a, b| b.count.cmp(&a.count).then(a.interface.cmp(&b.interface)));

        Self {
            ts,
            total: connections.len(),
            by_proto,
            by_state,
            by_proc,
            by_interface,
        }
    }
}
