use chrono::SecondsFormat;

use super::csv::push_record;
use super::plain::align;
use crate::core::stats::Stats;

/// Processes listed in the table view.
const TOP_PROCESSES: usize = 10;

/// Sectioned text report. Section titles and column headers are dropped
/// when `with_headers` is off.
pub fn render_table(stats: &Stats, with_headers: bool) -> String {
    let mut out = String::new();
    let ts = stats.ts.to_rfc3339_opts(SecondsFormat::Secs, true);
    if with_headers {
        out.push_str(&align(&[
            vec!["TIMESTAMP".to_string(), ts],
            vec!["TOTAL CONNECTIONS".to_string(), stats.total.to_string()],
        ]));
        out.push('\n');
    }

    if !stats.by_proto.is_empty() {
        let rows = stats
            .by_proto
            .iter()
            .map(|(proto, count)| vec![proto.to_uppercase(), count.to_string()]);
        section(&mut out, with_headers, "BY PROTOCOL:", &["PROTO", "COUNT"], rows);
    }
    if !stats.by_state.is_empty() {
        let rows = stats
            .by_state
            .iter()
            .map(|(state, count)| vec![state.clone(), count.to_string()]);
        section(&mut out, with_headers, "BY STATE:", &["STATE", "COUNT"], rows);
    }
    if !stats.by_proc.is_empty() {
        let rows = stats
            .by_proc
            .iter()
            .take(TOP_PROCESSES)
            .map(|p| vec![p.pid.to_string(), p.process.clone(), p.count.to_string()]);
        section(
            &mut out,
            with_headers,
            "BY PROCESS (TOP 10):",
            &["PID", "PROCESS", "COUNT"],
            rows,
        );
    }
    if !stats.by_interface.is_empty() {
        let rows = stats
            .by_interface
            .iter()
            .map(|i| vec![i.interface.clone(), i.count.to_string()]);
        section(&mut out, with_headers, "BY INTERFACE:", &["IF", "COUNT"], rows);
    }
    out
}

fn section(
    out: &mut String,
    with_headers: bool,
    title: &str,
    columns: &[&str],
    rows: impl Iterator<Item = Vec<String>>,
) {
    let mut table: Vec<Vec<String>> = Vec::new();
    if with_headers {
        out.push_str(title);
        out.push('\n');
        table.push(columns.iter().map(|c| c.to_string()).collect());
    }
    table.extend(rows);
    out.push_str(&align(&table));
    out.push('\n');
}

/// `timestamp,metric,key,value` rows, one per counter.
pub fn render_csv(stats: &Stats, with_headers: bool) -> String {
    let mut out = String::new();
    if with_headers {
        push_record(&mut out, &["timestamp", "metric", "key", "value"]);
    }
    let ts = stats.ts.to_rfc3339_opts(SecondsFormat::Secs, true);
    let total = stats.total.to_string();
    push_record(&mut out, &[ts.as_str(), "total", "", total.as_str()]);
    for (proto, count) in &stats.by_proto {
        push_record(&mut out, &[ts.clone(), "proto".to_string(), proto.clone(), count.to_string()]);
    }
    for (state, count) in &stats.by_state {
        push_record(&mut out, &[ts.clone(), "state".to_string(), state.clone(), count.to_string()]);
    }
    for p in &stats.by_proc {
        push_record(&mut out, &[ts.clone(), "process".to_string(), p.process.clone(), p.count.to_string()]);
    }
    for i in &stats.by_interface {
        push_record(&mut out, &[ts.clone(), "interface".to_string(), i.interface.clone(), i.count.to_string()]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::connection::Connection;
    use chrono::{TimeZone, Utc};

    fn stats() -> Stats {
        let conns = vec![
            Connection {
                pid: 5,
                process: "nginx".to_string(),
                proto: "tcp".to_string(),
                state: "LISTEN".to_string(),
                interface: "eth0".to_string(),
                ..Default::default()
            },
            Connection {
                pid: 5,
                process: "nginx".to_string(),
                proto: "tcp".to_string(),
                state: "ESTABLISHED".to_string(),
                ..Default::default()
            },
        ];
        Stats::collect(&conns, Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap())
    }

    #[test]
    fn table_sections() {
        let out = render_table(&stats(), true);
        assert!(out.starts_with("TIMESTAMP           2024-01-02T03:04:05Z\nTOTAL CONNECTIONS   2\n\n"));
        assert!(out.contains("BY PROTOCOL:\nPROTO   COUNT\nTCP     2\n"));
        assert!(out.contains("BY PROCESS (TOP 10):\nPID   PROCESS   COUNT\n5     nginx     2\n"));
        assert!(out.contains("BY INTERFACE:\nIF     COUNT\neth0   1\n"));

        let bare = render_table(&stats(), false);
        assert!(bare.starts_with("TCP   2\n"));
        assert!(!bare.contains("BY STATE"));
    }

    #[test]
    fn csv_rows() {
        let out = render_csv(&stats(), true);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "timestamp,metric,key,value");
        assert_eq!(lines[1], "2024-01-02T03:04:05Z,total,,2");
        assert!(lines.contains(&"2024-01-02T03:04:05Z,state,ESTABLISHED,1"));
        assert!(lines.contains(&"2024-01-02T03:04:05Z,process,nginx,2"));
        assert_eq!(render_csv(&stats(), false).lines().count(), lines.len() - 1);
    }
}
