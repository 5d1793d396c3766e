use super::{headers, FieldMap};
use crate::core::connection::Connection;
use crate::widgets::{display_width, pad};

/// Columns separated by at least this many spaces.
const PADDING: usize = 3;

/// Space-aligned columns without styling, for scripts and pipes.
pub fn render(conns: &[Connection], fields: &[String], with_headers: bool, values: &FieldMap<'_>) -> String {
    let mut rows: Vec<Vec<String>> = Vec::with_capacity(conns.len() + 1);
    if with_headers {
        rows.push(headers(fields));
    }
    rows.extend(conns.iter().map(|c| values.row(c, fields)));
    align(&rows)
}

/// Pads every cell but the last in each row to its column's widest value.
pub fn align(rows: &[Vec<String>]) -> String {
    let columns = rows.iter().map(Vec::len).max().unwrap_or(0);
    let widths: Vec<usize> = (0..columns)
        .map(|i| {
            rows.iter()
                .filter_map(|row| row.get(i))
                .map(|cell| display_width(cell))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let mut out = String::new();
    for row in rows {
        let last = row.len().saturating_sub(1);
        for (i, cell) in row.iter().enumerate() {
            if i == last {
                out.push_str(cell);
            } else {
                out.push_str(&pad(cell, widths[i] + PADDING));
            }
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn columns_line_up() {
        let conns = vec![
            Connection {
                pid: 1,
                process: "systemd-resolved".to_string(),
                ..Default::default()
            },
            Connection {
                pid: 31337,
                process: "nc".to_string(),
                ..Default::default()
            },
        ];
        let fields = vec!["pid".to_string(), "process".to_string()];
        let out = render(&conns, &fields, true, &FieldMap::numeric());
        assert_eq!(out, "PID     PROCESS\n1       systemd-resolved\n31337   nc\n");
        let bare = render(&conns, &fields, false, &FieldMap::numeric());
        assert!(bare.starts_with("1       systemd"));
    }
}
