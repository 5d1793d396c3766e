use super::{headers, FieldMap};
use crate::core::connection::Connection;

/// RFC 4180 rows: fields holding a comma, quote or line break are quoted and
/// embedded quotes doubled.
pub fn render(conns: &[Connection], fields: &[String], with_headers: bool, values: &FieldMap<'_>) -> String {
    let mut out = String::new();
    if with_headers {
        push_record(&mut out, &headers(fields));
    }
    for conn in conns {
        push_record(&mut out, &values.row(conn, fields));
    }
    out
}

pub fn push_record<S: AsRef<str>>(out: &mut String, record: &[S]) {
    let cells: Vec<String> = record.iter().map(|cell| escape(cell.as_ref())).collect();
    out.push_str(&cells.join(","));
    out.push('\n');
}

pub fn escape(cell: &str) -> String {
    if cell.contains([',', '"', '\n', '\r']) || cell.starts_with(' ') {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoting() {
        assert_eq!(escape("nginx"), "nginx");
        assert_eq!(escape("a,b"), "\"a,b\"");
        assert_eq!(escape("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(escape("two\nlines"), "\"two\nlines\"");
        assert_eq!(escape(""), "");
    }

    #[test]
    fn header_then_rows() {
        let conns = vec![Connection {
            pid: 9,
            process: "web, server".to_string(),
            ..Default::default()
        }];
        let fields = vec!["pid".to_string(), "process".to_string()];
        let out = render(&conns, &fields, true, &FieldMap::numeric());
        assert_eq!(out, "PID,PROCESS\n9,\"web, server\"\n");
    }
}
