use crossterm::style::{Color, Stylize};

use super::{headers, FieldMap};
use crate::core::connection::Connection;
use crate::widgets::symbols::{
    BOTTOM_LEFT, BOTTOM_RIGHT, CROSS, HORIZONTAL, TEE_DOWN, TEE_LEFT, TEE_RIGHT, TEE_UP, TOP_LEFT, TOP_RIGHT,
    VERTICAL,
};
use crate::widgets::{display_width, pad, truncate};

/// Widest a column may grow before its values are truncated.
const MAX_COLUMN: usize = 25;

/// Rounded-box table with a connection count underneath.
pub fn render(conns: &[Connection], fields: &[String], with_headers: bool, values: &FieldMap<'_>) -> String {
    let rows: Vec<Vec<String>> = conns.iter().map(|c| values.row(c, fields)).collect();
    let titles = headers(fields);

    let widths: Vec<usize> = (0..fields.len())
        .map(|i| {
            let widest = rows
                .iter()
                .map(|row| display_width(&row[i]))
                .chain(std::iter::once(display_width(&titles[i])))
                .max()
                .unwrap_or(0);
            widest.min(MAX_COLUMN)
        })
        .collect();

    let mut out = String::from("\n");
    out.push_str(&rule(&widths, TOP_LEFT, TEE_DOWN, TOP_RIGHT));

    if with_headers {
        let cells: Vec<String> = titles
            .iter()
            .zip(&widths)
            .map(|(title, &w)| format!(" {} ", pad(title, w)).bold().to_string())
            .collect();
        out.push_str(&boxed_row(&cells));
        out.push_str(&rule(&widths, TEE_RIGHT, CROSS, TEE_LEFT));
    }

    for row in &rows {
        let cells: Vec<String> = row
            .iter()
            .zip(fields)
            .zip(&widths)
            .map(|((value, field), &w)| {
                let cell = format!(" {} ", pad(&truncate(value, w), w));
                style_cell(field, value, cell)
            })
            .collect();
        out.push_str(&boxed_row(&cells));
    }

    out.push_str(&rule(&widths, BOTTOM_LEFT, TEE_UP, BOTTOM_RIGHT));
    out.push_str(&format!("  {} connections\n", conns.len()).dark_grey().to_string());
    out
}

fn rule(widths: &[usize], left: &str, join: &str, right: &str) -> String {
    let segments: Vec<String> = widths.iter().map(|w| HORIZONTAL.repeat(w + 2)).collect();
    format!("  {left}{}{right}\n", segments.join(join)).dark_grey().to_string()
}

fn boxed_row(cells: &[String]) -> String {
    let bar = VERTICAL.dark_grey().to_string();
    format!("  {bar}{}{bar}\n", cells.join(bar.as_str()))
}

fn style_cell(field: &str, value: &str, cell: String) -> String {
    match field {
        "proto" if value.contains("udp") => cell.magenta().to_string(),
        "proto" => cell.cyan().to_string(),
        "state" => {
            let color = match value.to_uppercase().as_str() {
                "LISTEN" => Color::Green,
                "ESTABLISHED" => Color::Blue,
                "TIME_WAIT" | "CLOSE_WAIT" => Color::Yellow,
                _ => Color::DarkGrey,
            };
            cell.with(color).to_string()
        }
        "process" => cell.bold().to_string(),
        _ => cell,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::widgets::strip_ansi;

    fn conn(process: &str) -> Connection {
        Connection {
            pid: 7,
            process: process.to_string(),
            proto: "udp".to_string(),
            laddr: "127.0.0.1".to_string(),
            lport: 53,
            ..Default::default()
        }
    }

    fn fields(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn boxed_layout() {
        let out = strip_ansi(&render(&[conn("dnsmasq")], &fields(&["process", "pid"]), true, &FieldMap::numeric()));
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "");
        assert_eq!(lines[1], "  ╭─────────┬─────╮");
        assert_eq!(lines[2], "  │ PROCESS │ PID │");
        assert_eq!(lines[3], "  ├─────────┼─────┤");
        assert_eq!(lines[4], "  │ dnsmasq │ 7   │");
        assert_eq!(lines[5], "  ╰─────────┴─────╯");
        assert_eq!(lines[6], "  1 connections");
    }

    #[test]
    fn long_values_are_capped() {
        let name = "a-really-long-process-name-for-testing";
        let out = strip_ansi(&render(&[conn(name)], &fields(&["process"]), false, &FieldMap::numeric()));
        let row = out.lines().nth(2).unwrap();
        assert_eq!(display_width(row), 2 + 1 + MAX_COLUMN + 2 + 1);
        assert!(row.contains('…'));
        assert!(!out.contains("PROCESS"));
    }
}
