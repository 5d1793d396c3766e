use std::time::Duration;

use crossterm::style::Stylize;

use super::keys::HELP;
use super::session::{Mode, Session, ShowFlags};
use crate::core::connection::Connection;
use crate::enrich::{Enrichment, EnrichmentCache};
use crate::widgets::symbols::{DASH, HORIZONTAL, REFRESH, SELECTED, WARNING, WATCHED};
use crate::widgets::{display_width, fit, page_size, scroll_offset, truncate, Columns, Overlay};

const GAP: &str = "  ";
const KEY_HINTS: &str = "t/u proto  l/e/o state  w watch  K kill  s sort  / search  ? help  q quit";

/// Renders the whole frame, with the active modal composited on top.
///
/// `cache` is only peeked; nothing here waits on a lookup.
pub fn render(session: &Session, cache: Option<&EnrichmentCache>) -> String {
    let (width, height) = session.size();
    let (width, height) = (width as usize, height as usize);
    let frame = table_frame(session, cache, width, height);

    let modal = match session.mode() {
        Mode::Help => help_modal(),
        Mode::Detail(conn) => detail_modal(conn, session.enrichment()),
        Mode::KillConfirm(conn) => {
            let conns = session.connections().iter().filter(|c| c.pid == conn.pid).count();
            kill_modal(conn, conns)
        }
        Mode::Normal | Mode::Search => return frame,
    };
    Overlay::new(width, height).compose(&frame, &modal)
}

fn table_frame(session: &Session, cache: Option<&EnrichmentCache>, width: usize, height: usize) -> String {
    let visible = session.visible();
    let cols = Columns::for_width(width);
    let page = page_size(height);

    let mut lines = Vec::with_capacity(page + 6);
    lines.push(title_line(session, visible.len(), width));
    lines.push(filter_line(session, width));
    lines.push(String::new());
    lines.push(header_line(&cols, width));
    lines.push(format!("{GAP}{}", HORIZONTAL.repeat(width.saturating_sub(4))).dark_grey().to_string());

    if visible.is_empty() {
        lines.push(format!("{GAP}no connections match filters").dark_grey().to_string());
    } else {
        let offset = scroll_offset(session.cursor(), page, visible.len());
        for (i, conn) in visible.iter().enumerate().skip(offset).take(page) {
            let selected = i == session.cursor();
            let watched = session.is_watched(conn.pid);
            lines.push(row_line(conn, &cols, selected, watched, cache, width));
        }
    }
    while lines.len() < page + 5 {
        lines.push(String::new());
    }
    lines.push(status_line(session, width));
    lines.join("\n")
}

fn title_line(session: &Session, visible: usize, width: usize) -> String {
    let ago = format_duration(session.last_refresh().elapsed());
    let right = format!("{visible}/{} connections  {REFRESH} {ago}", session.connections().len());
    let gap = width.saturating_sub(display_width("sockscope") + display_width(&right)).max(1);
    format!("{}{}{}", "sockscope".bold(), " ".repeat(gap), right.dark_grey())
}

fn filter_line(session: &Session, width: usize) -> String {
    let show = session.show_flags();
    let label = |on: bool, text: &str| {
        if on {
            text.green().to_string()
        } else {
            text.dark_grey().to_string()
        }
    };
    let left = format!(
        "{} {} {} {} {} {}",
        label(show.tcp, "tcp"),
        label(show.udp, "udp"),
        "│".dark_grey(),
        label(show.listening, "listen"),
        label(show.established, "estab"),
        label(show.other, "other"),
    );
    let left_width = display_width(&left);

    let right = match session.mode() {
        Mode::Search => format!("/{}▌", session.search()).yellow().to_string(),
        _ if !session.search().is_empty() => format!("filter: {}", session.search()).yellow().to_string(),
        _ => {
            let sort = session.sort();
            let arrow = if sort.descending { "↓" } else { "↑" };
            format!("sort: {} {arrow}", sort.field.label()).dark_grey().to_string()
        }
    };
    let right_width = display_width(&right);
    if left_width + right_width + 1 > width {
        return left;
    }
    format!("{left}{}{right}", " ".repeat(width - left_width - right_width))
}

fn header_line(cols: &Columns, width: usize) -> String {
    let cells = [
        fit("PROCESS", cols.process),
        fit("PORT", cols.port),
        fit("PROTO", cols.proto),
        fit("STATE", cols.state),
        fit("LOCAL", cols.local),
        fit("REMOTE", cols.remote),
    ];
    let line = format!("{GAP}{}", cells.join(GAP));
    truncate(line.trim_end(), width).bold().to_string()
}

fn row_line(
    conn: &Connection,
    cols: &Columns,
    selected: bool,
    watched: bool,
    cache: Option<&EnrichmentCache>,
    width: usize,
) -> String {
    let indicator = if selected {
        SELECTED
    } else if watched {
        WATCHED
    } else {
        " "
    };
    let process = if conn.process.is_empty() { DASH } else { &conn.process };
    let state = if conn.state.is_empty() { DASH } else { &conn.state };
    let remote = if conn.has_remote() {
        let host = cache
            .and_then(|c| c.cached_host(&conn.raddr))
            .unwrap_or_else(|| conn.raddr.clone());
        format!("{host}:{}", conn.rport)
    } else {
        "-".to_string()
    };

    let cells = [
        fit(process, cols.process),
        fit(&conn.lport.to_string(), cols.port),
        fit(&conn.proto, cols.proto),
        fit(state, cols.state),
        fit(&conn.laddr, cols.local),
        fit(&remote, cols.remote),
    ];
    let line = format!("{indicator} {}", cells.join(GAP));
    let line = truncate(line.trim_end(), width);

    if selected {
        line.reverse().to_string()
    } else if watched {
        line.yellow().to_string()
    } else {
        line
    }
}

fn status_line(session: &Session, width: usize) -> String {
    if let Some(status) = session.status() {
        return truncate(&format!("{GAP}{status}"), width).cyan().to_string();
    }
    if let Some(error) = session.last_error() {
        return truncate(&format!("{GAP}error: {error}"), width).red().to_string();
    }
    let mut hints = format!("{GAP}{KEY_HINTS}");
    let watching = session.watched_count();
    if watching > 0 {
        hints.push_str(&format!("  watching: {watching}"));
    }
    truncate(&hints, width).dark_grey().to_string()
}

fn help_modal() -> String {
    format!("\n{}\n", HELP)
}

fn or_dash(value: &str) -> &str {
    match value {
        "" | "0" | ":0" => DASH,
        v => v,
    }
}

fn detail_modal(conn: &Connection, enrichment: Option<&Enrichment>) -> String {
    let pid = conn.pid.to_string();
    let inode = conn.inode.to_string();
    let local = conn.local_endpoint();
    let remote = conn.remote_endpoint();
    let fields = [
        ("process", conn.process.as_str()),
        ("pid", pid.as_str()),
        ("user", conn.user.as_str()),
        ("protocol", conn.proto.as_str()),
        ("state", conn.state.as_str()),
        ("local", local.as_str()),
        ("remote", remote.as_str()),
        ("interface", conn.interface.as_str()),
        ("inode", inode.as_str()),
    ];

    let mut lines = vec![String::new(), format!("  {}", "connection details".bold())];
    lines.push(String::new());
    lines.extend(fields.iter().map(|(name, value)| detail_row(name, or_dash(value))));
    lines.push(String::new());

    match enrichment {
        Some(e) => {
            lines.push(detail_row("local host", &e.local_host));
            lines.push(detail_row("local svc", &e.local_service));
            lines.push(detail_row("remote host", &e.remote_host));
            lines.push(detail_row("remote svc", &e.remote_service));
            if let Some(geo) = &e.geo {
                let country = format!("{} {}", geo.flag(), geo.country_code);
                lines.push(detail_row("country", or_dash(country.trim())));
                lines.push(detail_row("org", or_dash(&geo.organization)));
            }
        }
        None => lines.push(format!("  {}", "resolving…".dark_grey())),
    }

    lines.push(String::new());
    lines.push(format!("  {}", "press esc to close".dark_grey()));
    lines.push(String::new());
    lines.join("\n")
}

fn detail_row(name: &str, value: &str) -> String {
    format!("  {}  {value}", fit(&format!("{name}:"), 12).dark_grey())
}

fn kill_modal(conn: &Connection, conns: usize) -> String {
    let mut lines = vec![
        String::new(),
        format!("  {WARNING}  KILL PROCESS?  ").red().bold().to_string(),
        String::new(),
        format!("  process:  {}", conn.process),
        format!("  pid:      {}", conn.pid),
        format!("  user:     {}", or_dash(&conn.user)),
        format!("  conns:    {conns}"),
        String::new(),
        "  sends SIGTERM to process".dark_grey().to_string(),
    ];
    if conns > 1 {
        lines.push(format!("  will close all {conns} connections").dark_grey().to_string());
    }
    lines.push(String::new());
    lines.push(format!("  {}   {}", "[y] confirm".red(), "[n] cancel"));
    lines.push(String::new());
    lines.join("\n")
}

/// Compact age: `350ms`, `4.2s`, `3m`.
pub fn format_duration(d: Duration) -> String {
    if d < Duration::from_secs(1) {
        format!("{}ms", d.as_millis())
    } else if d < Duration::from_secs(60) {
        format!("{:.1}s", d.as_secs_f64())
    } else {
        format!("{:.0}m", d.as_secs_f64() / 60.0)
    }
}

/// Show-flag summary for log lines.
pub fn describe_flags(show: ShowFlags) -> String {
    let names = [
        (show.tcp, "tcp"),
        (show.udp, "udp"),
        (show.listening, "listen"),
        (show.established, "estab"),
        (show.other, "other"),
    ];
    names
        .iter()
        .filter(|(on, _)| *on)
        .map(|(_, name)| *name)
        .collect::<Vec<_>>()
        .join(",")
}
