use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use super::symbols::ELLIPSIS;

const ESC: char = '\x1b';

/// Removes escape sequences. A sequence runs from ESC up to and including
/// the next ASCII letter.
pub fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_escape = false;
    for c in s.chars() {
        if c == ESC {
            in_escape = true;
        } else if in_escape {
            in_escape = !c.is_ascii_alphabetic();
        } else {
            out.push(c);
        }
    }
    out
}

/// Terminal columns `s` occupies, ignoring escape sequences.
pub fn display_width(s: &str) -> usize {
    UnicodeWidthStr::width(strip_ansi(s).as_str())
}

/// Columns `[start, end)` of a styled line. Every escape sequence before the
/// cut-off is kept so styling stays balanced. A wide character straddling
/// either edge becomes spaces for the columns inside the range, so the slice
/// is never narrower than the columns it covers.
pub fn visible_slice(s: &str, start: usize, end: usize) -> String {
    if start >= end {
        return String::new();
    }
    let mut out = String::new();
    let mut col = 0;
    let mut in_escape = false;
    for c in s.chars() {
        if c == ESC {
            in_escape = true;
            out.push(c);
            continue;
        }
        if in_escape {
            out.push(c);
            in_escape = !c.is_ascii_alphabetic();
            continue;
        }
        let w = c.width().unwrap_or(0);
        let next = col + w;
        if col >= start && next <= end {
            out.push(c);
        } else if col < end && next > start {
            let covered = next.min(end) - col.max(start);
            out.push_str(&" ".repeat(covered));
        }
        col = next;
        if col >= end {
            break;
        }
    }
    out
}

/// Shortens `s` to at most `max` columns, marking the cut with an ellipsis.
/// Budgets under 3 columns are cut without a marker.
pub fn truncate(s: &str, max: usize) -> String {
    if UnicodeWidthStr::width(s) <= max {
        return s.to_string();
    }
    let marker = if max <= 2 { "" } else { ELLIPSIS };
    let budget = max - UnicodeWidthStr::width(marker);
    let mut out = String::new();
    let mut used = 0;
    for c in s.chars() {
        let w = c.width().unwrap_or(0);
        if used + w > budget {
            break;
        }
        used += w;
        out.push(c);
    }
    out.push_str(marker);
    out
}

/// Left-aligns `s` in `width` columns. Wider input is returned unchanged.
pub fn pad(s: &str, width: usize) -> String {
    let w = display_width(s);
    if w >= width {
        return s.to_string();
    }
    format!("{s}{}", " ".repeat(width - w))
}

/// Truncates then pads, giving a cell of exactly `width` columns.
pub fn fit(s: &str, width: usize) -> String {
    pad(&truncate(s, width), width)
}
