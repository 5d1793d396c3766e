use crossterm::style::Stylize;

use super::symbols::{BOTTOM_LEFT, BOTTOM_RIGHT, HORIZONTAL, TOP_LEFT, TOP_RIGHT, VERTICAL};
use super::text::{display_width, visible_slice};

const RESET: &str = "\x1b[0m";

/// Topmost row a modal's content may start on.
const MIN_TOP: usize = 2;

/// Splices boxed modal text into an already rendered frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Overlay {
    pub width: usize,
    pub height: usize,
}

impl Overlay {
    pub fn new(width: usize, height: usize) -> Self {
        Self { width, height }
    }

    /// Draws `modal` in a rounded box centered over `background`. Both are
    /// newline separated and may carry escape sequences. The frame grows with
    /// blank rows if the box would run past its end.
    pub fn compose(&self, background: &str, modal: &str) -> String {
        let mut rows: Vec<String> = background.split('\n').map(str::to_string).collect();
        let modal_lines: Vec<&str> = modal.split('\n').collect();

        let inner_width = modal_lines.iter().map(|l| display_width(l)).max().unwrap_or(0) + 4;
        let box_width = inner_width + 2;
        let modal_height = modal_lines.len();

        let start_row = (self.height.saturating_sub(modal_height) / 2).max(MIN_TOP);
        let start_col = self.width.saturating_sub(box_width) / 2;

        while rows.len() < start_row + modal_height + 2 {
            rows.push(" ".repeat(self.width));
        }

        let rule = HORIZONTAL.repeat(inner_width);
        let top = format!("{TOP_LEFT}{rule}{TOP_RIGHT}").dark_grey().to_string();
        rows[start_row - 1] = self.splice(&rows[start_row - 1], &top, start_col);

        let side = VERTICAL.dark_grey().to_string();
        for (i, line) in modal_lines.iter().enumerate() {
            let padding = inner_width - display_width(line);
            let boxed = format!("{side}{line}{}{side}", " ".repeat(padding));
            let row = start_row + i;
            rows[row] = self.splice(&rows[row], &boxed, start_col);
        }

        let bottom = format!("{BOTTOM_LEFT}{rule}{BOTTOM_RIGHT}").dark_grey().to_string();
        let bottom_row = start_row + modal_height;
        rows[bottom_row] = self.splice(&rows[bottom_row], &bottom, start_col);

        rows.join("\n")
    }

    fn splice(&self, background: &str, content: &str, start_col: usize) -> String {
        let end_col = start_col + display_width(content);
        let left = visible_slice(background, 0, start_col);
        let right = visible_slice(background, end_col, self.width);
        let gap = start_col.saturating_sub(display_width(&left));
        format!("{left}{}{RESET}{content}{right}", " ".repeat(gap))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::widgets::text::strip_ansi;

    fn plain_rows(frame: &str) -> Vec<String> {
        frame.split('\n').map(strip_ansi).collect()
    }

    fn background(width: usize, height: usize) -> String {
        vec!["x".repeat(width); height].join("\n")
    }

    #[test]
    fn centers_box_over_frame() {
        let frame = Overlay::new(40, 10).compose(&background(40, 10), "hi");
        let rows = plain_rows(&frame);
        assert_eq!(rows.len(), 10);
        let pad = "x".repeat(16);
        assert_eq!(rows[3], format!("{pad}╭──────╮{pad}"));
        assert_eq!(rows[4], format!("{pad}│hi    │{pad}"));
        assert_eq!(rows[5], format!("{pad}╰──────╯{pad}"));
        assert_eq!(rows[2], "x".repeat(40));
        for row in &rows {
            assert_eq!(display_width(row), 40);
        }
    }

    #[test]
    fn never_starts_above_second_row() {
        let modal = vec!["line"; 8].join("\n");
        let frame = Overlay::new(20, 6).compose(&background(20, 6), &modal);
        let rows = plain_rows(&frame);
        assert!(rows[0].starts_with('x'));
        assert!(rows[1].contains('╭'));
        assert!(rows[2].contains("│line"));
        assert_eq!(rows.len(), 2 + 8 + 2);
        assert!(rows[10].contains('╰'));
    }

    #[test]
    fn wide_modal_clamps_to_left_edge() {
        let frame = Overlay::new(10, 10).compose(&background(10, 10), "a very long modal line");
        let rows = plain_rows(&frame);
        assert!(rows[4].starts_with("│a very long"));
    }

    #[test]
    fn keeps_background_styling_outside_box() {
        let styled = format!("\x1b[32m{}\x1b[0m", "y".repeat(30));
        let bg = vec![styled; 8].join("\n");
        let frame = Overlay::new(30, 8).compose(&bg, "ok");
        let row = frame.split('\n').nth(3).unwrap().to_string();
        assert!(row.starts_with("\x1b[32m"));
        assert_eq!(display_width(&row), 30);
        assert!(strip_ansi(&row).ends_with("yyyyyyyyyyy"));
    }

    #[test]
    fn pads_short_background_lines() {
        let frame = Overlay::new(20, 6).compose("", "ab");
        let rows = plain_rows(&frame);
        assert_eq!(rows.len(), 5);
        assert_eq!(rows[2], format!("{0}│ab    │{0}", " ".repeat(6)));
    }
}
