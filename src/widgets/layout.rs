/// Narrowest terminal width the live table lays out for.
pub const MIN_WIDTH: usize = 80;

/// Columns taken by the row indicator, the two-space gaps between cells
/// and the right margin.
const CHROME: usize = 16;

/// Rows taken by everything that is not a table row.
const FRAME_ROWS: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Columns {
    pub process: usize,
    pub port: usize,
    pub proto: usize,
    pub state: usize,
    pub local: usize,
    pub remote: usize,
}

impl Columns {
    pub const MINIMUM: Columns = Columns {
        process: 12,
        port: 6,
        proto: 5,
        state: 11,
        local: 15,
        remote: 15,
    };

    /// Starts from the minimums and hands surplus width to the two most
    /// variable columns: a third to process, the rest to remote.
    pub fn for_width(width: usize) -> Self {
        let available = safe_width(width) - CHROME;
        let mut cols = Self::MINIMUM;
        let extra = available.saturating_sub(cols.total());
        cols.process += extra / 3;
        cols.remote += extra - extra / 3;
        cols
    }

    pub fn total(&self) -> usize {
        self.process + self.port + self.proto + self.state + self.local + self.remote
    }
}

pub fn safe_width(width: usize) -> usize {
    width.max(MIN_WIDTH)
}

pub fn page_size(height: usize) -> usize {
    match height.saturating_sub(FRAME_ROWS) {
        0 => 10,
        n => n,
    }
}

/// First row to draw so the cursor stays roughly centered.
pub fn scroll_offset(cursor: usize, page: usize, total: usize) -> usize {
    if total <= page {
        return 0;
    }
    cursor.saturating_sub(page / 2).min(total - page)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn narrow_terminals_get_minimums() {
        assert_eq!(Columns::for_width(40), Columns::MINIMUM);
        assert_eq!(Columns::for_width(80), Columns::MINIMUM);
    }

    #[test]
    fn surplus_goes_to_process_and_remote() {
        let cols = Columns::for_width(80 + 30);
        let extra = 110 - CHROME - Columns::MINIMUM.total();
        assert_eq!(cols.process, Columns::MINIMUM.process + extra / 3);
        assert_eq!(cols.remote, Columns::MINIMUM.remote + extra - extra / 3);
        assert_eq!(cols.port, 6);
        assert_eq!(cols.total() + CHROME, 110);
    }

    #[test]
    fn minimums_fit_minimum_width() {
        assert_eq!(Columns::MINIMUM.total() + CHROME, MIN_WIDTH);
    }

    #[test]
    fn page_size_has_floor() {
        assert_eq!(page_size(40), 34);
        assert_eq!(page_size(6), 10);
        assert_eq!(page_size(0), 10);
    }

    #[test]
    fn scroll_keeps_cursor_visible() {
        assert_eq!(scroll_offset(3, 10, 5), 0);
        assert_eq!(scroll_offset(0, 10, 100), 0);
        assert_eq!(scroll_offset(50, 10, 100), 45);
        assert_eq!(scroll_offset(99, 10, 100), 90);
        for cursor in 0..100 {
            let offset = scroll_offset(cursor, 10, 100);
            assert!(offset <= cursor && cursor < offset + 10);
        }
    }
}
