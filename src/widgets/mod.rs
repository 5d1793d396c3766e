pub mod layout;
pub mod overlay;
pub mod symbols;
pub mod text;

pub use self::layout::{page_size, scroll_offset, Columns};
pub use self::overlay::Overlay;
pub use self::text::{display_width, fit, pad, strip_ansi, truncate, visible_slice};
