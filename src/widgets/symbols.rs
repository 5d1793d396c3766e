pub const SELECTED: &str = "\u{25B8}";
pub const WATCHED: &str = "\u{2605}";
pub const WARNING: &str = "\u{26A0}";
pub const REFRESH: &str = "\u{21BB}";
pub const ELLIPSIS: &str = "\u{2026}";
pub const DASH: &str = "\u{2013}";

// rounded box
pub const TOP_LEFT: &str = "\u{256D}";
pub const TOP_RIGHT: &str = "\u{256E}";
pub const BOTTOM_LEFT: &str = "\u{2570}";
pub const BOTTOM_RIGHT: &str = "\u{256F}";
pub const HORIZONTAL: &str = "\u{2500}";
pub const VERTICAL: &str = "\u{2502}";
pub const TEE_DOWN: &str = "\u{252C}";
pub const TEE_UP: &str = "\u{2534}";
pub const TEE_RIGHT: &str = "\u{251C}";
pub const TEE_LEFT: &str = "\u{2524}";
pub const CROSS: &str = "\u{253C}";
