pub mod connection;
pub mod filters;
pub mod sort;
pub mod source;
pub mod stats;
pub mod system;
pub mod trace;
