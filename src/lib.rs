//! Socket inspection: live socket table joined with owning processes,
//! shown interactively or as one-shot listings, stats and open/close traces.

pub mod app;
pub mod cli;
pub mod commands;
pub mod core;
pub mod enrich;
pub mod error;
pub mod output;
pub mod widgets;

pub use crate::core::connection::Connection;
pub use crate::core::filters::ConnectionFilter;
pub use crate::core::source::{ConnectionSource, FixtureSource};
pub use crate::error::Error;
