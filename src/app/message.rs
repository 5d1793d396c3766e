use std::time::{Duration, Instant};

use crate::app::keys::Key;
use crate::core::connection::{Connection, ConnectionIdentity};
use crate::enrich::Enrichment;

/// Everything the session reacts to. Producers (input thread, timers,
/// background tasks) all feed one queue.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Key(Key),
    Resize(u16, u16),
    Tick,
    Data(Vec<Connection>),
    FetchFailed(String),
    Killed {
        pid: u32,
        process: String,
        outcome: Result<(), String>,
    },
    /// A status timer fired at the given instant.
    ClearStatus(Instant),
    Enriched(ConnectionIdentity, Enrichment),
    /// Host names were added to the cache; only a redraw is needed.
    Resolved,
}

/// Side effects requested by the session. Each runs off the session's
/// thread and reports back with a `Message`.
#[derive(Debug, Clone, PartialEq)]
pub enum Task {
    Fetch,
    ScheduleTick(Duration),
    Kill { pid: u32, process: String },
    ClearStatusAfter(Duration),
    Enrich(Box<Connection>),
    Resolve(Vec<String>),
    Quit,
}
