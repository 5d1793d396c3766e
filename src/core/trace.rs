use std::collections::BTreeMap;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, warn};

use super::connection::{timestamp, Connection, ConnectionIdentity};
use super::filters::ConnectionFilter;
use super::source::ConnectionSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Opened,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceEvent {
    #[serde(with = "timestamp")]
    pub ts: DateTime<Utc>,
    pub event: EventKind,
    pub connection: Connection,
}

/// Turns consecutive snapshots into open/close events keyed by identity.
#[derive(Debug, Default)]
pub struct DiffTracker {
    baseline: Option<BTreeMap<ConnectionIdentity, Connection>>,
    budget: usize,
    emitted: usize,
}

impl DiffTracker {
    /// `budget` caps the total number of events; 0 means unbounded.
    pub fn new(budget: usize) -> Self {
        Self {
            baseline: None,
            budget,
            emitted: 0,
        }
    }

    pub fn is_tracking(&self) -> bool {
        self.baseline.is_some()
    }

    pub fn is_exhausted(&self) -> bool {
        self.budget != 0 && self.emitted >= self.budget
    }

    pub fn emitted(&self) -> usize {
        self.emitted
    }

    /// Diffs `snapshot` against the baseline and makes it the new baseline.
    /// The first snapshot only establishes the baseline.
    pub fn observe(&mut self, snapshot: Vec<Connection>, now: DateTime<Utc>) -> Vec<TraceEvent> {
        let current: BTreeMap<ConnectionIdentity, Connection> = snapshot
            .into_iter()
            .map(|conn| (conn.identity(), conn))
            .collect();

        let Some(previous) = self.baseline.replace(current) else {
            return Vec::new();
        };
        let Some(current) = self.baseline.as_ref() else {
            return Vec::new();
        };

        let event = |event, connection| TraceEvent {
            ts: now,
            event,
            connection,
        };
        let mut events: Vec<TraceEvent> = current
            .iter()
            .filter(|(id, _)| !previous.contains_key(*id))
            .map(|(_, conn)| event(EventKind::Opened, conn.clone()))
            .collect();
        events.extend(
            previous
                .into_iter()
                .filter(|(id, _)| !current.contains_key(id))
                .map(|(_, conn)| event(EventKind::Closed, conn)),
        );

        if self.budget != 0 {
            events.truncate(self.budget.saturating_sub(self.emitted));
        }
        self.emitted += events.len();
        events
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TraceOptions {
    pub interval: Duration,
    pub budget: usize,
}

impl Default for TraceOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            budget: 0,
        }
    }
}

/// Poll loop state shared by `run_trace` and callers that need to do async
/// work between batches.
pub struct TracePoller {
    source: Arc<dyn ConnectionSource>,
    filter: ConnectionFilter,
    tracker: DiffTracker,
    ticker: Interval,
}

impl TracePoller {
    /// Must be called inside a runtime.
    pub fn new(source: Arc<dyn ConnectionSource>, filter: ConnectionFilter, options: TraceOptions) -> Self {
        let mut ticker = tokio::time::interval(options.interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            source,
            filter,
            tracker: DiffTracker::new(options.budget),
            ticker,
        }
    }

    pub fn emitted(&self) -> usize {
        self.tracker.emitted()
    }

    /// Waits for the next tick and returns that poll's events, which may be
    /// none. A failed fetch keeps the previous baseline and waits for the
    /// following tick. `None` once the budget is spent or `shutdown` resolves.
    pub async fn next_batch<S>(&mut self, mut shutdown: Pin<&mut S>) -> Option<Vec<TraceEvent>>
    where
        S: Future<Output = ()>,
    {
        loop {
            if self.tracker.is_exhausted() {
                return None;
            }
            tokio::select! {
                _ = &mut shutdown => {
                    debug!("trace interrupted");
                    return None;
                }
                _ = self.ticker.tick() => {}
            }

            let fetch_source = Arc::clone(&self.source);
            let fetched = tokio::select! {
                _ = &mut shutdown => {
                    debug!("trace interrupted during fetch");
                    return None;
                }
                fetched = tokio::task::spawn_blocking(move || fetch_source.fetch()) => fetched,
            };
            match fetched {
                Ok(Ok(snapshot)) => return Some(self.tracker.observe(self.filter.apply(snapshot), Utc::now())),
                Ok(Err(e)) => warn!(error = %e, "fetch failed, keeping previous snapshot"),
                Err(e) => warn!(error = %e, "fetch task failed"),
            }
        }
    }
}

/// Polls `source` every interval and hands each event to `sink` until the
/// budget is spent or `shutdown` resolves. Returns the number of events
/// emitted.
pub async fn run_trace<S, F>(
    source: Arc<dyn ConnectionSource>,
    filter: ConnectionFilter,
    options: TraceOptions,
    shutdown: S,
    mut sink: F,
) -> io::Result<usize>
where
    S: Future<Output = ()>,
    F: FnMut(&TraceEvent) -> io::Result<()>,
{
    let mut poller = TracePoller::new(source, filter, options);
    tokio::pin!(shutdown);

    while let Some(events) = poller.next_batch(shutdown.as_mut()).await {
        for event in &events {
            sink(event)?;
        }
    }
    Ok(poller.emitted())
}
