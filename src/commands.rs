//! One function per subcommand. Each writes to the writer it is handed so
//! the same code drives stdout and tests.

use std::future::Future;
use std::io::Write;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::cli::{ListArgs, RecordArgs, StatsArgs, StatsFormat, TraceArgs};
use crate::core::connection::Connection;
use crate::core::filters::ConnectionFilter;
use crate::core::source::{save_fixture, ConnectionSource};
use crate::core::stats::Stats;
use crate::core::trace::{TraceEvent, TracePoller, TraceOptions};
use crate::enrich::EnrichmentCache;
use crate::error::Error;
use crate::output::{self, json, FieldMap, OutputFormat};

/// One snapshot with the filter applied.
pub fn snapshot(source: &dyn ConnectionSource, filter: &ConnectionFilter) -> Result<Vec<Connection>, Error> {
    Ok(filter.apply(source.fetch()?))
}

pub fn list(
    args: &ListArgs,
    source: &dyn ConnectionSource,
    cache: &EnrichmentCache,
    out: &mut impl Write,
) -> Result<(), Error> {
    let conns = args.sort.sorted(snapshot(source, &args.filter)?);
    let values = FieldMap::new(cache, !args.numeric);

    let text = match args.format {
        OutputFormat::Json => return json::write_pretty(&conns, out),
        OutputFormat::Table => {
            let fields = output::select_fields(&args.fields, output::TABLE_FIELDS, args.with_ts);
            output::table::render(&conns, &fields, args.headers, &values)
        }
        OutputFormat::Plain => {
            let fields = output::select_fields(&args.fields, output::PLAIN_FIELDS, args.with_ts);
            output::plain::render(&conns, &fields, args.headers, &values)
        }
        OutputFormat::Csv => {
            let fields = output::select_fields(&args.fields, output::CSV_FIELDS, args.with_ts);
            output::csv::render(&conns, &fields, args.headers, &values)
        }
    };
    out.write_all(text.as_bytes())?;
    Ok(())
}

fn write_stats(stats: &Stats, format: StatsFormat, headers: bool, out: &mut impl Write) -> Result<(), Error> {
    match format {
        StatsFormat::Json => json::write_pretty(stats, out),
        StatsFormat::Csv => Ok(out.write_all(output::stats::render_csv(stats, headers).as_bytes())?),
        StatsFormat::Table => Ok(out.write_all(output::stats::render_table(stats, headers).as_bytes())?),
    }
}

/// Prints aggregate counters once, or every interval until the count is
/// reached or `shutdown` resolves. Headers go out with the first report only.
pub async fn stats<S>(
    args: &StatsArgs,
    source: Arc<dyn ConnectionSource>,
    out: &mut impl Write,
    shutdown: S,
) -> Result<usize, Error>
where
    S: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let mut reports = 0;
    loop {
        let fetch_source = Arc::clone(&source);
        let filter = args.filter.clone();
        let fetched = tokio::task::spawn_blocking(move || snapshot(fetch_source.as_ref(), &filter))
            .await
            .map_err(|e| Error::Output(std::io::Error::other(e)))?;

        match fetched {
            Ok(conns) => {
                let stats = Stats::collect(&conns, Utc::now());
                write_stats(&stats, args.format, args.headers && reports == 0, out)?;
                out.flush()?;
                reports += 1;
            }
            Err(e) if args.interval.is_zero() => return Err(e),
            Err(e) => warn!(error = %e, "stats refresh failed"),
        }

        if args.interval.is_zero() || (args.count > 0 && reports >= args.count) {
            return Ok(reports);
        }
        tokio::select! {
            _ = &mut shutdown => return Ok(reports),
            _ = tokio::time::sleep(args.interval) => {}
        }
    }
}

/// Streams open/close events until the count is reached or `shutdown`
/// resolves. Host names are looked up off the async threads before a batch
/// is printed, and an interrupt cuts those lookups short.
pub async fn trace<S>(
    args: &TraceArgs,
    source: Arc<dyn ConnectionSource>,
    cache: Arc<EnrichmentCache>,
    out: &mut impl Write,
    shutdown: S,
) -> Result<usize, Error>
where
    S: Future<Output = ()>,
{
    let options = TraceOptions {
        interval: args.interval,
        budget: args.count,
    };
    let names = !args.json && !args.numeric;
    let mut poller = TracePoller::new(source, args.filter.clone(), options);
    tokio::pin!(shutdown);

    while let Some(events) = poller.next_batch(shutdown.as_mut()).await {
        if events.is_empty() {
            continue;
        }
        if names {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = warm_names(Arc::clone(&cache), &events) => {}
            }
        }

        let values = if names { FieldMap::cached(&cache) } else { FieldMap::numeric() };
        for event in &events {
            if args.json {
                json::write_line(event, &mut *out)?;
            } else {
                writeln!(out, "{}", output::format_trace_event(event, &values, args.with_ts))?;
            }
        }
        out.flush()?;
    }
    Ok(poller.emitted())
}

/// Fills `cache` with the labels `events` will print.
async fn warm_names(cache: Arc<EnrichmentCache>, events: &[TraceEvent]) {
    let conns: Vec<Connection> = events.iter().map(|e| e.connection.clone()).collect();
    let warmed = tokio::task::spawn_blocking(move || {
        for conn in &conns {
            cache.host_label(&conn.laddr);
            cache.host_label(&conn.raddr);
            cache.service_label(conn.lport, &conn.proto);
            cache.service_label(conn.rport, &conn.proto);
        }
    })
    .await;
    if let Err(e) = warmed {
        warn!(error = %e, "name lookup task failed");
    }
}

/// Runs `future` on a fresh multi-threaded runtime. Blocking lookups still
/// running when it completes are abandoned, not waited for.
pub fn block_on<F: Future>(future: F) -> Result<F::Output, Error> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(Error::Runtime)?;
    let output = runtime.block_on(future);
    runtime.shutdown_background();
    Ok(output)
}

/// Saves the filtered snapshot as a fixture file and reports the count.
pub fn record(args: &RecordArgs, source: &dyn ConnectionSource, out: &mut impl Write) -> Result<usize, Error> {
    let conns = snapshot(source, &args.filter)?;
    save_fixture(&args.path, &conns)?;
    info!(path = %args.path.display(), count = conns.len(), "fixture written");
    writeln!(out, "recorded {} connections to {}", conns.len(), args.path.display())?;
    Ok(conns.len())
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;

    #[test]
    fn block_on_does_not_wait_for_abandoned_lookups() {
        let started = Instant::now();
        let value = block_on(async {
            let _ = tokio::task::spawn_blocking(|| std::thread::sleep(Duration::from_secs(3)));
            7
        })
        .unwrap();

        assert_eq!(value, 7);
        assert!(started.elapsed() < Duration::from_secs(2), "took {:?}", started.elapsed());
    }
}
