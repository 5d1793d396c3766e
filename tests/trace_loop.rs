//! Polling loops driven by a scripted source.

use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use sockscope::cli::{StatsArgs, StatsFormat, TraceArgs};
use sockscope::commands;
use sockscope::core::trace::{run_trace, EventKind, TraceOptions};
use sockscope::enrich::{EnrichmentCache, NameResolver, NoGeoLookup, SystemResolver};
use sockscope::error::{LookupError, SourceError};
use sockscope::{Connection, ConnectionFilter, ConnectionSource};

const TICK: Duration = Duration::from_millis(10);

/// Hands out the queued results in order, then repeats the last snapshot.
/// `None` entries are failed fetches.
struct Scripted {
    steps: Mutex<VecDeque<Option<Vec<Connection>>>>,
    last: Mutex<Vec<Connection>>,
}

impl Scripted {
    fn new(snapshots: Vec<Vec<Connection>>) -> Arc<Self> {
        Self::with_failures(snapshots.into_iter().map(Some).collect())
    }

    fn with_failures(steps: Vec<Option<Vec<Connection>>>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            last: Mutex::new(Vec::new()),
        })
    }
}

impl ConnectionSource for Scripted {
    fn fetch(&self) -> Result<Vec<Connection>, SourceError> {
        let mut last = self.last.lock().unwrap();
        match self.steps.lock().unwrap().pop_front() {
            Some(Some(next)) => *last = next,
            Some(None) => return Err(SourceError::SocketTable("netlink busy".to_string())),
            None => {}
        }
        Ok(last.clone())
    }
}

/// Appends `.lan` to every address; knows no services.
struct NamedHosts;

impl NameResolver for NamedHosts {
    fn reverse(&self, ip: IpAddr) -> Result<Option<String>, LookupError> {
        Ok(Some(format!("{ip}.lan")))
    }

    fn service(&self, _port: u16, _udp: bool) -> Result<Option<String>, LookupError> {
        Ok(None)
    }
}

/// Answers reverse lookups only after a long pause.
struct StalledResolver;

impl NameResolver for StalledResolver {
    fn reverse(&self, _ip: IpAddr) -> Result<Option<String>, LookupError> {
        std::thread::sleep(Duration::from_secs(1));
        Ok(Some("late.example".to_string()))
    }

    fn service(&self, _port: u16, _udp: bool) -> Result<Option<String>, LookupError> {
        Ok(None)
    }
}

fn trace_args(count: usize, json: bool, numeric: bool) -> TraceArgs {
    TraceArgs {
        filter: ConnectionFilter::new(),
        interval: TICK,
        count,
        json,
        numeric,
        with_ts: false,
    }
}

fn conn(pid: u32, proto: &str, lport: u16) -> Connection {
    Connection {
        pid,
        process: format!("svc{pid}"),
        proto: proto.to_string(),
        state: "ESTABLISHED".to_string(),
        laddr: "10.0.0.2".to_string(),
        lport,
        raddr: "10.0.0.9".to_string(),
        rport: 443,
        ..Default::default()
    }
}

async fn never() {
    std::future::pending::<()>().await
}

#[tokio::test]
async fn trace_reports_opens_and_closes_until_budget() {
    let a = conn(1, "tcp", 5000);
    let b = conn(2, "tcp", 5001);
    let source = Scripted::new(vec![vec![a.clone()], vec![a.clone(), b.clone()], vec![b.clone()], vec![]]);
    let options = TraceOptions {
        interval: TICK,
        budget: 2,
    };

    let mut seen = Vec::new();
    let emitted = run_trace(source, ConnectionFilter::new(), options, never(), |event| {
        seen.push((event.event, event.connection.pid));
        Ok(())
    })
    .await
    .unwrap();

    assert_eq!(emitted, 2);
    assert_eq!(seen, vec![(EventKind::Opened, 2), (EventKind::Closed, 1)]);
}

#[tokio::test]
async fn trace_applies_filter_before_diffing() {
    let tcp = conn(1, "tcp", 5000);
    let udp = conn(2, "udp", 5353);
    let late = conn(3, "tcp", 5002);
    let source = Scripted::new(vec![vec![tcp.clone()], vec![tcp.clone(), udp], vec![tcp, late]]);
    let options = TraceOptions {
        interval: TICK,
        budget: 1,
    };

    let mut seen = Vec::new();
    run_trace(source, ConnectionFilter::parse(["proto=tcp"]).unwrap(), options, never(), |event| {
        seen.push(event.connection.pid);
        Ok(())
    })
    .await
    .unwrap();

    assert_eq!(seen, vec![3]);
}

#[tokio::test]
async fn trace_stops_on_shutdown() {
    let source = Scripted::new(vec![vec![conn(1, "tcp", 5000)]]);
    let options = TraceOptions {
        interval: TICK,
        budget: 0,
    };

    let emitted = run_trace(source, ConnectionFilter::new(), options, tokio::time::sleep(TICK * 5), |_| Ok(()))
        .await
        .unwrap();
    assert_eq!(emitted, 0);
}

#[tokio::test]
async fn trace_keeps_baseline_across_failed_fetches() {
    let a = conn(1, "tcp", 5000);
    let b = conn(2, "tcp", 5001);
    let source = Scripted::with_failures(vec![Some(vec![a.clone()]), None, None, Some(vec![a, b])]);
    let options = TraceOptions {
        interval: TICK,
        budget: 1,
    };

    let mut seen = Vec::new();
    let emitted = run_trace(source, ConnectionFilter::new(), options, never(), |event| {
        seen.push((event.event, event.connection.pid));
        Ok(())
    })
    .await
    .unwrap();

    assert_eq!(emitted, 1);
    assert_eq!(seen, vec![(EventKind::Opened, 2)]);
}

#[tokio::test]
async fn trace_command_writes_json_lines() {
    let source = Scripted::new(vec![vec![], vec![conn(7, "tcp", 6000)]]);
    let cache = Arc::new(EnrichmentCache::new(Arc::new(SystemResolver::default()), Arc::new(NoGeoLookup)));
    let args = trace_args(1, true, true);

    let mut out = Vec::new();
    let emitted = commands::trace(&args, source, cache, &mut out, never()).await.unwrap();
    assert_eq!(emitted, 1);

    let line: serde_json::Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(line["event"], "opened");
    assert_eq!(line["connection"]["pid"], 7);
}

#[tokio::test(flavor = "multi_thread")]
async fn interrupt_cuts_slow_name_lookups_short() {
    let source = Scripted::new(vec![vec![], vec![conn(7, "tcp", 6000)]]);
    let cache = Arc::new(EnrichmentCache::new(Arc::new(StalledResolver), Arc::new(NoGeoLookup)));
    let args = trace_args(0, false, false);

    let started = Instant::now();
    let mut out = Vec::new();
    commands::trace(&args, source, cache, &mut out, tokio::time::sleep(TICK * 10))
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_millis(800), "took {:?}", started.elapsed());
    assert!(out.is_empty());
}

#[tokio::test]
async fn human_trace_prints_resolved_names() {
    let source = Scripted::new(vec![vec![], vec![conn(7, "tcp", 6000)]]);
    let cache = Arc::new(EnrichmentCache::new(Arc::new(NamedHosts), Arc::new(NoGeoLookup)));
    let args = trace_args(1, false, false);

    let mut out = Vec::new();
    commands::trace(&args, source, cache, &mut out, never()).await.unwrap();

    let text = String::from_utf8(out).unwrap();
    assert_eq!(text, "+ TCP ESTABLISHED 10.0.0.2.lan:6000->10.0.0.9.lan:443 (svc7[7])\n");
}

#[tokio::test]
async fn stats_repeats_headers_once() {
    let source = Scripted::new(vec![vec![conn(1, "tcp", 5000), conn(2, "udp", 5353)]]);
    let args = StatsArgs {
        filter: ConnectionFilter::new(),
        format: StatsFormat::Csv,
        interval: TICK,
        count: 3,
        headers: true,
    };

    let mut out = Vec::new();
    let reports = commands::stats(&args, source, &mut out, never()).await.unwrap();
    let text = String::from_utf8(out).unwrap();

    assert_eq!(reports, 3);
    assert_eq!(text.matches("timestamp,metric,key,value").count(), 1);
    assert_eq!(text.lines().filter(|l| l.contains(",total,,2")).count(), 3);
}
