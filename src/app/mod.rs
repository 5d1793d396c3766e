pub mod keys;
pub mod message;
pub mod session;
pub mod view;

use std::collections::HashSet;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use crossterm::cursor::MoveTo;
use crossterm::event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyEventKind, MouseEventKind};
use crossterm::style::{Print, ResetColor};
use crossterm::terminal::{Clear, ClearType};
use crossterm::{execute, queue};
use ratatui::DefaultTerminal;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};

use crate::core::source::ConnectionSource;
use crate::enrich::EnrichmentCache;
use crate::error::Error;
use keys::Key;
use message::{Message, Task};
use session::Session;

const INPUT_POLL: Duration = Duration::from_millis(250);

/// Drives a `Session`: feeds it messages one at a time, runs the tasks it
/// returns in the background and redraws after every message.
pub struct App {
    session: Session,
    source: Arc<dyn ConnectionSource>,
    cache: Arc<EnrichmentCache>,
    resolving: Arc<Mutex<HashSet<String>>>,
    tx: UnboundedSender<Message>,
    rx: UnboundedReceiver<Message>,
    mouse_enabled: bool,
}

impl App {
    pub fn new(session: Session, source: Arc<dyn ConnectionSource>, cache: Arc<EnrichmentCache>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            session,
            source,
            cache,
            resolving: Arc::new(Mutex::new(HashSet::new())),
            tx,
            rx,
            mouse_enabled: false,
        }
    }

    pub async fn run(mut self, terminal: &mut DefaultTerminal) -> Result<(), Error> {
        if execute!(io::stdout(), EnableMouseCapture).is_ok() {
            self.mouse_enabled = true;
        }

        let result = self.run_loop(terminal).await;

        if self.mouse_enabled {
            execute!(io::stdout(), DisableMouseCapture).ok();
        }
        result
    }

    async fn run_loop(&mut self, terminal: &mut DefaultTerminal) -> Result<(), Error> {
        let size = terminal.size().map_err(Error::Terminal)?;
        self.session.update(Message::Resize(size.width, size.height));
        spawn_input(self.tx.clone()).map_err(Error::Terminal)?;
        debug!(flags = %view::describe_flags(self.session.show_flags()), "session started");

        for task in self.session.start() {
            self.dispatch(task);
        }
        self.draw(terminal)?;

        while let Some(message) = self.rx.recv().await {
            let tasks = self.session.update(message);
            if tasks.contains(&Task::Quit) {
                return Ok(());
            }
            for task in tasks {
                self.dispatch(task);
            }
            self.draw(terminal)?;
        }
        Ok(())
    }

    fn draw(&self, terminal: &mut DefaultTerminal) -> Result<(), Error> {
        let cache = self.session.resolves_names().then_some(&*self.cache);
        let frame = view::render(&self.session, cache);
        let (_, height) = self.session.size();

        let out = terminal.backend_mut();
        for (row, line) in frame.split('\n').take(height as usize).enumerate() {
            queue!(
                out,
                MoveTo(0, row as u16),
                Print(line),
                ResetColor,
                Clear(ClearType::UntilNewLine)
            )
            .map_err(Error::Terminal)?;
        }
        queue!(out, Clear(ClearType::FromCursorDown)).map_err(Error::Terminal)?;
        out.flush().map_err(Error::Terminal)
    }

    /// Starts `task` off the session's thread. Results come back through the
    /// queue; after quit nobody reads them.
    fn dispatch(&self, task: Task) {
        let tx = self.tx.clone();
        match task {
            Task::Fetch => {
                let source = Arc::clone(&self.source);
                tokio::spawn(async move {
                    let message = match tokio::task::spawn_blocking(move || source.fetch()).await {
                        Ok(Ok(connections)) => Message::Data(connections),
                        Ok(Err(e)) => Message::FetchFailed(e.to_string()),
                        Err(e) => Message::FetchFailed(e.to_string()),
                    };
                    tx.send(message).ok();
                });
            }
            Task::ScheduleTick(after) => {
                tokio::spawn(async move {
                    tokio::time::sleep(after).await;
                    tx.send(Message::Tick).ok();
                });
            }
            Task::ClearStatusAfter(after) => {
                tokio::spawn(async move {
                    tokio::time::sleep(after).await;
                    tx.send(Message::ClearStatus(Instant::now())).ok();
                });
            }
            Task::Kill { pid, process } => {
                tokio::task::spawn_blocking(move || {
                    let outcome = terminate(pid);
                    tx.send(Message::Killed { pid, process, outcome }).ok();
                });
            }
            Task::Enrich(conn) => {
                let cache = Arc::clone(&self.cache);
                tokio::task::spawn_blocking(move || {
                    let enrichment = cache.enrich(&conn);
                    tx.send(Message::Enriched(conn.identity(), enrichment)).ok();
                });
            }
            Task::Resolve(addrs) => self.resolve(addrs, tx),
            Task::Quit => {}
        }
    }

    /// Reverse-resolves the addresses that are neither cached nor already
    /// being looked up. Each address gets its own blocking task so one slow
    /// lookup does not hold up the rest.
    fn resolve(&self, addrs: Vec<String>, tx: UnboundedSender<Message>) {
        let pending: Vec<String> = {
            let mut in_flight = self.resolving.lock().unwrap_or_else(PoisonError::into_inner);
            addrs
                .into_iter()
                .filter(|addr| !self.cache.is_host_cached(addr) && in_flight.insert(addr.clone()))
                .collect()
        };

        for addr in pending {
            let cache = Arc::clone(&self.cache);
            let resolving = Arc::clone(&self.resolving);
            let tx = tx.clone();
            tokio::task::spawn_blocking(move || {
                cache.host_label(&addr);
                resolving.lock().unwrap_or_else(PoisonError::into_inner).remove(&addr);
                tx.send(Message::Resolved).ok();
            });
        }
    }
}

/// Polls the terminal for input on its own thread until the queue closes.
fn spawn_input(tx: UnboundedSender<Message>) -> io::Result<thread::JoinHandle<()>> {
    thread::Builder::new().name("sockscope-input".into()).spawn(move || {
        while !tx.is_closed() {
            match event::poll(INPUT_POLL) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    warn!(error = %e, "terminal input unavailable");
                    return;
                }
            }
            let message = match event::read() {
                Ok(Event::Key(key)) if key.kind == KeyEventKind::Press => Message::Key(Key::from(key)),
                Ok(Event::Mouse(mouse)) => match mouse.kind {
                    MouseEventKind::ScrollUp => Message::Key(Key::Up),
                    MouseEventKind::ScrollDown => Message::Key(Key::Down),
                    _ => continue,
                },
                Ok(Event::Resize(width, height)) => Message::Resize(width, height),
                Ok(_) => continue,
                Err(e) => {
                    warn!(error = %e, "reading terminal input failed");
                    return;
                }
            };
            if tx.send(message).is_err() {
                return;
            }
        }
    })
}

/// Sends SIGTERM to `pid`.
fn terminate(pid: u32) -> Result<(), String> {
    let pid = libc::pid_t::try_from(pid).map_err(|_| format!("pid {pid} out of range"))?;
    // SAFETY: kill(2) takes plain integers and touches no memory of ours.
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error().to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::net::IpAddr;

    use super::*;
    use crate::core::source::FixtureSource;
    use crate::enrich::{NameResolver, NoGeoLookup};
    use crate::error::LookupError;

    const LOOKUP_DELAY: Duration = Duration::from_millis(300);

    /// Answers every reverse lookup after a fixed delay.
    struct SlowResolver;

    impl NameResolver for SlowResolver {
        fn reverse(&self, ip: IpAddr) -> Result<Option<String>, LookupError> {
            thread::sleep(LOOKUP_DELAY);
            Ok(Some(format!("host-{ip}")))
        }

        fn service(&self, _port: u16, _udp: bool) -> Result<Option<String>, LookupError> {
            Ok(None)
        }
    }

    fn slow_app() -> App {
        let cache = Arc::new(EnrichmentCache::new(Arc::new(SlowResolver), Arc::new(NoGeoLookup)));
        App::new(Session::new(Duration::from_secs(1)), Arc::new(FixtureSource::new(Vec::new())), cache)
    }

    #[test]
    fn terminate_rejects_out_of_range_pid() {
        assert!(terminate(u32::MAX).is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn addresses_resolve_side_by_side() {
        let mut app = slow_app();
        let addrs: Vec<String> = (1..=6).map(|n| format!("10.1.0.{n}")).collect();

        let started = Instant::now();
        app.dispatch(Task::Resolve(addrs.clone()));
        // Repeats are dropped while the first round is in flight.
        app.dispatch(Task::Resolve(addrs.clone()));
        for _ in 0..addrs.len() {
            let message = tokio::time::timeout(LOOKUP_DELAY * 3, app.rx.recv()).await.unwrap();
            assert!(matches!(message, Some(Message::Resolved)));
        }

        assert!(started.elapsed() < LOOKUP_DELAY * 3, "took {:?}", started.elapsed());
        assert!(addrs.iter().all(|addr| app.cache.is_host_cached(addr)));
        assert!(app.resolving.lock().unwrap().is_empty());
        assert!(app.rx.try_recv().is_err());
    }
}
