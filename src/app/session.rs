use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use super::keys::Key;
use super::message::{Message, Task};
use crate::core::connection::Connection;
use crate::core::filters::ConnectionFilter;
use crate::core::sort::SortSpec;
use crate::enrich::Enrichment;
use crate::widgets::page_size;

const WATCH_STATUS: Duration = Duration::from_secs(2);
const KILL_STATUS: Duration = Duration::from_secs(3);

/// Protocol and state visibility toggles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShowFlags {
    pub tcp: bool,
    pub udp: bool,
    pub listening: bool,
    pub established: bool,
    pub other: bool,
}

impl Default for ShowFlags {
    fn default() -> Self {
        Self::all()
    }
}

impl ShowFlags {
    pub fn all() -> Self {
        Self {
            tcp: true,
            udp: true,
            listening: true,
            established: true,
            other: true,
        }
    }

    /// Flags from the command line. Giving only protocol flags keeps every
    /// state visible, and giving only state flags keeps both protocols.
    pub fn preset(tcp: bool, udp: bool, listening: bool, established: bool) -> Self {
        if !(tcp || udp || listening || established) {
            return Self::all();
        }
        let mut flags = Self {
            tcp,
            udp,
            listening,
            established,
            other: false,
        };
        if !listening && !established {
            flags.listening = true;
            flags.established = true;
            flags.other = true;
        }
        if !tcp && !udp {
            flags.tcp = true;
            flags.udp = true;
        }
        flags
    }

    pub fn admits(&self, conn: &Connection) -> bool {
        if conn.is_tcp() && !self.tcp || conn.is_udp() && !self.udp {
            return false;
        }
        if conn.is_listening() {
            self.listening
        } else if conn.is_established() {
            self.established
        } else {
            self.other
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Mode {
    Normal,
    Search,
    Help,
    Detail(Box<Connection>),
    KillConfirm(Box<Connection>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub text: String,
    pub expires: Instant,
}

/// State of the live view. Only `update` mutates it, one message at a time.
#[derive(Debug)]
pub struct Session {
    connections: Vec<Connection>,
    base_filter: ConnectionFilter,
    cursor: usize,
    width: u16,
    height: u16,
    show: ShowFlags,
    search: String,
    sort: SortSpec,
    mode: Mode,
    watched: BTreeSet<u32>,
    status: Option<Status>,
    last_refresh: Instant,
    last_error: Option<String>,
    enrichment: Option<Enrichment>,
    interval: Duration,
    resolve_names: bool,
}

impl Session {
    pub fn new(interval: Duration) -> Self {
        Self {
            connections: Vec::new(),
            base_filter: ConnectionFilter::default(),
            cursor: 0,
            width: 80,
            height: 24,
            show: ShowFlags::all(),
            search: String::new(),
            sort: SortSpec::default(),
            mode: Mode::Normal,
            watched: BTreeSet::new(),
            status: None,
            last_refresh: Instant::now(),
            last_error: None,
            enrichment: None,
            interval,
            resolve_names: false,
        }
    }

    pub fn with_filter(mut self, filter: ConnectionFilter) -> Self {
        self.base_filter = filter;
        self
    }

    pub fn with_show_flags(mut self, show: ShowFlags) -> Self {
        self.show = show;
        self
    }

    pub fn with_sort(mut self, sort: SortSpec) -> Self {
        self.sort = sort;
        self
    }

    pub fn with_name_resolution(mut self, enabled: bool) -> Self {
        self.resolve_names = enabled;
        self
    }

    /// Tasks that start the refresh cycle.
    pub fn start(&self) -> Vec<Task> {
        vec![Task::Fetch, Task::ScheduleTick(self.interval)]
    }

    pub fn update(&mut self, message: Message) -> Vec<Task> {
        match message {
            Message::Key(key) => self.handle_key(key),
            Message::Resize(width, height) => {
                self.width = width;
                self.height = height;
                Vec::new()
            }
            Message::Tick => vec![Task::Fetch, Task::ScheduleTick(self.interval)],
            Message::Data(connections) => {
                self.connections = self.base_filter.apply(connections);
                self.sort.apply(&mut self.connections);
                self.last_refresh = Instant::now();
                self.last_error = None;
                self.clamp_cursor();
                self.resolve_tasks()
            }
            Message::FetchFailed(error) => {
                warn!(%error, "refresh failed, keeping previous snapshot");
                self.last_error = Some(error);
                Vec::new()
            }
            Message::Killed {
                pid,
                process,
                outcome,
            } => {
                let text = match outcome {
                    Ok(()) => {
                        info!(pid, %process, "sent SIGTERM");
                        format!("killed {process} (pid {pid})")
                    }
                    Err(e) => {
                        warn!(pid, error = %e, "kill failed");
                        format!("failed to kill pid {pid}: {e}")
                    }
                };
                self.set_status(text, KILL_STATUS);
                vec![Task::Fetch, Task::ClearStatusAfter(KILL_STATUS)]
            }
            Message::ClearStatus(now) => {
                if self.status.as_ref().is_some_and(|s| now >= s.expires) {
                    self.status = None;
                }
                Vec::new()
            }
            Message::Enriched(identity, enrichment) => {
                if let Mode::Detail(conn) = &self.mode {
                    if conn.identity() == identity {
                        self.enrichment = Some(enrichment);
                    }
                }
                Vec::new()
            }
            Message::Resolved => Vec::new(),
        }
    }

    fn handle_key(&mut self, key: Key) -> Vec<Task> {
        if key == Key::Ctrl('c') {
            return vec![Task::Quit];
        }
        match self.mode {
            Mode::Search => {
                self.handle_search_key(key);
                Vec::new()
            }
            Mode::KillConfirm(_) => self.handle_kill_confirm_key(key),
            Mode::Detail(_) => {
                if matches!(key, Key::Esc | Key::Enter | Key::Char('q')) {
                    self.mode = Mode::Normal;
                    self.enrichment = None;
                }
                Vec::new()
            }
            Mode::Help => {
                if matches!(key, Key::Esc | Key::Enter | Key::Char('q') | Key::Char('?')) {
                    self.mode = Mode::Normal;
                }
                Vec::new()
            }
            Mode::Normal => self.handle_normal_key(key),
        }
    }

    fn handle_search_key(&mut self, key: Key) {
        match key {
            Key::Esc => {
                self.mode = Mode::Normal;
                self.search.clear();
            }
            Key::Enter => {
                self.mode = Mode::Normal;
                self.cursor = 0;
            }
            Key::Backspace => {
                self.search.pop();
            }
            Key::Char(c) => self.search.push(c),
            _ => return,
        }
        self.clamp_cursor();
    }

    fn handle_kill_confirm_key(&mut self, key: Key) -> Vec<Task> {
        match key {
            Key::Char('y') | Key::Char('Y') => {
                let Mode::KillConfirm(target) = std::mem::replace(&mut self.mode, Mode::Normal) else {
                    return Vec::new();
                };
                if target.pid > 0 {
                    return vec![Task::Kill {
                        pid: target.pid,
                        process: target.process,
                    }];
                }
            }
            Key::Char('n') | Key::Char('N') | Key::Esc | Key::Char('q') => {
                self.mode = Mode::Normal;
            }
            _ => {}
        }
        Vec::new()
    }

    fn handle_normal_key(&mut self, key: Key) -> Vec<Task> {
        let page = page_size(self.height as usize) as isize;
        match key {
            Key::Char('q') => return vec![Task::Quit],

            Key::Char('j') | Key::Down => self.move_cursor(1),
            Key::Char('k') | Key::Up => self.move_cursor(-1),
            Key::Char('g') | Key::Home => self.cursor = 0,
            Key::Char('G') | Key::End => {
                self.cursor = self.visible().len().saturating_sub(1);
            }
            Key::Ctrl('d') => self.move_cursor(page / 2),
            Key::Ctrl('u') => self.move_cursor(-(page / 2)),
            Key::Ctrl('f') | Key::PageDown => self.move_cursor(page),
            Key::Ctrl('b') | Key::PageUp => self.move_cursor(-page),

            Key::Char('t') => self.toggle(|s| &mut s.tcp),
            Key::Char('u') => self.toggle(|s| &mut s.udp),
            Key::Char('l') => self.toggle(|s| &mut s.listening),
            Key::Char('e') => self.toggle(|s| &mut s.established),
            Key::Char('o') => self.toggle(|s| &mut s.other),
            Key::Char('a') => {
                self.show = ShowFlags::all();
                self.clamp_cursor();
            }

            Key::Char('s') => {
                self.sort.field = self.sort.field.next();
                self.sort.apply(&mut self.connections);
            }
            Key::Char('S') => {
                self.sort = self.sort.reversed();
                self.sort.apply(&mut self.connections);
            }

            Key::Char('/') => {
                self.mode = Mode::Search;
                self.search.clear();
                self.clamp_cursor();
            }
            Key::Enter | Key::Char(' ') => {
                if let Some(conn) = self.selected().cloned() {
                    self.enrichment = None;
                    self.mode = Mode::Detail(Box::new(conn.clone()));
                    return vec![Task::Enrich(Box::new(conn))];
                }
            }
            Key::Char('r') => return vec![Task::Fetch],
            Key::Char('?') => self.mode = Mode::Help,

            Key::Char('w') => return self.toggle_watch(),
            Key::Char('W') => {
                let count = self.watched.len();
                self.watched.clear();
                if count > 0 {
                    self.set_status(format!("cleared {count} watched processes"), WATCH_STATUS);
                    return vec![Task::ClearStatusAfter(WATCH_STATUS)];
                }
            }
            Key::Char('K') => {
                if let Some(conn) = self.selected().filter(|c| c.pid > 0).cloned() {
                    self.mode = Mode::KillConfirm(Box::new(conn));
                }
            }
            _ => {}
        }
        Vec::new()
    }

    fn toggle(&mut self, flag: impl FnOnce(&mut ShowFlags) -> &mut bool) {
        let flag = flag(&mut self.show);
        *flag = !*flag;
        self.clamp_cursor();
    }

    fn toggle_watch(&mut self) -> Vec<Task> {
        let Some(conn) = self.selected().filter(|c| c.pid > 0).cloned() else {
            return Vec::new();
        };
        let was_watched = !self.watched.insert(conn.pid);
        if was_watched {
            self.watched.remove(&conn.pid);
        }
        let count = self.connections.iter().filter(|c| c.pid == conn.pid).count();
        let text = if was_watched {
            format!("unwatched {} (pid {})", conn.process, conn.pid)
        } else if count > 1 {
            format!("watching {} (pid {}) - {count} connections", conn.process, conn.pid)
        } else {
            format!("watching {} (pid {})", conn.process, conn.pid)
        };
        self.set_status(text, WATCH_STATUS);
        self.clamp_cursor();
        vec![Task::ClearStatusAfter(WATCH_STATUS)]
    }

    fn set_status(&mut self, text: String, ttl: Duration) {
        self.status = Some(Status {
            text,
            expires: Instant::now() + ttl,
        });
    }

    fn resolve_tasks(&self) -> Vec<Task> {
        if !self.resolve_names {
            return Vec::new();
        }
        let addrs: BTreeSet<String> = self
            .connections
            .iter()
            .filter(|c| c.has_remote())
            .map(|c| c.raddr.clone())
            .collect();
        if addrs.is_empty() {
            Vec::new()
        } else {
            vec![Task::Resolve(addrs.into_iter().collect())]
        }
    }

    fn move_cursor(&mut self, delta: isize) {
        let len = self.visible().len();
        if len == 0 {
            self.cursor = 0;
            return;
        }
        let target = self.cursor as isize + delta;
        self.cursor = target.clamp(0, len as isize - 1) as usize;
    }

    fn clamp_cursor(&mut self) {
        let len = self.visible().len();
        self.cursor = self.cursor.min(len.saturating_sub(1));
    }

    fn matches_search(&self, conn: &Connection) -> bool {
        let query = self.search.to_lowercase();
        [
            &conn.process,
            &conn.laddr,
            &conn.raddr,
            &conn.user,
            &conn.proto,
            &conn.state,
        ]
        .iter()
        .any(|field| field.to_lowercase().contains(&query))
    }

    /// Connections on screen: show flags and search applied, watched
    /// processes first, each group in sort order.
    pub fn visible(&self) -> Vec<&Connection> {
        let (mut watched, unwatched): (Vec<&Connection>, Vec<&Connection>) = self
            .connections
            .iter()
            .filter(|c| self.show.admits(c))
            .filter(|c| self.search.is_empty() || self.matches_search(c))
            .partition(|c| self.is_watched(c.pid));
        watched.extend(unwatched);
        watched
    }

    pub fn selected(&self) -> Option<&Connection> {
        self.visible().get(self.cursor).copied()
    }

    pub fn is_watched(&self, pid: u32) -> bool {
        pid > 0 && self.watched.contains(&pid)
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn size(&self) -> (u16, u16) {
        (self.width, self.height)
    }

    pub fn show_flags(&self) -> ShowFlags {
        self.show
    }

    pub fn search(&self) -> &str {
        &self.search
    }

    pub fn sort(&self) -> SortSpec {
        self.sort
    }

    pub fn mode(&self) -> &Mode {
        &self.mode
    }

    pub fn watched_count(&self) -> usize {
        self.watched.len()
    }

    pub fn status(&self) -> Option<&str> {
        self.status.as_ref().map(|s| s.text.as_str())
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn last_refresh(&self) -> Instant {
        self.last_refresh
    }

    pub fn enrichment(&self) -> Option<&Enrichment> {
        self.enrichment.as_ref()
    }

    pub fn resolves_names(&self) -> bool {
        self.resolve_names
    }
}
