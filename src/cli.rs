use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};

use crate::app::session::ShowFlags;
use crate::core::filters::{parse_duration, ConnectionFilter, IpFamily, FILTER_KEYS};
use crate::core::sort::SortSpec;
use crate::error::QueryError;
use crate::output::{parse_fields, OutputFormat};

const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

/// Floor for the polling loops; `stats` alone treats zero as "once".
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Parsed command line.
#[derive(Debug, Clone, PartialEq)]
pub struct Cli {
    pub source_file: Option<PathBuf>,
    pub debug: bool,
    pub mode: Mode,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Mode {
    Top(TopArgs),
    List(ListArgs),
    Stats(StatsArgs),
    Trace(TraceArgs),
    Record(RecordArgs),
}

impl Mode {
    pub fn is_interactive(&self) -> bool {
        matches!(self, Mode::Top(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TopArgs {
    pub interval: Duration,
    pub show: ShowFlags,
    pub filter: ConnectionFilter,
    pub numeric: bool,
}

impl Default for TopArgs {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            show: ShowFlags::all(),
            filter: ConnectionFilter::default(),
            numeric: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListArgs {
    pub filter: ConnectionFilter,
    pub format: OutputFormat,
    pub headers: bool,
    pub with_ts: bool,
    pub sort: SortSpec,
    pub fields: Vec<String>,
    pub numeric: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatsFormat {
    #[default]
    Table,
    Json,
    Csv,
}

impl FromStr for StatsFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "table" => Ok(Self::Table),
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            other => Err(format!("invalid output format: {other} (expected table, json or csv)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatsArgs {
    pub filter: ConnectionFilter,
    pub format: StatsFormat,
    /// Zero prints a single report.
    pub interval: Duration,
    /// Zero repeats until interrupted.
    pub count: usize,
    pub headers: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TraceArgs {
    pub filter: ConnectionFilter,
    pub interval: Duration,
    pub count: usize,
    pub json: bool,
    pub numeric: bool,
    pub with_ts: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordArgs {
    pub path: PathBuf,
    pub filter: ConnectionFilter,
}

fn parse_interval(value: &str) -> Result<Duration, String> {
    value
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
        .or_else(|| parse_duration(value))
        .ok_or_else(|| format!("invalid interval: {value} (e.g. 500ms, 2s, 1m)"))
}

fn flag(id: &'static str, short: char, long: &'static str, help: &'static str) -> Arg {
    Arg::new(id).short(short).long(long).help(help).action(ArgAction::SetTrue)
}

/// Positional `key=value` filters plus the shortcut flags.
fn with_filter_args(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("filters")
            .value_name("FILTER")
            .help(format!("key=value filters, ANDed together. Keys: {FILTER_KEYS}"))
            .num_args(1..)
            .action(ArgAction::Append),
    )
    .arg(flag("tcp", 't', "tcp", "Show only TCP"))
    .arg(flag("udp", 'u', "udp", "Show only UDP"))
    .arg(flag("listen", 'l', "listen", "Show only listening sockets"))
    .arg(flag("established", 'e', "established", "Show only established connections"))
    .arg(flag("ipv4", '4', "ipv4", "Show only IPv4"))
    .arg(flag("ipv6", '6', "ipv6", "Show only IPv6"))
}

fn interval_arg(default: &'static str, help: &'static str) -> Arg {
    Arg::new("interval")
        .short('i')
        .long("interval")
        .value_name("DURATION")
        .help(help)
        .default_value(default)
        .value_parser(parse_interval)
}

fn count_arg(help: &'static str) -> Arg {
    Arg::new("count")
        .short('c')
        .long("count")
        .value_name("N")
        .help(help)
        .default_value("0")
        .value_parser(value_parser!(usize))
}

fn numeric_arg() -> Arg {
    flag("numeric", 'n', "numeric", "Don't resolve host and service names")
}

fn no_headers_arg() -> Arg {
    Arg::new("no-headers")
        .long("no-headers")
        .help("Omit headers for table and csv output")
        .action(ArgAction::SetTrue)
}

fn ts_arg() -> Arg {
    Arg::new("ts")
        .long("ts")
        .help("Include a timestamp column")
        .action(ArgAction::SetTrue)
}

fn listing(cmd: Command, with_output: bool) -> Command {
    let cmd = if with_output {
        cmd.arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("FORMAT")
                .help("Output format: table, plain, json, csv")
                .default_value("table")
                .value_parser(OutputFormat::from_str),
        )
    } else {
        cmd
    };
    with_filter_args(cmd)
        .arg(no_headers_arg())
        .arg(ts_arg())
        .arg(
            Arg::new("sort")
                .short('s')
                .long("sort")
                .value_name("FIELD[:DIR]")
                .help("Sort by port, process, pid, state or proto, e.g. pid:desc"),
        )
        .arg(
            Arg::new("fields")
                .short('f')
                .long("fields")
                .value_name("LIST")
                .help("Comma separated fields to show"),
        )
        .arg(numeric_arg())
}

pub fn command() -> Command {
    Command::new("sockscope")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Inspect sockets and the processes that own them")
        .arg(
            Arg::new("source-file")
                .long("source-file")
                .value_name("PATH")
                .help("Read connections from a JSON fixture instead of the live system")
                .value_parser(value_parser!(PathBuf))
                .global(true),
        )
        .arg(
            Arg::new("debug")
                .long("debug")
                .help("Verbose logging to stderr")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .subcommand(
            with_filter_args(Command::new("top").about("Interactive connection viewer (default)"))
                .arg(interval_arg("1s", "Refresh interval"))
                .arg(numeric_arg()),
        )
        .subcommand(listing(Command::new("ls").about("One-shot listing of connections"), true))
        .subcommand(listing(Command::new("json").about("One-shot listing as JSON"), false))
        .subcommand(
            with_filter_args(Command::new("stats").about("Aggregated connection counters"))
                .arg(
                    Arg::new("output")
                        .short('o')
                        .long("output")
                        .value_name("FORMAT")
                        .help("Output format: table, json, csv")
                        .default_value("table")
                        .value_parser(StatsFormat::from_str),
                )
                .arg(interval_arg("0", "Repeat every interval (0 = once)"))
                .arg(count_arg("Number of reports (0 = until interrupted)"))
                .arg(no_headers_arg()),
        )
        .subcommand(
            with_filter_args(Command::new("trace").about("Print connections as they open and close"))
                .arg(interval_arg("1s", "Polling interval"))
                .arg(count_arg("Stop after N events (0 = unlimited)"))
                .arg(
                    Arg::new("output")
                        .short('o')
                        .long("output")
                        .value_name("FORMAT")
                        .help("Output format: human, json")
                        .default_value("human")
                        .value_parser(["human", "json"]),
                )
                .arg(numeric_arg())
                .arg(ts_arg()),
        )
        .subcommand(
            with_filter_args(
                Command::new("record").about("Save the current connections as a fixture").arg(
                    Arg::new("path")
                        .value_name("PATH")
                        .help("Fixture file to write")
                        .required(true)
                        .value_parser(value_parser!(PathBuf)),
                ),
            ),
        )
}

pub fn parse_args() -> Result<Cli, QueryError> {
    Cli::from_matches(&command().get_matches())
}

fn pair(matches: &ArgMatches, a: &str, b: &str) -> (bool, bool) {
    (matches.get_flag(a), matches.get_flag(b))
}

/// Positional filters plus the shortcut flags. A flag pair only becomes a
/// predicate when exactly one side is given.
fn filter_from(matches: &ArgMatches, proto_and_state: bool) -> Result<ConnectionFilter, QueryError> {
    let args = matches.get_many::<String>("filters").into_iter().flatten();
    let mut filter = ConnectionFilter::parse(args)?;
    if proto_and_state {
        match pair(matches, "tcp", "udp") {
            (true, false) => filter = filter.with_proto("tcp"),
            (false, true) => filter = filter.with_proto("udp"),
            _ => {}
        }
        match pair(matches, "listen", "established") {
            (true, false) => filter = filter.with_state("LISTEN"),
            (false, true) => filter = filter.with_state("ESTABLISHED"),
            _ => {}
        }
    }
    match pair(matches, "ipv4", "ipv6") {
        (true, false) => filter = filter.with_family(IpFamily::V4),
        (false, true) => filter = filter.with_family(IpFamily::V6),
        _ => {}
    }
    Ok(filter)
}

fn interval(matches: &ArgMatches) -> Duration {
    matches.get_one::<Duration>("interval").copied().unwrap_or(DEFAULT_INTERVAL)
}

fn count(matches: &ArgMatches) -> usize {
    matches.get_one::<usize>("count").copied().unwrap_or(0)
}

impl Cli {
    pub fn from_matches(matches: &ArgMatches) -> Result<Self, QueryError> {
        let scope = matches.subcommand().map(|(_, sub)| sub).unwrap_or(matches);
        let mode = match matches.subcommand() {
            Some(("ls", m)) => Mode::List(ListArgs::from_matches(m, None)?),
            Some(("json", m)) => Mode::List(ListArgs::from_matches(m, Some(OutputFormat::Json))?),
            Some(("stats", m)) => Mode::Stats(StatsArgs {
                filter: filter_from(m, true)?,
                format: m.get_one::<StatsFormat>("output").copied().unwrap_or_default(),
                interval: interval(m),
                count: count(m),
                headers: !m.get_flag("no-headers"),
            }),
            Some(("trace", m)) => Mode::Trace(TraceArgs {
                filter: filter_from(m, true)?,
                interval: interval(m).max(MIN_POLL_INTERVAL),
                count: count(m),
                json: m.get_one::<String>("output").is_some_and(|o| o == "json"),
                numeric: m.get_flag("numeric"),
                with_ts: m.get_flag("ts"),
            }),
            Some(("record", m)) => Mode::Record(RecordArgs {
                path: m.get_one::<PathBuf>("path").cloned().unwrap_or_default(),
                filter: filter_from(m, true)?,
            }),
            Some(("top", m)) => {
                let (tcp, udp) = pair(m, "tcp", "udp");
                let (listen, established) = pair(m, "listen", "established");
                Mode::Top(TopArgs {
                    interval: interval(m).max(MIN_POLL_INTERVAL),
                    show: ShowFlags::preset(tcp, udp, listen, established),
                    filter: filter_from(m, false)?,
                    numeric: m.get_flag("numeric"),
                })
            }
            _ => Mode::Top(TopArgs::default()),
        };
        Ok(Self {
            source_file: scope.get_one::<PathBuf>("source-file").cloned(),
            debug: scope.get_flag("debug"),
            mode,
        })
    }
}

impl ListArgs {
    fn from_matches(matches: &ArgMatches, format: Option<OutputFormat>) -> Result<Self, QueryError> {
        let format = match format {
            Some(format) => format,
            None => matches.get_one::<OutputFormat>("output").copied().unwrap_or_default(),
        };
        let sort = match matches.get_one::<String>("sort") {
            Some(spec) => SortSpec::parse(spec)?,
            None => SortSpec::default(),
        };
        let fields = match matches.get_one::<String>("fields") {
            Some(spec) => parse_fields(spec)?,
            None => Vec::new(),
        };
        Ok(Self {
            filter: filter_from(matches, true)?,
            format,
            headers: !matches.get_flag("no-headers"),
            with_ts: matches.get_flag("ts"),
            sort,
            fields,
            numeric: matches.get_flag("numeric"),
        })
    }
}
