use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

use sockscope::app::session::Session;
use sockscope::app::App;
use sockscope::cli::{parse_args, Cli, Mode, TopArgs};
use sockscope::commands;
use sockscope::core::source::{ConnectionSource, FixtureSource};
use sockscope::core::system::SystemSource;
use sockscope::enrich::{EnrichmentCache, GeoLookup, IpApiLookup, NoGeoLookup, SystemResolver};
use sockscope::error::Error;

const GEO_TIMEOUT: Duration = Duration::from_secs(3);

const LOG_FILE: &str = "sockscope.log";

/// Where logs go when stderr is not usable. The live view owns the
/// terminal, so its logs are appended to a file, and only when asked for.
fn log_file(interactive: bool, verbose: bool) -> Option<PathBuf> {
    (interactive && verbose).then(|| std::env::temp_dir().join(LOG_FILE))
}

fn init_logging(cli: &Cli) {
    let interactive = cli.mode.is_interactive();
    let default = if cli.debug {
        LevelFilter::DEBUG
    } else if interactive {
        LevelFilter::OFF
    } else {
        LevelFilter::WARN
    };

    let verbose = cli.debug || std::env::var_os(EnvFilter::DEFAULT_ENV).is_some();
    let writer = match log_file(interactive, verbose) {
        Some(path) => match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => BoxMakeWriter::new(Mutex::new(file)),
            Err(_) => BoxMakeWriter::new(io::sink),
        },
        None if interactive => BoxMakeWriter::new(io::sink),
        None => BoxMakeWriter::new(io::stderr),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(default.into())
                .from_env_lossy(),
        )
        .with_ansi(!interactive)
        .with_writer(writer)
        .init();
}

fn enrichment_cache() -> EnrichmentCache {
    let geo: Arc<dyn GeoLookup> = match IpApiLookup::new(GEO_TIMEOUT) {
        Ok(lookup) => Arc::new(lookup),
        Err(e) => {
            warn!(error = %e, "geo lookup disabled");
            Arc::new(NoGeoLookup)
        }
    };
    EnrichmentCache::new(Arc::new(SystemResolver::default()), geo)
}

async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for interrupt");
        std::future::pending::<()>().await;
    }
}

fn run_top(args: TopArgs, source: Arc<dyn ConnectionSource>, cache: Arc<EnrichmentCache>) -> Result<(), Error> {
    let session = Session::new(args.interval)
        .with_filter(args.filter)
        .with_show_flags(args.show)
        .with_name_resolution(!args.numeric);

    let mut terminal = ratatui::try_init().map_err(Error::Terminal)?;
    let result = commands::block_on(App::new(session, source, cache).run(&mut terminal));
    ratatui::restore();

    result?
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = parse_args()?;
    init_logging(&cli);
    debug!(?cli, "starting");

    let source: Arc<dyn ConnectionSource> = match &cli.source_file {
        Some(path) => Arc::new(FixtureSource::load(path)?),
        None => Arc::new(SystemSource::new()),
    };
    let cache = Arc::new(enrichment_cache());

    let mode = match cli.mode {
        Mode::Top(args) => return Ok(run_top(args, source, Arc::clone(&cache))?),
        mode => mode,
    };

    let mut out = io::stdout().lock();
    match mode {
        Mode::List(args) => commands::list(&args, source.as_ref(), &cache, &mut out)?,
        Mode::Stats(args) => {
            commands::block_on(commands::stats(&args, source, &mut out, interrupted()))??;
        }
        Mode::Trace(args) => {
            let emitted = commands::block_on(commands::trace(&args, source, cache, &mut out, interrupted()))??;
            debug!(emitted, "trace finished");
        }
        Mode::Record(args) => {
            commands::record(&args, source.as_ref(), &mut out)?;
        }
        Mode::Top(_) => {}
    }
    out.flush()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_view_logs_to_a_file_only_when_asked() {
        assert_eq!(log_file(true, true), Some(std::env::temp_dir().join(LOG_FILE)));
        assert_eq!(log_file(true, false), None);
        assert_eq!(log_file(false, true), None);
    }
}
