//! FCIO stream inspection CLI.
//!
//! Prints status records or event times from an FCIO file, pipe or socket.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fcio_core::options::{level_filter, DEFAULT_DEBUG_LEVEL};
use fcio_core::{FcioError, Session, SessionOptions, Tag};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Instant;
use tracing::info;

/// Inspect FlashCam FCIO record streams.
///
/// SOURCE is a file path, `-` for standard input, `tcp://connect/PORT/HOST`
/// or `tcp://listen/PORT[/IFACE]`.
#[derive(Parser, Debug)]
#[command(name = "fcio")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Read timeout in milliseconds (0 blocks)
    #[arg(long, global = true, env = "FCIO_TIMEOUT_MS", default_value_t = 0)]
    timeout_ms: u64,

    /// Transport buffer size in KiB (0 keeps the default)
    #[arg(long, global = true, env = "FCIO_BUFFER_KB", default_value_t = 0)]
    buffer_kb: usize,

    /// Debug level: 0 off, 1 errors, 2 warnings, 3 info, 4 debug, 5 trace
    #[arg(long, global = true, env = "FCIO_DEBUG", default_value_t = DEFAULT_DEBUG_LEVEL)]
    debug: u8,

    /// Keep reading a file as it grows, and wait through timeouts
    #[arg(long, global = true, env = "FCIO_FOLLOW")]
    follow: bool,

    /// Suppress the progress spinner and summary
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print `statustime[0..4] status` for every status record
    Status {
        #[arg(value_name = "SOURCE")]
        source: String,
    },
    /// Print the run time in seconds of every event
    Events {
        #[arg(value_name = "SOURCE")]
        source: String,
    },
    /// Read the whole stream and summarize it
    Info {
        #[arg(value_name = "SOURCE")]
        source: String,
    },
}

impl Command {
    fn source(&self) -> &str {
        match self {
            Command::Status { source } | Command::Events { source } | Command::Info { source } => {
                source
            }
        }
    }
}

fn init_logging(debug: u8) {
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level_filter(debug))
        .with_ansi(false)
        .with_target(false)
        .try_init();
}

/// Advances `session` until end of stream, handing every record tag to `each`.
///
/// With `follow` set, timeouts only mean that no data has arrived yet.
fn pump(session: &mut Session, follow: bool, mut each: impl FnMut(&Session, Tag)) -> Result<()> {
    loop {
        match session.advance() {
            Ok(Some(tag)) => each(session, tag),
            Ok(None) => return Ok(()),
            Err(FcioError::Timeout { .. }) if follow => continue,
            Err(err) => return Err(err).context("Failed to read FCIO stream"),
        }
    }
}

fn print_statuses(session: &mut Session, follow: bool) -> Result<()> {
    pump(session, follow, |session, tag| {
        if tag != Tag::Status {
            return;
        }
        if let Some(status) = session.status() {
            let [t0, t1, t2, t3] = status.statustime();
            println!("{t0} {t1} {t2} {t3} {}", status.status());
        }
    })
}

fn print_events(session: &mut Session, follow: bool) -> Result<()> {
    pump(session, follow, |session, tag| {
        if !tag.is_event() {
            return;
        }
        if let Some(event) = session.event() {
            println!("{:.9}", event.runtime_imprecise());
        }
    })
}

fn summarize(session: &mut Session, args: &Args) -> Result<()> {
    let progress = if args.quiet {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .context("Invalid progress template")?,
        );
        pb.set_message("Reading...");
        pb
    };

    let start_time = Instant::now();
    let mut last_runtime = None;
    pump(session, args.follow, |session, tag| {
        if tag.is_event() {
            last_runtime = session.event().map(|event| event.runtime_imprecise());
        }
        let total = session.counts().total();
        if total % 1000 == 0 {
            progress.set_message(format!("{total} records"));
        }
    })?;
    let duration = start_time.elapsed();

    let counts = session.counts();
    progress.finish_with_message(format!(
        "Done! Read {} records in {:.2}s",
        counts.total(),
        duration.as_secs_f64()
    ));

    let config = session
        .config()
        .context("Stream ended without a config record")?;
    println!("Source:        {}", args.command.source());
    println!(
        "Config:        {} adcs, {} triggers, {} samples, blprecision {}, sumlength {}",
        config.nadcs, config.ntriggers, config.nsamples, config.blprecision, config.sumlength
    );
    println!(
        "Cards:         {} master, {} trigger, {} adc (adcbits {}, gps {}, telid {})",
        config.mastercards,
        config.triggercards,
        config.adccards,
        config.adcbits,
        config.gps,
        config.telid
    );
    println!("Configs:       {}", counts.configs);
    println!("Events:        {}", counts.events);
    println!("Sparse events: {}", counts.sparse_events);
    println!("Statuses:      {}", counts.statuses);
    println!("Unknown:       {}", counts.unknown);
    if let Some(runtime) = last_runtime {
        println!("Last runtime:  {runtime:.6}s");
    }
    if !args.quiet {
        let rate = counts.total() as f64 / duration.as_secs_f64().max(1e-9);
        eprintln!("Throughput:    {rate:.0} records/s");
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.debug);

    let options = SessionOptions::new()
        .with_timeout_ms(args.timeout_ms)
        .with_buffer_kb(args.buffer_kb)
        .with_follow(args.follow)
        .with_debug(args.debug);

    let source = args.command.source();
    let mut session = Session::open_with(source, options)
        .with_context(|| format!("Failed to open FCIO source {source:?}"))?;
    if let Some(config) = session.config() {
        info!(
            source,
            nadcs = config.nadcs,
            ntriggers = config.ntriggers,
            nsamples = config.nsamples,
            "stream opened"
        );
    }

    match &args.command {
        Command::Status { .. } => print_statuses(&mut session, args.follow),
        Command::Events { .. } => print_events(&mut session, args.follow),
        Command::Info { .. } => summarize(&mut session, &args),
    }
}
