//! CAN Scheduler CLI Application
//!
//! Command-line front end for the can-scheduler library:
//! - Loads message layouts from DBC files
//! - Opens the bus (SocketCAN, or a logging dry-run bus)
//! - Applies startup signal values
//! - Reads signal updates from stdin while messages keep transmitting

use anyhow::{Context, Result};
use can_scheduler::transport::{CyclicTransport, LogSink, Transport};
use can_scheduler::{CanScheduler, SignalDatabase};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

mod commands;
mod config;

use config::{AppConfig, BusConfig, SignalUpdate};

/// CAN Scheduler - keep CAN messages transmitting and change their signals live
#[derive(Parser, Debug)]
#[command(name = "can-scheduler-cli")]
#[command(about = "Transmit DBC messages periodically and update their signals", long_about = None)]
#[command(version)]
struct Args {
    /// Path to DBC file(s) (can be repeated)
    #[arg(long, value_name = "FILE")]
    dbc: Vec<PathBuf>,

    /// CAN interface to transmit on (e.g. can0, vcan0)
    #[arg(short, long, value_name = "IFACE")]
    interface: Option<String>,

    /// Open the interface in CAN-FD mode
    #[arg(long)]
    fd: bool,

    /// Log frames instead of sending them
    #[arg(long)]
    dry_run: bool,

    /// Initial signal value, MESSAGE.SIGNAL=VALUE (can be repeated)
    #[arg(long = "set", value_name = "ASSIGNMENT", value_parser = SignalUpdate::parse_assignment)]
    set: Vec<SignalUpdate>,

    /// Path to configuration file (config.toml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbosity level (can be repeated: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.verbose, args.quiet);

    log::info!("CAN Scheduler CLI v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Using scheduler library v{}", can_scheduler::VERSION);

    let config = resolve_config(args)?;

    if config.database.dbc_files.is_empty() {
        anyhow::bail!("No DBC file given, use --dbc or [database] dbc_files");
    }

    let mut db = SignalDatabase::new();
    for dbc_path in &config.database.dbc_files {
        db.add_dbc(dbc_path)
            .with_context(|| format!("Failed to load DBC {:?}", dbc_path))?;
    }

    let stats = db.stats();
    log::info!(
        "Signal database: {} messages, {} signals",
        stats.num_messages,
        stats.num_signals
    );

    let transport = open_transport(&config.bus)?;
    let scheduler = CanScheduler::with_config(Arc::new(db), transport, config.scheduler.clone());

    for update in &config.startup {
        scheduler
            .update(&update.message, &update.signal, update.value)
            .with_context(|| {
                format!(
                    "Failed to apply startup value {}.{}={}",
                    update.message, update.signal, update.value
                )
            })?;
    }

    let stdin = std::io::stdin();
    let result = commands::run(&scheduler, stdin.lock(), std::io::stdout());

    scheduler.shutdown();
    result
}

/// Merge the optional config file with command-line overrides
fn resolve_config(args: Args) -> Result<AppConfig> {
    let mut config = match &args.config {
        Some(path) => {
            log::info!("Loading configuration from: {:?}", path);
            config::load_config(path)?
        }
        None => AppConfig::default(),
    };

    config.database.dbc_files.extend(args.dbc);
    if let Some(interface) = args.interface {
        config.bus.interface = interface;
    }
    config.bus.fd |= args.fd;
    config.bus.dry_run |= args.dry_run;
    config.startup.extend(args.set);

    log::debug!("Effective configuration: {:?}", config);
    Ok(config)
}

fn open_transport(bus: &BusConfig) -> Result<Arc<dyn Transport>> {
    if bus.dry_run {
        log::info!("Dry run: frames for {} are logged, not sent", bus.interface);
        return Ok(Arc::new(CyclicTransport::new(LogSink::new(&bus.interface))));
    }
    open_socketcan(bus)
}

#[cfg(feature = "socketcan")]
fn open_socketcan(bus: &BusConfig) -> Result<Arc<dyn Transport>> {
    use can_scheduler::transport::SocketCanSink;

    let sink = SocketCanSink::open(&bus.interface, bus.fd)
        .with_context(|| format!("Failed to open CAN interface {}", bus.interface))?;
    Ok(Arc::new(CyclicTransport::new(sink)))
}

#[cfg(not(feature = "socketcan"))]
fn open_socketcan(bus: &BusConfig) -> Result<Arc<dyn Transport>> {
    anyhow::bail!(
        "Cannot open {}: built without SocketCAN support (enable the 'socketcan' feature or pass --dry-run)",
        bus.interface
    )
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::Builder;
    use log::LevelFilter;
    use std::io::Write;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}
