use std::process::exit;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use dlogg::logging::{init_logging_with, parse_level};
use dlogg::{DLogg, SessionConfig, SimulatedLogger};

#[derive(Parser, Debug)]
#[command(name = "dlogg-dump", about = "Read identity, live data and stored samples from a D-LOGG")]
struct Args {
    /// Serial port (e.g., /dev/ttyUSB0 or COM3)
    #[arg(required_unless_present = "simulate")]
    port: Option<String>,
    /// Talk to a built-in simulated logger instead of a serial port
    #[arg(long)]
    simulate: bool,
    /// Number of samples to fetch from the oldest stored one
    #[arg(long, default_value_t = 10)]
    count: usize,
    /// Fetch every stored sample
    #[arg(long, conflicts_with = "count")]
    all: bool,
    /// Reply timeout in milliseconds
    #[arg(long, default_value_t = 1000)]
    timeout_ms: u64,
    /// Log level (error, warn, info, debug, trace)
    #[arg(long)]
    log_level: Option<String>,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {e:#}");
        exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();
    init_logging_with(parse_level(args.log_level.as_deref()));

    let mut logger = connect(&args)?;

    let device_type = logger.get_type().context("get type")?;
    let firmware = logger.get_firmware_version().context("get firmware version")?;
    let mode = logger.get_mode().context("get mode")?;
    println!("Device: {device_type:?}, firmware {firmware}, mode {mode:?}");

    if firmware.supports_logging_criterion() {
        let criterion = logger
            .get_logging_criterion()
            .context("get logging criterion")?;
        println!("Logging criterion: {criterion}");
    }

    let current = logger.get_current_data().context("get current data")?;
    println!("Current: {}", current.measurements);

    let header = logger.get_header().context("get header")?;
    println!("Header: {header}");

    let samples = if args.all {
        logger.fetch_all_data().context("fetch all data")?
    } else {
        let count = args.count.min(header.sample_count as usize);
        let fetched = logger.fetch_data_range(header.start_position(), count);
        // Release the transfer before reporting a fetch error.
        if logger.transfer_open() {
            logger.fetch_end().context("fetch end")?;
        }
        fetched.context("fetch data range")?
    };
    for sample in &samples {
        println!("{sample}");
    }
    info!("Fetched {} samples", samples.len());

    logger.close();
    Ok(())
}

fn connect(args: &Args) -> Result<DLogg> {
    let timeout = Duration::from_millis(args.timeout_ms);
    if args.simulate {
        let sim = SimulatedLogger::new().with_samples(25);
        let config = SessionConfig::new("simulated").with_timeout(timeout);
        return DLogg::with_opener(config, sim.opener()).context("open simulated logger");
    }
    let port = args.port.as_deref().context("no serial port given")?;
    let config = SessionConfig::new(port).with_timeout(timeout);
    DLogg::open(config).with_context(|| format!("open {port}"))
}
