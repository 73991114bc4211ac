use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};

use ipprofile::aggregate::{self, DestinationStats};
use ipprofile::config::{AnalysisConfig, DetectionThresholds};
use ipprofile::detection::TrafficAnalyzer;
use ipprofile::input::load_records;
use ipprofile::parser::RecordWriter;
use ipprofile::report;
use ipprofile::sniff::{self, PacketSource};

#[derive(Parser, Debug)]
#[command(name = "ipprofile", version, about = "Per-address traffic profiling for packet captures")]
struct Cli {
    /// Debug output
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract IPv4 packet records from a capture into CSV
    Extract(ExtractArgs),
    /// Group records by address and report per-address profiles
    Profile(ProfileArgs),
}

#[derive(Args, Debug)]
struct ExtractArgs {
    /// PCAP file to read
    #[arg(short, long, conflicts_with = "interface", required_unless_present = "interface")]
    input: Option<PathBuf>,

    /// Capture live from an interface (default device when no name is given)
    #[arg(long, num_args = 0..=1, default_missing_value = "")]
    interface: Option<String>,

    /// Number of records to output
    #[arg(short = 'n', long, env = "IPPROFILE_MAX_RECORDS", value_parser = clap::value_parser!(u64).range(1..))]
    num_records: Option<u64>,

    /// CSV file to write (stdout when omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ProfileArgs {
    /// Record CSV (`.csv`) or PCAP file
    #[arg(short, long)]
    input: PathBuf,

    /// Directory for report files (summary printed to stdout when omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Number of records to read
    #[arg(short = 'n', long, env = "IPPROFILE_MAX_RECORDS", value_parser = clap::value_parser!(u64).range(1..))]
    num_records: Option<u64>,

    /// Received records needed before a destination's details are exported
    #[arg(short = 'l', long, env = "IPPROFILE_LOWER_BOUNDS", default_value_t = aggregate::DEFAULT_LOWER_BOUNDS,
          value_parser = parse_positive)]
    lower_bounds: usize,

    /// JSON file with detection thresholds
    #[arg(long)]
    config: Option<PathBuf>,
}

fn parse_positive(raw: &str) -> std::result::Result<usize, String> {
    match raw.parse::<usize>() {
        Ok(0) => Err("must be greater than 0".into()),
        Ok(n) => Ok(n),
        Err(_) => Err("must be numeric".into()),
    }
}

fn main() {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let default_filter = if cli.debug { "ipprofile=debug" } else { "ipprofile=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()),
        )
        .with_writer(io::stderr)
        .with_target(false)
        .init();

    let result = match cli.command {
        Command::Extract(args) => extract(args),
        Command::Profile(args) => profile(args),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

fn running_flag() -> Result<Arc<AtomicBool>> {
    let running = Arc::new(AtomicBool::new(true));
    let handler_flag = running.clone();
    ctrlc::set_handler(move || handler_flag.store(false, Ordering::SeqCst))
        .context("cannot install Ctrl-C handler")?;
    Ok(running)
}

fn check_input(path: &Path) -> Result<()> {
    if !path.is_file() {
        bail!("invalid input file {}: file does not exist", path.display());
    }
    Ok(())
}

fn extract(args: ExtractArgs) -> Result<()> {
    let source = match (args.input, args.interface) {
        (Some(path), _) => {
            check_input(&path)?;
            PacketSource::File(path)
        }
        (None, Some(name)) => PacketSource::Interface(Some(name).filter(|n| !n.is_empty())),
        (None, None) => bail!("either --input or --interface is required"),
    };

    let sink: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("cannot create {}", path.display()))?,
        )),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };
    let mut writer = RecordWriter::new(sink);

    let limit = args.num_records.map(|n| n as usize);
    let summary = sniff::run_capture(source, limit, running_flag()?, |record| writer.write(&record))?;
    writer.flush()?;

    tracing::info!(records = summary.records, skipped = summary.skipped, "extraction complete");
    Ok(())
}

fn profile(args: ProfileArgs) -> Result<()> {
    let start = Instant::now();
    check_input(&args.input)?;
    if let Some(dir) = &args.output {
        if !dir.is_dir() {
            bail!("invalid output directory {}: directory does not exist", dir.display());
        }
    }

    let thresholds = match &args.config {
        Some(path) => DetectionThresholds::from_file(path)
            .with_context(|| format!("cannot load thresholds from {}", path.display()))?,
        None => DetectionThresholds::default(),
    };
    let config = AnalysisConfig {
        lower_bounds: args.lower_bounds,
        max_records: args.num_records.map(|n| n as usize),
        thresholds,
    };
    config.validate()?;
    tracing::debug!(?config, input = %args.input.display(), "starting profile run");

    let (records, stats) = load_records(&args.input, config.max_records)
        .with_context(|| format!("cannot read records from {}", args.input.display()))?;
    tracing::info!(records = records.len(), skipped = stats.skipped, "records loaded");
    tracing::debug!(elapsed = ?start.elapsed(), "load finished");

    let received = aggregate::group_by_destination(&records);
    if let Some(spread) = DestinationStats::from_summaries(&received) {
        tracing::debug!(
            destinations = spread.destinations,
            min = spread.min,
            max = spread.max,
            mean = spread.mean,
            "received connections per destination"
        );
    }
    let interest = aggregate::addresses_of_interest(&received, config.lower_bounds);
    let sent = aggregate::group_by_source(&records);
    let profiles = aggregate::merge_profiles(received, sent);
    tracing::info!(addresses = profiles.len(), of_interest = interest.len(), "profiles built");
    tracing::debug!(elapsed = ?start.elapsed(), "aggregation finished");

    let analyzer = TrafficAnalyzer::new(config.thresholds);
    let suspicious = analyzer.detect_suspicious_traffic(&profiles);
    for activity in &suspicious {
        tracing::warn!(
            kind = %activity.activity_type,
            source = %activity.source,
            details = %activity.details,
            "suspicious activity detected"
        );
    }

    match &args.output {
        Some(dir) => {
            report::write_report(dir, &stats, &profiles, &suspicious, &interest)?;
        }
        None => print!("{}", report::render_summary(&profiles)),
    }

    tracing::debug!(elapsed = ?start.elapsed(), "execution finished");
    Ok(())
}
