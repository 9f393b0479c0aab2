//! CLI entry point for the e-Callisto daemon.
//!
//! ```bash
//! callisto_daq --config /etc/callisto/callisto.toml            # run the daemon
//! callisto_daq --config callisto.toml check                     # validate and summarise
//! callisto_daq decode capture.bin                               # analyse a raw serial dump
//! ```

use anyhow::{Context, Result};
use callisto_daq::config::DaemonConfig;
use callisto_daq::daemon::{load_frequency_table, load_schedule, serve};
use callisto_daq::logging::{self, TracingConfig};
use callisto_daq::protocol::decoder::decode_stream;
use callisto_daq::protocol::FrameEvent;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "callisto_daq")]
#[command(about = "Acquisition daemon for e-Callisto radio spectrometers", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, short, global = true, default_value = "callisto.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon (default)
    Run(RunArgs),

    /// Load and validate the configuration, schedule and frequency program
    Check(RunArgs),

    /// Run the frame decoder over a captured serial byte stream
    Decode {
        /// Raw capture file
        capture: PathBuf,

        /// Print every status message
        #[arg(long)]
        messages: bool,
    },
}

#[derive(Args, Default, Clone)]
struct RunArgs {
    /// Schedule file, overriding `scheduler.schedule_file`
    #[arg(long)]
    schedule: Option<PathBuf>,

    /// Frequency program, overriding `output.frqfile`
    #[arg(long)]
    frequencies: Option<PathBuf>,

    /// Log level, overriding `application.log_level`
    #[arg(long)]
    log_level: Option<String>,
}

fn load_config(path: &PathBuf, args: &RunArgs) -> Result<DaemonConfig> {
    let mut config = DaemonConfig::load_from(path)
        .with_context(|| format!("loading {}", path.display()))?;
    if let Some(schedule) = &args.schedule {
        config.scheduler.schedule_file = Some(schedule.clone());
    }
    if let Some(frequencies) = &args.frequencies {
        config.output.frqfile = Some(frequencies.clone());
    }
    if let Some(level) = &args.log_level {
        config.application.log_level = level.clone();
    }
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {}", e))?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None => run(&cli.config, RunArgs::default()).await,
        Some(Commands::Run(args)) => run(&cli.config, args).await,
        Some(Commands::Check(args)) => check(&cli.config, args),
        Some(Commands::Decode { capture, messages }) => decode(capture, messages),
    }
}

async fn run(config_path: &PathBuf, args: RunArgs) -> Result<()> {
    let config = load_config(config_path, &args)?;
    logging::init_from_config(&config).map_err(|e| anyhow::anyhow!(e))?;

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Interrupt received"),
            Err(e) => tracing::error!("Unable to listen for Ctrl-C: {}", e),
        }
        signal.cancel();
    });

    serve(config, shutdown).await?;
    Ok(())
}

fn check(config_path: &PathBuf, args: RunArgs) -> Result<()> {
    let config = load_config(config_path, &args)?;
    logging::init(TracingConfig::new(Level::WARN).with_ansi(false))
        .map_err(|e| anyhow::anyhow!(e))?;

    let table = load_frequency_table(&config);
    let schedule = load_schedule(&config);

    println!("{}", toml::to_string_pretty(&config)?);
    println!("# frequency program: {} channels", table.len());
    if let (Some(first), Some(last)) = (table.as_slice().first(), table.as_slice().last()) {
        println!("#   {:.3} MHz .. {:.3} MHz", first, last);
    }
    println!("# schedule: {} entries", schedule.len());
    for entry in &schedule {
        println!(
            "#   {:02}:{:02}:{:02} action={} focuscode={}",
            entry.t / 3600,
            entry.t / 60 % 60,
            entry.t % 60,
            entry.action,
            entry.focuscode.map_or_else(|| "-".to_string(), |f| f.to_string()),
        );
    }
    Ok(())
}

fn decode(capture: PathBuf, print_messages: bool) -> Result<()> {
    let bytes = std::fs::read(&capture).with_context(|| format!("reading {}", capture.display()))?;
    let text: String = bytes.iter().map(|&b| char::from(b)).collect();

    let mut index = 0i64;
    let (events, stats) = decode_stream(&text, || {
        index += 1;
        index
    });

    if print_messages {
        for event in &events {
            if let FrameEvent::Message(message) = event {
                println!("message: {}", message);
            }
        }
    }
    let lengths: Vec<usize> = events
        .iter()
        .filter_map(|e| match e {
            FrameEvent::Data(raw) => Some(raw.len()),
            FrameEvent::Message(_) => None,
        })
        .collect();

    println!("bytes:             {}", bytes.len());
    println!("messages:          {}", stats.messages);
    println!("frames:            {}", stats.frames);
    println!("empty frames:      {}", stats.empty_frames);
    println!("samples:           {}", stats.samples);
    if let (Some(min), Some(max)) = (lengths.iter().min(), lengths.iter().max()) {
        println!("frame length:      {}..{}", min, max);
    }
    println!("bad hex groups:    {}", stats.bad_groups);
    println!("end markers:       {}", stats.end_markers);
    println!("unexpected chars:  {}", stats.unexpected_chars);
    println!("truncated chars:   {}", stats.truncated_message_chars);
    Ok(())
}
