use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::{ArgGroup, CommandFactory, Parser};
use sercom::config::{parse_baud, parse_seconds};
use sercom::script::validate_script_path;
use sercom::transport::{self, TransportPair};
use sercom::{Engine, SerialSettings, SessionConfig, StdinInput, Transcript};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "sercom",
    about = "Send commands to a serial modem, interactively or from .scom scripts",
    version
)]
#[command(group(ArgGroup::new("target").required(true).args(["device", "exec"])))]
struct Args {
    /// Serial device to open, e.g. /dev/ttyUSB0
    #[arg(short, long)]
    device: Option<String>,

    /// Run a program in a PTY and talk to it instead of a device
    #[arg(short = 'x', long, value_name = "PROGRAM")]
    exec: Option<String>,

    /// Arguments to pass to the program given with --exec
    #[arg(trailing_var_arg = true, requires = "exec")]
    args: Vec<String>,

    /// Script to run at startup
    #[arg(short, long, short_alias = 'a')]
    script: Option<PathBuf>,

    /// Start in interactive mode and return to it when scripts finish
    #[arg(short, long)]
    manual: bool,

    /// Baud rate, overriding the config file
    #[arg(short, long, value_parser = parse_baud)]
    baud: Option<u32>,

    /// Config file with key=value settings
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write a transcript of the session
    #[arg(short, long)]
    log: bool,

    /// Transcript file used with --log
    #[arg(long, default_value = "sercom.log")]
    log_file: PathBuf,

    /// Response timeout in seconds, overriding the default
    #[arg(short, long, value_parser = parse_seconds)]
    timeout: Option<Duration>,

    /// Show debug diagnostics
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let mut config = match &args.config {
        Some(path) => SessionConfig::load(path)
            .unwrap_or_else(|e| Args::command().error(ErrorKind::Io, e).exit()),
        None => SessionConfig::default(),
    };
    if let Some(baud) = args.baud {
        config.serial.baud = baud;
    }
    if let Some(timeout) = args.timeout {
        config.response_timeout = timeout;
    }
    if let Some(script) = &args.script {
        if let Err(e) = validate_script_path(script) {
            Args::command().error(ErrorKind::InvalidValue, e).exit();
        }
    }

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    let result = runtime.block_on(run(args, config));
    // A pending stdin read cannot be cancelled; don't wait for it.
    runtime.shutdown_background();
    result
}

async fn run(args: Args, config: SessionConfig) -> Result<()> {
    let pair = open_transport(&args, &config)?;

    let mut engine = Engine::start(pair, &config)?.manual(args.manual);
    if args.log {
        let transcript = Transcript::create(&args.log_file)?;
        info!(path = %args.log_file.display(), "writing transcript");
        engine = engine.with_transcript(transcript);
    }
    if let Some(script) = &args.script {
        engine
            .load_script(script)
            .context("Failed to load startup script")?;
    }

    let alive = engine.alive();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupted, shutting down");
            alive.clear();
        }
    });

    let result = engine.run(&mut StdinInput::new()).await;
    let closed = engine.shutdown();
    result.and(closed)
}

fn open_transport(args: &Args, config: &SessionConfig) -> Result<TransportPair> {
    if let Some(program) = &args.exec {
        let pair = transport::pty::spawn(program, &args.args)
            .with_context(|| format!("Failed to start {program}"))?;
        info!(program, "running program in PTY");
        return Ok(pair);
    }
    let device = args
        .device
        .as_deref()
        .context("Either --device or --exec is required")?;
    let pair = open_device(device, &config.serial)?;
    info!(device, baud = config.serial.baud, "opened serial device");
    Ok(pair)
}

#[cfg(unix)]
fn open_device(device: &str, settings: &SerialSettings) -> Result<TransportPair> {
    Ok(transport::serial::open(device, settings)?)
}

#[cfg(not(unix))]
fn open_device(device: &str, _settings: &SerialSettings) -> Result<TransportPair> {
    anyhow::bail!("Serial devices are not supported on this platform: {device}")
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}
