use anyhow::Context;
use clap::Parser;
use gatekeeper::config::Config;
use gatekeeper::details;
use gatekeeper::error::ConfigError;
use gatekeeper::events::{names, SecurityEvent, SecuritySummary};
use gatekeeper::export::{EventExporter, ExportWorker};
use gatekeeper::guard::{GuardDecision, RequestGuard, RequestInfo};
use log::{debug, error, info, warn};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

/// Command-line arguments for gatekeeper
#[derive(Parser)]
#[command(
    name = "gatekeeper",
    about = "Request rate limiting and security event monitoring",
    long_about = "Replays JSON-lines request records through a sliding-window rate limiter \
                  and a security event monitor, printing one decision per request and a \
                  security summary on shutdown."
)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Configuration file path (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Path to request records
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "JSON-lines request records (defaults to stdin)"
    )]
    input: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(
        short,
        long,
        help = "Enable verbose logging output (sets RUST_LOG=debug)"
    )]
    verbose: bool,
}

impl Cli {
    /// Validate the CLI arguments
    ///
    /// # Returns
    ///
    /// `Ok(())` if all arguments are valid, `Err(String)` with error message otherwise
    fn validate(&self) -> Result<(), String> {
        // Missing config files fall back to defaults; directories are rejected
        if let Some(ref config_path) = self.config {
            if config_path.exists() {
                if !config_path.is_file() {
                    return Err(format!(
                        "Configuration path is not a file: {}",
                        config_path.display()
                    ));
                }

                if let Some(extension) = config_path.extension() {
                    if extension != "toml" {
                        warn!(
                            "Configuration file does not have .toml extension: {}",
                            config_path.display()
                        );
                    }
                }
            }
        }

        if let Some(ref input_path) = self.input {
            if !input_path.is_file() {
                return Err(format!("Input file not found: {}", input_path.display()));
            }
        }

        Ok(())
    }
}

/// One line of input: a request plus an optional application outcome
#[derive(Debug, Deserialize)]
struct RequestRecord {
    #[serde(flatten)]
    request: RequestInfo,
    /// Set to `login-failed` when the request was a failed login
    #[serde(default)]
    outcome: Option<String>,
}

/// Messages sent from the reader thread
#[derive(Debug)]
enum InputMessage {
    Line(String),
    Finished,
}

/// Main application struct wiring the guard to the exporter
pub struct Gatekeeper {
    config: Config,

    /// Rate limiter and security monitor
    guard: RequestGuard,

    /// Optional event forwarding on its own thread
    exporter: Option<ExportWorker>,

    /// Shutdown signal
    shutdown_sender: Sender<()>,
    shutdown_receiver: Receiver<()>,
}

impl Gatekeeper {
    /// Create a new Gatekeeper with the given configuration
    ///
    /// # Errors
    ///
    /// Fails if the export sink or its thread cannot be created.
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let exporter = EventExporter::from_config(&config.export)
            .context("Failed to create event exporter")?;
        Self::with_exporter(config, exporter)
    }

    /// Create a new Gatekeeper forwarding events through `exporter`
    pub fn with_exporter(config: Config, exporter: Option<EventExporter>) -> anyhow::Result<Self> {
        info!("Initializing gatekeeper");

        let guard = RequestGuard::from_config(&config);
        let exporter = exporter
            .map(ExportWorker::spawn)
            .transpose()
            .context("Failed to start export thread")?;

        let (shutdown_sender, shutdown_receiver) = mpsc::channel();

        Ok(Self {
            config,
            guard,
            exporter,
            shutdown_sender,
            shutdown_receiver,
        })
    }

    /// Load configuration from file or use defaults
    ///
    /// Missing or invalid files are reported and replaced with the defaults.
    pub fn load_config(config_path: Option<&std::path::Path>) -> Config {
        match config_path {
            Some(path) => {
                info!("Loading configuration from: {}", path.display());
                match Config::from_file(path) {
                    Ok(config) => config,
                    Err(ConfigError::ReadError(_)) => {
                        warn!(
                            "Configuration file '{}' not found or unreadable, using defaults",
                            path.display()
                        );
                        Config::default()
                    }
                    Err(e) => {
                        error!("Configuration error in '{}': {}", path.display(), e);
                        warn!("Using default configuration due to invalid config file");
                        Config::default()
                    }
                }
            }
            None => {
                info!("Using default configuration");
                Config::default()
            }
        }
    }

    /// Handle one input line
    ///
    /// # Returns
    ///
    /// The decision for the request, or `None` if the line is blank or malformed
    fn process_line(&mut self, line: &str) -> Option<GuardDecision> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let record: RequestRecord = match serde_json::from_str(line) {
            Ok(record) => record,
            Err(e) => {
                warn!("Skipping malformed request record: {}", e);
                return None;
            }
        };

        let mut decision = self.guard.check_request(&record.request);
        debug!(
            "{} {} from '{}': {:?}",
            record.request.method, record.request.path, decision.identifier, decision.verdict
        );

        if record.outcome.as_deref() == Some(names::LOGIN_FAILED) {
            let events = self.guard.record_login_failure(
                &decision.identifier,
                details! { "path" => record.request.path },
            );
            decision.events.extend(events);
        }

        self.export(decision.events.clone());
        Some(decision)
    }

    /// Hand events to the export thread
    fn export(&mut self, events: Vec<SecurityEvent>) {
        if let Some(exporter) = self.exporter.as_mut() {
            exporter.submit(events);
        }
    }

    /// Process input until it ends or a shutdown signal arrives
    fn run<W: Write>(
        &mut self,
        input: Receiver<InputMessage>,
        output: &mut W,
    ) -> anyhow::Result<()> {
        let sweep_interval = Duration::from_secs(self.config.rate_limit.sweep_interval_seconds);
        let mut last_sweep = Instant::now();

        loop {
            if self.shutdown_receiver.try_recv().is_ok() {
                info!("Shutdown signal received");
                break;
            }

            match input.recv_timeout(Duration::from_millis(100)) {
                Ok(InputMessage::Line(line)) => {
                    if let Some(decision) = self.process_line(&line) {
                        writeln!(output, "{}", serde_json::to_string(&decision)?)
                            .context("Failed to write decision")?;
                    }
                }
                Ok(InputMessage::Finished) => {
                    info!("End of input");
                    break;
                }
                Err(RecvTimeoutError::Timeout) => {
                    // Timeout is expected, continue
                }
                Err(RecvTimeoutError::Disconnected) => {
                    info!("Input reader disconnected");
                    break;
                }
            }

            if last_sweep.elapsed() >= sweep_interval {
                let removed = self.guard.sweep_idle();
                debug!(
                    "Idle sweep removed {} identifiers, {} tracked",
                    removed,
                    self.guard.tracked_identifiers()
                );
                last_sweep = Instant::now();
            }
        }

        Ok(())
    }

    /// Flush pending exports and return the final summary
    fn finish(&mut self) -> SecuritySummary {
        if let Some(exporter) = self.exporter.take() {
            let report = exporter.shutdown();
            info!(
                "Exported {} security events ({} dropped)",
                report.delivered, report.dropped
            );
        }

        let summary = self.guard.security_summary();
        info!(
            "Security summary: {} events, {} in the last 24h",
            summary.total_events, summary.recent_events
        );
        summary
    }
}

/// Spawn the thread that reads request records line by line
fn spawn_reader(input: Option<PathBuf>) -> anyhow::Result<Receiver<InputMessage>> {
    let reader: Box<dyn BufRead + Send> = match input {
        Some(path) => Box::new(BufReader::new(
            File::open(&path).with_context(|| format!("Failed to open {}", path.display()))?,
        )),
        None => Box::new(BufReader::new(std::io::stdin())),
    };

    let (sender, receiver) = mpsc::channel();

    // The reader may stay blocked on stdin after shutdown, so it is never joined
    std::thread::spawn(move || {
        for line in reader.lines() {
            match line {
                Ok(line) => {
                    if sender.send(InputMessage::Line(line)).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    error!("Failed to read input: {}", e);
                    break;
                }
            }
        }
        let _ = sender.send(InputMessage::Finished);
    });

    Ok(receiver)
}

fn run(cli: Cli) -> anyhow::Result<()> {
    cli.validate().map_err(anyhow::Error::msg)?;

    let config = Gatekeeper::load_config(cli.config.as_deref());
    let mut gatekeeper = Gatekeeper::new(config)?;

    let shutdown_sender = gatekeeper.shutdown_sender.clone();
    ctrlc::set_handler(move || {
        info!("Received interrupt signal (SIGINT), shutting down gracefully...");
        if let Err(e) = shutdown_sender.send(()) {
            error!("Failed to send shutdown signal: {}", e);
        }
    })
    .context("Error setting SIGINT handler for graceful shutdown")?;

    let input = spawn_reader(cli.input)?;

    let stdout = std::io::stdout();
    let mut output = stdout.lock();
    gatekeeper.run(input, &mut output)?;

    let summary = gatekeeper.finish();
    writeln!(output, "{}", serde_json::to_string(&summary)?)?;
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        std::env::set_var("RUST_LOG", "debug");
    }
    env_logger::init();

    info!("Starting gatekeeper");

    if let Err(e) = run(cli) {
        error!("{:#}", e);
        std::process::exit(1);
    }

    info!("Gatekeeper shutdown complete");
}
