use std::path::PathBuf;
use std::time::Duration;

use clap::error::ErrorKind;
use clap::{Parser, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::builder::LockerOptions;
use crate::migrate::{install_queue, migrate};

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl LogLevel {
    /// The subscriber has no `fatal` level; it maps to `error`.
    fn as_directive(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error | LogLevel::Fatal => "error",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.to_possible_value()
            .expect("no skipped variants")
            .get_name()
            .fmt(f)
    }
}

/// Queue argument of the form `name` or `name=poll_interval_seconds`.
fn parse_queue(value: &str) -> Result<(String, Option<f64>), String> {
    match value.split_once('=') {
        None => Ok((value.to_string(), None)),
        Some((name, interval)) => {
            let interval: f64 = interval
                .parse()
                .map_err(|_| format!("invalid poll interval '{interval}' for queue '{name}'"))?;
            Ok((name.to_string(), Some(interval)))
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "que-worker", version, disable_version_flag = true)]
#[command(about = "Postgres-backed job-queue worker")]
pub struct Cli {
    /// Print version
    #[arg(short = 'v', long = "version", action = clap::ArgAction::Version)]
    version: Option<bool>,

    /// Default maximum seconds between polls for any queue
    #[arg(short = 'i', long, default_value_t = 5.0)]
    pub poll_interval: f64,

    /// Stdout log level
    #[arg(short = 'l', long, value_enum, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,

    /// Queue to work, optionally with its own poll interval (NAME[=SECONDS]);
    /// repeatable
    #[arg(short = 'q', long = "queue-name", value_parser = parse_queue)]
    pub queue_name: Vec<(String, Option<f64>)>,

    /// Worker pool size
    #[arg(short = 'w', long, default_value_t = 6)]
    pub worker_count: usize,

    /// Postgres connection URL (falls back to DATABASE_URL)
    #[arg(long)]
    pub connection_url: Option<String>,

    /// Verbose internal logging
    #[arg(long)]
    pub log_internals: bool,

    /// Buffer high watermark
    #[arg(long, default_value_t = 8)]
    pub maximum_buffer_size: usize,

    /// Buffer low watermark (refill trigger)
    #[arg(long, default_value_t = 2)]
    pub minimum_buffer_size: usize,

    /// Milliseconds between poll-loop ticks
    #[arg(long, default_value_t = 50.0)]
    pub wait_period: f64,

    /// Comma-separated worker priority ceilings; workers beyond the list
    /// accept any priority
    #[arg(long, value_delimiter = ',', default_values_t = [10i16, 30, 50])]
    pub worker_priorities: Vec<i16>,

    /// Environment files to load before start; defaults to ./.env
    pub files: Vec<PathBuf>,
}

/// Run the CLI to completion, returning the process exit code: 0 on
/// success, 1 on startup failure.
pub async fn run() -> i32 {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            let _ = e.print();
            return code;
        }
    };

    let mut filter = cli.log_level.as_directive().to_string();
    if cli.log_internals {
        filter.push_str(",que_worker=trace");
    }
    tracing_subscriber::registry()
        .with(EnvFilter::new(filter))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Environment files stand in for per-deployment configuration; with
    // none given the conventional .env must exist.
    if cli.files.is_empty() {
        if let Err(e) = dotenvy::dotenv() {
            error!(error = %e, "No environment files given and no .env found");
            return 1;
        }
    } else {
        for file in &cli.files {
            if let Err(e) = dotenvy::from_path(file) {
                error!(file = %file.display(), error = %e, "Failed to load environment file");
                return 1;
            }
        }
    }

    if !cli.poll_interval.is_finite() || cli.poll_interval <= 0.0 {
        error!(poll_interval = cli.poll_interval, "poll-interval must be positive");
        return 1;
    }
    if !cli.wait_period.is_finite() || cli.wait_period <= 0.0 {
        error!(wait_period = cli.wait_period, "wait-period must be positive");
        return 1;
    }
    for (name, interval) in &cli.queue_name {
        if let Some(interval) = interval {
            if !interval.is_finite() || *interval <= 0.0 {
                error!(queue = %name, interval, "queue poll interval must be positive");
                return 1;
            }
        }
    }

    let connection_url = cli
        .connection_url
        .clone()
        .or_else(|| std::env::var("DATABASE_URL").ok());
    let Some(connection_url) = connection_url else {
        error!("No connection URL: pass --connection-url or set DATABASE_URL");
        return 1;
    };

    let pg_pool = match crate::pool::connect(&connection_url, 10).await {
        Ok(pool) => pool,
        Err(e) => {
            error!(error = %e, "Failed to connect to the database");
            return 1;
        }
    };

    if let Err(e) = migrate(&pg_pool).await {
        error!(error = %e, "Failed to prepare the schema");
        return 1;
    }

    let mut options = LockerOptions::default()
        .pg_pool(pg_pool.clone())
        .poll_interval(Duration::from_secs_f64(cli.poll_interval))
        .wait_period(Duration::from_secs_f64(cli.wait_period / 1000.0))
        .worker_count(cli.worker_count)
        .worker_priorities(cli.worker_priorities.iter().copied().map(Some).collect())
        .minimum_buffer_size(cli.minimum_buffer_size)
        .maximum_buffer_size(cli.maximum_buffer_size);

    for (name, interval) in &cli.queue_name {
        if let Err(e) = install_queue(&pg_pool, name).await {
            error!(queue = name, error = %e, "Failed to prepare queue table");
            return 1;
        }
        options = options.add_queue(name, interval.map(Duration::from_secs_f64));
    }

    let locker = match options.init().await {
        Ok(locker) => locker,
        Err(e) => {
            error!(error = %e, "Failed to start locker");
            return 1;
        }
    };

    info!("Locker starting");
    match locker.run().await {
        Ok(()) => 0,
        Err(e) => {
            error!(error = %e, "Locker exited with an error");
            1
        }
    }
}
