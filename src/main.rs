use anyhow::Result;
use clap::Parser;
use hybridpsk::config::Config;
use hybridpsk::{wait_for_shutdown_signal, Daemon};
use log::{debug, info};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, clap::ValueEnum)]
enum LogLevel {
    Nothing,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for log::LevelFilter {
    fn from(value: LogLevel) -> Self {
        use log::LevelFilter as T;
        use LogLevel as F;
        match value {
            F::Nothing => T::Off,
            F::Error => T::Error,
            F::Warn => T::Warn,
            F::Info => T::Info,
            F::Debug => T::Debug,
            F::Trace => T::Trace,
        }
    }
}

/// Hybrid QKD/PQC pre-shared key rotation daemon for WireGuard.
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None, disable_version_flag = true)]
struct Cli {
    /// Print version information and exit
    #[arg(short = 'v', long = "version", action = clap::ArgAction::Version)]
    version: (),

    /// Lowest log level to show
    #[arg(long = "log-level", value_name = "LOG_LEVEL", group = "log_level_group")]
    log_level: Option<LogLevel>,

    /// Show verbose log output - sets log level to "info"
    #[arg(long, group = "log_level_group")]
    verbose: bool,

    /// Show no log output below "error"
    #[arg(short, long, group = "log_level_group")]
    quiet: bool,
}

impl Cli {
    fn init_logging(&self) {
        let mut builder = env_logger::Builder::from_default_env();
        builder.format_timestamp_micros();

        if std::env::var("RUST_LOG").is_err() {
            builder.filter_level(log::LevelFilter::Warn);
        }

        if let Some(filter) = self.log_level_filter() {
            builder.filter_level(filter);
        }

        let _ = builder.try_init();
    }

    fn log_level_filter(&self) -> Option<log::LevelFilter> {
        if self.verbose {
            return Some(log::LevelFilter::Info);
        }
        if self.quiet {
            return Some(log::LevelFilter::Error);
        }
        self.log_level.map(Into::into)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    cli.init_logging();

    info!(
        "starting {} {}...",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );

    let cfg = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("failed to load configuration: {err:?}");
            std::process::exit(1);
        }
    };
    cfg.print_startup_summary();
    debug!("loaded config: {cfg:#?}");

    let daemon = match Daemon::from_config(cfg) {
        Ok(daemon) => daemon,
        Err(err) => {
            eprintln!("failed to start daemon: {err:?}");
            std::process::exit(1);
        }
    };

    let shutdown = CancellationToken::new();
    let signal_task = tokio::spawn(wait_for_shutdown_signal(shutdown.clone()));

    daemon.run(shutdown).await;
    signal_task.abort();

    info!("shut down cleanly");
    Ok(())
}
