//! Command-line entry point.
//!
//! `run` starts the supervisor and holds it until a termination signal
//! arrives; `init` constructs every configured relay, commands it off
//! and exits, which is how boot scripts neutralize default-high pins
//! before the control loops come up.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::{ArgAction, Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use fermenator::bootstrap;
use fermenator::supervisor::{self, Supervisor};

const EXIT_OK: i32 = 0;
const EXIT_CONFIG_INVALID: i32 = 1;
const EXIT_RUNTIME_FATAL: i32 = 2;
const EXIT_INTERRUPTED: i32 = 130;

#[derive(Parser)]
#[command(name = "fermenator", version, about = "Fermentation-control supervisor")]
struct Cli {
    /// Increase log verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Append logs to this file instead of standard error
    #[arg(long, global = true, value_name = "PATH")]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the supervisor and run until interrupted
    Run,
    /// Command all configured relays off, then exit
    Init,
}

fn init_logging(cli: &Cli) -> Option<WorkerGuard> {
    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    match &cli.log_file {
        Some(path) => {
            let directory = path.parent().filter(|p| !p.as_os_str().is_empty());
            let file_name = path.file_name().unwrap_or_else(|| "fermenator.log".as_ref());
            let appender = tracing_appender::rolling::never(
                directory.unwrap_or_else(|| ".".as_ref()),
                file_name,
            );
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        }
    }
}

/// Translate process signals into the supervisor's stop channel.
/// Relays are only ever touched by the teardown path, never from here.
fn spawn_signal_listener(stop: watch::Sender<bool>, interrupted: Arc<AtomicBool>) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {
                            interrupted.store(true, Ordering::SeqCst);
                        }
                        _ = sigterm.recv() => {}
                    }
                }
                Err(_) => {
                    let _ = tokio::signal::ctrl_c().await;
                    interrupted.store(true, Ordering::SeqCst);
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            interrupted.store(true, Ordering::SeqCst);
        }
        info!("termination signal received, shutting down");
        let _ = stop.send(true);
    });
}

async fn execute(cli: Cli) -> i32 {
    let bootstrap = match bootstrap::load_bootstrap() {
        Ok(bootstrap) => bootstrap,
        Err(err) => {
            error!(%err, "could not load bootstrap configuration");
            return EXIT_CONFIG_INVALID;
        }
    };
    let store = match bootstrap::store_from_bootstrap(&bootstrap) {
        Ok(store) => store,
        Err(err) => {
            error!(%err, "could not initialize the configuration store");
            return EXIT_CONFIG_INVALID;
        }
    };

    match cli.command {
        Commands::Init => match supervisor::all_relays_off(store.as_ref()).await {
            Ok(()) => {
                info!("all configured relays commanded off");
                EXIT_OK
            }
            Err(err) => {
                error!(%err, "init failed");
                if err.is_config_error() {
                    EXIT_CONFIG_INVALID
                } else {
                    EXIT_RUNTIME_FATAL
                }
            }
        },
        Commands::Run => {
            let (stop_tx, stop_rx) = watch::channel(false);
            let interrupted = Arc::new(AtomicBool::new(false));
            spawn_signal_listener(stop_tx, Arc::clone(&interrupted));

            let mut supervisor = Supervisor::new(bootstrap.name.clone(), store);
            match supervisor.run(stop_rx).await {
                Ok(()) => {
                    if interrupted.load(Ordering::SeqCst) {
                        EXIT_INTERRUPTED
                    } else {
                        EXIT_OK
                    }
                }
                Err(err) => {
                    error!(%err, "supervisor failed");
                    supervisor.disassemble().await;
                    if err.is_config_error() {
                        EXIT_CONFIG_INVALID
                    } else {
                        EXIT_RUNTIME_FATAL
                    }
                }
            }
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let _log_guard = init_logging(&cli);
    let code = execute(cli).await;
    std::process::exit(code);
}
