//! sessionbridge - watch and manage a persisted login session from the terminal.
//!
//! By default the session is bootstrapped from the local cache and the
//! configured userinfo endpoint, and every state change is printed until
//! Ctrl-C. See `--help` for the other commands.

mod commands;

use std::io;
use std::path::Path;

use anyhow::Result;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Log file name inside the cache directory (`--log-file`)
const LOG_FILE: &str = "sessionbridge.log";

const USAGE: &str = "\
Usage: sessionbridge [COMMAND] [--log-file]

Commands:
  (none)       Bootstrap the session and print state changes until Ctrl-C
  --demo       Run the bootstrap against a simulated slow provider
  --login      Store a provider access token in the OS keychain
  --sign-out   Sign out and forget the cached session
  --status     Show the cached session
  --help       Show this message

Environment:
  RUST_LOG                      Log filter (default: warn)
  SESSIONBRIDGE_USERINFO_URL    OpenID Connect userinfo endpoint
  SESSIONBRIDGE_TIMEOUT_MS      Bootstrap timeout in milliseconds
  SESSIONBRIDGE_ACCESS_TOKEN    Access token (overrides the keychain)";

/// Initialize the tracing subscriber for logging.
///
/// Logs always go to stderr; with `log_dir` they are also written to a file
/// through a non-blocking writer whose guard must outlive the program.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::never(dir, LOG_FILE);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let log_to_file = args.iter().any(|arg| arg == "--log-file");
    let command = args
        .iter()
        .find(|arg| arg.as_str() != "--log-file")
        .map(String::as_str);

    if command == Some("--help") || command == Some("-h") {
        println!("{}", USAGE);
        return Ok(());
    }

    let mut config = commands::load_config();
    config.apply_env();

    let log_dir = if log_to_file {
        config.cache_dir().ok()
    } else {
        None
    };
    if let Some(ref dir) = log_dir {
        std::fs::create_dir_all(dir)?;
    }
    let _guard = init_tracing(log_dir.as_deref());
    info!("sessionbridge starting");

    let result = match command {
        None => commands::watch(&mut config).await,
        Some("--demo") => commands::demo().await,
        Some("--login") => commands::login(),
        Some("--sign-out") => commands::sign_out(&config).await,
        Some("--status") => commands::status(&config).await,
        Some(other) => {
            eprintln!("Unknown command: {}\n\n{}", other, USAGE);
            std::process::exit(2);
        }
    };

    info!("sessionbridge shutting down");
    result
}

