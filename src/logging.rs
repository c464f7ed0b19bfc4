//! Dev logging for fbterm.
//!
//! The emulator owns the screen, so stdout/stderr are useless while a
//! session runs. Logging is therefore file-based and opt-in: set the
//! `FBTERM_LOG` environment variable before launching:
//!
//! ```sh
//! FBTERM_LOG=1 fbterm              # info and up
//! FBTERM_LOG=fbterm=trace fbterm   # full escape-sequence tracing
//! ```
//!
//! The variable doubles as a `tracing_subscriber` filter directive; any
//! value that does not parse as one means `info`. Events go to
//! `~/fbterm.log`. A panic hook records panics to the log before the default
//! handler runs; otherwise a panicking session just leaves a frozen
//! framebuffer and no trace of why.

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// Initialise file-based logging if `FBTERM_LOG` is set.
///
/// Returns a guard that must be kept alive for the duration of the process;
/// dropping it flushes and closes the log file. Store it in a binding in
/// `main()`.
pub fn init() -> Option<WorkerGuard> {
    let directive = std::env::var("FBTERM_LOG").unwrap_or_default();
    if directive.is_empty() {
        return None;
    }

    let log_path = log_file_path();
    let log_file = match std::fs::OpenOptions::new().create(true).append(true).open(&log_path) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("fbterm: cannot open log file {}: {e}", log_path.display());
            return None;
        }
    };

    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("info"));

    // Wrap in a non-blocking writer so a slow disk never stalls the
    // session loop.
    let (non_blocking, guard) = tracing_appender::non_blocking(log_file);

    let subscriber = tracing_subscriber::registry().with(filter).with(
        tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_timer(tracing_subscriber::fmt::time::SystemTime)
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false),
    );

    tracing::subscriber::set_global_default(subscriber)
        .expect("fbterm: failed to set global tracing subscriber");

    // Install the panic hook after the subscriber is live so the error
    // event actually reaches the file writer.
    install_panic_hook();

    tracing::info!("logging initialised — writing to {}", log_path.display());
    Some(guard)
}

/// `~/fbterm.log`, falling back to /tmp for odd $HOME setups.
fn log_file_path() -> PathBuf {
    let home = std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"));
    home.join("fbterm.log")
}

/// Log panics as error events, then delegate to the previously-installed
/// handler so the process still aborts with the standard output.
fn install_panic_hook() {
    let prev_hook = std::panic::take_hook();

    std::panic::set_hook(Box::new(move |info| {
        let location = info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_else(|| "<unknown location>".to_string());

        let message = if let Some(s) = info.payload().downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "<non-string panic payload>".to_string()
        };

        tracing::error!(location = %location, "PANIC: {message}");

        prev_hook(info);
    }));
}
