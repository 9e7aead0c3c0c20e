// ============================================
// Talon - logging.rs
// ============================================
// Sets up logging once, in main(), and hands back a LogSink that has
// to stay alive until the program ends (dropping it flushes the file).
//
// Logs go to:
//   - the console (compact, coloured)
//   - %TEMP%\talon\talon.log (appended, no colours)
//
// RUST_LOG wins if set. Otherwise "info", or "debug" with --verbose.
// ============================================

use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

pub const LOG_FILE_NAME: &str = "talon.log";

/// Owns the background log writer. Keep it alive for the whole run.
pub struct LogSink {
    log_file: Option<PathBuf>,
    _guard: Option<WorkerGuard>,
}

impl LogSink {
    /// Where the log file is, if we managed to open one
    pub fn log_file(&self) -> Option<&Path> {
        self.log_file.as_deref()
    }
}

/// Install the global subscriber.
///
/// If the log directory can't be created we still log to the console;
/// the temp-dir check later reports the real problem to the user.
pub fn init(log_dir: &Path, verbose: bool) -> LogSink {
    let default_level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let console = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout)
        .with_target(false)
        .compact();

    let (file_layer, guard, log_file) = match std::fs::create_dir_all(log_dir) {
        Ok(()) => {
            let appender = tracing_appender::rolling::never(log_dir, LOG_FILE_NAME);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false);
            (Some(layer), Some(guard), Some(log_dir.join(LOG_FILE_NAME)))
        }
        Err(e) => {
            eprintln!("Failed to create log directory {}: {}", log_dir.display(), e);
            (None, None, None)
        }
    };

    // Ignore "already initialized" (tests may call this more than once)
    tracing_subscriber::registry()
        .with(env_filter)
        .with(console)
        .with(file_layer)
        .try_init()
        .ok();

    LogSink {
        log_file,
        _guard: guard,
    }
}

// ============================================
// TEST HELPER
// ============================================

/// Run `f` and return everything it logged, as plain text.
#[cfg(test)]
pub fn capture_logs<F: FnOnce()>(f: F) -> String {
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl Write for Buffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    let buffer = Buffer::default();
    let writer = buffer.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .finish();
    tracing::subscriber::with_default(subscriber, f);

    let bytes = buffer.0.lock().unwrap();
    String::from_utf8_lossy(&bytes).to_string()
}
