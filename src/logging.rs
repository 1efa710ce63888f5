use tracing_subscriber::EnvFilter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Environment variable naming the log file prefix.
pub const LOG_ENV: &str = "FLOWSTATE_LOG";

/// Initialize tracing with optional file output.
///
/// The host application usually owns the terminal, so nothing is installed
/// unless `FLOWSTATE_LOG` names a file path. Each process writes its own
/// file: `{path}.{timestamp}.{pid}`.
pub fn init_tracing() {
    let Some(log_path) = std::env::var(LOG_ENV).ok() else {
        return;
    };

    let pid = std::process::id();
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let unique_path = format!("{}.{}.{}", log_path, timestamp, pid);

    let Ok(file) = std::fs::File::create(&unique_path) else {
        eprintln!("Warning: Failed to create log file: {}", unique_path);
        return;
    };

    let file_layer = fmt::layer()
        .with_writer(file)
        .with_ansi(false)
        .with_target(true)
        .with_level(true);

    // try_init: a host may already have installed a subscriber.
    let _ = tracing_subscriber::registry()
        .with(default_filter("info"))
        .with(file_layer)
        .try_init();
}

/// Log to stderr, for the maintenance CLI.
pub fn init_stderr(verbose: bool) {
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact();

    let _ = tracing_subscriber::registry()
        .with(default_filter(if verbose { "debug" } else { "warn" }))
        .with(stderr_layer)
        .try_init();
}

fn default_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}
