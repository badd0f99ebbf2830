use tracing::metadata::LevelFilter;
use tracing_subscriber::fmt::time::ChronoUtc;

/// Installs a process-wide subscriber suitable for the expansion
/// engine: compact output on stderr with RFC 3339 UTC timestamps.
///
/// The level comes from `FANOUT_LOG` (any of `error`, `warn`, `info`,
/// `debug`, `trace`, `off`); without it, debug builds log at DEBUG and
/// release builds at INFO. Safe to call more than once: if a global
/// subscriber is already installed, later calls are no-ops, so both an
/// embedding daemon and a test harness can use it unconditionally.
pub fn init() {
    let level = std::env::var("FANOUT_LOG")
        .ok()
        .and_then(|level| level.parse::<LevelFilter>().ok())
        .unwrap_or(if cfg!(debug_assertions) {
            LevelFilter::DEBUG
        } else {
            LevelFilter::INFO
        });

    let _ = tracing_subscriber::fmt()
        .compact()
        .with_ansi(true)
        .with_max_level(level)
        .with_timer(ChronoUtc::rfc_3339())
        .with_writer(std::io::stderr)
        .try_init();
}
