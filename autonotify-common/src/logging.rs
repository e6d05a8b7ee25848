//! slog setup shared by the notification service and its tools
use std::io;

use gethostname::gethostname;
use slog::{self, Drain};
use slog_mozlog_json::MozLogJson;

use crate::errors::Result;

/// Install the global logger.
///
/// `json` selects MozLog formatted output (for production) over the
/// terminal formatter. `hostname` is stamped on every JSON record.
pub fn init_logging(json: bool, hostname: String) -> Result<()> {
    let name = env!("CARGO_PKG_NAME");
    let drain = if json {
        let mozlog = MozLogJson::new(io::stdout())
            .logger_name(format!("{}-{}", name, env!("CARGO_PKG_VERSION")))
            .msg_type(format!("{name}:log"))
            .hostname(hostname)
            .build()
            .fuse();
        slog_async::Async::new(mozlog).build()
    } else {
        let decorator = slog_term::TermDecorator::new().build();
        let term = slog_term::FullFormat::new(decorator).build().fuse();
        slog_async::Async::new(term).build()
    };
    install(slog::Logger::root(drain.fuse(), o!()));
    Ok(())
}

/// Swap in a discarding logger, flushing the async drain on shutdown
pub fn reset_logging() {
    install(slog::Logger::root(slog::Discard, o!()));
}

/// Log to `slog_term::TestStdoutWriter` so `cargo test` captures the output
pub fn init_test_logging() {
    let decorator = slog_term::PlainSyncDecorator::new(slog_term::TestStdoutWriter);
    let drain = std::sync::Mutex::new(slog_term::FullFormat::new(decorator).build()).fuse();
    install(slog::Logger::root(drain, o!()));
}

fn install(logger: slog::Logger) {
    // The guard would reset the global logger on drop, which panics when
    // tests race on it. reset_logging covers shutdown instead.
    slog_scope::set_global_logger(logger).cancel_reset();
    slog_stdlog::init().ok();
}

/// The `<PREFIX>_HOSTNAME` environment value, or the system hostname
pub fn get_default_hostname(prefix: &str) -> String {
    let hostname = std::env::var(format!("{}_HOSTNAME", prefix.to_uppercase()))
        .unwrap_or_else(|_| gethostname().to_string_lossy().to_string());
    trace!("Using hostname {}", &hostname);
    hostname
}
