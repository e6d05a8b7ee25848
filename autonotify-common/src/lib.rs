#![recursion_limit = "1024"]

#[macro_use]
extern crate slog;
#[macro_use]
extern crate slog_scope;

pub mod errors;
pub mod logging;
pub mod metric_name;
pub mod metrics;
pub mod sentry;
pub mod util;
