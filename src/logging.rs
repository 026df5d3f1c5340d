//! Logging utilities

use env_logger::Env;
use log::LevelFilter;

/// Initialize the logger with the given [LevelFilter]
///
/// `RUST_LOG` takes precedence over `filter` when it is set. Calling this more
/// than once has no effect.
pub fn initialize_logger(filter: LevelFilter) {
    let _ = env_logger::Builder::from_env(Env::default().default_filter_or(filter.as_str()))
        .format_target(false)
        .try_init();
}
