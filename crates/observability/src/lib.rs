//! Process-wide tracing setup for binaries and tests embedding the auth core.

pub mod logging;

pub use logging::{LogConfig, LogFormat};

/// Install the global subscriber.
///
/// Safe to call multiple times; later calls are no-ops and return `false`.
pub fn init(config: &LogConfig) -> bool {
    logging::init(config)
}
