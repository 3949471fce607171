//! Logger bootstrap.
//!
//! The library logs through the `log` macros only. Binaries and tests call
//! [`init_logging`] once; later calls are ignored.

use env_logger::{Builder, Env};
use once_cell::sync::OnceCell;

use crate::config::LOG_ENV;

static LOGGER: OnceCell<()> = OnceCell::new();

/// Install `env_logger` with `default_filter` unless `CATTLE_TRACKER_LOG`
/// says otherwise
pub fn init_logging(default_filter: &str) {
    LOGGER.get_or_init(|| {
        let env = Env::default().filter_or(LOG_ENV, default_filter);
        // Another logger may already be installed, e.g. by a test harness
        let _ = Builder::from_env(env).format_timestamp_millis().try_init();
    });
}
