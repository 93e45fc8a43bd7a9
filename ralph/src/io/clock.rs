//! Wall-clock access for the loop controller.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Current time in whole seconds since the Unix epoch.
pub fn epoch_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_secs()
}
