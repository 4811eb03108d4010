//! Wall-clock helper shared by the registry and dispatcher.
//!
//! spec.md §3 stores `last_checkin`/history timestamps as unix seconds
//! (`f64`); `original_source` gets this for free from Python's `time.time()`.

use std::time::{SystemTime, UNIX_EPOCH};

pub fn unix_now() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64()
}
