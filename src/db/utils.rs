//! Database utility functions.

use chrono::Utc;

/// Current time in SQLite datetime format with microseconds.
///
/// Sorts lexically after a second-precision `CURRENT_TIMESTAMP` from the
/// same second, so a row touched here always moves forward in time.
pub fn current_timestamp() -> String {
    Utc::now().format("%Y-%m-%d %H:%M:%S%.6f").to_string()
}
