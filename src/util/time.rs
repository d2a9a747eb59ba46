//! Time utilities

use std::time::Instant;

use chrono::{DateTime, Duration, Utc};

/// Server start time for uptime tracking
static SERVER_START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize server start time (call once at startup)
pub fn init_server_time() {
    SERVER_START.get_or_init(Instant::now);
}

/// Get server uptime in seconds
pub fn uptime_secs() -> u64 {
    SERVER_START
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0)
}

/// Convert a std duration into a chrono duration, saturating on overflow
pub fn chrono_duration(duration: std::time::Duration) -> Duration {
    Duration::from_std(duration).unwrap_or(Duration::MAX)
}

/// Whether `at` lies within the trailing `window` ending at `now`
pub fn within_window(at: DateTime<Utc>, now: DateTime<Utc>, window: Duration) -> bool {
    at <= now && now - at <= window
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_includes_boundary_and_excludes_future() {
        let now = Utc::now();
        let window = Duration::seconds(1);

        assert!(within_window(now, now, window));
        assert!(within_window(now - Duration::seconds(1), now, window));
        assert!(!within_window(now - Duration::milliseconds(1001), now, window));
        assert!(!within_window(now + Duration::milliseconds(5), now, window));
    }

    #[test]
    fn chrono_duration_saturates() {
        assert_eq!(chrono_duration(std::time::Duration::from_secs(60)), Duration::seconds(60));
        assert_eq!(chrono_duration(std::time::Duration::MAX), Duration::MAX);
    }
}
