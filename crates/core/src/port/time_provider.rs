// Time Provider Port (for testability)

use chrono::{DateTime, Local, TimeZone};

/// Time provider interface (allows mocking in tests)
#[cfg_attr(test, mockall::automock)]
pub trait TimeProvider: Send + Sync {
    /// Get current time in milliseconds since epoch
    fn now_millis(&self) -> i64;
}

/// Current local time according to `provider`
pub fn local_now(provider: &dyn TimeProvider) -> DateTime<Local> {
    Local
        .timestamp_millis_opt(provider.now_millis())
        .single()
        .unwrap_or_else(Local::now)
}

/// System time provider (production)
pub struct SystemTimeProvider;

impl TimeProvider for SystemTimeProvider {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}
