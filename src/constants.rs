//! Application-wide constants
//!
//! This module contains all the magic numbers and default values used throughout
//! the application, making them easy to find and modify.

/// Chain-connection constants
pub mod connection {
    /// Initial reconnect backoff delay (in seconds)
    pub const RECONNECT_BASE_DELAY_SECS: u64 = 1;

    /// Maximum reconnect backoff delay (in seconds)
    pub const RECONNECT_MAX_DELAY_SECS: u64 = 30;

    /// Consecutive reconnect attempts before giving up
    pub const RECONNECT_MAX_ATTEMPTS: u32 = 5;

    /// Interval between proactive connection health checks (in seconds)
    pub const HEALTH_CHECK_INTERVAL_SECS: u64 = 30;

    /// Timeout for a single connect attempt (in seconds)
    pub const CONNECT_TIMEOUT_SECS: u64 = 10;
}

/// Delivery-queue constants
pub mod delivery {
    /// Default number of deliveries in flight at once
    pub const DEFAULT_MAX_CONCURRENT_DELIVERIES: usize = 10;

    /// Default dispatcher poll interval when the queue is idle (in seconds)
    pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 1;

    /// Default base delay for retry backoff (in seconds)
    pub const DEFAULT_RETRY_BASE_DELAY_SECS: u64 = 5;

    /// Default cap on the retry backoff delay (in seconds)
    pub const DEFAULT_RETRY_MAX_DELAY_SECS: u64 = 300;

    /// Jitter fraction applied to retry delays
    pub const RETRY_JITTER_FACTOR: f64 = 0.25;

    /// Default age after which completed/failed rows are swept (in hours)
    pub const DEFAULT_CLEANUP_MAX_AGE_HOURS: u64 = 24;

    /// Upper bound on a webhook timeout (in milliseconds)
    pub const MAX_WEBHOOK_TIMEOUT_MS: u64 = 300_000;

    /// Upper bound on configured retry attempts per webhook
    pub const MAX_WEBHOOK_RETRY_ATTEMPTS: u32 = 10;
}

/// Circuit-breaker constants
pub mod circuit {
    /// Consecutive failures that open a circuit
    pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

    /// Cool-down before an open circuit allows a probe (in seconds)
    pub const DEFAULT_OPEN_TIMEOUT_SECS: u64 = 60;
}

/// Delivery-tracker constants
pub mod tracker {
    /// Number of delivery records retained per webhook
    pub const HISTORY_LIMIT: usize = 1000;
}

/// Dead-letter-queue constants
pub mod dead_letter {
    /// Default retention before entries are swept (in days)
    pub const DEFAULT_MAX_RETENTION_DAYS: u32 = 30;

    /// Default cleanup cron schedule (daily at midnight)
    pub const DEFAULT_CLEANUP_SCHEDULE: &str = "0 0 0 * * *";
}

/// Event-processor constants
pub mod processor {
    /// Bound on listener startup before it is treated as hung (in seconds)
    pub const STARTUP_TIMEOUT_SECS: u64 = 10;
}
