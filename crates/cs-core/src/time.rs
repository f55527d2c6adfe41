//! Time utilities for cisco-socks5
//!
//! Timestamps on resources are plain strings so snapshots stay cheap to clone
//! and print.

use chrono::{DateTime, Local, Utc};

/// Format used for kill and deletion timestamps
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Format a local time as a resource timestamp.
///
/// # Examples
/// ```
/// use chrono::{Local, TimeZone};
/// use cs_core::time::format_timestamp;
///
/// let t = Local.with_ymd_and_hms(2024, 5, 1, 13, 4, 5).unwrap();
/// assert_eq!(format_timestamp(t), "2024-05-01 13:04:05");
/// ```
pub fn format_timestamp(time: DateTime<Local>) -> String {
    time.format(TIMESTAMP_FORMAT).to_string()
}

/// Current local time as a resource timestamp
pub fn now_timestamp() -> String {
    format_timestamp(Local::now())
}

/// Current UTC time in RFC 3339, used for condition transition times
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}
