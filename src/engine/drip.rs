//! Time-based (drip) lock.
//!
//! The gate knows nothing about roles: callers that bypass it (admin
//! preview) simply do not evaluate it.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DripStatus {
    pub locked: bool,
    /// Reported only while locked.
    pub unlock_at: Option<DateTime<Utc>>,
}

impl DripStatus {
    pub const OPEN: DripStatus = DripStatus { locked: false, unlock_at: None };
}

/// `drip_days` null or non-positive never locks. Otherwise the lesson is
/// locked while `now < enrolled_at + drip_days`.
pub fn drip_status(drip_days: Option<i32>, enrolled_at: DateTime<Utc>, now: DateTime<Utc>) -> DripStatus {
    let days = match drip_days {
        Some(d) if d > 0 => d,
        _ => return DripStatus::OPEN,
    };
    match enrolled_at.checked_add_signed(Duration::days(i64::from(days))) {
        Some(unlock_at) if now < unlock_at => DripStatus { locked: true, unlock_at: Some(unlock_at) },
        Some(_) => DripStatus::OPEN,
        // beyond the representable calendar
        None => DripStatus { locked: true, unlock_at: None },
    }
}
