//! Usage: Wall-clock helpers used for token expiry bookkeeping.

use std::time::{SystemTime, UNIX_EPOCH};

pub(crate) fn now_unix_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// True once `expires_at` minus `lead_secs` is at or before `now_unix`.
pub(crate) fn is_expired(expires_at: Option<i64>, lead_secs: i64, now_unix: i64) -> bool {
    let Some(expiry) = expires_at else {
        return false;
    };
    expiry.saturating_sub(lead_secs.max(0)) <= now_unix
}
