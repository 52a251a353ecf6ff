use std::env;

use chrono::{NaiveDate, NaiveDateTime, TimeZone, Utc};

pub(crate) fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

pub(crate) fn now_secs() -> i64 {
    Utc::now().timestamp()
}

/// Stable short digest of tool arguments for the audit trail.
///
/// `serde_json::Value` objects serialize with sorted keys (no `preserve_order`),
/// so equal argument sets always hash the same.
pub(crate) fn args_digest(args: &serde_json::Value) -> String {
    let bytes = serde_json::to_vec(args).unwrap_or_default();
    let hash = blake3::hash(&bytes);
    hash.to_hex()[..16].to_string()
}

/// `YYYY-MM-DD HH:MM` in UTC, or the raw number if out of range.
pub(crate) fn format_ts(ts: i64) -> String {
    match Utc.timestamp_opt(ts, 0).single() {
        Some(dt) => dt.format("%Y-%m-%d %H:%M").to_string(),
        None => ts.to_string(),
    }
}

/// Accepts unix seconds, `YYYY-MM-DD`, or `YYYY-MM-DDTHH:MM` (UTC).
pub(crate) fn parse_date_to_ts(value: &str) -> Option<i64> {
    let value = value.trim();
    if let Ok(ts) = value.parse::<i64>() {
        return Some(ts);
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M") {
        return Some(Utc.from_utc_datetime(&dt).timestamp());
    }
    if let Ok(d) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        let dt = d.and_hms_opt(0, 0, 0)?;
        return Some(Utc.from_utc_datetime(&dt).timestamp());
    }
    None
}

pub(crate) fn env_optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

pub(crate) fn env_bool(name: &str, default: bool) -> bool {
    match env_optional(name) {
        Some(value) => {
            let v = value.trim().to_ascii_lowercase();
            matches!(v.as_str(), "1" | "true" | "yes" | "y" | "on")
        }
        None => default,
    }
}
