//! Timestamp resolution with a total order
//!
//! Readings carry timestamps as ISO-8601 strings, numeric epoch seconds or
//! milliseconds, or structured `{seconds, nanos}` objects. Anything that cannot be read
//! resolves to [`OLDEST`], so every record still has a sort key.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::{Map, Value};

/// Sort key for unparseable or missing timestamps
pub const OLDEST: DateTime<Utc> = DateTime::<Utc>::MIN_UTC;

/// Epoch values at or above this magnitude are milliseconds
///
/// As seconds it would land past the year 5000.
const EPOCH_MILLIS_THRESHOLD: f64 = 1e11;

/// Formats carrying an explicit UTC offset
const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%z",
];

/// Offset-less formats, read as UTC
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Resolve a raw timestamp value, falling back to [`OLDEST`]
pub fn resolve_timestamp(value: Option<&Value>) -> DateTime<Utc> {
    try_resolve_timestamp(value).unwrap_or(OLDEST)
}

/// Resolve a raw timestamp value, `None` when it cannot be read
pub fn try_resolve_timestamp(value: Option<&Value>) -> Option<DateTime<Utc>> {
    match value? {
        Value::String(s) => parse_str(s),
        Value::Number(n) => n.as_f64().and_then(from_epoch),
        Value::Object(obj) => from_structured(obj),
        _ => None,
    }
}

fn parse_str(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|naive| Utc.from_utc_datetime(&naive));
    }

    // Epoch value sent as text
    s.parse::<f64>().ok().and_then(from_epoch)
}

fn from_epoch(value: f64) -> Option<DateTime<Utc>> {
    if value.abs() >= EPOCH_MILLIS_THRESHOLD {
        from_epoch_secs(value / 1000.0)
    } else {
        from_epoch_secs(value)
    }
}

fn from_epoch_secs(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    let whole = secs.floor();
    if whole < i64::MIN as f64 || whole > i64::MAX as f64 {
        return None;
    }
    let nanos = (((secs - whole) * 1e9).round() as u32).min(999_999_999);
    DateTime::from_timestamp(whole as i64, nanos)
}

/// `{seconds, nanos}` as written by document-store clients
fn from_structured(obj: &Map<String, Value>) -> Option<DateTime<Utc>> {
    let seconds = ["seconds", "_seconds"]
        .iter()
        .find_map(|key| obj.get(*key).and_then(Value::as_i64))?;
    let nanos = ["nanos", "nanoseconds", "_nanoseconds"]
        .iter()
        .find_map(|key| obj.get(*key).and_then(Value::as_u64))
        .unwrap_or(0)
        .min(999_999_999) as u32;
    DateTime::from_timestamp(seconds, nanos)
}
