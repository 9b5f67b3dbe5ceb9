use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use tracing::warn;

/// Current time truncated to the millisecond precision we persist.
pub(crate) fn now() -> DateTime<Utc> {
    from_sql(&to_sql(&Utc::now()))
}

/// Fixed-width RFC 3339 so stored timestamps compare correctly as text.
pub(crate) fn to_sql(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn from_sql(raw: &str) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            // SQLite's datetime('now') has no timezone; treat it as UTC.
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt timestamp '{}': {}", raw, e);
            DateTime::default()
        })
}

pub(crate) fn opt_from_sql(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.as_deref().map(from_sql)
}
