use chrono::{DateTime, Datelike, TimeZone, Utc};

pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// First instant of the calendar month containing `at`, used for monthly quotas.
pub fn start_of_month(at: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(at.year(), at.month(), 1, 0, 0, 0)
        .single()
        .unwrap_or(at)
}
