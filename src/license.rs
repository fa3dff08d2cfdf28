use chrono::{DateTime, Utc};

/// Whole days left in a trial of `duration_days` that started at `joined_at`.
///
/// Elapsed time counts complete 24-hour periods; a `now` before `joined_at`
/// counts as zero elapsed days. The result never drops below zero.
pub fn days_remaining(now: DateTime<Utc>, joined_at: DateTime<Utc>, duration_days: u32) -> u32 {
    let elapsed = (now - joined_at).num_days().max(0);
    let remaining = i64::from(duration_days) - elapsed;
    u32::try_from(remaining.max(0)).unwrap_or(0)
}
