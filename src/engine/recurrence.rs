// ── Recurrence expansion ───────────────────────────────────────────────────
// Computes the next occurrence of a recurring item when the current one is
// completed.
//
// Rules:
//   daily   — add `interval` days.
//   weekly  — with `days`, pick the smallest weekday strictly greater than
//             the current one; if none, wrap `interval` weeks ahead to the
//             smallest listed day. Without `days`, add `interval` weeks.
//   monthly — add `interval` months; when the source day-of-month does not
//             exist in the target month, clamp to the 28th. The clamped
//             value is stable under further steps (every month has a 28th).
//   end_date, when present, ends the series: no occurrence past it.

use chrono::{DateTime, Datelike, Duration, Utc};

use crate::atoms::types::{RecurrenceKind, RecurrenceRule};

/// Next due instant after `current_due` under `rule`, or None when the
/// series has ended.
pub fn next_occurrence(current_due: DateTime<Utc>, rule: &RecurrenceRule) -> Option<DateTime<Utc>> {
    if let Some(end) = rule.end_date {
        if current_due >= end {
            return None;
        }
    }

    let interval = rule.interval.max(1) as i64;

    let next = match rule.kind {
        RecurrenceKind::Daily => current_due + Duration::days(interval),
        RecurrenceKind::Weekly => next_weekly(current_due, interval, &rule.days),
        RecurrenceKind::Monthly => next_monthly(current_due, interval)?,
    };

    if let Some(end) = rule.end_date {
        if next > end {
            return None;
        }
    }
    Some(next)
}

fn next_weekly(current: DateTime<Utc>, interval: i64, days: &[u8]) -> DateTime<Utc> {
    let mut sorted: Vec<u8> = days.iter().copied().filter(|d| *d <= 6).collect();
    sorted.sort_unstable();
    sorted.dedup();

    if sorted.is_empty() {
        return current + Duration::weeks(interval);
    }

    // Monday = 0 … Sunday = 6.
    let weekday = current.weekday().num_days_from_monday() as i64;
    let delta = match sorted.iter().find(|d| (**d as i64) > weekday) {
        Some(next_day) => *next_day as i64 - weekday,
        // Wrap into the next cycle, landing on the smallest listed day.
        None => 7 * interval - weekday + sorted[0] as i64,
    };
    current + Duration::days(delta)
}

fn next_monthly(current: DateTime<Utc>, interval: i64) -> Option<DateTime<Utc>> {
    let month0 = current.month0() as i64 + interval;
    let year = current.year() + (month0.div_euclid(12)) as i32;
    let month = (month0.rem_euclid(12)) as u32 + 1;

    current
        .with_day(1)?
        .with_year(year)?
        .with_month(month)?
        .with_day(current.day())
        .or_else(|| current.with_day(1)?.with_year(year)?.with_month(month)?.with_day(28))
}
