// ── Tasks API ──────────────────────────────────────────────────────────────
// The grouped Tasks view and the month calendar. Bucket boundaries are
// computed against the caller's wall clock (their stored timezone), not
// the server's.

use axum::extract::{Query, State};
use axum::Json;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::auth::AuthUser;
use super::{ApiError, ApiResult};
use crate::atoms::error::EngineError;
use crate::atoms::types::{Item, ItemStatus};
use crate::engine::pipeline::user_tz;
use crate::engine::state::EngineState;

pub const GROUP_ORDER: &[&str] =
    &["overdue", "today", "tomorrow", "this_week", "later", "without_date", "completed"];

fn group_label(key: &str) -> &'static str {
    match key {
        "overdue" => "Просрочено",
        "today" => "Сегодня",
        "tomorrow" => "Завтра",
        "this_week" => "На этой неделе",
        "later" => "Позже",
        "without_date" => "Без срока",
        "completed" => "Выполненные",
        _ => "Прочее",
    }
}

/// Which bucket a due instant belongs to, relative to `today` in the
/// caller's timezone.
pub fn bucket_for(due_at: Option<DateTime<Utc>>, tz: Tz, today: NaiveDate) -> &'static str {
    let Some(due) = due_at else { return "without_date" };
    let due_date = due.with_timezone(&tz).date_naive();
    if due_date < today {
        "overdue"
    } else if due_date == today {
        "today"
    } else if due_date == today + Duration::days(1) {
        "tomorrow"
    } else if due_date <= today + Duration::days(7) {
        "this_week"
    } else {
        "later"
    }
}

#[derive(Debug, Deserialize)]
pub struct TasksQuery {
    #[serde(default)]
    pub include_completed: bool,
}

pub async fn list_tasks(
    State(state): State<Arc<EngineState>>,
    user: AuthUser,
    Query(query): Query<TasksQuery>,
) -> ApiResult<Json<Value>> {
    let profile = state.store.get_or_create_user(user.id)?;
    let tz = user_tz(&profile.timezone);
    let today = Utc::now().with_timezone(&tz).date_naive();

    let tasks = state.store.get_all_tasks(user.id)?;
    let mut grouped: BTreeMap<&'static str, Vec<Item>> = BTreeMap::new();
    for task in tasks {
        if task.status == ItemStatus::Done {
            if query.include_completed {
                grouped.entry("completed").or_default().push(task);
            }
        } else {
            grouped.entry(bucket_for(task.due_at, tz, today)).or_default().push(task);
        }
    }

    let mut groups: Vec<Value> = Vec::new();
    let mut total = 0usize;
    for key in GROUP_ORDER {
        if let Some(items) = grouped.remove(key) {
            if items.is_empty() {
                continue;
            }
            total += items.len();
            groups.push(json!({ "key": key, "label": group_label(key), "items": items }));
        }
    }
    Ok(Json(json!({ "groups": groups, "total": total })))
}

#[derive(Debug, Deserialize)]
pub struct CalendarQuery {
    pub year: i32,
    pub month: u32,
}

pub async fn calendar(
    State(state): State<Arc<EngineState>>,
    user: AuthUser,
    Query(query): Query<CalendarQuery>,
) -> ApiResult<Json<Value>> {
    if !(1..=12).contains(&query.month) {
        return Err(ApiError(EngineError::Validation("month must be in [1, 12]".into())));
    }
    let profile = state.store.get_or_create_user(user.id)?;
    let tz = user_tz(&profile.timezone);

    // Month boundaries in the caller's timezone.
    let first = NaiveDate::from_ymd_opt(query.year, query.month, 1)
        .ok_or(ApiError(EngineError::Validation("invalid year/month".into())))?;
    let next_month = if query.month == 12 {
        NaiveDate::from_ymd_opt(query.year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(query.year, query.month + 1, 1)
    }
    .ok_or(ApiError(EngineError::Validation("invalid year/month".into())))?;

    let from = tz
        .from_local_datetime(&first.and_hms_opt(0, 0, 0).expect("midnight exists"))
        .earliest()
        .map(|d| d.with_timezone(&Utc))
        .ok_or(ApiError(EngineError::Validation("invalid month start".into())))?;
    let to = tz
        .from_local_datetime(&next_month.and_hms_opt(0, 0, 0).expect("midnight exists"))
        .earliest()
        .map(|d| d.with_timezone(&Utc) - Duration::seconds(1))
        .ok_or(ApiError(EngineError::Validation("invalid month end".into())))?;

    let tasks = state.store.get_tasks_with_due_dates(user.id, Some(from), Some(to))?;

    let mut day_counts: BTreeMap<String, i64> = BTreeMap::new();
    for task in &tasks {
        if task.status == ItemStatus::Done {
            continue;
        }
        if let Some(due) = task.due_at {
            let key = due.with_timezone(&tz).format("%Y-%m-%d").to_string();
            *day_counts.entry(key).or_default() += 1;
        }
    }
    let days: Vec<Value> = day_counts
        .into_iter()
        .map(|(date, count)| json!({ "date": date, "count": count }))
        .collect();

    Ok(Json(json!({ "days": days, "tasks": tasks })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buckets_follow_the_callers_calendar() {
        let tz: Tz = "Asia/Almaty".parse().unwrap();
        let today = NaiveDate::from_ymd_opt(2025, 11, 14).unwrap();
        let local = |y, m, d, h| {
            tz.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap().with_timezone(&Utc)
        };

        assert_eq!(bucket_for(None, tz, today), "without_date");
        assert_eq!(bucket_for(Some(local(2025, 11, 13, 9)), tz, today), "overdue");
        assert_eq!(bucket_for(Some(local(2025, 11, 14, 23)), tz, today), "today");
        assert_eq!(bucket_for(Some(local(2025, 11, 15, 0)), tz, today), "tomorrow");
        assert_eq!(bucket_for(Some(local(2025, 11, 21, 12)), tz, today), "this_week");
        assert_eq!(bucket_for(Some(local(2025, 11, 22, 12)), tz, today), "later");
    }

    #[test]
    fn timezone_shifts_the_day_boundary() {
        let tz: Tz = "Asia/Almaty".parse().unwrap(); // UTC+5 (no DST)
        let today = NaiveDate::from_ymd_opt(2025, 11, 14).unwrap();
        // 2025-11-13T22:00 UTC is already Nov 14 03:00 in Almaty.
        let instant = Utc.with_ymd_and_hms(2025, 11, 13, 22, 0, 0).unwrap();
        assert_eq!(bucket_for(Some(instant), tz, today), "today");
    }
}
