// ── Reminder Scheduler ─────────────────────────────────────────────────────
// One process-wide periodic task. Every tick selects items whose reminder
// instant falls in [now − 5 min, now + 1 min]: the forward minute absorbs
// tick jitter, the five minutes back recover from short outages without
// duplicating. After a notification the item's remind_at is parked on
// `now − 1 day`, which keeps it out of every future window until something
// explicitly re-arms it.
//
// Operators running multiple instances must pin this task to one leader;
// no cross-process lock is taken here.

use chrono::{Duration as ChronoDuration, Utc};
use chrono_tz::Tz;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;

use crate::atoms::constants::{REMINDER_LOOKAHEAD_SECS, REMINDER_LOOKBACK_SECS, REMINDER_TICK_SECS};
use crate::atoms::types::{Item, ItemType, OutboundReply, ReplyButton, User};
use crate::engine::pipeline::user_tz;
use crate::engine::state::EngineState;

/// Spawn the periodic tick. Runs until the process exits.
pub fn spawn(state: Arc<EngineState>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        info!("[scheduler] Reminder scheduler started ({}s tick)", REMINDER_TICK_SECS);
        loop {
            if let Err(e) = tick(&state).await {
                error!("[scheduler] Tick failed: {e}");
            }
            tokio::time::sleep(Duration::from_secs(REMINDER_TICK_SECS)).await;
        }
    })
}

/// One scheduler pass. Returns how many reminders were dispatched.
pub async fn tick(state: &EngineState) -> crate::atoms::error::EngineResult<usize> {
    let now = Utc::now();
    let from = now - ChronoDuration::seconds(REMINDER_LOOKBACK_SECS);
    let to = now + ChronoDuration::seconds(REMINDER_LOOKAHEAD_SECS);

    let due = state.store.find_due_window(from, to)?;
    if due.is_empty() {
        debug!("[scheduler] No due reminders");
        return Ok(0);
    }
    info!("[scheduler] {} due reminder(s)", due.len());

    let sentinel = now - ChronoDuration::days(1);
    let mut sent = 0;
    for (item, user) in due {
        let reply = build_reminder(&item, &user);
        if let Err(e) = state.notifier.send(user.user_id, reply).await {
            warn!("[scheduler] Send failed for item {}: {e}", item.id);
            // Still disarm: a broken transport must not re-fire forever.
        }
        state.store.mark_reminded(item.id, sentinel)?;
        sent += 1;
    }
    Ok(sent)
}

fn build_reminder(item: &Item, user: &User) -> OutboundReply {
    let tz: Tz = user_tz(&user.timezone);

    let icon = if item.item_type == ItemType::Task { "✔︎" } else { "•" };
    let title = item
        .title
        .clone()
        .or_else(|| item.content.as_ref().map(|c| c.chars().take(100).collect()))
        .unwrap_or_else(|| "Без названия".into());

    let mut text = format!("{icon} Напоминание\n\n{title}");
    if let Some(due) = item.due_at {
        text.push_str(&format!("\n\n{}", due.with_timezone(&tz).format("%H:%M")));
        if let Some(raw) = &item.due_at_raw {
            text.push_str(&format!(" ({raw})"));
        }
    }

    let buttons = if item.item_type == ItemType::Task {
        vec![
            ReplyButton { label: "✅ Выполнено".into(), callback_id: format!("complete:{}", item.id) },
            ReplyButton { label: "⏰ Через час".into(), callback_id: format!("snooze:{}", item.id) },
        ]
    } else {
        Vec::new()
    };

    OutboundReply { text, buttons }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::error::EngineResult;
    use crate::atoms::types::{ItemStatus, NewItem};
    use crate::engine::config::Config;
    use crate::engine::extract::DocumentExtractor;
    use crate::engine::providers::AnyProvider;
    use crate::engine::state::Notifier;
    use crate::engine::store::Store;
    use crate::engine::tools::test_support::ScriptedProvider;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    struct CollectingNotifier {
        sent: Mutex<Vec<(i64, OutboundReply)>>,
    }

    #[async_trait]
    impl Notifier for CollectingNotifier {
        async fn send(&self, user_id: i64, reply: OutboundReply) -> EngineResult<()> {
            self.sent.lock().push((user_id, reply));
            Ok(())
        }
    }

    fn state_with_collector() -> (Arc<EngineState>, Arc<CollectingNotifier>) {
        let notifier = Arc::new(CollectingNotifier { sent: Mutex::new(Vec::new()) });
        let state = EngineState::new(
            Config::for_tests(),
            Store::open_in_memory().unwrap(),
            AnyProvider::from_impl(Box::new(ScriptedProvider::new(Vec::new()))),
            None,
            None,
            None,
            DocumentExtractor::new(None),
            notifier.clone(),
        );
        (Arc::new(state), notifier)
    }

    #[tokio::test]
    async fn reminder_fires_at_most_once() {
        let (state, notifier) = state_with_collector();
        state.store.get_or_create_user(1).unwrap();
        let item = state
            .store
            .create_item(
                1,
                &NewItem {
                    item_type: ItemType::Task,
                    status: ItemStatus::Inbox,
                    title: Some("Сдать отчёт".into()),
                    due_at: Some(Utc::now()),
                    remind_at: Some(Utc::now()),
                    due_at_raw: Some("сейчас".into()),
                    ..NewItem::default()
                },
            )
            .unwrap();

        // First tick notifies and disarms.
        assert_eq!(tick(&state).await.unwrap(), 1);
        {
            let sent = notifier.sent.lock();
            assert_eq!(sent.len(), 1);
            assert_eq!(sent[0].0, 1);
            assert!(sent[0].1.text.contains("Сдать отчёт"));
            assert!(sent[0].1.buttons.iter().any(|b| b.callback_id == format!("complete:{}", item.id)));
        }
        let disarmed = state.store.get_item(item.id, 1).unwrap().unwrap();
        assert!(disarmed.remind_at.unwrap() < Utc::now() - ChronoDuration::hours(23));

        // Next tick selects nothing.
        assert_eq!(tick(&state).await.unwrap(), 0);
        assert_eq!(notifier.sent.lock().len(), 1);
    }

    #[tokio::test]
    async fn due_at_is_the_fallback_when_remind_at_is_null() {
        let (state, notifier) = state_with_collector();
        state.store.get_or_create_user(1).unwrap();
        state
            .store
            .create_item(
                1,
                &NewItem {
                    item_type: ItemType::Event,
                    status: ItemStatus::Active,
                    title: Some("Созвон".into()),
                    due_at: Some(Utc::now()),
                    remind_at: None,
                    ..NewItem::default()
                },
            )
            .unwrap();

        assert_eq!(tick(&state).await.unwrap(), 1);
        // Non-task reminders carry no action buttons.
        assert!(notifier.sent.lock()[0].1.buttons.is_empty());
    }

    #[tokio::test]
    async fn done_and_archived_items_never_fire() {
        let (state, _notifier) = state_with_collector();
        state.store.get_or_create_user(1).unwrap();
        for status in [ItemStatus::Done, ItemStatus::Archived, ItemStatus::Processing] {
            state
                .store
                .create_item(
                    1,
                    &NewItem {
                        item_type: ItemType::Task,
                        status,
                        due_at: Some(Utc::now()),
                        remind_at: Some(Utc::now()),
                        ..NewItem::default()
                    },
                )
                .unwrap();
        }
        assert_eq!(tick(&state).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn items_outside_the_window_wait_their_turn() {
        let (state, _notifier) = state_with_collector();
        state.store.get_or_create_user(1).unwrap();
        state
            .store
            .create_item(
                1,
                &NewItem {
                    item_type: ItemType::Task,
                    status: ItemStatus::Inbox,
                    due_at: Some(Utc::now() + ChronoDuration::minutes(10)),
                    remind_at: Some(Utc::now() + ChronoDuration::minutes(10)),
                    ..NewItem::default()
                },
            )
            .unwrap();
        assert_eq!(tick(&state).await.unwrap(), 0);
    }
}
