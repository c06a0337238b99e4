// ── Ingestion Pipeline ─────────────────────────────────────────────────────
// One invocation per inbound message. Five stages, strictly in order:
//   1. context gather   — projects, recent items, similar items, local time
//   2. LLM extraction   — structured JSON: items + chat_response + links
//   3. persistence      — one write per extracted item, failures skipped
//   4. embedding        — one batch call, written back per item, non-fatal
//   5. linking          — validated suggested links
// Stages 2–5 run under a 30-second deadline; on expiry or AgentError the
// router performs the fallback persist so the input is never lost.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use log::{info, warn};
use std::time::{Duration, Instant};

use crate::atoms::constants::{
    DEFAULT_TIMEZONE, LINK_REASON_MAX_CHARS, PIPELINE_DEADLINE_SECS, TITLE_FALLBACK_CHARS,
};
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::{
    Attachment, Extraction, Item, ItemLink, ItemSource, ItemStatus, ItemType, NewItem, Priority,
    SearchResult,
};
use crate::engine::prompts::{build_extraction_input, extraction_system_prompt};
use crate::engine::state::EngineState;

/// How many recent items stage 1 collects.
const RECENT_ITEMS_LIMIT: usize = 20;
/// How many similar items stage 1 collects, and the similarity floor.
const SIMILAR_ITEMS_LIMIT: usize = 5;
const SIMILAR_ITEMS_MIN_SCORE: f64 = 0.5;

pub struct PipelineResult {
    pub created_items: Vec<Item>,
    pub created_links: Vec<ItemLink>,
    pub chat_response: Option<String>,
    pub elapsed: Duration,
}

// ── Model selection ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelTier {
    Fast,
    Capable,
}

const LONG_TEXT_THRESHOLD: usize = 500;
const LONG_VOICE_THRESHOLD: usize = 1000;

const MULTI_INTENT_MARKERS: &[&str] = &[
    " и ", " а также ", " плюс ", " ещё ", "\n", "во-первых", "во-вторых", "1.", "2.", "1)", "2)",
];

const COMPLEX_MARKERS: &[&str] = &[
    "с одной стороны", "с другой стороны", "если ", "потому что", "следовательно",
];

/// Cheap heuristics: long or multi-intent input goes to the capable model.
pub fn select_model(text: &str, source: ItemSource) -> ModelTier {
    let chars = text.chars().count();
    if source == ItemSource::Voice && chars > LONG_VOICE_THRESHOLD {
        return ModelTier::Capable;
    }
    if chars > LONG_TEXT_THRESHOLD {
        return ModelTier::Capable;
    }

    let lower = text.to_lowercase();
    let multi_intent = MULTI_INTENT_MARKERS.iter().filter(|m| lower.contains(*m)).count();
    if multi_intent >= 2 {
        return ModelTier::Capable;
    }
    if COMPLEX_MARKERS.iter().any(|m| lower.contains(*m)) {
        return ModelTier::Capable;
    }
    ModelTier::Fast
}

// ── Date parsing ───────────────────────────────────────────────────────────

/// Parse the model's `due_at_iso`. Naive timestamps are stamped with the
/// user's timezone; unparseable values yield None (the raw phrasing is
/// kept regardless).
pub fn parse_due_iso(value: &str, tz: Tz) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            if let Some(local) = tz.from_local_datetime(&naive).earliest() {
                return Some(local.with_timezone(&Utc));
            }
        }
    }
    None
}

pub fn user_tz(timezone: &str) -> Tz {
    timezone.parse().unwrap_or_else(|_| {
        DEFAULT_TIMEZONE.parse().expect("default timezone is valid")
    })
}

/// Wall time in the user's timezone, with the weekday spelled out.
fn local_time_line(tz: Tz) -> String {
    Utc::now().with_timezone(&tz).format("%A, %Y-%m-%d %H:%M (%Z)").to_string()
}

// ── Pipeline ───────────────────────────────────────────────────────────────

/// Run the full ingestion pipeline for one inbound message.
pub async fn ingest(
    state: &EngineState,
    user_id: i64,
    text: &str,
    source: ItemSource,
    attachment: Option<&Attachment>,
) -> EngineResult<PipelineResult> {
    let started = Instant::now();
    let user = state.store.get_or_create_user(user_id)?;
    let tz = user_tz(&user.timezone);

    // ── Stage 1: context gather ────────────────────────────────────────────
    let projects = state.store.list_projects(user_id)?;
    let recent = state.store.get_recent_items(user_id, RECENT_ITEMS_LIMIT)?;
    let similar = gather_similar(state, user_id, text).await;
    let local_time = local_time_line(tz);

    // ── Stages 2–5 under the request deadline ──────────────────────────────
    let deadline = Duration::from_secs(PIPELINE_DEADLINE_SECS);
    let staged = tokio::time::timeout(
        deadline,
        run_staged(state, user_id, text, source, attachment, tz, &local_time, &projects, &recent, &similar),
    )
    .await;

    match staged {
        Ok(result) => {
            let mut result = result?;
            result.elapsed = started.elapsed();
            Ok(result)
        }
        Err(_) => Err(EngineError::Timeout(format!(
            "ingestion exceeded {PIPELINE_DEADLINE_SECS}s"
        ))),
    }
}

async fn gather_similar(state: &EngineState, user_id: i64, text: &str) -> Vec<SearchResult> {
    let Some(embedder) = state.embedder.as_deref() else {
        return Vec::new();
    };
    // An empty vector corpus cannot yield candidates; skip the query embed.
    if !state.store.user_has_embeddings(user_id).unwrap_or(false) {
        return Vec::new();
    }
    let query_vec = match embedder.embed(&[text.to_string()]).await {
        Ok(mut v) if !v.is_empty() && !v[0].is_empty() => v.remove(0),
        _ => return Vec::new(),
    };
    let candidates = match state.store.vector_candidates(user_id, &query_vec, None, None, SIMILAR_ITEMS_LIMIT) {
        Ok(c) => c,
        Err(e) => {
            warn!("[pipeline] similar-item lookup failed: {e}");
            return Vec::new();
        }
    };
    let kept: Vec<(i64, f64)> = candidates
        .into_iter()
        .filter(|(_, score)| *score > SIMILAR_ITEMS_MIN_SCORE)
        .collect();
    let ids: Vec<i64> = kept.iter().map(|(id, _)| *id).collect();
    let items = state.store.items_by_ids(&ids, user_id).unwrap_or_default();
    kept.iter()
        .filter_map(|(id, score)| {
            items.iter().find(|i| i.id == *id).map(|i| SearchResult {
                id: i.id,
                title: i.title.clone().unwrap_or_default(),
                content: i.content.clone(),
                item_type: i.item_type,
                score: *score,
                fts_score: 0.0,
                vector_score: *score,
            })
        })
        .collect()
}

#[allow(clippy::too_many_arguments)]
async fn run_staged(
    state: &EngineState,
    user_id: i64,
    text: &str,
    source: ItemSource,
    attachment: Option<&Attachment>,
    tz: Tz,
    local_time: &str,
    projects: &[crate::atoms::types::Project],
    recent: &[Item],
    similar: &[SearchResult],
) -> EngineResult<PipelineResult> {
    // ── Stage 2: LLM extraction ────────────────────────────────────────────
    let tier = select_model(text, source);
    let model = match tier {
        ModelTier::Fast => state.config.fast_model.as_str(),
        ModelTier::Capable => state.config.smart_model.as_str(),
    };
    info!("[pipeline] user={user_id} source={} model={model}", source.as_str());

    let system = extraction_system_prompt(local_time);
    let input = build_extraction_input(text, projects, recent, similar);
    let raw = state
        .chat
        .complete_text(model, &system, &input, 0.3, 1500, true)
        .await?;

    let extraction: Extraction = serde_json::from_str(raw.trim())
        .map_err(|e| EngineError::Agent(format!("extraction JSON invalid: {e}")))?;

    // Pure conversational turn: nothing to persist.
    if extraction.items.is_empty() {
        if let Some(reply) = extraction.chat_response.clone() {
            return Ok(PipelineResult {
                created_items: Vec::new(),
                created_links: Vec::new(),
                chat_response: Some(reply),
                elapsed: Duration::ZERO,
            });
        }
    }

    // ── Stage 3: persistence ───────────────────────────────────────────────
    let mut created: Vec<Item> = Vec::new();
    for (index, extracted) in extraction.items.iter().enumerate() {
        let item_type = extracted
            .item_type
            .as_deref()
            .and_then(ItemType::parse)
            .unwrap_or(ItemType::Note);
        let title = extracted
            .title
            .clone()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| text.chars().take(TITLE_FALLBACK_CHARS).collect());
        let content = extracted
            .content
            .clone()
            .filter(|c| !c.trim().is_empty())
            .or_else(|| Some(text.to_string()));
        let due_at = extracted
            .due_at_iso
            .as_deref()
            .and_then(|iso| parse_due_iso(iso, tz));
        let priority = extracted.priority.as_deref().and_then(Priority::parse);
        // Only accept project references that belong to this user.
        let project_id = match extracted.project_id {
            Some(pid) => state.store.get_project(pid, user_id)?.map(|p| p.id),
            None => None,
        };

        let new_item = NewItem {
            item_type,
            status: ItemStatus::Inbox,
            source: Some(source),
            title: Some(title),
            content,
            original_input: Some(text.to_string()),
            due_at,
            due_at_raw: extracted.due_at_raw.clone(),
            remind_at: due_at,
            priority,
            project_id,
            tags: extracted.tags.clone(),
            entities: serde_json::Value::Null,
            recurrence: None,
            attachment: attachment.cloned(),
        };
        match state.store.create_item(user_id, &new_item) {
            Ok(item) => created.push(item),
            Err(e) => warn!("[pipeline] item {index} persist failed, skipping: {e}"),
        }
    }

    // ── Stage 4: embedding (non-fatal) ─────────────────────────────────────
    if let Some(embedder) = state.embedder.as_deref() {
        if !created.is_empty() {
            let texts: Vec<String> = created
                .iter()
                .map(|i| {
                    format!(
                        "{} {}",
                        i.title.as_deref().unwrap_or(""),
                        i.content.as_deref().unwrap_or("")
                    )
                })
                .collect();
            match embedder.embed(&texts).await {
                Ok(vectors) => {
                    for (item, vector) in created.iter_mut().zip(vectors) {
                        if vector.is_empty() {
                            continue;
                        }
                        match state.store.set_embedding(item.id, user_id, &vector) {
                            Ok(()) => item.has_embedding = true,
                            Err(e) => warn!("[pipeline] embedding write failed for {}: {e}", item.id),
                        }
                    }
                }
                Err(e) => warn!("[pipeline] batch embed failed (items stay FTS-only): {e}"),
            }
        }
    }

    // ── Stage 5: linking ───────────────────────────────────────────────────
    let mut links: Vec<ItemLink> = Vec::new();
    for suggestion in &extraction.suggested_links {
        let index = suggestion.new_item_index;
        if index < 0 || index as usize >= created.len() {
            warn!("[pipeline] link suggestion with bad index {index}, skipping");
            continue;
        }
        let Ok(Some(_)) = state.store.get_item(suggestion.existing_item_id, user_id) else {
            warn!(
                "[pipeline] link target {} not visible for user, skipping",
                suggestion.existing_item_id
            );
            continue;
        };
        let reason: String = suggestion.reason.chars().take(LINK_REASON_MAX_CHARS).collect();
        let reason = if reason.is_empty() { None } else { Some(reason) };
        match state.store.create_link(
            user_id,
            created[index as usize].id,
            suggestion.existing_item_id,
            "related",
            reason.as_deref(),
            None,
        ) {
            Ok(link) => links.push(link),
            Err(e) => warn!("[pipeline] link create failed, skipping: {e}"),
        }
    }

    info!(
        "[pipeline] user={user_id}: {} items, {} links",
        created.len(),
        links.len()
    );
    Ok(PipelineResult {
        created_items: created,
        created_links: links,
        chat_response: extraction.chat_response,
        elapsed: Duration::ZERO,
    })
}

/// Last-resort persist: the verbatim input as an inbox note. Used by the
/// router when the pipeline or its providers fail after the message was
/// accepted.
pub fn fallback_persist(
    state: &EngineState,
    user_id: i64,
    text: &str,
    source: ItemSource,
    attachment: Option<&Attachment>,
) -> EngineResult<Item> {
    state.store.get_or_create_user(user_id)?;
    let new_item = NewItem {
        item_type: ItemType::Note,
        status: ItemStatus::Inbox,
        source: Some(source),
        title: Some(text.chars().take(TITLE_FALLBACK_CHARS).collect()),
        content: Some(text.to_string()),
        original_input: Some(text.to_string()),
        attachment: attachment.cloned(),
        ..NewItem::default()
    };
    state.store.create_item(user_id, &new_item)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_selection_heuristics() {
        assert_eq!(select_model("купить молоко", ItemSource::Text), ModelTier::Fast);

        let long = "слово ".repeat(120);
        assert_eq!(select_model(&long, ItemSource::Text), ModelTier::Capable);

        // Two multi-intent markers: " и " + a newline.
        assert_eq!(
            select_model("купить молоко и хлеб\nпозвонить маме", ItemSource::Text),
            ModelTier::Capable
        );

        // Discourse complexity.
        assert_eq!(
            select_model("если будет время, зайти в банк", ItemSource::Text),
            ModelTier::Capable
        );

        // Long voice transcript.
        let transcript = "а".repeat(1100);
        assert_eq!(select_model(&transcript, ItemSource::Voice), ModelTier::Capable);
        assert_eq!(select_model("короткое", ItemSource::Voice), ModelTier::Fast);
    }

    #[test]
    fn due_iso_parsing_handles_offsets_and_naive() {
        let tz: Tz = "Asia/Almaty".parse().unwrap();

        // Explicit offset is converted to UTC.
        let with_offset = parse_due_iso("2025-11-15T18:00:00+05:00", tz).unwrap();
        assert_eq!(with_offset.to_rfc3339(), "2025-11-15T13:00:00+00:00");

        // Naive timestamp is stamped with the user's zone (UTC+5).
        let naive = parse_due_iso("2025-11-15T18:00", tz).unwrap();
        assert_eq!(naive, with_offset);

        assert!(parse_due_iso("завтра", tz).is_none());
    }

    #[test]
    fn unknown_timezone_falls_back_to_default() {
        assert_eq!(user_tz("Nowhere/Invalid"), user_tz(DEFAULT_TIMEZONE));
        assert_eq!(user_tz("Europe/Berlin").name(), "Europe/Berlin");
    }
}
