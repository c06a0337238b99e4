// ── Hybrid Search ──────────────────────────────────────────────────────────
// Fuses weighted BM25 full-text rank with cosine similarity over stored
// embeddings, with two fallbacks:
//   • embedding service down → FTS-only results (vector_score = 0)
//   • empty fusion + short query (≤ 3 tokens) → substring fallback, 0.5
//
// Failure semantics: search is advisory. Database errors are logged and
// swallowed into an empty result set; callers cannot tell "no matches"
// from "search broken" except by logs.

use log::{info, warn};
use std::collections::HashMap;

use crate::atoms::types::{Item, ItemStatus, ItemType, SearchResult};
use crate::engine::embedding::Embedder;
use crate::engine::store::Store;

/// Default channel weights for score fusion.
pub const DEFAULT_FTS_WEIGHT: f64 = 0.5;
pub const DEFAULT_VECTOR_WEIGHT: f64 = 0.5;

/// Minimum per-channel signal to keep a fused row.
const FTS_FLOOR: f64 = 0.05;
const VECTOR_FLOOR: f64 = 0.3;

/// BM25 raw scores cluster around 0.3–3; scale into [0, 1].
fn normalize_fts(raw: f64) -> f64 {
    (raw * 0.1).min(1.0)
}

/// Score fusion: weighted mean, but a strong signal from either channel
/// alone must not be drowned by the other sitting at zero.
fn fuse(fts: f64, vec: f64, w_fts: f64, w_vec: f64) -> f64 {
    (fts * w_fts + vec * w_vec).max(0.8 * fts).max(0.8 * vec)
}

fn to_result(item: &Item, score: f64, fts: f64, vec: f64) -> SearchResult {
    SearchResult {
        id: item.id,
        title: item.title.clone().unwrap_or_default(),
        content: item.content.clone(),
        item_type: item.item_type,
        score,
        fts_score: fts,
        vector_score: vec,
    }
}

/// Hybrid FTS + vector search over one user's items.
#[allow(clippy::too_many_arguments)]
pub async fn hybrid_search(
    store: &Store,
    embedder: Option<&dyn Embedder>,
    user_id: i64,
    query: &str,
    limit: usize,
    type_filter: Option<ItemType>,
    status_filter: Option<ItemStatus>,
    weights: Option<(f64, f64)>,
) -> Vec<SearchResult> {
    if query.trim().is_empty() {
        return Vec::new();
    }
    let (w_fts, w_vec) = weights.unwrap_or((DEFAULT_FTS_WEIGHT, DEFAULT_VECTOR_WEIGHT));

    // ── Step 1: query embedding; failure degrades to FTS-only ─────────────
    let query_vec = match embedder {
        Some(client) => match client.embed(&[query.to_string()]).await {
            Ok(mut vecs) if !vecs.is_empty() && !vecs[0].is_empty() => Some(vecs.remove(0)),
            Ok(_) => {
                warn!("[search] Empty query embedding — falling back to FTS only");
                None
            }
            Err(e) => {
                warn!("[search] Query embedding failed: {e} — falling back to FTS only");
                None
            }
        },
        None => None,
    };
    let Some(query_vec) = query_vec else {
        return fts_search(store, user_id, query, limit, type_filter, status_filter);
    };

    // ── Step 2: the two subqueries ─────────────────────────────────────────
    let fetch = limit.max(1) * 3;
    let fts_rows = match store.fts_candidates(user_id, query, type_filter, status_filter, fetch) {
        Ok(rows) => rows,
        Err(e) => {
            warn!("[search] FTS subquery failed: {e}");
            Vec::new()
        }
    };
    let vec_rows =
        match store.vector_candidates(user_id, &query_vec, type_filter, status_filter, fetch) {
            Ok(rows) => rows,
            Err(e) => {
                warn!("[search] Vector subquery failed: {e}");
                Vec::new()
            }
        };

    // ── Step 3: full outer join on item id, missing scores are 0 ──────────
    let mut merged: HashMap<i64, (f64, f64)> = HashMap::new();
    for (id, raw) in &fts_rows {
        merged.entry(*id).or_insert((0.0, 0.0)).0 = normalize_fts(*raw);
    }
    for (id, sim) in &vec_rows {
        merged.entry(*id).or_insert((0.0, 0.0)).1 = *sim;
    }

    // ── Step 4: fuse, filter, rank ─────────────────────────────────────────
    let mut scored: Vec<(i64, f64, f64, f64)> = merged
        .into_iter()
        .filter(|(_, (fts, vec))| *fts > FTS_FLOOR || *vec > VECTOR_FLOOR)
        .map(|(id, (fts, vec))| (id, fuse(fts, vec, w_fts, w_vec), fts, vec))
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(limit);

    // ── Step 5: short-query substring fallback ─────────────────────────────
    if scored.is_empty() {
        if query.split_whitespace().count() <= 3 {
            return like_search(store, user_id, query, limit, type_filter, status_filter);
        }
        return Vec::new();
    }

    // ── Step 6: hydrate in score order ─────────────────────────────────────
    let ids: Vec<i64> = scored.iter().map(|(id, ..)| *id).collect();
    let items = match store.items_by_ids(&ids, user_id) {
        Ok(items) => items,
        Err(e) => {
            warn!("[search] Hydration failed: {e}");
            return Vec::new();
        }
    };
    let by_id: HashMap<i64, Item> = items.into_iter().map(|i| (i.id, i)).collect();

    let results: Vec<SearchResult> = scored
        .iter()
        .filter_map(|(id, score, fts, vec)| by_id.get(id).map(|i| to_result(i, *score, *fts, *vec)))
        .collect();
    info!(
        "[search] Hybrid: {} results for '{}' (fts={}, vector={})",
        results.len(),
        query.chars().take(60).collect::<String>(),
        fts_rows.len(),
        vec_rows.len()
    );
    results
}

/// FTS-only search. Also the terminal fallback when embeddings are down.
pub fn fts_search(
    store: &Store,
    user_id: i64,
    query: &str,
    limit: usize,
    type_filter: Option<ItemType>,
    status_filter: Option<ItemStatus>,
) -> Vec<SearchResult> {
    if query.trim().is_empty() {
        return Vec::new();
    }
    let rows = match store.fts_candidates(user_id, query, type_filter, status_filter, limit) {
        Ok(rows) => rows,
        Err(e) => {
            warn!("[search] FTS search failed: {e}");
            return Vec::new();
        }
    };
    let ids: Vec<i64> = rows.iter().map(|(id, _)| *id).collect();
    let items = match store.items_by_ids(&ids, user_id) {
        Ok(items) => items,
        Err(e) => {
            warn!("[search] FTS hydration failed: {e}");
            return Vec::new();
        }
    };
    let by_id: HashMap<i64, Item> = items.into_iter().map(|i| (i.id, i)).collect();
    rows.iter()
        .filter_map(|(id, raw)| {
            let score = normalize_fts(*raw);
            by_id.get(id).map(|i| to_result(i, score, score, 0.0))
        })
        .collect()
}

/// Substring fallback for short queries. Flat 0.5 score, title matches
/// ranked before content matches, then newest first.
fn like_search(
    store: &Store,
    user_id: i64,
    query: &str,
    limit: usize,
    type_filter: Option<ItemType>,
    status_filter: Option<ItemStatus>,
) -> Vec<SearchResult> {
    match store.like_search(user_id, query, type_filter, status_filter, limit) {
        Ok(items) => items.iter().map(|i| to_result(i, 0.5, 0.0, 0.0)).collect(),
        Err(e) => {
            warn!("[search] LIKE fallback failed: {e}");
            Vec::new()
        }
    }
}

/// Items of the same user whose embedding similarity to the reference item
/// is at least `min_sim`. Never returns the reference item itself.
pub fn find_similar(
    store: &Store,
    item_id: i64,
    user_id: i64,
    limit: usize,
    min_sim: f64,
) -> Vec<SearchResult> {
    let reference = match store.get_embedding(item_id, user_id) {
        Ok(Some(vec)) => vec,
        Ok(None) => return Vec::new(),
        Err(e) => {
            warn!("[search] find_similar: reference load failed: {e}");
            return Vec::new();
        }
    };
    let candidates = match store.vector_candidates(user_id, &reference, None, None, limit + 1) {
        Ok(rows) => rows,
        Err(e) => {
            warn!("[search] find_similar failed: {e}");
            return Vec::new();
        }
    };
    let kept: Vec<(i64, f64)> = candidates
        .into_iter()
        .filter(|(id, sim)| *id != item_id && *sim >= min_sim)
        .take(limit)
        .collect();
    let ids: Vec<i64> = kept.iter().map(|(id, _)| *id).collect();
    let items = match store.items_by_ids(&ids, user_id) {
        Ok(items) => items,
        Err(e) => {
            warn!("[search] find_similar hydration failed: {e}");
            return Vec::new();
        }
    };
    let by_id: HashMap<i64, Item> = items.into_iter().map(|i| (i.id, i)).collect();
    kept.iter()
        .filter_map(|(id, sim)| by_id.get(id).map(|i| to_result(i, *sim, 0.0, *sim)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::constants::EMBEDDING_DIM;
    use crate::atoms::error::{EngineError, EngineResult};
    use crate::atoms::types::NewItem;
    use async_trait::async_trait;

    struct FixedEmbedder(Vec<f32>);

    #[async_trait]
    impl Embedder for FixedEmbedder {
        async fn embed(&self, texts: &[String]) -> EngineResult<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| self.0.clone()).collect())
        }
    }

    struct BrokenEmbedder;

    #[async_trait]
    impl Embedder for BrokenEmbedder {
        async fn embed(&self, _texts: &[String]) -> EngineResult<Vec<Vec<f32>>> {
            Err(EngineError::provider("embed", "service down"))
        }
    }

    fn basis(index: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; EMBEDDING_DIM];
        v[index] = 1.0;
        v
    }

    fn seed(store: &Store, title: &str, content: &str) -> i64 {
        store
            .create_item(
                1,
                &NewItem {
                    title: Some(title.to_string()),
                    content: Some(content.to_string()),
                    original_input: Some(format!("{title} {content}")),
                    ..NewItem::default()
                },
            )
            .unwrap()
            .id
    }

    fn store() -> Store {
        let s = Store::open_in_memory().unwrap();
        s.get_or_create_user(1).unwrap();
        s
    }

    #[test]
    fn title_match_ranks_above_content_match() {
        let s = store();
        let titled = seed(&s, "milk delivery", "weekly groceries order");
        let content_only = seed(&s, "groceries order", "buy milk on the way home");
        // Distinct filler docs keep term statistics meaningful.
        seed(&s, "standup notes", "discussed roadmap");
        seed(&s, "reading list", "distributed systems papers");
        seed(&s, "dentist appointment", "friday morning");
        seed(&s, "tax documents", "collect receipts");

        let results = fts_search(&s, 1, "milk", 10, None, None);
        let pos = |id| results.iter().position(|r| r.id == id).unwrap();
        assert!(pos(titled) < pos(content_only), "title match must rank first");
    }

    #[tokio::test]
    async fn embedder_down_degrades_to_pure_fts() {
        let s = store();
        seed(&s, "молоко купить", "завтра");
        seed(&s, "позвонить маме", "вечером");

        let fts_only = fts_search(&s, 1, "молоко", 10, None, None);
        let hybrid = hybrid_search(&s, Some(&BrokenEmbedder), 1, "молоко", 10, None, None, None).await;

        assert_eq!(
            hybrid.iter().map(|r| r.id).collect::<Vec<_>>(),
            fts_only.iter().map(|r| r.id).collect::<Vec<_>>()
        );
        assert!(hybrid.iter().all(|r| r.vector_score == 0.0));
    }

    #[tokio::test]
    async fn empty_query_returns_empty_list() {
        let s = store();
        seed(&s, "something", "else");
        let results = hybrid_search(&s, Some(&BrokenEmbedder), 1, "   ", 10, None, None, None).await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn vector_channel_surfaces_semantic_matches() {
        let s = store();
        let semantic = seed(&s, "встреча с командой", "обсудить план");
        seed(&s, "список покупок", "хлеб и сыр");
        s.set_embedding(semantic, 1, &basis(0)).unwrap();

        // Query shares no tokens with the item but embeds onto the same axis.
        let results =
            hybrid_search(&s, Some(&FixedEmbedder(basis(0))), 1, "синк по проекту", 10, None, None, None)
                .await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, semantic);
        assert!(results[0].vector_score > 0.9);
        assert_eq!(results[0].fts_score, 0.0);
    }

    #[tokio::test]
    async fn short_query_falls_back_to_substring() {
        let s = store();
        // Cyrillic morphology defeats token match: stored "молока", query "молок".
        let id = seed(&s, "заказ молока", "");
        let results =
            hybrid_search(&s, Some(&FixedEmbedder(basis(5))), 1, "молока", 10, None, None, None).await;
        // Either channel may miss; the fallback must still surface the item.
        assert!(results.iter().any(|r| r.id == id));
    }

    #[test]
    fn find_similar_excludes_self_and_other_users() {
        let s = store();
        s.get_or_create_user(2).unwrap();
        let a = seed(&s, "a", "");
        let b = seed(&s, "b", "");
        let foreign = s
            .create_item(2, &NewItem { title: Some("c".into()), ..NewItem::default() })
            .unwrap()
            .id;
        s.set_embedding(a, 1, &basis(0)).unwrap();
        s.set_embedding(b, 1, &basis(0)).unwrap();
        s.set_embedding(foreign, 2, &basis(0)).unwrap();

        let similar = find_similar(&s, a, 1, 5, 0.5);
        assert_eq!(similar.len(), 1);
        assert_eq!(similar[0].id, b);
    }

    #[test]
    fn find_similar_respects_threshold() {
        let s = store();
        let a = seed(&s, "a", "");
        let b = seed(&s, "b", "");
        s.set_embedding(a, 1, &basis(0)).unwrap();
        s.set_embedding(b, 1, &basis(1)).unwrap(); // orthogonal

        assert!(find_similar(&s, a, 1, 5, 0.5).is_empty());
    }
}
