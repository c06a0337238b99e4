// ── Extraction Prompts ─────────────────────────────────────────────────────
// System prompt and context builder for ingestion stage 2. The model must
// answer with a single JSON object; its shape is parsed into
// `atoms::types::Extraction`.

use serde_json::json;

use crate::atoms::types::{Item, Project, SearchResult};

pub const EXTRACTION_SYSTEM_PROMPT: &str = r#"Ты — Второй Мозг. Твоя задача — структурировать хаос.

Сейчас: {local_time}

## Твои роли:
1. **Экстрактор** — выделяй из текста атомарные сущности
2. **Линкер** — находи связи с существующими записями
3. **Собеседник** — если пользователь просто общается, поддержи диалог

## Типы контента:
- task: требует действия ("купить", "позвонить", "сделать")
- idea: концепция, мысль ("а что если", "было бы круто")
- note: информация для запоминания (факты, цитаты, конспекты)
- resource: ссылки, книги, статьи
- contact: люди, телефоны, соцсети
- event: событие с датой и временем

## Правила атомизации:
- Одна мысль = один item
- "Купить молоко и позвонить маме" = 2 задачи
- Длинное голосовое с 3 темами = 3+ отдельных items
- НЕ дроби связанные вещи (список покупок = 1 задача)

## Правила дат:
- due_at_iso — ISO 8601 с часовым поясом пользователя
- due_at_raw — оригинальная формулировка ("завтра в 15:00")
- Если дата есть, а время не указано, выбери час по типу задачи:
  встреча/созвон/звонок → 10:00; обед → 13:00;
  купить/забрать/заехать → 18:00; сдать/дедлайн/отчёт → 23:59;
  напомни/не забыть → 09:00; иначе → 12:00

## Правила проектов:
- Сверяйся со списком projects в контексте
- Если сущность явно относится к проекту — укажи его ID
- Не угадывай, если связь неочевидна (оставь null)

## Правила связей (suggested_links):
- Связывай ТОЛЬКО если действительно релевантно
- Используй similar_items из контекста как кандидатов
- Указывай reason на русском (кратко, 3-7 слов)

## Правила диалога:
- "Привет", "Как дела?" → chat_response, items = []
- "Спасибо" → chat_response: "Всегда рад помочь!"

## Формат ответа (строго JSON):
{
  "items": [
    {
      "type": "task|idea|note|resource|contact|event",
      "title": "краткое название (до 100 символов)",
      "content": "полный текст",
      "tags": ["маркетинг", "личное"],
      "project_id": 123,
      "due_at_raw": "завтра в 10",
      "due_at_iso": "2025-11-15T10:00:00+05:00",
      "priority": "high|medium|low"
    }
  ],
  "chat_response": null,
  "suggested_links": [
    { "new_item_index": 0, "existing_item_id": 123, "reason": "Обе задачи про маркетинг" }
  ]
}"#;

pub fn extraction_system_prompt(local_time: &str) -> String {
    EXTRACTION_SYSTEM_PROMPT.replace("{local_time}", local_time)
}

/// Context block + the user's message, as the stage-2 user turn.
pub fn build_extraction_input(
    user_text: &str,
    projects: &[Project],
    recent_items: &[Item],
    similar_items: &[SearchResult],
) -> String {
    let projects_json = json!(projects
        .iter()
        .map(|p| json!({ "id": p.id, "name": p.name, "emoji": p.emoji }))
        .collect::<Vec<_>>());

    let recent_json = json!(recent_items
        .iter()
        .map(|i| json!({
            "id": i.id,
            "title": i.title,
            "type": i.item_type,
            "tags": i.tags,
            "created_at": i.created_at.to_rfc3339(),
        }))
        .collect::<Vec<_>>());

    let similar_json = json!(similar_items
        .iter()
        .map(|s| json!({ "id": s.id, "title": s.title, "type": s.item_type, "score": s.score }))
        .collect::<Vec<_>>());

    format!(
        "## Контекст пользователя:\n\n### Проекты:\n{projects_json}\n\n\
         ### Последние записи:\n{recent_json}\n\n\
         ### Похожие записи (кандидаты на связь):\n{similar_json}\n\n\
         ## Сообщение пользователя:\n{user_text}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_interpolates_local_time() {
        let prompt = extraction_system_prompt("пятница, 2025-11-14 09:00");
        assert!(prompt.contains("пятница, 2025-11-14 09:00"));
        assert!(!prompt.contains("{local_time}"));
    }

    #[test]
    fn input_carries_user_text_last() {
        let input = build_extraction_input("купить молоко", &[], &[], &[]);
        assert!(input.ends_with("купить молоко"));
        assert!(input.contains("### Проекты:"));
    }
}
