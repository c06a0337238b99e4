// ── User Settings API ──────────────────────────────────────────────────────
// Timezone is validated against the IANA database; notification settings
// are free-form within the declared shape and stored under
// settings.notifications.

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use super::auth::AuthUser;
use super::{ApiError, ApiResult};
use crate::atoms::constants::{DEFAULT_LANGUAGE, DEFAULT_TIMEZONE};
use crate::atoms::error::EngineError;
use crate::engine::state::EngineState;

fn settings_response(user: &crate::atoms::types::User) -> Value {
    let notifications = user
        .settings
        .get("notifications")
        .cloned()
        .unwrap_or_else(|| json!({ "enabled": true }));
    json!({
        "timezone": if user.timezone.is_empty() { DEFAULT_TIMEZONE } else { &user.timezone },
        "language": if user.language.is_empty() { DEFAULT_LANGUAGE } else { &user.language },
        "settings": { "notifications": notifications },
        "onboarding_done": user.onboarding_done,
    })
}

pub async fn get_settings(
    State(state): State<Arc<EngineState>>,
    user: AuthUser,
) -> ApiResult<Json<Value>> {
    let profile = state.store.get_or_create_user(user.id)?;
    Ok(Json(settings_response(&profile)))
}

#[derive(Debug, Deserialize)]
pub struct SettingsUpdate {
    pub timezone: Option<String>,
    pub language: Option<String>,
    pub notifications: Option<Value>,
}

pub async fn update_settings(
    State(state): State<Arc<EngineState>>,
    user: AuthUser,
    Json(body): Json<SettingsUpdate>,
) -> ApiResult<Json<Value>> {
    if let Some(tz) = body.timezone.as_deref() {
        if tz.parse::<chrono_tz::Tz>().is_err() {
            return Err(ApiError(EngineError::Validation(format!("Invalid timezone: {tz}"))));
        }
    }

    let profile = state.store.get_or_create_user(user.id)?;
    let settings = match body.notifications {
        Some(notifications) => {
            let mut merged = profile.settings.clone();
            if !merged.is_object() {
                merged = json!({});
            }
            merged["notifications"] = notifications;
            Some(merged)
        }
        None => None,
    };

    let updated = state.store.update_user(
        user.id,
        body.timezone.as_deref(),
        body.language.as_deref(),
        settings.as_ref(),
    )?;
    Ok(Json(settings_response(&updated)))
}

pub async fn complete_onboarding(
    State(state): State<Arc<EngineState>>,
    user: AuthUser,
) -> ApiResult<Json<Value>> {
    state.store.get_or_create_user(user.id)?;
    state.store.complete_onboarding(user.id)?;
    Ok(Json(json!({ "success": true, "message": "Onboarding completed" })))
}
