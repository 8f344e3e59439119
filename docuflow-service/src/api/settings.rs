//! Settings API endpoints for runtime tuning of the pipeline.

use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::api::AppState;
use crate::error::ServiceResult;

/// Response for GET /api/settings
#[derive(Debug, Serialize)]
pub struct SettingsResponse {
    /// All current settings (merged: defaults + DB overrides)
    pub settings: HashMap<String, serde_json::Value>,
    /// Which keys have DB overrides (vs using defaults)
    pub overridden: Vec<String>,
}

/// Request body for PUT /api/settings
#[derive(Debug, Deserialize)]
pub struct UpdateSettingsRequest {
    /// Settings to update (key -> value). Use null to revert to default.
    pub settings: HashMap<String, serde_json::Value>,
}

fn settings_response(state: &AppState) -> ServiceResult<SettingsResponse> {
    Ok(SettingsResponse {
        settings: state.service.get_settings(),
        overridden: state.service.setting_overrides()?,
    })
}

/// GET /api/settings - retrieve all settings with their current values
pub async fn get_settings_handler(
    State(state): State<Arc<AppState>>,
) -> ServiceResult<Json<SettingsResponse>> {
    Ok(Json(settings_response(&state)?))
}

/// PUT /api/settings - update settings (triggers hot reload)
pub async fn update_settings_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<UpdateSettingsRequest>,
) -> ServiceResult<Json<SettingsResponse>> {
    state.service.update_settings(request.settings)?;
    Ok(Json(settings_response(&state)?))
}
