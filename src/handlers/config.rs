//! Runtime configuration endpoints (`GET` / `PUT /api/v1/config`).
//!
//! The API key is never echoed back. Pipeline settings are applied by the running workers
//! only after a restart, which the update response says explicitly.

use crate::config::AppConfig;
use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

fn redacted(config: &AppConfig) -> serde_json::Value {
    json!({
        "server": {
            "host": config.server.host,
            "port": config.server.port
        },
        "services": {
            "llm_base_url": config.services.llm_base_url,
            "llm_api_key_set": !config.services.llm_api_key.is_empty(),
            "llm_model": config.services.llm_model,
            "emotion_model": config.services.emotion_model,
            "tts_url": config.services.tts_url,
            "tts_character": config.services.tts_character,
            "request_timeout_secs": config.services.request_timeout_secs
        },
        "pipeline": {
            "playback_timeout_secs": config.pipeline.playback_timeout_secs,
            "history_max_turns": config.pipeline.history_max_turns,
            "max_send_failures": config.pipeline.max_send_failures,
            "send_timeout_ms": config.pipeline.send_timeout_ms,
            "system_prompt": config.pipeline.system_prompt,
            "admin_prompt_prefix": config.pipeline.admin_prompt_prefix,
            "chat_prompt_prefix": config.pipeline.chat_prompt_prefix
        }
    })
}

pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = state.get_config();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": redacted(&config)
    })))
}

pub async fn update_config(
    state: web::Data<AppState>,
    body: web::Json<serde_json::Value>,
) -> Result<HttpResponse, AppError> {
    let json_str = serde_json::to_string(&body.into_inner())?;

    let mut updated = state.get_config();
    updated
        .update_from_json(&json_str)
        .map_err(|e| AppError::ValidationError(e.to_string()))?;

    state.update_config(updated.clone()).map_err(AppError::ValidationError)?;

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "message": "Configuration updated; server and pipeline settings apply after restart",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "updated_config": redacted(&updated)
    })))
}
