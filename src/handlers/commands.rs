//! Command submission endpoints.
//!
//! - `POST /admin_input/`: operator instruction; waits for the intake slot, never dropped
//! - `POST /chat_input/`: live-chat message routed through the chat handler; dropped when
//!   a turn is already waiting

use crate::error::{AppError, AppResult};
use crate::livechat::ChatEvent;
use crate::pipeline::types::Command;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct AdminInput {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatInput {
    #[serde(default)]
    pub user: String,
    pub text: String,
}

fn require_text(text: &str) -> AppResult<&str> {
    let text = text.trim();
    if text.is_empty() {
        return Err(AppError::ValidationError("text must not be empty".to_string()));
    }
    Ok(text)
}

pub async fn admin_input(state: web::Data<AppState>, body: web::Json<AdminInput>) -> AppResult<HttpResponse> {
    let text = require_text(&body.text)?;
    info!("Admin instruction: {}", text);

    state.pipeline.intake().submit(Command::admin(text)).await?;

    Ok(HttpResponse::Ok().json(json!({
        "status": "queued",
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}

pub async fn chat_input(state: web::Data<AppState>, body: web::Json<ChatInput>) -> AppResult<HttpResponse> {
    let body = body.into_inner();
    require_text(&body.text)?;

    let accepted = state
        .chat
        .on_message(ChatEvent { user: body.user, text: body.text })
        .await;

    Ok(HttpResponse::Ok().json(json!({ "accepted": accepted })))
}
