//! Direct speech endpoints that bypass generation.
//!
//! - `POST /read/`: speak the given text verbatim as one sentence and return once it has
//!   played (or the viewer failed to confirm it in time)
//! - `POST /get_emotion/?sentence=...`: classify a sentence without speaking it

use crate::error::{AppError, AppResult};
use crate::pipeline::types::EmotionTag;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

#[derive(Debug, Deserialize)]
pub struct ReadInput {
    pub text: String,
    /// One of the emotion labels. Missing means neutral; an unknown label means "classify it"
    #[serde(default)]
    pub emotion: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EmotionQuery {
    pub sentence: String,
}

pub async fn read(state: web::Data<AppState>, body: web::Json<ReadInput>) -> AppResult<HttpResponse> {
    let body = body.into_inner();
    let text = body.text.trim();
    if text.is_empty() {
        return Err(AppError::ValidationError("text must not be empty".to_string()));
    }

    let emotion = match body.emotion.as_deref() {
        None => Some(EmotionTag::Neutral),
        Some(label) => {
            let tag = EmotionTag::from_label(label);
            if tag.is_none() {
                debug!("Unrecognized emotion {:?}, classifying instead", label);
            }
            tag
        }
    };

    let report = state.pipeline.speak(text, emotion).await?;

    Ok(HttpResponse::Ok().json(json!({
        "message": "text_audio delivered to all viewers",
        "turn": report,
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}

pub async fn get_emotion(state: web::Data<AppState>, query: web::Query<EmotionQuery>) -> AppResult<HttpResponse> {
    let sentence = query.into_inner().sentence;
    if sentence.trim().is_empty() {
        return Err(AppError::ValidationError("sentence must not be empty".to_string()));
    }

    let emotion = state.pipeline.classify(&sentence).await;

    Ok(HttpResponse::Ok().json(json!({
        "sentence": sentence,
        "emotion": emotion
    })))
}
