//! # Presenter Backend
//!
//! HTTP and WebSocket server for a virtual presenter. Operator instructions and live-chat
//! messages become prompts for a language model; the streamed reply is split into sentences,
//! each sentence is voiced and tagged with an emotion, and the results are pushed to every
//! connected viewer strictly in order, one sentence at a time, waiting for a viewer to
//! report playback before the next one goes out.
//!
//! ## Layout
//! - **config**: layered configuration (`config.toml`, then `APP_*` environment variables)
//! - **state**: shared application state and request metrics
//! - **pipeline**: intake, generation, synthesis, ordered delivery and the playback gate
//! - **services**: clients for the chat-completion, emotion and speech endpoints
//! - **websocket**: the viewer socket
//! - **livechat**: adapter from live-chat events to pipeline commands
//! - **handlers** / **health** / **middleware**: the HTTP surface

mod config;
mod error;
mod handlers;
mod health;
mod livechat;
mod middleware;
mod pipeline;
mod services;
mod state;
mod websocket;

use crate::config::AppConfig;
use crate::pipeline::{PipelineContext, PipelineServices};
use crate::services::openai::{streaming_client, OpenAiConfig};
use crate::services::{HttpSpeechSynthesizer, LlmEmotionClassifier, OpenAiChatClient};
use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use state::AppState;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting presenter-backend v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);
    info!(
        "Language model {} at {}, speech at {}",
        config.services.llm_model, config.services.llm_base_url, config.services.tts_url
    );

    let pipeline = PipelineContext::start(&config.pipeline, build_services(&config)?);
    let app_state = AppState::new(config.clone(), pipeline.clone());
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(TracingLogger::default())
            .wrap(middleware::MetricsMiddleware)
            .route("/ws", web::get().to(websocket::viewer_websocket))
            .route("/admin_input/", web::post().to(handlers::admin_input))
            .route("/chat_input/", web::post().to(handlers::chat_input))
            .route("/read/", web::post().to(handlers::read))
            .route("/get_emotion/", web::post().to(handlers::get_emotion))
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config))
                    .route("/config", web::put().to(handlers::update_config)),
            )
            .route("/health", web::get().to(health::health_check))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        signal = wait_for_shutdown() => {
            match signal {
                Ok(name) => info!("Received {}, stopping server...", name),
                Err(e) => error!("Signal handler failed ({}), stopping server...", e),
            }
            server_handle.stop(true).await;
        }
    }

    pipeline.shutdown().await;
    info!("Server stopped gracefully");
    Ok(())
}

/// Wire the external service clients from configuration.
///
/// Synthesis and classification share a client whose requests are bounded end to end. The
/// reply stream gets its own client without a total timeout, since its body is read at
/// playback pace; only connecting and the wait for response headers are bounded there.
fn build_services(config: &AppConfig) -> Result<PipelineServices> {
    let services = &config.services;
    let request_timeout = Duration::from_secs(services.request_timeout_secs);

    let client = reqwest::Client::builder()
        .connect_timeout(request_timeout)
        .timeout(request_timeout)
        .build()
        .context("Failed to build HTTP client")?;
    let stream_client = streaming_client(request_timeout).context("Failed to build streaming HTTP client")?;

    let chat_config = OpenAiConfig::new(&services.llm_base_url, &services.llm_api_key, &services.llm_model);
    let emotion_config = OpenAiConfig::new(&services.llm_base_url, &services.llm_api_key, &services.emotion_model);

    Ok(PipelineServices {
        llm: Arc::new(OpenAiChatClient::new(stream_client, chat_config).with_response_timeout(request_timeout)),
        tts: Arc::new(HttpSpeechSynthesizer::new(
            client.clone(),
            &services.tts_url,
            Some(services.tts_character.clone()),
        )),
        classifier: Arc::new(LlmEmotionClassifier::new(client, emotion_config)),
    })
}

/// `RUST_LOG` controls the filter; defaults to `presenter_backend=debug,actix_web=info`.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "presenter_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .context("Failed to initialize tracing")?;

    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => Ok("SIGTERM"),
        _ = sigint.recv() => Ok("SIGINT"),
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("Ctrl+C")
}
