//! # Viewer WebSocket
//!
//! Each viewer (the page rendering the presenter) connects to `/ws` and is served by one
//! [`ViewerSocket`] actor.
//!
//! ## WebSocket Protocol:
//! 1. **Connection**: the actor registers itself with the connection registry
//! 2. **Delivery**: the server pushes one `text_audio` JSON frame per sentence
//! 3. **Acknowledgment**: the viewer answers `{"type": "playback_complete"}` when the audio
//!    finished playing, which opens the playback gate for the next sentence
//! 4. **Anything else** the viewer sends is ignored
//!
//! ## Heartbeat:
//! A protocol-level ping goes out every 30 seconds. A viewer that sends nothing (not even a
//! pong) for 60 seconds is disconnected, which also removes it from the registry.
//!
//! ## Rust Concepts:
//! - **Actor**: the socket's state is owned by one actor and only touched from its mailbox
//! - **Addr<A>**: a cloneable, thread-safe handle to an actor; the registry holds one per
//!   viewer and sends frames through it
//! - **Message/Handler**: `DeliverText` is the one message other tasks send to the actor

use crate::pipeline::gate::PlaybackGate;
use crate::pipeline::registry::{ConnectionId, ConnectionRegistry, ViewerSink};
use crate::pipeline::types::ClientMessage;
use crate::state::AppState;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// A JSON frame to write to the viewer.
#[derive(Message)]
#[rtype(result = "()")]
pub struct DeliverText(pub Arc<str>);

pub struct ViewerSocket {
    id: ConnectionId,
    registry: Arc<ConnectionRegistry>,
    gate: Arc<PlaybackGate>,
    last_heartbeat: Instant,
}

impl ViewerSocket {
    pub fn new(registry: Arc<ConnectionRegistry>, gate: Arc<PlaybackGate>) -> Self {
        Self {
            id: Uuid::new_v4(),
            registry,
            gate,
            last_heartbeat: Instant::now(),
        }
    }

    /// React to one inbound text frame.
    fn handle_client_text(&self, text: &str) {
        match serde_json::from_str::<ClientMessage>(text) {
            Ok(ClientMessage::PlaybackComplete) => {
                debug!(viewer = %self.id, "Playback complete");
                self.gate.signal();
            }
            Ok(ClientMessage::Unknown) => {
                debug!(viewer = %self.id, "Ignoring message: {}", text);
            }
            Err(e) => {
                debug!(viewer = %self.id, "Ignoring unparseable message ({}): {}", e, text);
            }
        }
    }
}

impl Actor for ViewerSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        let registry = self.registry.clone();
        let id = self.id;
        let sink: Arc<dyn ViewerSink> = Arc::new(ctx.address());
        actix::spawn(async move {
            registry.register(id, sink).await;
        });

        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!(viewer = %act.id, "Viewer heartbeat timed out, closing connection");
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        let registry = self.registry.clone();
        let id = self.id;
        actix::spawn(async move {
            registry.unregister(id).await;
        });
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for ViewerSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                self.last_heartbeat = Instant::now();
                self.handle_client_text(&text);
            }
            Ok(ws::Message::Binary(_)) => {
                self.last_heartbeat = Instant::now();
                debug!(viewer = %self.id, "Ignoring binary frame");
            }
            Ok(ws::Message::Ping(data)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!(viewer = %self.id, "Viewer closed the connection: {:?}", reason);
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) | Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!(viewer = %self.id, "WebSocket protocol error: {}", err);
                ctx.stop();
            }
        }
    }
}

impl Handler<DeliverText> for ViewerSocket {
    type Result = ();

    fn handle(&mut self, msg: DeliverText, ctx: &mut Self::Context) {
        ctx.text(msg.0.as_ref());
    }
}

/// The registry reaches a viewer through its actor's mailbox. A stopped actor's mailbox is
/// closed, which surfaces as a send failure.
#[async_trait]
impl ViewerSink for Addr<ViewerSocket> {
    async fn send_text(&self, payload: Arc<str>) -> Result<(), String> {
        self.send(DeliverText(payload))
            .await
            .map_err(|e| format!("viewer mailbox unavailable: {}", e))
    }
}

/// WebSocket endpoint handler.
///
/// ## HTTP to WebSocket Upgrade:
/// The initial HTTP request is upgraded here; everything after that is handled by the
/// [`ViewerSocket`] actor.
pub async fn viewer_websocket(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    info!("New viewer connection from: {:?}", req.connection_info().peer_addr());

    let pipeline = &app_state.pipeline;
    let socket = ViewerSocket::new(pipeline.registry().clone(), pipeline.gate().clone());
    ws::start(socket, &req, stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::stats::PipelineStats;

    fn socket() -> (ViewerSocket, Arc<PlaybackGate>) {
        let stats = Arc::new(PipelineStats::default());
        let registry = Arc::new(ConnectionRegistry::new(3, Duration::from_secs(1), stats));
        let gate = Arc::new(PlaybackGate::new());
        (ViewerSocket::new(registry, gate.clone()), gate)
    }

    #[test]
    fn test_playback_complete_signals_gate() {
        let (socket, gate) = socket();
        socket.handle_client_text(r#"{"type": "playback_complete"}"#);
        assert!(gate.is_signaled());
    }

    #[test]
    fn test_other_messages_are_ignored() {
        let (socket, gate) = socket();
        socket.handle_client_text(r#"{"type": "lip_sync", "level": 0.3}"#);
        socket.handle_client_text("not json at all");
        socket.handle_client_text(r#"{"no_type": true}"#);
        assert!(!gate.is_signaled());
    }

    #[test]
    fn test_viewers_get_distinct_ids() {
        let (a, _) = socket();
        let (b, _) = socket();
        assert_ne!(a.id, b.id);
    }
}
