//! # Connection Registry
//!
//! Set of live viewer connections, keyed by identity. Connects, disconnects and broadcasts
//! all go through one async mutex, so a viewer joining or leaving while a sentence is being
//! fanned out never sees (or causes) a half-updated set.
//!
//! ## Failure policy:
//! A failed or timed-out send is logged and the broadcast moves on to the next viewer.
//! After `max_send_failures` consecutive failures the viewer is dropped from the set;
//! a successful send resets its counter. `0` keeps failing viewers forever.

use crate::pipeline::stats::PipelineStats;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub type ConnectionId = Uuid;

/// Outbound half of a viewer connection.
#[async_trait]
pub trait ViewerSink: Send + Sync {
    async fn send_text(&self, payload: Arc<str>) -> Result<(), String>;
}

struct Viewer {
    sink: Arc<dyn ViewerSink>,
    consecutive_failures: u32,
}

pub struct ConnectionRegistry {
    viewers: Mutex<HashMap<ConnectionId, Viewer>>,
    max_send_failures: u32,
    send_timeout: Duration,
    stats: Arc<PipelineStats>,
}

impl ConnectionRegistry {
    pub fn new(max_send_failures: u32, send_timeout: Duration, stats: Arc<PipelineStats>) -> Self {
        Self {
            viewers: Mutex::new(HashMap::new()),
            max_send_failures,
            send_timeout,
            stats,
        }
    }

    pub async fn register(&self, id: ConnectionId, sink: Arc<dyn ViewerSink>) {
        let mut viewers = self.viewers.lock().await;
        viewers.insert(id, Viewer { sink, consecutive_failures: 0 });
        info!(viewer = %id, total = viewers.len(), "Viewer connected");
    }

    /// Returns `false` if the viewer was already gone (e.g. evicted after failed sends).
    pub async fn unregister(&self, id: ConnectionId) -> bool {
        let mut viewers = self.viewers.lock().await;
        let removed = viewers.remove(&id).is_some();
        if removed {
            info!(viewer = %id, total = viewers.len(), "Viewer disconnected");
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.viewers.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Send `payload` to every registered viewer. Returns how many sends succeeded.
    pub async fn broadcast_text(&self, payload: Arc<str>) -> usize {
        let mut viewers = self.viewers.lock().await;

        let sends = viewers.iter().map(|(id, viewer)| {
            let id = *id;
            let sink = viewer.sink.clone();
            let payload = payload.clone();
            let send_timeout = self.send_timeout;
            async move {
                let result = match tokio::time::timeout(send_timeout, sink.send_text(payload)).await {
                    Ok(result) => result,
                    Err(_) => Err(format!("send timed out after {:?}", send_timeout)),
                };
                (id, result)
            }
        });
        let results = futures_util::future::join_all(sends).await;

        let mut delivered = 0;
        let mut evicted = Vec::new();
        for (id, result) in results {
            let Some(viewer) = viewers.get_mut(&id) else { continue };
            match result {
                Ok(()) => {
                    viewer.consecutive_failures = 0;
                    delivered += 1;
                }
                Err(e) => {
                    viewer.consecutive_failures += 1;
                    warn!(
                        viewer = %id,
                        failures = viewer.consecutive_failures,
                        "Send to viewer failed: {}", e
                    );
                    if self.max_send_failures > 0 && viewer.consecutive_failures >= self.max_send_failures {
                        evicted.push(id);
                    }
                }
            }
        }

        for id in evicted {
            viewers.remove(&id);
            self.stats.record_viewer_evicted();
            warn!(viewer = %id, "Dropping viewer after repeated send failures");
        }

        debug!(delivered, total = viewers.len(), "Broadcast finished");
        delivered
    }
}
