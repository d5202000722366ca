//! Handler for one hook connection.
//!
//! The hook script opens a connection per event. Most events are
//! fire-and-forget; a correlated permission request keeps the connection
//! open until a decision, a cancellation or the peer going away.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - A malformed frame closes this connection only
//! - Engine shutdown ends the connection quietly

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use tide_core::{DomainError, HookEvent, HookEventType, SessionId, ToolUseId};
use tide_protocol::HookFrameCodec;

use super::pending::{PendingOutcome, PendingPermissions, Registration};
use super::tool_id_cache::ToolUseIdCache;
use crate::engine::EngineHandle;

/// Write timeout for the reply frame
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// State shared by every connection.
#[derive(Clone)]
pub struct IngestContext {
    pub engine: EngineHandle,
    pub pending: Arc<PendingPermissions>,
    pub tool_ids: Arc<ToolUseIdCache>,
    pub cancel: CancellationToken,
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Close,
}

pub struct HookConnection<S> {
    framed: Framed<S, HookFrameCodec>,
    ctx: IngestContext,
    connection_id: u64,
}

impl<S> HookConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, ctx: IngestContext, connection_id: u64) -> Self {
        Self {
            framed: Framed::new(stream, HookFrameCodec::new()),
            ctx,
            connection_id,
        }
    }

    /// Reads frames until the peer closes, a frame is malformed, or shutdown.
    pub async fn run(mut self) {
        debug!(conn = self.connection_id, "hook connection opened");

        loop {
            let frame = tokio::select! {
                _ = self.ctx.cancel.cancelled() => break,
                frame = self.framed.next() => frame,
            };

            match frame {
                None => break,
                Some(Err(e)) => {
                    let err = DomainError::from(e);
                    warn!(conn = self.connection_id, error = %err, "closing hook connection");
                    break;
                }
                Some(Ok(raw)) => {
                    if self.handle_event(raw.into_event()).await == Flow::Close {
                        break;
                    }
                }
            }
        }

        debug!(conn = self.connection_id, "hook connection closed");
    }

    async fn handle_event(&mut self, mut event: HookEvent) -> Flow {
        self.correlate(&mut event);

        if !event.expects_response() {
            return self.forward(event).await;
        }

        let session_id = event.session_id.clone();
        let Some(tool_use_id) = event.correlation_id().cloned() else {
            debug!(
                conn = self.connection_id,
                session_id = %session_id,
                "uncorrelated permission request, leaving it to the terminal"
            );
            self.forward(event).await;
            return Flow::Close;
        };

        let registration = self.ctx.pending.register(tool_use_id.clone(), session_id.clone());
        if self.forward(event).await == Flow::Close {
            self.ctx.pending.withdraw(&tool_use_id, registration.generation);
            return Flow::Close;
        }

        self.await_decision(session_id, tool_use_id, registration).await;
        Flow::Close
    }

    /// Fills in and maintains `tool_use_id` correlation.
    fn correlate(&self, event: &mut HookEvent) {
        let cache = &self.ctx.tool_ids;
        let session_id = event.session_id.clone();

        match event.event {
            HookEventType::PreToolUse => {
                if let (Some(id), Some(tool)) = (event.correlation_id(), event.tool_name.as_deref()) {
                    cache.remember(&session_id, tool, event.tool_input.as_ref(), id.clone());
                }
            }
            HookEventType::PermissionRequest if event.correlation_id().is_none() => {
                let found = event
                    .tool_name
                    .as_deref()
                    .and_then(|tool| cache.take(&session_id, tool, event.tool_input.as_ref()));
                if found.is_some() {
                    event.tool_use_id = found;
                }
            }
            HookEventType::PostToolUse => {
                if let Some(id) = event.correlation_id() {
                    cache.forget(&session_id, id);
                }
            }
            HookEventType::Stop | HookEventType::SessionEnd => cache.clear_session(&session_id),
            _ => {}
        }
    }

    async fn forward(&self, event: HookEvent) -> Flow {
        match self.ctx.engine.process(event).await {
            Ok(()) => Flow::Continue,
            Err(e) => {
                debug!(conn = self.connection_id, error = %e, "engine unavailable");
                Flow::Close
            }
        }
    }

    async fn await_decision(
        &mut self,
        session_id: SessionId,
        tool_use_id: ToolUseId,
        registration: Registration,
    ) {
        let Registration { generation, outcome: decision } = registration;
        debug!(conn = self.connection_id, tool_use_id = %tool_use_id, generation, "waiting for decision");

        tokio::select! {
            outcome = decision => match outcome {
                Ok(PendingOutcome::Respond(response)) => {
                    let written = timeout(WRITE_TIMEOUT, self.framed.send(response)).await;
                    if !matches!(written, Ok(Ok(()))) {
                        warn!(conn = self.connection_id, tool_use_id = %tool_use_id, "failed to write decision");
                        let _ = self.ctx.engine.permission_failed(session_id, tool_use_id).await;
                    }
                }
                Ok(PendingOutcome::Cancelled) | Err(_) => {
                    debug!(conn = self.connection_id, tool_use_id = %tool_use_id, "permission cancelled");
                }
            },

            frame = self.framed.next() => {
                if let Some(Ok(_)) = frame {
                    warn!(conn = self.connection_id, "unexpected frame while awaiting decision");
                }
                if let Some(session_id) = self.ctx.pending.withdraw(&tool_use_id, generation) {
                    warn!(
                        conn = self.connection_id,
                        session_id = %session_id,
                        tool_use_id = %tool_use_id,
                        "hook disconnected before decision"
                    );
                    let _ = self.ctx.engine.permission_failed(session_id, tool_use_id).await;
                }
            }

            _ = self.ctx.cancel.cancelled() => {
                self.ctx.pending.withdraw(&tool_use_id, generation);
            }
        }
    }
}
