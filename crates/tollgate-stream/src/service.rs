//! Connection driver.
//!
//! [`StreamService`] serves one connection per inbound request. For a
//! [`StartTurn`] or an [`ApprovalResponse`] it:
//!
//! 1. Takes the thread's translator from the [`TranslatorRepository`]
//! 2. Applies the request to the [`Coordinator`] (new turn or resume)
//! 3. Writes a `thread_sync` frame, then any orphan repairs
//! 4. Runs the [`ExecutionEngine`] and translates its trace, checking for
//!    cancellation every `token_checkpoint_interval` tokens and on every
//!    other trace event
//! 5. Flushes the turn's history, settles the thread state and writes the
//!    terminal `stream_end` frame exactly once
//!
//! A client that severs the connection raises the thread's cancellation
//! flag; no further frames are written to it.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use tollgate_core::{Principal, ThreadId};
use tollgate_runtime::{
    CancellationRegistry, Coordinator, CoordinatorError, CoordinatorGate, EngineRequest,
    ExecutionEngine, ExecutionThread, TraceKind, TurnContext,
};
use tollgate_telemetry::{RequestContext, RequestGuard};

use crate::event::{ErrorCode, SseFrame, StreamEvent};
use crate::repository::{RequestKind, TranslatorRepository};
use crate::request::{self, ApprovalResponse, STOP_STATUS, StartTurn, StopAck, StopRequest};
use crate::sink::EventSink;
use crate::translator::{NodeRoles, Translator};

/// Tunables for [`StreamService`].
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Check for cancellation every this many tokens.
    pub token_checkpoint_interval: u32,
    /// Write a keep-alive frame after this much engine idleness. `None`
    /// disables keep-alives.
    pub keepalive_interval: Option<Duration>,
    /// How graph nodes are treated.
    pub roles: NodeRoles,
    /// Evict translators idle for longer than this.
    pub translator_idle_ttl: Duration,
    /// Sweep cancellation flags older than this.
    pub flag_max_age: Duration,
    /// How often housekeeping runs.
    pub housekeeping_interval: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            token_checkpoint_interval: 16,
            keepalive_interval: Some(Duration::from_secs(15)),
            roles: NodeRoles::default(),
            translator_idle_ttl: Duration::from_secs(3600),
            flag_max_age: Duration::from_secs(600),
            housekeeping_interval: Duration::from_secs(60),
        }
    }
}

/// How a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionOutcome {
    /// The engine finished the turn.
    Completed,
    /// The turn is waiting for a human.
    Suspended,
    /// A stop request halted the turn.
    Cancelled,
    /// The client went away.
    Disconnected,
    /// The engine or the thread store failed.
    Failed,
    /// The approval response could not be applied.
    Rejected,
    /// The approval response was already applied; nothing ran.
    Replayed,
}

/// Summary of one served connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionReport {
    /// Thread.
    pub thread_id: ThreadId,
    /// How it ended.
    pub outcome: ConnectionOutcome,
    /// Frames the sink accepted.
    pub frames_sent: usize,
    /// Whether the terminal frame was written.
    pub stream_end_sent: bool,
}

/// Result of one housekeeping pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Housekeeping {
    /// Stale cancellation flags removed.
    pub flags_swept: usize,
    /// Idle translators evicted.
    pub translators_evicted: usize,
}

struct Connection<'a> {
    thread_id: ThreadId,
    sink: &'a dyn EventSink,
    frames: usize,
    end_sent: bool,
    severed: bool,
}

impl<'a> Connection<'a> {
    fn new(thread_id: ThreadId, sink: &'a dyn EventSink) -> Self {
        Self {
            thread_id,
            sink,
            frames: 0,
            end_sent: false,
            severed: false,
        }
    }

    /// Write one event. Returns `false` once the client has severed the
    /// connection.
    async fn emit(&mut self, event: StreamEvent) -> bool {
        if self.severed {
            return false;
        }
        let frame = match SseFrame::encode(event) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(thread_id = %self.thread_id, error = %e, "dropping unencodable event");
                return true;
            },
        };
        match self.sink.send(frame).await {
            Ok(()) => {
                self.frames = self.frames.saturating_add(1);
                true
            },
            Err(e) => {
                tracing::info!(thread_id = %self.thread_id, error = %e, "client severed connection");
                self.severed = true;
                false
            },
        }
    }

    /// Write the terminal frame, at most once, unless the client is gone.
    async fn close(&mut self) {
        if self.end_sent || self.severed {
            return;
        }
        let end = StreamEvent::stream_end(&self.thread_id);
        self.end_sent = self.emit(end).await;
    }

    fn report(&self, outcome: ConnectionOutcome) -> ConnectionReport {
        ConnectionReport {
            thread_id: self.thread_id.clone(),
            outcome,
            frames_sent: self.frames,
            stream_end_sent: self.end_sent,
        }
    }
}

/// Serves streaming connections on top of the coordinator and the engine.
pub struct StreamService {
    coordinator: Arc<Coordinator>,
    engine: Arc<dyn ExecutionEngine>,
    cancellations: Arc<CancellationRegistry>,
    translators: TranslatorRepository,
    settings: StreamSettings,
}

impl std::fmt::Debug for StreamService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamService")
            .field("coordinator", &self.coordinator)
            .field("translators", &self.translators.len())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl StreamService {
    /// Create a service.
    #[must_use]
    pub fn new(
        coordinator: Arc<Coordinator>,
        engine: Arc<dyn ExecutionEngine>,
        cancellations: Arc<CancellationRegistry>,
        settings: StreamSettings,
    ) -> Self {
        Self {
            coordinator,
            engine,
            cancellations,
            translators: TranslatorRepository::new(settings.roles.clone()),
            settings,
        }
    }

    /// The coordinator.
    #[must_use]
    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    /// The cancellation registry.
    #[must_use]
    pub fn cancellations(&self) -> &Arc<CancellationRegistry> {
        &self.cancellations
    }

    /// The translator repository.
    #[must_use]
    pub fn translators(&self) -> &TranslatorRepository {
        &self.translators
    }

    /// The settings.
    #[must_use]
    pub fn settings(&self) -> &StreamSettings {
        &self.settings
    }

    /// Serve a new user message.
    ///
    /// Stale cancellation flags for the thread are cleared once the turn owns
    /// the thread's translator, so a stop aimed at a turn still running is
    /// not lost to one queued behind it. An open
    /// suspension is abandoned and orphaned tool calls are closed before the
    /// engine starts.
    pub async fn start_turn(&self, request: StartTurn, sink: &dyn EventSink) -> ConnectionReport {
        let thread_id = request.thread_id.clone().unwrap_or_default();
        let principal = request::principal(thread_id.clone(), request.user_id.as_deref());
        let span = request_span("start_turn", &principal);
        self.serve_turn(principal, request.message, sink)
            .instrument(span)
            .await
    }

    async fn serve_turn(&self, principal: Principal, message: String, sink: &dyn EventSink) -> ConnectionReport {
        let thread_id = principal.thread_id.clone();
        let mut conn = Connection::new(thread_id.clone(), sink);
        let mut translator = self
            .translators
            .get_or_create(&thread_id, RequestKind::NewTurn)
            .await;
        self.cancellations.clear(&thread_id);

        let turn = match self.coordinator.start_turn(&thread_id, &message).await {
            Ok(turn) => turn,
            Err(e) => {
                tracing::warn!(error = %e, "could not start turn");
                conn.emit(StreamEvent::error(&thread_id, ErrorCode::StreamError, e.to_string(), None))
                    .await;
                conn.close().await;
                return conn.report(ConnectionOutcome::Failed);
            },
        };
        if let Some(suspension_id) = turn.abandoned {
            tracing::info!(suspension_id = %suspension_id, "new message abandoned pending approval");
        }

        let mut prelude = vec![StreamEvent::thread_sync(&turn.thread)];
        prelude.extend(translator.recover_orphans(&turn.repaired));

        let outcome = self
            .drive(
                &mut conn,
                &mut translator,
                &principal,
                prelude,
                EngineRequest::StartTurn { message },
                turn.thread.history,
            )
            .await;
        self.teardown(&thread_id, &mut translator, &mut conn).await;
        tracing::info!(outcome = ?outcome, frames = conn.frames, "turn connection finished");
        conn.report(outcome)
    }

    /// Serve an approval response.
    ///
    /// A response for a resume that was already applied gets only a
    /// `thread_sync` and `stream_end`. A response the coordinator rejects
    /// gets an `approval_error`. Answers that arrive after the suspension's
    /// deadline deny every pending call and are reported as an
    /// `approval_error` before the engine continues.
    pub async fn respond(&self, response: ApprovalResponse, sink: &dyn EventSink) -> ConnectionReport {
        let principal = response.principal();
        let span = request_span("resume", &principal);
        self.serve_resume(principal, response, sink)
            .instrument(span)
            .await
    }

    async fn serve_resume(
        &self,
        principal: Principal,
        response: ApprovalResponse,
        sink: &dyn EventSink,
    ) -> ConnectionReport {
        let thread_id = principal.thread_id.clone();
        let mut conn = Connection::new(thread_id.clone(), sink);
        let mut translator = self
            .translators
            .get_or_create(&thread_id, RequestKind::Resume)
            .await;

        let resumed = self.coordinator.resume(&principal, &response.decisions()).await;
        let snapshot = self.coordinator.thread(&thread_id).await;

        let outcome = match resumed {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(error = %e, "approval response rejected");
                if let Ok(Some(thread)) = &snapshot {
                    conn.emit(StreamEvent::thread_sync(thread)).await;
                }
                conn.emit(StreamEvent::error(&thread_id, ErrorCode::ApprovalError, e.to_string(), None))
                    .await;
                conn.close().await;
                return conn.report(ConnectionOutcome::Rejected);
            },
        };

        let thread = match snapshot {
            Ok(thread) => thread.unwrap_or_else(|| ExecutionThread::new(thread_id.clone())),
            Err(e) => {
                tracing::warn!(error = %e, "could not load resumed thread");
                conn.emit(StreamEvent::error(&thread_id, ErrorCode::StreamError, e.to_string(), None))
                    .await;
                conn.close().await;
                return conn.report(ConnectionOutcome::Failed);
            },
        };

        if outcome.replayed {
            tracing::debug!(suspension_id = %outcome.suspension_id, "resume already applied");
            conn.emit(StreamEvent::thread_sync(&thread)).await;
            conn.close().await;
            return conn.report(ConnectionOutcome::Replayed);
        }

        let mut prelude = vec![StreamEvent::thread_sync(&thread)];
        if outcome.timed_out {
            let timeout = CoordinatorError::ApprovalWaitTimeout {
                thread_id: thread_id.to_string(),
            };
            prelude.push(StreamEvent::error(
                &thread_id,
                ErrorCode::ApprovalError,
                timeout.to_string(),
                Some(json!({ "suspension_id": outcome.suspension_id })),
            ));
        }

        let result = self
            .drive(
                &mut conn,
                &mut translator,
                &principal,
                prelude,
                EngineRequest::Resume { outcome },
                thread.history,
            )
            .await;
        self.teardown(&thread_id, &mut translator, &mut conn).await;
        tracing::info!(outcome = ?result, frames = conn.frames, "resume connection finished");
        conn.report(result)
    }

    /// Request cancellation of the thread's running turn.
    #[must_use]
    pub fn stop(&self, request: &StopRequest) -> StopAck {
        let _request = RequestGuard::new(
            RequestContext::new("stream")
                .with_operation("stop")
                .with_thread_id(request.thread_id.to_string()),
        );
        let fresh = self.cancellations.request(&request.thread_id);
        tracing::info!(thread_id = %request.thread_id, fresh, "stop requested");
        StopAck {
            status: STOP_STATUS.to_string(),
            thread_id: request.thread_id.clone(),
            message: "The current turn will stop at its next checkpoint".to_string(),
        }
    }

    async fn drive(
        &self,
        conn: &mut Connection<'_>,
        translator: &mut Translator,
        principal: &Principal,
        prelude: Vec<StreamEvent>,
        request: EngineRequest,
        history: Vec<tollgate_runtime::HistoryEntry>,
    ) -> ConnectionOutcome {
        let thread_id = &principal.thread_id;
        for event in prelude {
            if !conn.emit(event).await {
                return self.client_gone(thread_id);
            }
        }

        let cancel = self.cancellations.register_turn(thread_id);
        let outcome = self
            .pump(conn, translator, principal, request, history, &cancel)
            .await;
        self.cancellations.finish_turn(thread_id);
        outcome
    }

    async fn pump(
        &self,
        conn: &mut Connection<'_>,
        translator: &mut Translator,
        principal: &Principal,
        request: EngineRequest,
        history: Vec<tollgate_runtime::HistoryEntry>,
        cancel: &CancellationToken,
    ) -> ConnectionOutcome {
        let thread_id = &principal.thread_id;
        if let Some(outcome) = self.checkpoint(conn, cancel) {
            return outcome;
        }

        let context = TurnContext {
            thread_id: thread_id.clone(),
            principal: principal.clone(),
            cancel: cancel.clone(),
            gate: Arc::new(CoordinatorGate::new(Arc::clone(&self.coordinator), principal.clone())),
            history,
        };
        let mut trace = match self.engine.run(request, context).await {
            Ok(trace) => trace,
            Err(e) => return self.engine_failed(conn, thread_id, &e.to_string()).await,
        };

        let checkpoint_every = self.settings.token_checkpoint_interval.max(1);
        let mut since_checkpoint: u32 = 0;
        loop {
            let next = match self.settings.keepalive_interval {
                Some(idle) => match tokio::time::timeout(idle, trace.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        if !conn.emit(StreamEvent::keep_alive(thread_id)).await {
                            return self.client_gone(thread_id);
                        }
                        if let Some(outcome) = self.checkpoint(conn, cancel) {
                            return outcome;
                        }
                        continue;
                    },
                },
                None => trace.next().await,
            };

            let event = match next {
                Some(Ok(event)) => event,
                Some(Err(e)) => return self.engine_failed(conn, thread_id, &e.to_string()).await,
                None if translator.is_halted() => return ConnectionOutcome::Suspended,
                None if cancel.is_cancelled() => return ConnectionOutcome::Cancelled,
                None => return ConnectionOutcome::Completed,
            };

            for out in translator.translate(&event) {
                if !conn.emit(out).await {
                    return self.client_gone(thread_id);
                }
            }
            if translator.is_halted() {
                return ConnectionOutcome::Suspended;
            }

            if event.kind == TraceKind::ChatModelStream {
                since_checkpoint = since_checkpoint.saturating_add(1);
                if since_checkpoint < checkpoint_every {
                    continue;
                }
                since_checkpoint = 0;
            }
            if let Some(outcome) = self.checkpoint(conn, cancel) {
                return outcome;
            }
        }
    }

    /// `Some` when the turn must stop here.
    fn checkpoint(&self, conn: &Connection<'_>, cancel: &CancellationToken) -> Option<ConnectionOutcome> {
        if !conn.sink.is_connected() {
            return Some(self.client_gone(&conn.thread_id));
        }
        if cancel.is_cancelled() {
            tracing::info!(thread_id = %conn.thread_id, "turn cancelled at checkpoint");
            return Some(ConnectionOutcome::Cancelled);
        }
        None
    }

    fn client_gone(&self, thread_id: &ThreadId) -> ConnectionOutcome {
        self.cancellations.request(thread_id);
        tracing::info!(thread_id = %thread_id, "client disconnected, cancellation requested");
        ConnectionOutcome::Disconnected
    }

    async fn engine_failed(&self, conn: &mut Connection<'_>, thread_id: &ThreadId, message: &str) -> ConnectionOutcome {
        tracing::error!(thread_id = %thread_id, error = %message, "engine stream failed");
        let event = StreamEvent::error(
            thread_id,
            ErrorCode::StreamError,
            format!("Streaming error: {message}"),
            None,
        );
        if conn.emit(event).await {
            ConnectionOutcome::Failed
        } else {
            self.client_gone(thread_id)
        }
    }

    async fn teardown(&self, thread_id: &ThreadId, translator: &mut Translator, conn: &mut Connection<'_>) {
        let history = translator.take_history();
        if let Err(e) = self.coordinator.append_history(thread_id, history).await {
            tracing::warn!(thread_id = %thread_id, error = %e, "failed to persist turn history");
        }
        match self.coordinator.finish_turn(thread_id).await {
            Ok(state) => tracing::debug!(thread_id = %thread_id, state = %state, "turn settled"),
            Err(e) => tracing::warn!(thread_id = %thread_id, error = %e, "failed to settle thread state"),
        }
        self.cancellations.clear(thread_id);
        conn.close().await;
    }

    /// Sweep stale flags, evict idle translators and drop unused thread
    /// locks. Translators of suspended turns are kept for the approval wait.
    pub fn housekeep(&self) -> Housekeeping {
        let idle_ttl = self.settings.translator_idle_ttl;
        let suspended_ttl = self.coordinator.wait_timeout().map(|wait| wait.max(idle_ttl));
        let report = Housekeeping {
            flags_swept: self.cancellations.sweep(self.settings.flag_max_age),
            translators_evicted: self.translators.cleanup_inactive(idle_ttl, suspended_ttl),
        };
        self.coordinator.prune_locks();
        if report != Housekeeping::default() {
            tracing::debug!(
                flags_swept = report.flags_swept,
                translators_evicted = report.translators_evicted,
                "housekeeping pass"
            );
        }
        report
    }

    /// Run [`housekeep`](Self::housekeep) every `housekeeping_interval`
    /// until `shutdown` fires.
    #[must_use]
    pub fn spawn_housekeeping(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(service.settings.housekeeping_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        service.housekeep();
                    },
                }
            }
            tracing::debug!("stream housekeeping stopped");
        })
    }
}

fn request_span(operation: &str, principal: &Principal) -> tracing::Span {
    let mut context = RequestContext::new("stream")
        .with_operation(operation)
        .with_thread_id(principal.thread_id.to_string());
    if let Some(user) = &principal.user_id {
        context = context.with_user_id(user.clone());
    }
    context.span()
}

#[cfg(test)]
#[path = "service_tests.rs"]
mod tests;
