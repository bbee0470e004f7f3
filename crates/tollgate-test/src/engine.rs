//! Scripted stand-in for the reasoning engine.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::SinkExt;
use futures::StreamExt;
use futures::channel::mpsc;
use serde_json::{Value, json};

use tollgate_core::{CallId, MessageId, PendingToolInvocation};
use tollgate_runtime::trace::tool_call;
use tollgate_runtime::{
    CancellationToken, EngineError, EngineRequest, EngineResult, ExecutionEngine, ResolvedCall,
    ToolGate, TraceEvent, TraceStream, TurnContext, TurnVerdict,
};

/// Node that produces assistant messages.
pub const ASSISTANT_NODE: &str = "assistant";
/// Node that executes tools.
pub const TOOLS_NODE: &str = "tools";
/// Node whose interrupt carries the approval signal.
pub const REVIEW_NODE: &str = "human_review";

/// A tool call the script asks for.
#[derive(Debug, Clone)]
pub struct ScriptedCall {
    /// Call id.
    pub id: String,
    /// Tool name.
    pub tool: String,
    /// Raw arguments.
    pub arguments: Value,
}

impl ScriptedCall {
    /// An `obp_requests` call for `method path`.
    #[must_use]
    pub fn http(id: &str, method: &str, path: &str) -> Self {
        Self {
            id: id.to_string(),
            tool: "obp_requests".to_string(),
            arguments: json!({ "method": method, "path": path }),
        }
    }
}

/// One step of a scripted run.
#[derive(Debug, Clone)]
pub enum Step {
    /// Stream an assistant message token by token.
    Say(Vec<String>),
    /// End an assistant message requesting tool calls, have the gate review
    /// them and execute the approved ones.
    CallTools(Vec<ScriptedCall>),
    /// Emit a raw trace event.
    Trace(TraceEvent),
    /// Kill the trace stream.
    Fail(String),
}

impl Step {
    /// Stream `text` split on whitespace, keeping the separators.
    #[must_use]
    pub fn say(text: &str) -> Self {
        Self::Say(text.split_inclusive(' ').map(str::to_string).collect())
    }
}

#[derive(Debug, Default)]
struct Recorder {
    executed: Vec<CallId>,
    denied: Vec<CallId>,
    runs: usize,
    last_cancel: Option<CancellationToken>,
}

/// [`ExecutionEngine`] that plays back scripted runs.
///
/// Each [`EngineRequest::StartTurn`] consumes the next turn script; each
/// [`EngineRequest::Resume`] executes the settled calls and then consumes the
/// next resume script. Cancellation is checked before each token and each
/// tool call.
#[derive(Debug, Clone, Default)]
pub struct ScriptedEngine {
    turns: Arc<Mutex<VecDeque<Vec<Step>>>>,
    resumes: Arc<Mutex<VecDeque<Vec<Step>>>>,
    outputs: Arc<Mutex<HashMap<String, Value>>>,
    recorder: Arc<Mutex<Recorder>>,
    token_delay: Option<Duration>,
}

impl ScriptedEngine {
    /// An engine with no scripts. Unscripted runs produce an empty trace.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a script for the next new turn.
    #[must_use]
    pub fn with_turn(self, steps: Vec<Step>) -> Self {
        if let Ok(mut turns) = self.turns.lock() {
            turns.push_back(steps);
        }
        self
    }

    /// Queue a script for the next resume.
    #[must_use]
    pub fn with_resume(self, steps: Vec<Step>) -> Self {
        if let Ok(mut resumes) = self.resumes.lock() {
            resumes.push_back(steps);
        }
        self
    }

    /// Output returned when `call_id` executes. Defaults to `{"status": "ok"}`.
    #[must_use]
    pub fn with_output(self, call_id: &str, output: Value) -> Self {
        if let Ok(mut outputs) = self.outputs.lock() {
            outputs.insert(call_id.to_string(), output);
        }
        self
    }

    /// Sleep this long before each token.
    #[must_use]
    pub fn with_token_delay(mut self, delay: Duration) -> Self {
        self.token_delay = Some(delay);
        self
    }

    /// Calls that were executed, in order.
    #[must_use]
    pub fn executed(&self) -> Vec<CallId> {
        self.recorder
            .lock()
            .map(|r| r.executed.clone())
            .unwrap_or_default()
    }

    /// Calls that were reported as denied, in order.
    #[must_use]
    pub fn denied(&self) -> Vec<CallId> {
        self.recorder
            .lock()
            .map(|r| r.denied.clone())
            .unwrap_or_default()
    }

    /// How many runs were started.
    #[must_use]
    pub fn runs(&self) -> usize {
        self.recorder.lock().map(|r| r.runs).unwrap_or_default()
    }

    /// Whether the most recent run was cancelled.
    #[must_use]
    pub fn last_run_cancelled(&self) -> bool {
        self.recorder
            .lock()
            .ok()
            .and_then(|r| r.last_cancel.as_ref().map(CancellationToken::is_cancelled))
            .unwrap_or(false)
    }

    fn next_script(queue: &Mutex<VecDeque<Vec<Step>>>) -> Vec<Step> {
        queue
            .lock()
            .ok()
            .and_then(|mut q| q.pop_front())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ExecutionEngine for ScriptedEngine {
    async fn run(&self, request: EngineRequest, context: TurnContext) -> EngineResult<TraceStream> {
        if let Ok(mut recorder) = self.recorder.lock() {
            recorder.runs = recorder.runs.saturating_add(1);
            recorder.last_cancel = Some(context.cancel.clone());
        }

        let (settled, steps) = match request {
            EngineRequest::StartTurn { .. } => (Vec::new(), Self::next_script(&self.turns)),
            EngineRequest::Resume { outcome } => (outcome.resolved, Self::next_script(&self.resumes)),
        };

        let (tx, rx) = mpsc::channel(0);
        let player = Player {
            tx,
            context,
            outputs: Arc::clone(&self.outputs),
            recorder: Arc::clone(&self.recorder),
            token_delay: self.token_delay,
        };
        tokio::spawn(player.play(settled, steps));
        Ok(rx.boxed())
    }
}

/// Drives one run's script into the trace channel.
struct Player {
    tx: mpsc::Sender<EngineResult<TraceEvent>>,
    context: TurnContext,
    outputs: Arc<Mutex<HashMap<String, Value>>>,
    recorder: Arc<Mutex<Recorder>>,
    token_delay: Option<Duration>,
}

impl Player {
    async fn play(mut self, settled: Vec<ResolvedCall>, steps: Vec<Step>) {
        if !self.execute(settled).await {
            return;
        }
        for step in steps {
            let keep_going = match step {
                Step::Say(tokens) => self.say(tokens).await,
                Step::CallTools(calls) => self.call_tools(calls).await,
                Step::Trace(event) => self.emit(event).await,
                Step::Fail(message) => {
                    let _ = self.tx.send(Err(EngineError::Stream(message))).await;
                    false
                },
            };
            if !keep_going {
                return;
            }
        }
    }

    async fn emit(&mut self, event: TraceEvent) -> bool {
        self.tx.send(Ok(event)).await.is_ok()
    }

    async fn say(&mut self, tokens: Vec<String>) -> bool {
        if !self.emit(TraceEvent::model_start(ASSISTANT_NODE)).await {
            return false;
        }
        let mut content = String::new();
        for token in tokens {
            if let Some(delay) = self.token_delay {
                tokio::time::sleep(delay).await;
            }
            if self.context.is_cancelled() {
                return false;
            }
            content.push_str(&token);
            if !self.emit(TraceEvent::token(ASSISTANT_NODE, token)).await {
                return false;
            }
        }
        self.emit(TraceEvent::model_end(ASSISTANT_NODE, content, Vec::new()))
            .await
    }

    async fn call_tools(&mut self, calls: Vec<ScriptedCall>) -> bool {
        let requested = calls
            .iter()
            .map(|c| tool_call(&c.id, &c.tool, c.arguments.clone()))
            .collect();
        if !self
            .emit(TraceEvent::model_end(ASSISTANT_NODE, "", requested))
            .await
        {
            return false;
        }

        let message_id = MessageId::new();
        let pending = calls
            .into_iter()
            .map(|c| PendingToolInvocation::new(c.tool, CallId::from(c.id), c.arguments, message_id))
            .collect();
        let gate = Arc::clone(&self.context.gate);
        match gate.review(pending).await {
            Ok(TurnVerdict::Proceed { resolved }) => self.execute(resolved).await,
            Ok(TurnVerdict::Suspended(signal)) => {
                match TraceEvent::interrupt(REVIEW_NODE, &signal) {
                    Ok(event) => {
                        let _ = self.emit(event).await;
                    },
                    Err(e) => {
                        let _ = self.tx.send(Err(e)).await;
                    },
                }
                false
            },
            Err(e) => {
                let _ = self.tx.send(Err(EngineError::Gate(e))).await;
                false
            },
        }
    }

    async fn execute(&mut self, settled: Vec<ResolvedCall>) -> bool {
        for resolved in settled {
            if self.context.is_cancelled() {
                tracing::debug!(call_id = %resolved.call.call_id, "run cancelled before tool call");
                return false;
            }
            let call = &resolved.call;
            let id = call.call_id.as_str().to_string();
            if !self
                .emit(TraceEvent::tool_start(TOOLS_NODE, &id, &call.tool, call.arguments.clone()))
                .await
            {
                return false;
            }

            let output = if resolved.is_approved() {
                self.record(|r| r.executed.push(call.call_id.clone()));
                self.output_for(&id)
            } else {
                self.record(|r| r.denied.push(call.call_id.clone()));
                let reason = match &resolved.outcome {
                    tollgate_runtime::CallOutcome::Denied { reason } => reason.clone(),
                    tollgate_runtime::CallOutcome::Approved => String::new(),
                };
                json!({ "status": "error", "error": reason })
            };
            if !self
                .emit(TraceEvent::tool_end(TOOLS_NODE, &id, &call.tool, output))
                .await
            {
                return false;
            }
        }
        true
    }

    fn output_for(&self, call_id: &str) -> Value {
        self.outputs
            .lock()
            .ok()
            .and_then(|o| o.get(call_id).cloned())
            .unwrap_or_else(|| json!({ "status": "ok" }))
    }

    fn record(&self, f: impl FnOnce(&mut Recorder)) {
        if let Ok(mut recorder) = self.recorder.lock() {
            f(&mut recorder);
        }
    }
}
