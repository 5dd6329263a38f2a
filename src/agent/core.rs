//! Agent loop: one conversational turn as an explicit state machine
//!
//! A turn starts in [`TurnState::Streaming`]. The model's reply is
//! classified into an answer, a tool call or an error; a tool call is
//! executed, its result appended, and the loop streams again:
//!
//! ```text
//! Streaming -> Answer | ToolCall | Error
//! ToolCall  -> Streaming | Error
//! ```
//!
//! The caller's cancellation token is observed while waiting on the stream
//! and while waiting on a tool.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::inference::{infer_next_action, InferredAction};
use crate::agent::registry::Registry;
use crate::agent::session::SessionHandle;
use crate::error::{AgentSmithError, Result};
use crate::prompts::build_system_prompt;
use crate::providers::{CompletionRequest, Message, Model, Provider};
use crate::tools::script::ScriptToolExecutor;
use crate::tools::{
    Tool, ToolCallRequest, ToolExecutor, DYNAMIC_AGENT_TOOL_NAME, SCRIPT_TOOL_NAME,
};

/// Text fragments buffered between the stream task and the loop
const TEXT_CHANNEL_CAPACITY: usize = 64;

/// What the caller wants from one turn
#[derive(Debug, Clone, Default)]
pub struct TurnRequest {
    pub session_id: String,
    pub model_id: String,
    pub role_id: Option<String>,
    pub query: String,
}

/// How a successful turn ended
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    /// Session the turn ran in; differs from the request for a transient fallback
    pub session_id: String,
    /// Final assistant text
    pub answer: String,
    /// Tool calls executed during the turn
    pub tool_calls: usize,
}

#[derive(Debug)]
enum TurnState {
    Streaming,
    ToolCall(ToolCallRequest),
    Answer,
    Error(anyhow::Error),
}

/// Everything resolved once at the start of a turn
struct Turn {
    session: SessionHandle,
    model: Model,
    provider: Arc<dyn Provider>,
    system_prompt: String,
    catalog: Vec<Tool>,
    cancel: CancellationToken,
    tool_calls: usize,
}

/// Drives turns against the models, sessions and tools in a [`Registry`]
#[derive(Debug, Clone)]
pub struct AgentLoop {
    registry: Arc<Registry>,
    script: ScriptToolExecutor,
}

impl AgentLoop {
    pub fn new(registry: Arc<Registry>) -> Self {
        let script = ScriptToolExecutor::new(Duration::from_secs(
            registry.config().script.timeout_seconds,
        ));
        Self { registry, script }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Run a turn on its own task
    pub fn spawn_turn(
        &self,
        request: TurnRequest,
        cancel: CancellationToken,
    ) -> JoinHandle<Result<TurnOutcome>> {
        let agent = self.clone();
        tokio::spawn(async move { agent.run(request, cancel).await })
    }

    /// Run one tool-enabled turn to completion
    ///
    /// # Arguments
    ///
    /// * `request` - Session, model, optional role and the user query
    /// * `cancel` - Aborts the turn at the next suspension point
    ///
    /// # Returns
    ///
    /// Returns the final assistant text once the model answers
    ///
    /// # Errors
    ///
    /// - `ModelNotFound` if no provider serves the model
    /// - `Cancelled` when `cancel` fires
    /// - `StreamTimeout` if the provider goes quiet for too long
    /// - `MaxIterationsExceeded` if the model keeps calling tools
    /// - `Classification` if the model replies with nothing usable
    /// - the tool's error when a tool call fails; the failure is also
    ///   recorded in the session as a tool message
    pub async fn run(&self, request: TurnRequest, cancel: CancellationToken) -> Result<TurnOutcome> {
        let catalog = self.registry.tool_catalog();
        let mut turn = self.begin_turn(&request, catalog, cancel).await?;
        info!(
            "Starting turn in session {} with model {}",
            turn.session.id(),
            turn.model.id
        );

        let mut state = TurnState::Streaming;
        loop {
            state = match state {
                TurnState::Streaming => self.on_streaming(&mut turn).await,
                TurnState::ToolCall(call) => self.on_tool_call(&mut turn, call).await,
                TurnState::Answer => return self.finish(&turn).await,
                TurnState::Error(e) => {
                    warn!("Turn in session {} failed: {}", turn.session.id(), e);
                    return Err(e);
                }
            };
        }
    }

    /// Run a plain chat turn: no tools advertised, no classification
    pub async fn direct_chat(
        &self,
        request: TurnRequest,
        cancel: CancellationToken,
    ) -> Result<TurnOutcome> {
        let turn = self.begin_turn(&request, Vec::new(), cancel).await?;
        let completion = CompletionRequest {
            model: turn.model.id.clone(),
            system_prompt: turn.system_prompt.clone(),
            messages: turn.session.history_without_last().await,
            tools: Vec::new(),
        };
        if let Err(e) = self.stream_completion(&turn, completion).await {
            return Err(self.keep_partial_reply(&turn, e).await);
        }
        turn.session.save().await?;
        self.finish(&turn).await
    }

    /// Answer `query` with a throwaway agent on the same model
    ///
    /// The conversation lives in a transient session and the completion is
    /// not streamed.
    pub async fn dynamic_agent_chat(
        &self,
        model_id: &str,
        query: &str,
        system_prompt: &str,
    ) -> Result<String> {
        let (model, provider) = self.resolve_model(model_id)?;
        let session = self.registry.transient_session();
        session.add_message(Message::user(query)).await?;

        let answer = provider
            .chat_completion(CompletionRequest {
                model: model.id,
                system_prompt: system_prompt.to_string(),
                messages: session.snapshot().await.messages,
                tools: Vec::new(),
            })
            .await?;
        session.add_message(Message::assistant(answer.clone())).await?;
        Ok(answer)
    }

    fn resolve_model(&self, model_id: &str) -> Result<(Model, Arc<dyn Provider>)> {
        self.registry
            .find_model(model_id)
            .ok_or_else(|| AgentSmithError::ModelNotFound(model_id.to_string()).into())
    }

    async fn begin_turn(
        &self,
        request: &TurnRequest,
        catalog: Vec<Tool>,
        cancel: CancellationToken,
    ) -> Result<Turn> {
        let (model, provider) = self.resolve_model(&request.model_id)?;
        let session = self.registry.session_or_transient(&request.session_id);

        let role = match request.role_id.as_deref().filter(|id| !id.is_empty()) {
            Some(id) => {
                let role = self.registry.role(id);
                if role.is_none() {
                    warn!("Unknown role '{}', continuing without one", id);
                }
                role
            }
            None => None,
        };
        let system_prompt = build_system_prompt(role.as_ref(), !catalog.is_empty());

        session.add_message(Message::user(request.query.clone())).await?;
        session.add_message(Message::assistant("")).await?;

        Ok(Turn {
            session,
            model,
            provider,
            system_prompt,
            catalog,
            cancel,
            tool_calls: 0,
        })
    }

    async fn finish(&self, turn: &Turn) -> Result<TurnOutcome> {
        let answer = turn
            .session
            .last_message()
            .await
            .map(|message| message.text)
            .unwrap_or_default();
        info!(
            "Turn in session {} answered after {} tool calls",
            turn.session.id(),
            turn.tool_calls
        );
        Ok(TurnOutcome {
            session_id: turn.session.id().to_string(),
            answer,
            tool_calls: turn.tool_calls,
        })
    }

    async fn on_streaming(&self, turn: &mut Turn) -> TurnState {
        let completion = CompletionRequest {
            model: turn.model.id.clone(),
            system_prompt: turn.system_prompt.clone(),
            messages: turn.session.history_without_last().await,
            tools: turn.catalog.clone(),
        };

        let calls = match self.stream_completion(turn, completion).await {
            Ok(calls) => calls,
            Err(e) => return TurnState::Error(self.keep_partial_reply(turn, e).await),
        };

        if let Err(e) = turn.session.save().await {
            return TurnState::Error(e);
        }

        if let Some(call) = calls.first() {
            if calls.len() > 1 {
                warn!(
                    "Model requested {} tool calls, running only '{}'",
                    calls.len(),
                    call.name
                );
            }
            return TurnState::ToolCall(call.clone());
        }

        let text = turn
            .session
            .last_message()
            .await
            .map(|message| message.text)
            .unwrap_or_default();
        match infer_next_action(&text, &turn.catalog) {
            InferredAction::Answer => TurnState::Answer,
            InferredAction::ToolCall(call) => {
                debug!("Recognised inline call to '{}'", call.name);
                TurnState::ToolCall(call)
            }
            InferredAction::Error => TurnState::Error(
                AgentSmithError::Classification("model returned an empty reply".into()).into(),
            ),
        }
    }

    /// Save whatever text streamed before `error`, unless the turn was cancelled
    async fn keep_partial_reply(&self, turn: &Turn, error: anyhow::Error) -> anyhow::Error {
        if !is_cancelled(&error) {
            if let Err(store_err) = turn.session.save().await {
                warn!("Failed to save partial reply: {}", store_err);
            }
        }
        error
    }

    /// Stream one completion into the last message of the session
    ///
    /// Waits on cancellation, text, stream completion and the idle timer,
    /// in that priority order. The idle timer restarts after every fragment.
    async fn stream_completion(
        &self,
        turn: &Turn,
        completion: CompletionRequest,
    ) -> Result<Vec<ToolCallRequest>> {
        let idle = self.registry.config().agent.stream_idle_timeout();
        let (text_tx, mut text_rx) = mpsc::channel::<String>(TEXT_CHANNEL_CAPACITY);
        let stream_cancel = turn.cancel.child_token();

        let provider = Arc::clone(&turn.provider);
        let task_cancel = stream_cancel.clone();
        let mut stream = tokio::spawn(async move {
            provider
                .chat_completion_stream(completion, text_tx, task_cancel)
                .await
        });

        let mut text_open = true;
        loop {
            tokio::select! {
                biased;

                _ = turn.cancel.cancelled() => {
                    stream_cancel.cancel();
                    stream.abort();
                    return Err(AgentSmithError::Cancelled.into());
                }
                fragment = text_rx.recv(), if text_open => match fragment {
                    Some(fragment) => turn.session.append_to_last_message(&fragment).await,
                    None => text_open = false,
                },
                joined = &mut stream => {
                    while let Ok(fragment) = text_rx.try_recv() {
                        turn.session.append_to_last_message(&fragment).await;
                    }
                    let calls = joined
                        .map_err(|e| AgentSmithError::Provider(format!("stream task failed: {}", e)))??;
                    return Ok(calls);
                }
                _ = tokio::time::sleep(idle) => {
                    stream_cancel.cancel();
                    stream.abort();
                    return Err(AgentSmithError::StreamTimeout(idle.as_secs()).into());
                }
            }
        }
    }

    async fn on_tool_call(&self, turn: &mut Turn, call: ToolCallRequest) -> TurnState {
        let limit = self.registry.config().agent.max_tool_iterations;
        if turn.tool_calls >= limit {
            return TurnState::Error(
                AgentSmithError::MaxIterationsExceeded {
                    limit,
                    message: format!("model kept calling tools, last was '{}'", call.name),
                }
                .into(),
            );
        }
        turn.tool_calls += 1;

        let call = call.ensure_id();
        turn.session.attach_tool_request(call.clone()).await;
        info!("Calling tool '{}' ({})", call.name, call.id);

        match self.execute_tool(turn, &call).await {
            Ok(result) => {
                if let Err(e) = turn
                    .session
                    .add_message(Message::tool_result(call, result))
                    .await
                {
                    return TurnState::Error(e);
                }
                match turn.session.add_message(Message::assistant("")).await {
                    Ok(_) => TurnState::Streaming,
                    Err(e) => TurnState::Error(e),
                }
            }
            Err(e) if is_cancelled(&e) => TurnState::Error(e),
            Err(e) => {
                warn!("Tool '{}' failed: {}", call.name, e);
                let record = Message::tool_result(call, format!("Error: {}", e));
                if let Err(store_err) = turn.session.add_message(record).await {
                    warn!("Failed to record tool error: {}", store_err);
                }
                TurnState::Error(e)
            }
        }
    }

    async fn execute_tool(&self, turn: &Turn, call: &ToolCallRequest) -> Result<String> {
        let tool = turn
            .catalog
            .iter()
            .find(|tool| tool.name == call.name)
            .ok_or_else(|| AgentSmithError::ToolNotFound(call.name.clone()))?;
        tool.validate_call(call)?;

        let executor: Arc<dyn ToolExecutor> = match (tool.server_id.as_deref(), tool.name.as_str())
        {
            (Some(server_id), _) => self
                .registry
                .mcp_server(server_id)
                .ok_or_else(|| AgentSmithError::McpServerNotFound(server_id.to_string()))?,
            (None, SCRIPT_TOOL_NAME) => Arc::new(self.script.clone()),
            (None, DYNAMIC_AGENT_TOOL_NAME) => Arc::new(DynamicAgentTool {
                agent: self.clone(),
                model_id: turn.model.id.clone(),
            }),
            (None, other) => return Err(AgentSmithError::ToolNotFound(other.to_string()).into()),
        };

        let budget = self.registry.config().agent.tool_timeout();
        tokio::select! {
            biased;

            _ = turn.cancel.cancelled() => Err(AgentSmithError::Cancelled.into()),
            result = tokio::time::timeout(budget, executor.execute(call)) => match result {
                Ok(result) => result,
                Err(_) => Err(AgentSmithError::Tool(format!(
                    "'{}' did not finish within {} seconds",
                    call.name,
                    budget.as_secs()
                ))
                .into()),
            },
        }
    }
}

fn is_cancelled(error: &anyhow::Error) -> bool {
    matches!(
        error.downcast_ref::<AgentSmithError>(),
        Some(AgentSmithError::Cancelled)
    )
}

/// `builtin_dynamic_ai_agent`: a sub-agent on the turn's model
struct DynamicAgentTool {
    agent: AgentLoop,
    model_id: String,
}

#[async_trait]
impl ToolExecutor for DynamicAgentTool {
    async fn execute(&self, request: &ToolCallRequest) -> Result<String> {
        let system_prompt = request.str_param("sysPrompt").unwrap_or_default();
        let query = request.str_param("query").unwrap_or_default();
        self.agent
            .dynamic_agent_chat(&self.model_id, query, system_prompt)
            .await
    }
}
