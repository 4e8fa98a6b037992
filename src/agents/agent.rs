use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument, warn};

use crate::llm_client::{
    read_env, ChatMessage, ChatReply, ChatRequest, SharedChatModel, ToolCallRequest,
};
use crate::rag::config::read_parsed;
use crate::rag::search::Searcher;

use super::answer::{AnswerParseError, FinalAnswer};
use super::error::AgentError;
use super::tools::{tool_specs, Toolbox};

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub model: String,
    pub max_iterations: usize,
    pub model_timeout: Duration,
    pub tool_timeout: Duration,
}

impl AgentConfig {
    const MODEL_VARS: [&'static str; 2] = ["CODE_ORACLE_MODEL", "OPENAI_MODEL"];
    const MAX_ITERATIONS_VARS: [&'static str; 1] = ["CODE_ORACLE_MAX_ITERATIONS"];
    const MODEL_TIMEOUT_VARS: [&'static str; 1] = ["CODE_ORACLE_MODEL_TIMEOUT_MS"];
    const TOOL_TIMEOUT_VARS: [&'static str; 1] = ["CODE_ORACLE_TOOL_TIMEOUT_MS"];

    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            model: read_env(&Self::MODEL_VARS).unwrap_or(defaults.model),
            max_iterations: read_parsed(&Self::MAX_ITERATIONS_VARS)
                .unwrap_or(defaults.max_iterations),
            model_timeout: read_parsed(&Self::MODEL_TIMEOUT_VARS)
                .map(Duration::from_millis)
                .unwrap_or(defaults.model_timeout),
            tool_timeout: read_parsed(&Self::TOOL_TIMEOUT_VARS)
                .map(Duration::from_millis)
                .unwrap_or(defaults.tool_timeout),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn validate(&self) -> Result<(), AgentError> {
        if self.max_iterations == 0 {
            return Err(AgentError::InvalidConfig(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        if self.model.trim().is_empty() {
            return Err(AgentError::InvalidConfig("model name is empty".to_string()));
        }
        Ok(())
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: "gpt-5-mini".to_string(),
            max_iterations: 6,
            model_timeout: Duration::from_secs(180),
            tool_timeout: Duration::from_secs(10),
        }
    }
}

enum LoopState {
    AwaitModel { round: usize },
    ToolDispatch { round: usize, calls: Vec<ToolCallRequest> },
    Final(FinalAnswer),
    Failed(AgentError),
}

/// Answers questions about a codebase by alternating model rounds with tool calls, then forcing
/// a schema-shaped answer on the last round.
pub struct CodebaseAgent {
    model: SharedChatModel,
    config: AgentConfig,
}

impl CodebaseAgent {
    pub fn new(model: SharedChatModel, config: AgentConfig) -> Result<Self, AgentError> {
        config.validate()?;
        Ok(Self { model, config })
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    fn system_prompt(&self, is_final_round: bool) -> String {
        let base = "You are a senior software engineer and an expert on this codebase. Answer \
                    the user's question about the code or the filesystem.\n\nTools:\n\
                    1. search(question, kind, top_k): semantic search; kind is 'file' or 'function'\n\
                    2. read_file_full(path): full content of a file\n\
                    3. cat(path): read a file from disk\n\
                    4. ls(dir_path): list a directory\n\
                    5. find(pattern, start_path): find files by name pattern\n\n\
                    Work in a think, act, observe loop until you can answer.";

        if is_final_round {
            format!(
                "{base}\n\nThis is the final round. Give your final answer from everything \
                 gathered so far and do not call any tools. Reply with JSON only, matching the \
                 final_answer schema: answer, confidence (high, medium or low), sources and \
                 reasoning."
            )
        } else {
            format!(
                "{base}\n\nYou have at most {} rounds to call tools.",
                self.config.max_iterations
            )
        }
    }

    /// Run one query to completion. Conversation state lives only for this call, so concurrent
    /// queries on the same agent never see each other's turns.
    #[instrument(skip_all, fields(model = %self.config.model, max_iterations = self.config.max_iterations))]
    pub async fn answer(
        &self,
        question: &str,
        searcher: Option<Arc<Searcher>>,
    ) -> Result<FinalAnswer, AgentError> {
        let started = Instant::now();
        let toolbox = Toolbox::new(searcher, self.config.tool_timeout);
        let mut history = vec![ChatMessage::User(question.to_string())];
        let mut state = LoopState::AwaitModel { round: 0 };

        loop {
            state = match state {
                LoopState::AwaitModel { round } if round >= self.config.max_iterations => {
                    LoopState::Failed(AgentError::IterationsExhausted {
                        max_iterations: self.config.max_iterations,
                    })
                }
                LoopState::AwaitModel { round } => self.model_round(round, &mut history).await,
                LoopState::ToolDispatch { round, calls } => {
                    for call in &calls {
                        let result = toolbox.dispatch(call).await;
                        history.push(ChatMessage::Tool {
                            tool_call_id: call.id.clone(),
                            content: result.to_string(),
                        });
                    }
                    LoopState::AwaitModel { round: round + 1 }
                }
                LoopState::Final(answer) => {
                    info!(
                        confidence = %answer.confidence,
                        sources = answer.sources.len(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Query answered"
                    );
                    return Ok(answer);
                }
                LoopState::Failed(err) => {
                    warn!(%err, elapsed_ms = started.elapsed().as_millis() as u64, "Query failed");
                    return Err(err);
                }
            };
        }
    }

    async fn model_round(&self, round: usize, history: &mut Vec<ChatMessage>) -> LoopState {
        let is_final_round = round + 1 == self.config.max_iterations;

        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(ChatMessage::System(self.system_prompt(is_final_round)));
        messages.extend(history.iter().cloned());

        let request = ChatRequest::new(self.config.model.as_str(), messages);
        let request = if is_final_round {
            request.with_response_schema(FinalAnswer::response_schema())
        } else {
            request.with_tools(tool_specs())
        };

        debug!(round, is_final_round, turns = history.len(), "Calling model");
        let call = self.model.chat(request);
        let reply = match tokio::time::timeout(self.config.model_timeout, call).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(source)) => return LoopState::Failed(AgentError::ModelCall { round, source }),
            Err(_) => {
                return LoopState::Failed(AgentError::ModelTimeout {
                    round,
                    timeout: self.config.model_timeout,
                })
            }
        };

        // An assistant turn with neither text nor tool calls is rejected by the chat API.
        if reply.text().is_some() || !reply.tool_calls.is_empty() {
            history.push(ChatMessage::Assistant {
                content: reply.content.clone(),
                tool_calls: reply.tool_calls.clone(),
            });
        }

        if is_final_round {
            return Self::finish(round, &reply);
        }

        if !reply.tool_calls.is_empty() {
            debug!(round, calls = reply.tool_calls.len(), "Dispatching tool calls");
            return LoopState::ToolDispatch {
                round,
                calls: reply.tool_calls,
            };
        }

        match reply.text() {
            Some(text) => {
                info!(round, "Model answered before its final round");
                LoopState::Final(FinalAnswer::early_exit(text))
            }
            None => {
                debug!(round, "Empty reply; moving to next round");
                LoopState::AwaitModel { round: round + 1 }
            }
        }
    }

    /// Final round: the reply must be the answer itself. Tool calls are never dispatched here.
    fn finish(round: usize, reply: &ChatReply) -> LoopState {
        if !reply.tool_calls.is_empty() {
            warn!(round, calls = reply.tool_calls.len(), "Ignoring tool calls on final round");
        }

        let Some(text) = reply.text() else {
            return LoopState::Failed(AgentError::EmptyFinalResponse { round });
        };

        match FinalAnswer::from_json(text) {
            Ok(answer) => LoopState::Final(answer),
            Err(AnswerParseError::Malformed(err)) => {
                warn!(round, %err, "Final reply was not JSON; returning it as a degraded answer");
                LoopState::Final(FinalAnswer::degraded(text))
            }
            Err(AnswerParseError::Invalid(err)) => LoopState::Failed(AgentError::Validation {
                round,
                reason: err.to_string(),
            }),
        }
    }
}
