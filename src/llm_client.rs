use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_openai::types::{
    ChatCompletionMessageToolCall, ChatCompletionRequestAssistantMessageArgs,
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestToolMessageArgs, ChatCompletionRequestUserMessageArgs,
    ChatCompletionTool, ChatCompletionToolArgs, ChatCompletionToolChoiceOption,
    ChatCompletionToolType, CreateChatCompletionRequestArgs, FunctionCall, FunctionObjectArgs,
    ResponseFormat, ResponseFormatJsonSchema,
};
use async_openai::{config::OpenAIConfig, Client as AsyncOpenAiClient};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, instrument};

pub type SharedChatModel = Arc<dyn ChatModel>;

/// One turn of a chat conversation, independent of any provider's wire types.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatMessage {
    System(String),
    User(String),
    Assistant {
        content: Option<String>,
        tool_calls: Vec<ToolCallRequest>,
    },
    Tool {
        tool_call_id: String,
        content: String,
    },
}

/// A tool invocation requested by the model. `arguments` is the raw JSON text it produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

impl ToolCallRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }
}

/// Declared shape of a callable tool, offered to the model on non-final rounds.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
}

/// JSON schema the model's reply content must conform to.
#[derive(Debug, Clone)]
pub struct ResponseSchema {
    pub name: &'static str,
    pub schema: Value,
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolSpec>,
    pub response_schema: Option<ResponseSchema>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            tools: Vec::new(),
            response_schema: None,
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_response_schema(mut self, schema: ResponseSchema) -> Self {
        self.response_schema = Some(schema);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatReply {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCallRequest>,
}

impl ChatReply {
    /// Content with surrounding whitespace removed, or `None` when nothing meaningful was said.
    pub fn text(&self) -> Option<&str> {
        self.content
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
    }
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn chat(&self, request: ChatRequest) -> anyhow::Result<ChatReply>;
}

/// Connection settings shared by every OpenAI-compatible client in the crate.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub api_key: String,
    pub base_url: Option<String>,
    pub http_timeout_ms: u64,
}

impl ModelConfig {
    const API_KEY_VARS: [&'static str; 2] = ["OPENAI_API_KEY", "CODE_ORACLE_API_KEY"];
    const BASE_URL_VARS: [&'static str; 2] = ["OPENAI_BASE_URL", "CODE_ORACLE_BASE_URL"];
    const TIMEOUT_VARS: [&'static str; 1] = ["CODE_ORACLE_HTTP_TIMEOUT_MS"];

    pub fn from_env() -> anyhow::Result<Self> {
        let api_key = read_env(&Self::API_KEY_VARS)
            .context("Set OPENAI_API_KEY (or CODE_ORACLE_API_KEY) to use the OpenAI client")?;
        let http_timeout_ms = read_env(&Self::TIMEOUT_VARS)
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(120_000);

        Ok(Self {
            api_key,
            base_url: read_env(&Self::BASE_URL_VARS),
            http_timeout_ms,
        })
    }

    pub(crate) fn openai_client(&self) -> anyhow::Result<AsyncOpenAiClient<OpenAIConfig>> {
        let mut config = OpenAIConfig::new().with_api_key(self.api_key.clone());
        if let Some(base_url) = &self.base_url {
            config = config.with_api_base(base_url.clone());
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(self.http_timeout_ms.max(1)))
            .build()
            .context("Failed to build HTTP client for the OpenAI API")?;

        Ok(AsyncOpenAiClient::with_config(config).with_http_client(http))
    }
}

/// First non-empty value among the candidate environment variables.
pub fn read_env(candidates: &[&'static str]) -> Option<String> {
    candidates
        .iter()
        .find_map(|key| env::var(key).ok())
        .filter(|value| !value.trim().is_empty())
}

/// OpenAI-compatible chat client; works against OpenAI, vLLM, or any compatible gateway.
pub struct OpenAiChatModel {
    client: AsyncOpenAiClient<OpenAIConfig>,
}

impl OpenAiChatModel {
    pub fn new(config: &ModelConfig) -> anyhow::Result<Self> {
        Ok(Self {
            client: config.openai_client()?,
        })
    }

    pub fn shared(config: &ModelConfig) -> anyhow::Result<SharedChatModel> {
        Ok(Arc::new(Self::new(config)?))
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    #[instrument(level = "debug", skip_all, fields(model = %request.model))]
    async fn chat(&self, request: ChatRequest) -> anyhow::Result<ChatReply> {
        let messages = request
            .messages
            .iter()
            .map(to_request_message)
            .collect::<anyhow::Result<Vec<_>>>()?;

        let mut builder = CreateChatCompletionRequestArgs::default();
        builder.model(request.model.as_str()).messages(messages);

        if !request.tools.is_empty() {
            let tools = request
                .tools
                .iter()
                .map(to_tool)
                .collect::<anyhow::Result<Vec<_>>>()?;
            builder
                .tools(tools)
                .tool_choice(ChatCompletionToolChoiceOption::Auto);
        }

        if let Some(schema) = &request.response_schema {
            builder.response_format(ResponseFormat::JsonSchema {
                json_schema: ResponseFormatJsonSchema {
                    description: None,
                    name: schema.name.to_string(),
                    schema: Some(schema.schema.clone()),
                    strict: Some(true),
                },
            });
        }

        let response = self
            .client
            .chat()
            .create(builder.build()?)
            .await
            .context("Chat completion request failed")?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .context("LLM response did not contain any choices")?;

        let tool_calls: Vec<ToolCallRequest> = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|call| ToolCallRequest {
                id: call.id,
                name: call.function.name,
                arguments: call.function.arguments,
            })
            .collect();

        debug!(
            content_len = choice.message.content.as_deref().map_or(0, str::len),
            tool_calls = tool_calls.len(),
            "Chat completion received"
        );

        Ok(ChatReply {
            content: choice.message.content,
            tool_calls,
        })
    }
}

fn to_request_message(message: &ChatMessage) -> anyhow::Result<ChatCompletionRequestMessage> {
    let converted: ChatCompletionRequestMessage = match message {
        ChatMessage::System(text) => ChatCompletionRequestSystemMessageArgs::default()
            .content(text.as_str())
            .build()?
            .into(),
        ChatMessage::User(text) => ChatCompletionRequestUserMessageArgs::default()
            .content(text.as_str())
            .build()?
            .into(),
        ChatMessage::Assistant {
            content,
            tool_calls,
        } => {
            let mut args = ChatCompletionRequestAssistantMessageArgs::default();
            if let Some(text) = content {
                args.content(text.as_str());
            }
            if !tool_calls.is_empty() {
                args.tool_calls(
                    tool_calls
                        .iter()
                        .map(|call| ChatCompletionMessageToolCall {
                            id: call.id.clone(),
                            r#type: ChatCompletionToolType::Function,
                            function: FunctionCall {
                                name: call.name.clone(),
                                arguments: call.arguments.clone(),
                            },
                        })
                        .collect::<Vec<_>>(),
                );
            }
            args.build()?.into()
        }
        ChatMessage::Tool {
            tool_call_id,
            content,
        } => ChatCompletionRequestToolMessageArgs::default()
            .content(content.as_str())
            .tool_call_id(tool_call_id.as_str())
            .build()?
            .into(),
    };

    Ok(converted)
}

fn to_tool(spec: &ToolSpec) -> anyhow::Result<ChatCompletionTool> {
    let function = FunctionObjectArgs::default()
        .name(spec.name)
        .description(spec.description)
        .parameters(spec.parameters.clone())
        .build()?;

    Ok(ChatCompletionToolArgs::default()
        .r#type(ChatCompletionToolType::Function)
        .function(function)
        .build()?)
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    /// Replays canned replies in order and records every request it was sent.
    #[derive(Default)]
    pub struct ScriptedChatModel {
        replies: Mutex<VecDeque<anyhow::Result<ChatReply>>>,
        pub requests: Mutex<Vec<ChatRequest>>,
    }

    impl ScriptedChatModel {
        pub fn new(replies: Vec<anyhow::Result<ChatReply>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        pub fn recorded(&self) -> Vec<ChatRequest> {
            self.requests.lock().expect("requests lock").clone()
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedChatModel {
        async fn chat(&self, request: ChatRequest) -> anyhow::Result<ChatReply> {
            self.requests.lock().expect("requests lock").push(request);
            self.replies
                .lock()
                .expect("replies lock")
                .pop_front()
                .unwrap_or_else(|| Err(anyhow::anyhow!("script exhausted")))
        }
    }

    pub fn text_reply(text: &str) -> anyhow::Result<ChatReply> {
        Ok(ChatReply {
            content: Some(text.to_string()),
            tool_calls: Vec::new(),
        })
    }

    pub fn tool_reply(calls: Vec<ToolCallRequest>) -> anyhow::Result<ChatReply> {
        Ok(ChatReply {
            content: None,
            tool_calls: calls,
        })
    }
}
