use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::llm_client::{ChatMessage, ChatRequest, ResponseSchema, SharedChatModel};

use super::syntax;
use super::types::FunctionSpan;

pub type SharedSpanExtractor = Arc<dyn FunctionSpanExtractor>;

/// Locates function/method definitions in a file. Never fails: a problem yields no spans,
/// and the file is still indexed at file granularity.
#[async_trait]
pub trait FunctionSpanExtractor: Send + Sync {
    async fn extract(&self, file_path: &str, content: &str) -> Vec<FunctionSpan>;
}

/// Asks a chat model for spans under a strict JSON schema.
pub struct LlmSpanExtractor {
    model: SharedChatModel,
    model_name: String,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct SpanListing {
    functions: Vec<RawSpan>,
}

#[derive(Debug, Deserialize)]
struct RawSpan {
    function_name: String,
    start_line: i64,
    end_line: i64,
}

impl LlmSpanExtractor {
    const SYSTEM_PROMPT: &'static str =
        "You are a code analysis expert. Reply with a valid JSON object only, no explanations.";

    pub fn new(model: SharedChatModel, model_name: impl Into<String>, timeout: Duration) -> Self {
        Self {
            model,
            model_name: model_name.into(),
            timeout,
        }
    }

    pub fn response_schema() -> ResponseSchema {
        ResponseSchema {
            name: "function_parser",
            schema: json!({
                "type": "object",
                "properties": {
                    "functions": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "function_name": {"type": "string"},
                                "start_line": {"type": "integer"},
                                "end_line": {"type": "integer"}
                            },
                            "required": ["function_name", "start_line", "end_line"],
                            "additionalProperties": false
                        }
                    }
                },
                "required": ["functions"],
                "additionalProperties": false
            }),
        }
    }

    fn compose_prompt(file_path: &str, content: &str) -> String {
        format!(
            "Analyze the following source file and identify every function, including class \
             methods.\n\nFile path: {file_path}\n\nCode:\n```\n{content}\n```\n\nReturn a JSON \
             object with a \"functions\" array. Each entry has:\n- function_name: the function \
             name\n- start_line: first line (1-based)\n- end_line: last line (inclusive)\n\nIf \
             the file has no functions, return {{\"functions\": []}}."
        )
    }

    async fn request_spans(&self, file_path: &str, content: &str) -> anyhow::Result<Vec<FunctionSpan>> {
        let request = ChatRequest::new(
            self.model_name.as_str(),
            vec![
                ChatMessage::System(Self::SYSTEM_PROMPT.to_string()),
                ChatMessage::User(Self::compose_prompt(file_path, content)),
            ],
        )
        .with_response_schema(Self::response_schema());

        let reply = tokio::time::timeout(self.timeout, self.model.chat(request))
            .await
            .with_context(|| format!("span extraction timed out after {:?}", self.timeout))??;

        let body = reply.text().context("span extraction reply had no content")?;
        parse_span_listing(body)
    }
}

#[async_trait]
impl FunctionSpanExtractor for LlmSpanExtractor {
    async fn extract(&self, file_path: &str, content: &str) -> Vec<FunctionSpan> {
        let started = Instant::now();
        match self.request_spans(file_path, content).await {
            Ok(spans) => {
                debug!(
                    file = file_path,
                    spans = spans.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Function spans extracted"
                );
                spans
            }
            Err(err) => {
                warn!(
                    file = file_path,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    error = %format!("{err:#}"),
                    "Function span extraction failed; indexing file-level only"
                );
                Vec::new()
            }
        }
    }
}

/// Parse the model's `{"functions": [...]}` reply. Entries with a non-positive end line are
/// discarded; a non-positive start line is raised to 1. Range clamping happens in the chunker.
fn parse_span_listing(body: &str) -> anyhow::Result<Vec<FunctionSpan>> {
    let listing: SpanListing =
        serde_json::from_str(body).context("span extraction reply was not the expected JSON")?;

    Ok(listing
        .functions
        .into_iter()
        .filter(|raw| raw.end_line >= 1)
        .map(|raw| {
            FunctionSpan::new(
                raw.function_name,
                raw.start_line.max(1) as usize,
                raw.end_line as usize,
            )
        })
        .collect())
}

/// Finds spans with tree-sitter for the languages it knows; other files get none.
#[derive(Debug, Default, Clone)]
pub struct SyntaxSpanExtractor;

#[async_trait]
impl FunctionSpanExtractor for SyntaxSpanExtractor {
    async fn extract(&self, file_path: &str, content: &str) -> Vec<FunctionSpan> {
        let Some(lang) = syntax::language_from_extension(file_path) else {
            return Vec::new();
        };

        match syntax::function_spans(content, lang) {
            Ok(spans) => spans,
            Err(err) => {
                warn!(file = file_path, ?err, "Syntax span extraction failed");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_client::testing::{text_reply, ScriptedChatModel};

    #[tokio::test]
    async fn llm_spans_are_parsed_from_schema_reply() {
        let model = ScriptedChatModel::new(vec![text_reply(
            r#"{"functions":[{"function_name":"f","start_line":3,"end_line":5},{"function_name":"g","start_line":0,"end_line":2}]}"#,
        )]);
        let extractor = LlmSpanExtractor::new(model.clone(), "parser", Duration::from_secs(5));

        let spans = extractor.extract("a.py", "irrelevant").await;

        assert_eq!(
            spans,
            vec![FunctionSpan::new("f", 3, 5), FunctionSpan::new("g", 1, 2)]
        );
        let requests = model.recorded();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].tools.is_empty());
        assert_eq!(
            requests[0].response_schema.as_ref().map(|s| s.name),
            Some("function_parser")
        );
    }

    #[tokio::test]
    async fn malformed_reply_degrades_to_no_spans() {
        let model = ScriptedChatModel::new(vec![text_reply("functions: f at 3")]);
        let extractor = LlmSpanExtractor::new(model, "parser", Duration::from_secs(5));
        assert!(extractor.extract("a.py", "def f(): pass").await.is_empty());
    }

    #[tokio::test]
    async fn model_error_degrades_to_no_spans() {
        let model = ScriptedChatModel::new(vec![Err(anyhow::anyhow!("503 upstream"))]);
        let extractor = LlmSpanExtractor::new(model, "parser", Duration::from_secs(5));
        assert!(extractor.extract("a.py", "def f(): pass").await.is_empty());
    }

    #[tokio::test]
    async fn syntax_extractor_skips_unknown_languages() {
        let spans = SyntaxSpanExtractor.extract("notes.go", "func main() {}").await;
        assert!(spans.is_empty());
    }
}
