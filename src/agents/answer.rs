use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::llm_client::ResponseSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Confidence::High => "high",
            Confidence::Medium => "medium",
            Confidence::Low => "low",
        };
        f.write_str(label)
    }
}

/// Terminal output of a query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalAnswer {
    pub answer: String,
    pub confidence: Confidence,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub reasoning: Option<String>,
}

/// Why a final-round reply could not be read as a [`FinalAnswer`].
#[derive(Debug)]
pub enum AnswerParseError {
    /// Not JSON at all.
    Malformed(serde_json::Error),
    /// JSON, but not the answer shape (missing field, unknown confidence, wrong types).
    Invalid(serde_json::Error),
}

impl FinalAnswer {
    pub const EARLY_EXIT_REASONING: &'static str = "Agent provided answer without using tools";
    pub const PARSE_FALLBACK_REASONING: &'static str =
        "Structured output parsing failed, using raw content";

    /// Answer given on a non-final round without touching any tool.
    pub fn early_exit(text: impl Into<String>) -> Self {
        Self {
            answer: text.into(),
            confidence: Confidence::High,
            sources: Vec::new(),
            reasoning: Some(Self::EARLY_EXIT_REASONING.to_string()),
        }
    }

    /// Wraps final-round text that was not JSON.
    pub fn degraded(raw: impl Into<String>) -> Self {
        Self {
            answer: raw.into(),
            confidence: Confidence::Medium,
            sources: Vec::new(),
            reasoning: Some(Self::PARSE_FALLBACK_REASONING.to_string()),
        }
    }

    pub fn from_json(content: &str) -> Result<Self, AnswerParseError> {
        let value: Value = serde_json::from_str(content).map_err(AnswerParseError::Malformed)?;
        serde_json::from_value(value).map_err(AnswerParseError::Invalid)
    }

    pub fn response_schema() -> ResponseSchema {
        ResponseSchema {
            name: "final_answer",
            schema: json!({
                "type": "object",
                "properties": {
                    "answer": {
                        "type": "string",
                        "description": "The comprehensive answer to the user's question"
                    },
                    "confidence": {
                        "type": "string",
                        "enum": ["high", "medium", "low"],
                        "description": "Confidence level"
                    },
                    "sources": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "File paths or tool results used to produce the answer"
                    },
                    "reasoning": {
                        "type": ["string", "null"],
                        "description": "Brief explanation of the reasoning process"
                    }
                },
                "required": ["answer", "confidence", "sources", "reasoning"],
                "additionalProperties": false
            }),
        }
    }
}
