use std::time::Duration;

use thiserror::Error;

/// Failures that end a query. Each carries the round it happened on so callers can decide
/// whether a retry is worthwhile.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("model call failed on round {round}: {source:#}")]
    ModelCall {
        round: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("model call timed out after {timeout:?} on round {round}")]
    ModelTimeout { round: usize, timeout: Duration },

    #[error("final answer failed validation on round {round}: {reason}")]
    Validation { round: usize, reason: String },

    #[error("no content in final response (round {round})")]
    EmptyFinalResponse { round: usize },

    #[error("max iterations ({max_iterations}) reached without a final answer")]
    IterationsExhausted { max_iterations: usize },

    #[error("invalid agent configuration: {0}")]
    InvalidConfig(String),
}

/// A tool call that could not be turned into an invocation. Always rendered back to the model
/// as an error payload.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ToolCallError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid JSON arguments: {0}")]
    InvalidArguments(String),
}
