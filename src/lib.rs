//! Question answering over a codebase: a two-tier semantic index (whole files and functions)
//! plus a bounded tool-calling agent that gathers evidence before answering.

pub mod agents;
pub mod llm_client;
pub mod orchestrator;
pub mod rag;
