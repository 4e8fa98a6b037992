pub mod agent;
pub mod answer;
pub mod error;
pub mod tools;

pub use agent::{AgentConfig, CodebaseAgent};
pub use answer::{Confidence, FinalAnswer};
pub use error::{AgentError, ToolCallError};
pub use tools::{tool_specs, ToolInvocation, Toolbox};
