pub mod service;

pub use service::{AnswerOptions, IndexStatus, QueryService};
