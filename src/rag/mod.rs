pub mod chunker;
pub mod config;
pub mod embed;
pub mod extract;
pub mod flat_index;
pub mod indexer;
pub mod mock;
pub mod search;
pub mod syntax;
pub mod types;

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use crate::llm_client::{ModelConfig, OpenAiChatModel};

pub use config::{IndexConfig, SpanBackend};
pub use embed::{EmbeddingsProvider, OpenAiEmbeddingsClient, SharedEmbeddingsProvider};
pub use extract::{FunctionSpanExtractor, LlmSpanExtractor, SharedSpanExtractor, SyntaxSpanExtractor};
pub use indexer::IndexBuilder;
pub use mock::HashEmbeddings;
pub use search::Searcher;
pub use types::{Chunk, ChunkKind, FunctionSpan, IndexMetadata, IndexSummary, SearchHit};

/// Embedder for the configured model, or the offline hash embedder when no API key is set and
/// `default_to_mock` allows it.
pub fn build_embedder_from_env(
    config: &IndexConfig,
    default_to_mock: bool,
) -> anyhow::Result<SharedEmbeddingsProvider> {
    let model_config = match ModelConfig::from_env() {
        Ok(model_config) => model_config,
        Err(err) if default_to_mock => {
            warn!(?err, "Model config missing; using offline hash embeddings");
            return Ok(Arc::new(HashEmbeddings::default()));
        }
        Err(err) => return Err(err),
    };

    let client = OpenAiEmbeddingsClient::new(&model_config, config.embedding_model.as_str())
        .context("Failed to initialize embeddings client")?;
    info!(model = %config.embedding_model, "Using OpenAI embeddings");
    Ok(Arc::new(client))
}

/// Span extractor for the configured backend. The model-backed one falls back to syntax
/// parsing when no API key is set and `default_to_mock` allows it.
pub fn build_span_extractor_from_env(
    config: &IndexConfig,
    default_to_mock: bool,
) -> anyhow::Result<SharedSpanExtractor> {
    if config.span_backend == SpanBackend::Syntax {
        return Ok(Arc::new(SyntaxSpanExtractor));
    }

    let model_config = match ModelConfig::from_env() {
        Ok(model_config) => model_config,
        Err(err) if default_to_mock => {
            warn!(?err, "Model config missing; extracting spans with tree-sitter");
            return Ok(Arc::new(SyntaxSpanExtractor));
        }
        Err(err) => return Err(err),
    };

    let model = OpenAiChatModel::shared(&model_config).context("Failed to initialize parse model")?;
    Ok(Arc::new(LlmSpanExtractor::new(
        model,
        config.parse_model.as_str(),
        config.extract_timeout,
    )))
}
