use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, instrument};

use crate::agents::{AgentConfig, AgentError, CodebaseAgent, FinalAnswer};
use crate::llm_client::SharedChatModel;
use crate::rag::{
    ChunkKind, IndexBuilder, IndexConfig, IndexSummary, Searcher, SharedEmbeddingsProvider,
    SharedSpanExtractor,
};

/// What the serving layer currently has loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexStatus {
    pub loaded: bool,
    pub index_dir: Option<String>,
    pub codebase_path: Option<String>,
    pub total_files: usize,
    pub file_vectors: usize,
    pub function_vectors: usize,
    pub indexed_at: Option<DateTime<Utc>>,
}

/// Per-query overrides of the agent defaults.
#[derive(Debug, Clone, Default)]
pub struct AnswerOptions {
    pub model: Option<String>,
    pub max_iterations: Option<usize>,
}

/// Owns the current searcher and hands every query its own snapshot of it. A rebuild loads a
/// fresh searcher and swaps it in whole; queries already running keep the one they started with.
pub struct QueryService {
    chat_model: SharedChatModel,
    embedder: SharedEmbeddingsProvider,
    extractor: SharedSpanExtractor,
    index_config: IndexConfig,
    agent_config: AgentConfig,
    searcher: ArcSwapOption<Searcher>,
}

impl QueryService {
    pub fn new(
        chat_model: SharedChatModel,
        embedder: SharedEmbeddingsProvider,
        extractor: SharedSpanExtractor,
        index_config: IndexConfig,
        agent_config: AgentConfig,
    ) -> Self {
        Self {
            chat_model,
            embedder,
            extractor,
            index_config,
            agent_config,
            searcher: ArcSwapOption::empty(),
        }
    }

    pub fn searcher(&self) -> Option<Arc<Searcher>> {
        self.searcher.load_full()
    }

    /// Point queries at an existing index directory.
    pub fn load_index(&self, index_dir: impl Into<PathBuf>) -> IndexStatus {
        let searcher = Searcher::load(index_dir, self.embedder.clone());
        self.searcher.store(Some(Arc::new(searcher)));
        self.status()
    }

    /// Index `root` into `output_dir`, then swap in a searcher over the result. On failure the
    /// previously loaded searcher stays in place.
    #[instrument(skip_all, fields(root = %root.display(), output = %output_dir.display()))]
    pub async fn build_index(
        &self,
        root: &Path,
        output_dir: &Path,
        extensions: Option<&[String]>,
        max_workers: Option<usize>,
    ) -> anyhow::Result<IndexSummary> {
        let mut config = self.index_config.clone();
        if let Some(extensions) = extensions {
            config = config.with_extensions(extensions);
        }
        if let Some(max_workers) = max_workers {
            config.max_workers = max_workers;
        }

        let builder = IndexBuilder::new(self.embedder.clone(), self.extractor.clone(), config);
        let summary = builder.build(root, output_dir).await?;

        let status = self.load_index(output_dir);
        info!(
            file_vectors = status.file_vectors,
            function_vectors = status.function_vectors,
            "Swapped in rebuilt index"
        );
        Ok(summary)
    }

    pub async fn answer(
        &self,
        question: &str,
        options: AnswerOptions,
    ) -> Result<FinalAnswer, AgentError> {
        let mut config = self.agent_config.clone();
        if let Some(model) = options.model {
            config = config.with_model(model);
        }
        if let Some(max_iterations) = options.max_iterations {
            config = config.with_max_iterations(max_iterations);
        }

        let agent = CodebaseAgent::new(self.chat_model.clone(), config)?;
        agent.answer(question, self.searcher()).await
    }

    pub fn status(&self) -> IndexStatus {
        let Some(searcher) = self.searcher() else {
            return IndexStatus {
                loaded: false,
                index_dir: None,
                codebase_path: None,
                total_files: 0,
                file_vectors: 0,
                function_vectors: 0,
                indexed_at: None,
            };
        };

        let metadata = searcher.metadata();
        IndexStatus {
            loaded: metadata.is_some(),
            index_dir: Some(searcher.index_dir().to_string_lossy().to_string()),
            codebase_path: metadata.map(|m| m.codebase_path.clone()),
            total_files: metadata.map_or(0, |m| m.total_files),
            file_vectors: searcher.vector_count(ChunkKind::File),
            function_vectors: searcher.vector_count(ChunkKind::Function),
            indexed_at: metadata.and_then(|m| m.indexed_at),
        }
    }
}
