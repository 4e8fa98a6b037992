use std::collections::BTreeSet;
use std::str::FromStr;
use std::time::Duration;

use crate::llm_client::read_env;

/// Which backend locates function spans during indexing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanBackend {
    /// Ask the parse model for spans (default).
    Llm,
    /// Parse with tree-sitter; no model calls.
    Syntax,
}

impl FromStr for SpanBackend {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "llm" | "model" => Ok(SpanBackend::Llm),
            "syntax" | "tree-sitter" | "treesitter" => Ok(SpanBackend::Syntax),
            other => anyhow::bail!("unknown span backend '{other}' (expected llm or syntax)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IndexConfig {
    pub embedding_model: String,
    pub parse_model: String,
    pub extensions: BTreeSet<String>,
    pub max_workers: usize,
    pub embed_batch_size: usize,
    pub max_extract_bytes: usize,
    pub extract_timeout: Duration,
    pub span_backend: SpanBackend,
}

impl IndexConfig {
    pub const DEFAULT_EXTENSIONS: [&'static str; 10] =
        ["py", "js", "ts", "go", "java", "cpp", "c", "rs", "rb", "php"];
    /// Upper bound the embeddings endpoint accepts per request.
    pub const MAX_EMBED_BATCH: usize = 2048;

    const EMBEDDING_MODEL_VARS: [&'static str; 2] =
        ["CODE_ORACLE_EMBEDDING_MODEL", "RAG_EMBEDDING_MODEL"];
    const PARSE_MODEL_VARS: [&'static str; 1] = ["CODE_ORACLE_PARSE_MODEL"];
    const EXTENSIONS_VARS: [&'static str; 1] = ["CODE_ORACLE_EXTENSIONS"];
    const WORKERS_VARS: [&'static str; 1] = ["CODE_ORACLE_MAX_WORKERS"];
    const BATCH_VARS: [&'static str; 1] = ["CODE_ORACLE_EMBED_BATCH"];
    const MAX_EXTRACT_VARS: [&'static str; 1] = ["CODE_ORACLE_MAX_EXTRACT_BYTES"];
    const EXTRACT_TIMEOUT_VARS: [&'static str; 1] = ["CODE_ORACLE_EXTRACT_TIMEOUT_MS"];
    const SPAN_BACKEND_VARS: [&'static str; 1] = ["CODE_ORACLE_SPANS"];

    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let extensions = read_env(&Self::EXTENSIONS_VARS)
            .map(|raw| parse_extensions(raw.split(',')))
            .filter(|set| !set.is_empty())
            .unwrap_or(defaults.extensions);

        let span_backend = match read_env(&Self::SPAN_BACKEND_VARS) {
            Some(raw) => raw.parse()?,
            None => defaults.span_backend,
        };

        let config = Self {
            embedding_model: read_env(&Self::EMBEDDING_MODEL_VARS)
                .unwrap_or(defaults.embedding_model),
            parse_model: read_env(&Self::PARSE_MODEL_VARS).unwrap_or(defaults.parse_model),
            extensions,
            max_workers: read_parsed(&Self::WORKERS_VARS).unwrap_or(defaults.max_workers),
            embed_batch_size: read_parsed(&Self::BATCH_VARS).unwrap_or(defaults.embed_batch_size),
            max_extract_bytes: read_parsed(&Self::MAX_EXTRACT_VARS)
                .unwrap_or(defaults.max_extract_bytes),
            extract_timeout: read_parsed(&Self::EXTRACT_TIMEOUT_VARS)
                .map(Duration::from_millis)
                .unwrap_or(defaults.extract_timeout),
            span_backend,
        };

        Ok(config.normalized())
    }

    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let parsed = parse_extensions(extensions);
        if !parsed.is_empty() {
            self.extensions = parsed;
        }
        self
    }

    /// Clamp worker and batch sizes into the ranges the build can honor.
    pub fn normalized(mut self) -> Self {
        self.max_workers = self.max_workers.max(1);
        self.embed_batch_size = self.embed_batch_size.clamp(1, Self::MAX_EMBED_BATCH);
        self
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            embedding_model: "text-embedding-3-small".to_string(),
            parse_model: "gpt-5-mini".to_string(),
            extensions: parse_extensions(Self::DEFAULT_EXTENSIONS),
            max_workers: 32,
            embed_batch_size: 100,
            max_extract_bytes: 50_000,
            extract_timeout: Duration::from_secs(120),
            span_backend: SpanBackend::Llm,
        }
    }
}

fn parse_extensions<I, S>(raw: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    raw.into_iter()
        .map(|ext| ext.as_ref().trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
        .collect()
}

pub(crate) fn read_parsed<T: FromStr>(candidates: &[&'static str]) -> Option<T> {
    read_env(candidates).and_then(|value| value.trim().parse().ok())
}
