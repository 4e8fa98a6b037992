use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, ensure, Context};
use async_openai::{
    config::OpenAIConfig, types::CreateEmbeddingRequestArgs, Client as OpenAiClient,
};
use async_trait::async_trait;
use tracing::{debug, info};

use crate::llm_client::ModelConfig;

pub type SharedEmbeddingsProvider = Arc<dyn EmbeddingsProvider>;

#[async_trait]
pub trait EmbeddingsProvider: Send + Sync {
    /// One vector per input, in input order. A short or failed response is an error.
    async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;

    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])
            .await?
            .pop()
            .context("Embedding response missing data")
    }
}

pub struct OpenAiEmbeddingsClient {
    client: OpenAiClient<OpenAIConfig>,
    model: String,
    cache: Mutex<HashMap<String, Vec<f32>>>,
    cache_capacity: usize,
}

impl OpenAiEmbeddingsClient {
    pub fn new(config: &ModelConfig, model: impl Into<String>) -> anyhow::Result<Self> {
        Ok(Self {
            client: config.openai_client()?,
            model: model.into(),
            cache: Mutex::new(HashMap::new()),
            cache_capacity: 512,
        })
    }

    fn cached(&self, key: &str) -> Option<Vec<f32>> {
        self.cache.lock().ok()?.get(key).cloned()
    }

    fn remember(&self, key: String, embedding: &[f32]) {
        if let Ok(mut cache) = self.cache.lock() {
            if cache.len() >= self.cache_capacity {
                cache.clear();
            }
            cache.insert(key, embedding.to_vec());
        }
    }
}

#[async_trait]
impl EmbeddingsProvider for OpenAiEmbeddingsClient {
    async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = CreateEmbeddingRequestArgs::default()
            .model(self.model.as_str())
            .input(texts.to_vec())
            .build()?;

        let response = self
            .client
            .embeddings()
            .create(request)
            .await
            .with_context(|| format!("Embedding request for {} texts failed", texts.len()))?;

        let mut data = response.data;
        ensure!(
            data.len() == texts.len(),
            "Embedding response returned {} vectors for {} inputs",
            data.len(),
            texts.len()
        );
        data.sort_by_key(|item| item.index);
        Ok(data.into_iter().map(|item| item.embedding).collect())
    }

    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let cache_key = blake3::hash(text.as_bytes()).to_hex().to_string();
        if let Some(hit) = self.cached(&cache_key) {
            return Ok(hit);
        }

        let embedding = self
            .embed_batch(&[text.to_string()])
            .await?
            .pop()
            .context("Embedding response missing data")?;
        self.remember(cache_key, &embedding);
        Ok(embedding)
    }
}

/// Embed `texts` in consecutive batches of at most `batch_size`, preserving order.
///
/// Any failed batch aborts the whole run: a missing vector would shift every later position.
pub async fn embed_in_batches(
    provider: &dyn EmbeddingsProvider,
    texts: &[String],
    batch_size: usize,
    label: &str,
) -> anyhow::Result<Vec<Vec<f32>>> {
    let batch_size = batch_size.max(1);
    let total_batches = texts.len().div_ceil(batch_size);
    let mut vectors = Vec::with_capacity(texts.len());

    for (batch_idx, batch) in texts.chunks(batch_size).enumerate() {
        info!(
            label,
            batch = batch_idx + 1,
            total_batches,
            items = batch.len(),
            "Embedding batch"
        );
        let embedded = provider
            .embed_batch(batch)
            .await
            .with_context(|| format!("{label} embedding batch {} failed", batch_idx + 1))?;
        if embedded.len() != batch.len() {
            return Err(anyhow!(
                "{label} embedding batch {} returned {} vectors for {} inputs",
                batch_idx + 1,
                embedded.len(),
                batch.len()
            ));
        }
        vectors.extend(embedded);
    }

    debug!(label, vectors = vectors.len(), "Embedding complete");
    Ok(vectors)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::rag::mock::HashEmbeddings;

    struct CountingEmbeddings {
        inner: HashEmbeddings,
        calls: AtomicUsize,
        largest: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingsProvider for CountingEmbeddings {
        async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.largest.fetch_max(texts.len(), Ordering::SeqCst);
            self.inner.embed_batch(texts).await
        }
    }

    struct ShortEmbeddings;

    #[async_trait]
    impl EmbeddingsProvider for ShortEmbeddings {
        async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            Ok(texts.iter().skip(1).map(|_| vec![0.0; 4]).collect())
        }
    }

    #[tokio::test]
    async fn batches_respect_size_and_order() {
        let provider = CountingEmbeddings {
            inner: HashEmbeddings::new(16),
            calls: AtomicUsize::new(0),
            largest: AtomicUsize::new(0),
        };
        let texts: Vec<String> = (0..25).map(|i| format!("text number {i}")).collect();

        let vectors = embed_in_batches(&provider, &texts, 10, "file")
            .await
            .expect("embed");

        assert_eq!(vectors.len(), 25);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
        assert_eq!(provider.largest.load(Ordering::SeqCst), 10);
        let expected = provider.inner.embed(&texts[17]).await.expect("embed one");
        assert_eq!(vectors[17], expected);
    }

    #[tokio::test]
    async fn short_batch_is_fatal() {
        let texts = vec!["a".to_string(), "b".to_string()];
        let err = embed_in_batches(&ShortEmbeddings, &texts, 100, "function")
            .await
            .expect_err("short batch must fail");
        assert!(err.to_string().contains("returned 1 vectors for 2 inputs"));
    }
}
