use async_trait::async_trait;

use super::embed::EmbeddingsProvider;

/// Deterministic offline embedder: hashed bag-of-tokens, L2-normalized.
///
/// Identical texts map to identical vectors, and texts sharing vocabulary land close together,
/// which is enough for offline indexing and for exercising the retrieval path without a network.
#[derive(Debug, Clone)]
pub struct HashEmbeddings {
    dimension: usize,
}

impl HashEmbeddings {
    pub const DEFAULT_DIMENSION: usize = 256;

    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in tokenize(text) {
            let digest = blake3::hash(token.as_bytes());
            let bytes = digest.as_bytes();
            let bucket = u64::from_le_bytes([
                bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
            ]) as usize
                % self.dimension;
            let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        vector
    }
}

impl Default for HashEmbeddings {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DIMENSION)
    }
}

#[async_trait]
impl EmbeddingsProvider for HashEmbeddings {
    async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| self.vectorize(text)).collect())
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn identical_texts_share_a_vector() {
        let embedder = HashEmbeddings::new(64);
        let a = embedder.embed("def parse_config(path)").await.expect("embed");
        let b = embedder.embed("def parse_config(path)").await.expect("embed");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        let norm: f32 = a.iter().map(|v| v * v).sum();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn empty_text_is_zero_vector() {
        let embedder = HashEmbeddings::new(8);
        let v = embedder.embed("  ").await.expect("embed");
        assert!(v.iter().all(|x| *x == 0.0));
    }
}
