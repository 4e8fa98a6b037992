use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{ensure, Context};
use serde::{Deserialize, Serialize};

/// Exhaustive squared-L2 nearest-neighbor structure over fixed-dimension vectors.
///
/// Vectors are stored row-major; row `i` is the i-th vector added. `build_id` ties a persisted
/// structure to the metadata written by the same build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatL2Index {
    build_id: String,
    dimension: usize,
    data: Vec<f32>,
}

impl FlatL2Index {
    pub fn new(dimension: usize) -> Self {
        Self {
            build_id: String::new(),
            dimension,
            data: Vec::new(),
        }
    }

    pub fn with_build_id(mut self, build_id: impl Into<String>) -> Self {
        self.build_id = build_id.into();
        self
    }

    pub fn build_id(&self) -> &str {
        &self.build_id
    }

    /// Build from embeddings, rejecting any vector whose length differs from the first one's.
    pub fn from_vectors(vectors: &[Vec<f32>]) -> anyhow::Result<Self> {
        let dimension = vectors
            .first()
            .map(Vec::len)
            .context("cannot build an index from zero vectors")?;
        let mut index = Self::new(dimension);
        for vector in vectors {
            index.add(vector)?;
        }
        Ok(index)
    }

    pub fn add(&mut self, vector: &[f32]) -> anyhow::Result<()> {
        ensure!(
            vector.len() == self.dimension,
            "vector has dimension {} but index expects {}",
            vector.len(),
            self.dimension
        );
        self.data.extend_from_slice(vector);
        Ok(())
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        if self.dimension == 0 {
            0
        } else {
            self.data.len() / self.dimension
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn vector(&self, position: usize) -> Option<&[f32]> {
        let start = position.checked_mul(self.dimension)?;
        self.data.get(start..start + self.dimension)
    }

    /// The `k` closest stored vectors as `(position, squared distance)`, closest first.
    /// Ties keep the lower position first.
    pub fn search(&self, query: &[f32], k: usize) -> anyhow::Result<Vec<(usize, f32)>> {
        ensure!(
            query.len() == self.dimension,
            "query has dimension {} but index expects {}",
            query.len(),
            self.dimension
        );
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(usize, f32)> = self
            .data
            .chunks_exact(self.dimension)
            .enumerate()
            .map(|(position, row)| (position, squared_l2(row, query)))
            .collect();

        scored.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        scored.truncate(k.min(scored.len()));
        Ok(scored)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let file = fs::File::create(path)
            .with_context(|| format!("Failed to create index file {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        bincode::serialize_into(&mut writer, self)
            .with_context(|| format!("Failed to encode index file {}", path.display()))?;
        writer
            .flush()
            .with_context(|| format!("Failed to flush index file {}", path.display()))?;
        Ok(())
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let file = fs::File::open(path)
            .with_context(|| format!("Failed to open index file {}", path.display()))?;
        let index: Self = bincode::deserialize_from(BufReader::new(file))
            .with_context(|| format!("Failed to decode index file {}", path.display()))?;
        ensure!(
            index.dimension > 0 && index.data.len() % index.dimension == 0,
            "index file {} is corrupt (dimension {}, {} values)",
            path.display(),
            index.dimension,
            index.data.len()
        );
        Ok(index)
    }
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}
