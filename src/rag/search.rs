use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::{error, info, instrument, warn};

use super::embed::SharedEmbeddingsProvider;
use super::flat_index::FlatL2Index;
use super::types::{Chunk, ChunkKind, IndexMetadata, SearchHit};

/// One kind's vectors together with that kind's chunks, position-aligned.
struct KindIndex {
    vectors: FlatL2Index,
    chunks: Vec<Chunk>,
}

/// Read-only view over one index directory. Fully loaded at construction and never mutated,
/// so a single instance can serve any number of concurrent queries.
pub struct Searcher {
    index_dir: PathBuf,
    embedder: SharedEmbeddingsProvider,
    metadata: Option<IndexMetadata>,
    file_index: Option<KindIndex>,
    function_index: Option<KindIndex>,
}

impl Searcher {
    /// Load whatever the directory holds. Missing or unreadable pieces are logged and leave the
    /// affected kind unsearchable rather than failing construction.
    pub fn load(index_dir: impl Into<PathBuf>, embedder: SharedEmbeddingsProvider) -> Self {
        let index_dir = index_dir.into();
        let metadata = match read_metadata(&index_dir) {
            Ok(metadata) => metadata,
            Err(err) => {
                error!(dir = %index_dir.display(), ?err, "Failed to load index metadata");
                None
            }
        };

        let (file_index, function_index) = match &metadata {
            Some(metadata) => {
                info!(
                    dir = %index_dir.display(),
                    chunks = metadata.chunks.len(),
                    "Loaded index metadata"
                );
                (
                    load_kind(&index_dir, metadata, ChunkKind::File),
                    load_kind(&index_dir, metadata, ChunkKind::Function),
                )
            }
            None => {
                warn!(dir = %index_dir.display(), "No index metadata found");
                (None, None)
            }
        };

        Self {
            index_dir,
            embedder,
            metadata,
            file_index,
            function_index,
        }
    }

    pub fn index_dir(&self) -> &Path {
        &self.index_dir
    }

    pub fn metadata(&self) -> Option<&IndexMetadata> {
        self.metadata.as_ref()
    }

    fn kind_index(&self, kind: ChunkKind) -> Option<&KindIndex> {
        match kind {
            ChunkKind::File => self.file_index.as_ref(),
            ChunkKind::Function => self.function_index.as_ref(),
        }
    }

    /// Number of searchable vectors for `kind` (zero when its structure is absent).
    pub fn vector_count(&self, kind: ChunkKind) -> usize {
        self.kind_index(kind).map_or(0, |index| index.vectors.len())
    }

    /// Search by a kind name as the model supplies it. Unknown kinds yield no results.
    pub async fn search(
        &self,
        query: &str,
        kind: &str,
        top_k: usize,
    ) -> anyhow::Result<Vec<SearchHit>> {
        match kind.parse::<ChunkKind>() {
            Ok(kind) => self.search_kind(query, kind, top_k).await,
            Err(err) => {
                warn!(kind, %err, "Invalid index kind requested");
                Ok(Vec::new())
            }
        }
    }

    /// Top-`k` chunks of `kind` closest to `query`, ascending distance. Only the query embedding
    /// can fail; an absent or empty index returns an empty list.
    #[instrument(skip(self, query))]
    pub async fn search_kind(
        &self,
        query: &str,
        kind: ChunkKind,
        top_k: usize,
    ) -> anyhow::Result<Vec<SearchHit>> {
        let Some(index) = self.kind_index(kind).filter(|index| !index.vectors.is_empty()) else {
            warn!("Index is not available or empty");
            return Ok(Vec::new());
        };
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let query_vector = self
            .embedder
            .embed(query)
            .await
            .context("Failed to embed search query")?;

        let neighbors = index
            .vectors
            .search(&query_vector, top_k.min(index.vectors.len()))?;

        let hits: Vec<SearchHit> = neighbors
            .into_iter()
            .filter_map(|(position, distance)| {
                index
                    .chunks
                    .get(position)
                    .map(|chunk| SearchHit::from_chunk(chunk, distance))
            })
            .collect();

        info!(results = hits.len(), "Search complete");
        Ok(hits)
    }

    /// Stored content of an indexed file, else whatever is on disk at that path.
    pub fn get_full_content(&self, file_path: &str) -> Option<String> {
        let indexed = self.metadata.as_ref().and_then(|metadata| {
            metadata
                .chunks_of(ChunkKind::File)
                .find(|chunk| chunk.file_path == file_path)
                .map(|chunk| chunk.content.clone())
        });

        indexed.or_else(|| fs::read_to_string(file_path).ok())
    }

    /// Paths of every indexed file, sorted and deduplicated.
    pub fn indexed_files(&self) -> Vec<String> {
        self.metadata
            .as_ref()
            .map(|metadata| {
                metadata
                    .chunks_of(ChunkKind::File)
                    .map(|chunk| chunk.file_path.clone())
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn read_metadata(index_dir: &Path) -> anyhow::Result<Option<IndexMetadata>> {
    let path = index_dir.join(IndexMetadata::FILE_NAME);
    if !path.exists() {
        return Ok(None);
    }

    let raw = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let metadata = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(Some(metadata))
}

/// Load one kind's structure, refusing it when it was written by another build or its size
/// disagrees with the metadata.
fn load_kind(index_dir: &Path, metadata: &IndexMetadata, kind: ChunkKind) -> Option<KindIndex> {
    let path = index_dir.join(kind.index_file_name());
    if !path.exists() {
        return None;
    }

    let vectors = match FlatL2Index::load(&path) {
        Ok(vectors) => vectors,
        Err(err) => {
            warn!(%kind, ?err, "Failed to load index; kind disabled");
            return None;
        }
    };

    if vectors.build_id() != metadata.build_id {
        error!(
            %kind,
            index_build = vectors.build_id(),
            metadata_build = %metadata.build_id,
            "Index was written by a different build than the metadata; kind disabled"
        );
        return None;
    }

    let chunks: Vec<Chunk> = metadata.chunks_of(kind).cloned().collect();
    if vectors.len() != chunks.len() {
        error!(
            %kind,
            vectors = vectors.len(),
            chunks = chunks.len(),
            "Index does not line up with metadata; kind disabled"
        );
        return None;
    }

    info!(%kind, vectors = vectors.len(), "Loaded index");
    Some(KindIndex { vectors, chunks })
}
