use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{ensure, Context};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};
use walkdir::{DirEntry, WalkDir};

use super::chunker::chunk_file;
use super::config::IndexConfig;
use super::embed::{embed_in_batches, SharedEmbeddingsProvider};
use super::extract::{FunctionSpanExtractor, SharedSpanExtractor};
use super::flat_index::FlatL2Index;
use super::types::{Chunk, ChunkKind, IndexMetadata, IndexSummary};

/// Directory names never descended into while collecting sources.
pub const IGNORED_DIRS: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    ".venv",
    "venv",
    "node_modules",
    "__pycache__",
    ".pytest_cache",
    ".mypy_cache",
    "target",
    "dist",
    "build",
    ".idea",
    ".vscode",
];

/// Offline half of the system: chunks a source tree, embeds it, and writes an index directory.
pub struct IndexBuilder {
    embedder: SharedEmbeddingsProvider,
    extractor: SharedSpanExtractor,
    config: IndexConfig,
}

impl IndexBuilder {
    pub fn new(
        embedder: SharedEmbeddingsProvider,
        extractor: SharedSpanExtractor,
        config: IndexConfig,
    ) -> Self {
        Self {
            embedder,
            extractor,
            config: config.normalized(),
        }
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Index every recognized file under `root` into `output_dir`.
    ///
    /// Per-file read or extraction problems are logged and skipped; an embedding failure or a
    /// persistence failure aborts the build and leaves the previous `metadata.json` in place.
    #[instrument(skip_all, fields(root = %root.display(), output = %output_dir.display()))]
    pub async fn build(&self, root: &Path, output_dir: &Path) -> anyhow::Result<IndexSummary> {
        let started = Instant::now();
        ensure!(
            root.is_dir(),
            "Codebase path {} is not a directory",
            root.display()
        );
        fs::create_dir_all(output_dir).with_context(|| {
            format!("Failed to create output directory {}", output_dir.display())
        })?;

        let files = collect_source_files(root, &self.config)?;
        info!(
            files = files.len(),
            workers = self.config.max_workers,
            "Collected source files"
        );

        let chunks = self.process_files(&files).await;
        let metadata = IndexMetadata::new(root.to_string_lossy(), files.len(), chunks);
        info!(
            total = metadata.total_chunks,
            file_chunks = metadata.file_chunks,
            function_chunks = metadata.function_chunks,
            build_id = %metadata.build_id,
            "Chunking complete"
        );

        let file_index = self.embed_kind(&metadata, ChunkKind::File).await?;
        let function_index = self.embed_kind(&metadata, ChunkKind::Function).await?;

        persist_index(
            output_dir,
            &[
                (ChunkKind::File, file_index.as_ref()),
                (ChunkKind::Function, function_index.as_ref()),
            ],
            &metadata,
        )?;

        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            files = metadata.total_files,
            chunks = metadata.total_chunks,
            "Indexing complete"
        );

        Ok(IndexSummary {
            status: "success".to_string(),
            total_files: metadata.total_files,
            total_chunks: metadata.total_chunks,
            file_chunks: metadata.file_chunks,
            function_chunks: metadata.function_chunks,
            output_dir: output_dir.to_string_lossy().to_string(),
        })
    }

    /// Chunk files on a bounded pool. The result is ordered by file position in `files`,
    /// whatever order the workers finish in.
    async fn process_files(&self, files: &[PathBuf]) -> Vec<Chunk> {
        let total = files.len();
        let semaphore = Arc::new(Semaphore::new(self.config.max_workers));
        let mut tasks = JoinSet::new();

        for (position, path) in files.iter().enumerate() {
            let semaphore = semaphore.clone();
            let extractor = self.extractor.clone();
            let path = path.clone();
            let max_extract_bytes = self.config.max_extract_bytes;

            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .context("worker pool closed")?;
                let chunks = process_file(extractor.as_ref(), &path, max_extract_bytes).await;
                Ok::<_, anyhow::Error>((position, chunks))
            });
        }

        let mut per_file: Vec<Vec<Chunk>> = vec![Vec::new(); total];
        let mut completed = 0usize;
        while let Some(joined) = tasks.join_next().await {
            completed += 1;
            match joined {
                Ok(Ok((position, chunks))) => per_file[position] = chunks,
                Ok(Err(err)) => warn!(?err, "File task aborted"),
                Err(err) => error!(?err, "File task panicked; its chunks are dropped"),
            }
            debug!(completed, total, "File processing progress");
        }

        per_file.into_iter().flatten().collect()
    }

    async fn embed_kind(
        &self,
        metadata: &IndexMetadata,
        kind: ChunkKind,
    ) -> anyhow::Result<Option<FlatL2Index>> {
        let texts: Vec<String> = metadata.chunks_of(kind).map(|c| c.content.clone()).collect();
        if texts.is_empty() {
            info!(%kind, "No chunks of this kind; skipping its index");
            return Ok(None);
        }

        let vectors = embed_in_batches(
            self.embedder.as_ref(),
            &texts,
            self.config.embed_batch_size,
            kind.as_str(),
        )
        .await?;

        let index = FlatL2Index::from_vectors(&vectors)
            .with_context(|| format!("Failed to build {kind} index"))?
            .with_build_id(metadata.build_id.clone());
        info!(%kind, vectors = index.len(), dimension = index.dimension(), "Built index");
        Ok(Some(index))
    }
}

#[instrument(level = "debug", skip_all, fields(file = %path.display()))]
async fn process_file(
    extractor: &dyn FunctionSpanExtractor,
    path: &Path,
    max_extract_bytes: usize,
) -> Vec<Chunk> {
    let display = path.to_string_lossy().to_string();
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) => {
            warn!(%err, "Failed to read file; skipping");
            return Vec::new();
        }
    };

    let spans = if content.len() > max_extract_bytes {
        warn!(
            bytes = content.len(),
            limit = max_extract_bytes,
            "Large file; skipping function extraction"
        );
        Vec::new()
    } else {
        extractor.extract(&display, &content).await
    };

    let chunks = chunk_file(&display, &content, &spans);
    debug!(chunks = chunks.len(), "File chunked");
    chunks
}

pub(crate) fn is_ignored_dir(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| IGNORED_DIRS.contains(&name))
}

/// Recognized source files under `root`, sorted so every build sees the same order.
pub fn collect_source_files(root: &Path, config: &IndexConfig) -> anyhow::Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for entry in WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !is_ignored_dir(entry))
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!(%err, "Skipping unreadable directory entry");
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let recognized = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| config.extensions.contains(&ext.to_ascii_lowercase()));
        if recognized {
            files.push(entry.into_path());
        }
    }

    files.sort();
    Ok(files)
}

/// Write the per-kind structures, then `metadata.json` last. Each artifact lands under a
/// temporary name and is renamed into place; a kind without chunks loses any stale structure.
/// Structures carry the metadata's build id, so a directory caught between renames is refused
/// at load time rather than mixing two builds.
fn persist_index(
    output_dir: &Path,
    indices: &[(ChunkKind, Option<&FlatL2Index>)],
    metadata: &IndexMetadata,
) -> anyhow::Result<()> {
    for (kind, index) in indices {
        let target = output_dir.join(kind.index_file_name());
        match index {
            Some(index) => write_then_rename(&target, |tmp| index.save(tmp))?,
            None if target.exists() => fs::remove_file(&target)
                .with_context(|| format!("Failed to remove stale {}", target.display()))?,
            None => {}
        }
    }

    let target = output_dir.join(IndexMetadata::FILE_NAME);
    write_then_rename(&target, |tmp| {
        let body = serde_json::to_vec_pretty(metadata).context("Failed to encode metadata")?;
        fs::write(tmp, body).with_context(|| format!("Failed to write {}", tmp.display()))
    })?;

    debug!(dir = %output_dir.display(), "Index artifacts persisted");
    Ok(())
}

fn write_then_rename(
    target: &Path,
    write: impl FnOnce(&Path) -> anyhow::Result<()>,
) -> anyhow::Result<()> {
    let tmp = target.with_extension("partial");
    write(&tmp)?;
    fs::rename(&tmp, target)
        .with_context(|| format!("Failed to move {} into place", target.display()))
}
