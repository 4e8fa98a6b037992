use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Granularity of a chunk and of the index it lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    File,
    Function,
}

impl ChunkKind {
    pub const ALL: [ChunkKind; 2] = [ChunkKind::File, ChunkKind::Function];

    pub fn as_str(self) -> &'static str {
        match self {
            ChunkKind::File => "file",
            ChunkKind::Function => "function",
        }
    }

    /// File name of the persisted nearest-neighbor structure for this kind.
    pub fn index_file_name(self) -> &'static str {
        match self {
            ChunkKind::File => "file_index.bin",
            ChunkKind::Function => "function_index.bin",
        }
    }
}

impl fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChunkKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(ChunkKind::File),
            "function" => Ok(ChunkKind::Function),
            other => anyhow::bail!("unknown chunk kind '{other}' (expected file or function)"),
        }
    }
}

/// A retrievable slice of source text. Line numbers are 1-based and inclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    #[serde(rename = "type")]
    pub kind: ChunkKind,
    pub file_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_name: Option<String>,
    pub content: String,
    pub start_line: usize,
    pub end_line: usize,
}

/// A function/method location reported by a span extractor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionSpan {
    #[serde(rename = "function_name")]
    pub name: String,
    pub start_line: usize,
    pub end_line: usize,
}

impl FunctionSpan {
    pub fn new(name: impl Into<String>, start_line: usize, end_line: usize) -> Self {
        Self {
            name: name.into(),
            start_line,
            end_line,
        }
    }
}

/// Persisted description of one index directory. `chunks` is insertion-ordered; the i-th chunk of
/// a kind sits at position i of that kind's vector structure. `build_id` is stamped into every
/// structure written by the same build, so a searcher can tell when the two disagree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub codebase_path: String,
    pub total_files: usize,
    pub total_chunks: usize,
    pub file_chunks: usize,
    pub function_chunks: usize,
    #[serde(default)]
    pub indexed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub build_id: String,
    pub chunks: Vec<Chunk>,
}

impl IndexMetadata {
    pub const FILE_NAME: &'static str = "metadata.json";

    pub fn new(codebase_path: impl Into<String>, total_files: usize, chunks: Vec<Chunk>) -> Self {
        let file_chunks = chunks.iter().filter(|c| c.kind == ChunkKind::File).count();
        let indexed_at = Utc::now();
        Self {
            codebase_path: codebase_path.into(),
            total_files,
            total_chunks: chunks.len(),
            file_chunks,
            function_chunks: chunks.len() - file_chunks,
            indexed_at: Some(indexed_at),
            build_id: build_id(&indexed_at, &chunks),
            chunks,
        }
    }

    /// Chunks of one kind, in the order their vectors were inserted.
    pub fn chunks_of(&self, kind: ChunkKind) -> impl Iterator<Item = &Chunk> {
        self.chunks.iter().filter(move |chunk| chunk.kind == kind)
    }
}

/// Digest of the build time and every chunk, in order.
fn build_id(indexed_at: &DateTime<Utc>, chunks: &[Chunk]) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(indexed_at.to_rfc3339().as_bytes());
    for chunk in chunks {
        hasher.update(&[0]);
        hasher.update(chunk.kind.as_str().as_bytes());
        hasher.update(chunk.file_path.as_bytes());
        hasher.update(chunk.function_name.as_deref().unwrap_or_default().as_bytes());
        hasher.update(&chunk.start_line.to_le_bytes());
        hasher.update(&chunk.end_line.to_le_bytes());
        hasher.update(chunk.content.as_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

/// Summary returned to callers of an index build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSummary {
    pub status: String,
    pub total_files: usize,
    pub total_chunks: usize,
    pub file_chunks: usize,
    pub function_chunks: usize,
    pub output_dir: String,
}

/// One nearest-neighbor result, ordered by ascending distance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub file_path: String,
    pub content: String,
    pub distance: f32,
    #[serde(rename = "type")]
    pub kind: ChunkKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_name: Option<String>,
    pub start_line: usize,
    pub end_line: usize,
}

impl SearchHit {
    pub fn from_chunk(chunk: &Chunk, distance: f32) -> Self {
        Self {
            file_path: chunk.file_path.clone(),
            content: chunk.content.clone(),
            distance,
            kind: chunk.kind,
            function_name: chunk.function_name.clone(),
            start_line: chunk.start_line,
            end_line: chunk.end_line,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_kind_parses_case_insensitively() {
        assert_eq!("File".parse::<ChunkKind>().expect("file"), ChunkKind::File);
        assert_eq!(
            " function ".parse::<ChunkKind>().expect("function"),
            ChunkKind::Function
        );
        assert!("class".parse::<ChunkKind>().is_err());
    }

    #[test]
    fn metadata_counts_follow_chunks() {
        let chunks = vec![
            Chunk {
                kind: ChunkKind::File,
                file_path: "a.py".into(),
                function_name: None,
                content: "x".into(),
                start_line: 1,
                end_line: 1,
            },
            Chunk {
                kind: ChunkKind::Function,
                file_path: "a.py".into(),
                function_name: Some("f".into()),
                content: "x".into(),
                start_line: 1,
                end_line: 1,
            },
        ];
        let metadata = IndexMetadata::new("root", 1, chunks);
        assert_eq!(metadata.total_chunks, 2);
        assert_eq!(metadata.file_chunks, 1);
        assert_eq!(metadata.function_chunks, 1);
        assert_eq!(metadata.chunks_of(ChunkKind::Function).count(), 1);
        assert_eq!(metadata.build_id.len(), 64);
    }

    #[test]
    fn chunk_serializes_kind_as_type_field() {
        let chunk = Chunk {
            kind: ChunkKind::File,
            file_path: "a.py".into(),
            function_name: None,
            content: "print(1)".into(),
            start_line: 1,
            end_line: 1,
        };
        let value = serde_json::to_value(&chunk).expect("serialize chunk");
        assert_eq!(value["type"], "file");
        assert!(value.get("function_name").is_none());
    }
}
