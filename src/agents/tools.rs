use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use glob::Pattern;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, instrument, warn};
use walkdir::WalkDir;

use crate::llm_client::{ToolCallRequest, ToolSpec};
use crate::rag::indexer::is_ignored_dir;
use crate::rag::search::Searcher;

use super::error::ToolCallError;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SearchArgs {
    pub question: String,
    #[serde(alias = "index_type")]
    pub kind: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PathArgs {
    #[serde(alias = "file_path")]
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LsArgs {
    #[serde(default = "current_dir")]
    pub dir_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FindArgs {
    pub pattern: String,
    #[serde(default = "current_dir")]
    pub start_path: String,
}

fn default_top_k() -> usize {
    5
}

fn current_dir() -> String {
    ".".to_string()
}

/// Every tool the agent can call, each with its typed arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolInvocation {
    Search(SearchArgs),
    ReadFileFull(PathArgs),
    Cat(PathArgs),
    Ls(LsArgs),
    Find(FindArgs),
}

impl ToolInvocation {
    pub fn name(&self) -> &'static str {
        match self {
            ToolInvocation::Search(_) => "search",
            ToolInvocation::ReadFileFull(_) => "read_file_full",
            ToolInvocation::Cat(_) => "cat",
            ToolInvocation::Ls(_) => "ls",
            ToolInvocation::Find(_) => "find",
        }
    }

    /// Result field carried by this tool's payloads.
    pub fn payload_field(&self) -> &'static str {
        match self {
            ToolInvocation::Search(_) => "results",
            ToolInvocation::ReadFileFull(_) | ToolInvocation::Cat(_) => "content",
            ToolInvocation::Ls(_) => "items",
            ToolInvocation::Find(_) => "files",
        }
    }

    pub fn parse(call: &ToolCallRequest) -> Result<Self, ToolCallError> {
        match call.name.as_str() {
            "search" => parse_args(&call.arguments).map(ToolInvocation::Search),
            "read_file_full" | "list_file_content" => {
                parse_args(&call.arguments).map(ToolInvocation::ReadFileFull)
            }
            "cat" => parse_args(&call.arguments).map(ToolInvocation::Cat),
            "ls" => parse_args(&call.arguments).map(ToolInvocation::Ls),
            "find" => parse_args(&call.arguments).map(ToolInvocation::Find),
            other => Err(ToolCallError::UnknownTool(other.to_string())),
        }
    }
}

fn parse_args<T: DeserializeOwned>(raw: &str) -> Result<T, ToolCallError> {
    let raw = if raw.trim().is_empty() { "{}" } else { raw };
    serde_json::from_str(raw).map_err(|err| ToolCallError::InvalidArguments(err.to_string()))
}

/// Declared tool set offered to the model on every non-final round.
pub fn tool_specs() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: "search",
            description: "Semantic search over the indexed codebase. Use 'file' for a file-level \
                          overview and 'function' for function-level detail.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "question": {
                        "type": "string",
                        "description": "Natural language description of the code to find"
                    },
                    "kind": {
                        "type": "string",
                        "enum": ["file", "function"],
                        "description": "Which index to search"
                    },
                    "top_k": {
                        "type": "integer",
                        "description": "Number of results to return (default: 5)",
                        "default": 5
                    }
                },
                "required": ["question", "kind"]
            }),
        },
        ToolSpec {
            name: "read_file_full",
            description: "Full content of a file, e.g. one found in search results.",
            parameters: path_parameters("Path of the file to read"),
        },
        ToolSpec {
            name: "cat",
            description: "Read a file straight from the filesystem.",
            parameters: path_parameters("Path of the file to read"),
        },
        ToolSpec {
            name: "ls",
            description: "List the files and directories directly inside a directory.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "dir_path": {
                        "type": "string",
                        "description": "Directory to list (default: current directory)",
                        "default": "."
                    }
                },
                "required": []
            }),
        },
        ToolSpec {
            name: "find",
            description: "Find files and directories whose name matches a glob such as '*.py' \
                          or 'test*'.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "pattern": {
                        "type": "string",
                        "description": "File name pattern"
                    },
                    "start_path": {
                        "type": "string",
                        "description": "Directory to search from (default: current directory)",
                        "default": "."
                    }
                },
                "required": ["pattern"]
            }),
        },
    ]
}

fn path_parameters(description: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            "path": {"type": "string", "description": description}
        },
        "required": ["path"]
    })
}

fn success(field: &str, value: Value) -> Value {
    payload(field, value, None)
}

fn failure(field: &str, error: impl Into<String>) -> Value {
    payload(field, Value::Null, Some(error.into()))
}

fn payload(field: &str, value: Value, error: Option<String>) -> Value {
    let mut map = Map::new();
    map.insert("success".to_string(), Value::Bool(error.is_none()));
    map.insert(field.to_string(), value);
    map.insert("error".to_string(), error.map_or(Value::Null, Value::String));
    Value::Object(map)
}

/// Payload for a call that never reached a tool body. Known tools keep their result field, set
/// to null; an unknown tool has no field to carry.
pub fn error_payload(tool_name: &str, error: impl Into<String>) -> Value {
    match payload_field(tool_name) {
        Some(field) => failure(field, error),
        None => json!({ "success": false, "error": error.into() }),
    }
}

fn payload_field(tool_name: &str) -> Option<&'static str> {
    match tool_name {
        "search" => Some("results"),
        "read_file_full" | "list_file_content" | "cat" => Some("content"),
        "ls" => Some("items"),
        "find" => Some("files"),
        _ => None,
    }
}

/// Executes tool calls against one searcher snapshot (or none, before any index is built).
#[derive(Clone)]
pub struct Toolbox {
    searcher: Option<Arc<Searcher>>,
    timeout: Duration,
}

impl Toolbox {
    pub const NO_INDEX: &'static str = "Index not loaded. Build an index first.";
    /// Limits on a single `find` walk. The walk runs on a blocking thread that a timeout cannot
    /// cancel, so it has to stop on its own.
    pub const FIND_MAX_DEPTH: usize = 32;
    pub const FIND_MAX_VISITED: usize = 200_000;

    pub fn new(searcher: Option<Arc<Searcher>>, timeout: Duration) -> Self {
        Self { searcher, timeout }
    }

    /// Run one model-requested call. Never fails: bad arguments, unknown tools, panics and
    /// timeouts all come back as `{"success": false, "error": ...}`.
    #[instrument(skip_all, fields(tool = %call.name, id = %call.id))]
    pub async fn dispatch(&self, call: &ToolCallRequest) -> Value {
        let invocation = match ToolInvocation::parse(call) {
            Ok(invocation) => invocation,
            Err(err) => {
                warn!(%err, "Rejected tool call");
                return error_payload(&call.name, err.to_string());
            }
        };

        let field = invocation.payload_field();
        let searcher = self.searcher.clone();
        let mut handle = tokio::spawn(run_tool(searcher, invocation));

        match tokio::time::timeout(self.timeout, &mut handle).await {
            Ok(Ok(result)) => {
                debug!(success = result["success"].as_bool(), "Tool finished");
                result
            }
            Ok(Err(join_err)) => {
                warn!(%join_err, "Tool task failed");
                failure(field, format!("Tool execution error: {join_err}"))
            }
            Err(_) => {
                handle.abort();
                warn!(timeout = ?self.timeout, "Tool timed out");
                failure(
                    field,
                    format!("Tool execution error: timed out after {:?}", self.timeout),
                )
            }
        }
    }
}

async fn run_tool(searcher: Option<Arc<Searcher>>, invocation: ToolInvocation) -> Value {
    match invocation {
        ToolInvocation::Search(args) => search(searcher.as_deref(), args).await,
        ToolInvocation::ReadFileFull(args) => read_file_full(searcher.as_deref(), &args.path).await,
        ToolInvocation::Cat(args) => cat(&args.path).await,
        ToolInvocation::Ls(args) => ls(&args.dir_path).await,
        ToolInvocation::Find(args) => find(args).await,
    }
}

async fn search(searcher: Option<&Searcher>, args: SearchArgs) -> Value {
    let Some(searcher) = searcher else {
        return failure("results", Toolbox::NO_INDEX);
    };

    match searcher.search(&args.question, &args.kind, args.top_k).await {
        Ok(hits) => match serde_json::to_value(hits) {
            Ok(results) => success("results", results),
            Err(err) => failure("results", format!("Search failed: {err}")),
        },
        Err(err) => failure("results", format!("Search failed: {err:#}")),
    }
}

async fn read_file_full(searcher: Option<&Searcher>, path: &str) -> Value {
    match searcher.and_then(|searcher| searcher.get_full_content(path)) {
        Some(content) => success("content", Value::String(content)),
        None => cat(path).await,
    }
}

async fn cat(path: &str) -> Value {
    match tokio::fs::metadata(path).await {
        Err(_) => failure("content", format!("File not found: {path}")),
        Ok(meta) if !meta.is_file() => failure("content", format!("Path is not a file: {path}")),
        Ok(_) => match tokio::fs::read_to_string(path).await {
            Ok(content) => success("content", Value::String(content)),
            Err(err) => failure("content", format!("Error reading file: {err}")),
        },
    }
}

async fn ls(dir_path: &str) -> Value {
    match tokio::fs::metadata(dir_path).await {
        Err(_) => return failure("items", format!("Directory not found: {dir_path}")),
        Ok(meta) if !meta.is_dir() => {
            return failure("items", format!("Path is not a directory: {dir_path}"))
        }
        Ok(_) => {}
    }

    let mut paths: Vec<PathBuf> = Vec::new();
    let mut entries = match tokio::fs::read_dir(dir_path).await {
        Ok(entries) => entries,
        Err(err) => return failure("items", format!("Error listing directory: {err}")),
    };
    loop {
        match entries.next_entry().await {
            Ok(Some(entry)) => paths.push(entry.path()),
            Ok(None) => break,
            Err(err) => return failure("items", format!("Error listing directory: {err}")),
        }
    }
    paths.sort();

    let mut items = Vec::with_capacity(paths.len());
    for path in paths {
        let is_dir = tokio::fs::metadata(&path)
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false);
        items.push(json!({
            "name": path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default(),
            "type": if is_dir { "directory" } else { "file" },
            "path": path.to_string_lossy(),
        }));
    }

    success("items", Value::Array(items))
}

async fn find(args: FindArgs) -> Value {
    if !Path::new(&args.start_path).exists() {
        return failure("files", format!("Start path not found: {}", args.start_path));
    }
    let pattern = match Pattern::new(&args.pattern) {
        Ok(pattern) => pattern,
        Err(err) => return failure("files", format!("Invalid pattern '{}': {err}", args.pattern)),
    };

    let walk = tokio::task::spawn_blocking(move || {
        find_matches(
            &args.start_path,
            &pattern,
            Toolbox::FIND_MAX_DEPTH,
            Toolbox::FIND_MAX_VISITED,
        )
    })
    .await;
    match walk {
        Ok(files) => success(
            "files",
            Value::Array(files.into_iter().map(Value::String).collect()),
        ),
        Err(err) => failure("files", format!("Error running find: {err}")),
    }
}

fn find_matches(
    start_path: &str,
    pattern: &Pattern,
    max_depth: usize,
    max_visited: usize,
) -> Vec<String> {
    let mut visited = 0usize;
    let mut matches = Vec::new();

    for entry in WalkDir::new(start_path)
        .max_depth(max_depth)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !is_ignored_dir(entry))
        .filter_map(Result::ok)
    {
        visited += 1;
        if visited > max_visited {
            warn!(start_path, max_visited, "find stopped early; too many entries");
            break;
        }
        if pattern.matches(&entry.file_name().to_string_lossy()) {
            matches.push(entry.path().to_string_lossy().to_string());
        }
    }

    matches
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::rag::{
        EmbeddingsProvider, HashEmbeddings, IndexBuilder, IndexConfig, SyntaxSpanExtractor,
    };

    fn call(name: &str, arguments: &str) -> ToolCallRequest {
        ToolCallRequest::new("call_1", name, arguments)
    }

    fn toolbox() -> Toolbox {
        Toolbox::new(None, Duration::from_secs(5))
    }

    #[test]
    fn invocations_parse_with_defaults_and_aliases() {
        let parsed = ToolInvocation::parse(&call(
            "search",
            r#"{"question":"where is config parsed","index_type":"function"}"#,
        ))
        .expect("search args");
        assert_eq!(
            parsed,
            ToolInvocation::Search(SearchArgs {
                question: "where is config parsed".to_string(),
                kind: "function".to_string(),
                top_k: 5,
            })
        );

        let parsed = ToolInvocation::parse(&call("list_file_content", r#"{"file_path":"a.py"}"#))
            .expect("legacy read args");
        assert_eq!(parsed.name(), "read_file_full");

        let parsed = ToolInvocation::parse(&call("ls", "")).expect("ls without args");
        assert_eq!(
            parsed,
            ToolInvocation::Ls(LsArgs {
                dir_path: ".".to_string()
            })
        );
    }

    #[test]
    fn unknown_tool_and_bad_arguments_are_typed() {
        assert_eq!(
            ToolInvocation::parse(&call("rm", "{}")),
            Err(ToolCallError::UnknownTool("rm".to_string()))
        );
        assert!(matches!(
            ToolInvocation::parse(&call("cat", "{not json")),
            Err(ToolCallError::InvalidArguments(_))
        ));
    }

    #[test]
    fn every_spec_declares_an_object_schema() {
        let specs = tool_specs();
        let names: Vec<&str> = specs.iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["search", "read_file_full", "cat", "ls", "find"]);
        assert!(specs.iter().all(|s| s.parameters["type"] == "object"));
    }

    #[tokio::test]
    async fn rejected_calls_keep_the_payload_shape() {
        let bad_args = toolbox().dispatch(&call("cat", "{not json")).await;
        assert_eq!(bad_args["success"], false);
        assert!(bad_args
            .as_object()
            .is_some_and(|fields| fields.contains_key("content")));
        assert!(bad_args["content"].is_null());
        assert!(bad_args["error"]
            .as_str()
            .is_some_and(|e| e.starts_with("Invalid JSON arguments")));

        let unknown = toolbox().dispatch(&call("rm", "{}")).await;
        assert_eq!(unknown["success"], false);
        assert_eq!(unknown["error"], "Unknown tool: rm");
    }

    /// Sleeps before answering and records whether it ever woke up.
    struct SlowEmbeddings {
        delay: Duration,
        finished: Arc<AtomicBool>,
    }

    #[async_trait]
    impl EmbeddingsProvider for SlowEmbeddings {
        async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            tokio::time::sleep(self.delay).await;
            self.finished.store(true, Ordering::SeqCst);
            Ok(texts.iter().map(|_| vec![0.0; 16]).collect())
        }
    }

    #[tokio::test]
    async fn timed_out_tool_is_aborted_and_siblings_still_run() {
        let repo = tempfile::tempdir().expect("repo dir");
        let out = tempfile::tempdir().expect("out dir");
        let source = repo.path().join("lib.rs");
        fs::write(&source, "fn helper() {}\n").expect("write source");
        IndexBuilder::new(
            Arc::new(HashEmbeddings::new(16)),
            Arc::new(SyntaxSpanExtractor),
            IndexConfig::default(),
        )
        .build(repo.path(), out.path())
        .await
        .expect("build index");

        let finished = Arc::new(AtomicBool::new(false));
        let embedder = SlowEmbeddings {
            delay: Duration::from_millis(300),
            finished: finished.clone(),
        };
        let searcher = Arc::new(Searcher::load(out.path(), Arc::new(embedder)));
        let tools = Toolbox::new(Some(searcher), Duration::from_millis(30));

        let timed_out = tools
            .dispatch(&call("search", r#"{"question":"helper","kind":"file"}"#))
            .await;
        assert_eq!(timed_out["success"], false);
        assert!(timed_out["results"].is_null());
        assert!(timed_out["error"]
            .as_str()
            .is_some_and(|e| e.starts_with("Tool execution error: timed out")));

        let sibling = tools
            .dispatch(&call("cat", &json!({"path": source}).to_string()))
            .await;
        assert_eq!(sibling["success"], true);
        assert_eq!(sibling["content"], "fn helper() {}\n");

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn cat_reports_missing_and_non_file_paths() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("main.py");
        fs::write(&file, "print('hi')\n").expect("write");
        let tools = toolbox();

        let ok = tools
            .dispatch(&call("cat", &json!({"path": file}).to_string()))
            .await;
        assert_eq!(ok["success"], true);
        assert_eq!(ok["content"], "print('hi')\n");
        assert!(ok["error"].is_null());

        let missing = dir.path().join("missing.py");
        let err = tools
            .dispatch(&call("cat", &json!({"path": missing}).to_string()))
            .await;
        assert_eq!(err["success"], false);
        assert!(err["error"]
            .as_str()
            .is_some_and(|e| e.starts_with("File not found")));

        let err = tools
            .dispatch(&call("cat", &json!({"path": dir.path()}).to_string()))
            .await;
        assert!(err["error"]
            .as_str()
            .is_some_and(|e| e.starts_with("Path is not a file")));
    }

    #[tokio::test]
    async fn ls_lists_sorted_children() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::create_dir(dir.path().join("src")).expect("mkdir");
        fs::write(dir.path().join("b.txt"), "").expect("write");
        fs::write(dir.path().join("a.txt"), "").expect("write");

        let result = toolbox()
            .dispatch(&call("ls", &json!({"dir_path": dir.path()}).to_string()))
            .await;
        let items = result["items"].as_array().expect("items");
        let listed: Vec<(&str, &str)> = items
            .iter()
            .map(|i| (i["name"].as_str().unwrap_or(""), i["type"].as_str().unwrap_or("")))
            .collect();
        assert_eq!(
            listed,
            vec![("a.txt", "file"), ("b.txt", "file"), ("src", "directory")]
        );
    }

    #[tokio::test]
    async fn find_matches_names_and_skips_ignored_dirs() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(dir.path().join("pkg")).expect("mkdir");
        fs::create_dir_all(dir.path().join("node_modules/dep")).expect("mkdir");
        fs::write(dir.path().join("pkg/test_io.py"), "").expect("write");
        fs::write(dir.path().join("pkg/io.py"), "").expect("write");
        fs::write(dir.path().join("node_modules/dep/test_dep.py"), "").expect("write");

        let result = toolbox()
            .dispatch(&call(
                "find",
                &json!({"pattern": "test*", "start_path": dir.path()}).to_string(),
            ))
            .await;
        let files = result["files"].as_array().expect("files");
        assert_eq!(files.len(), 1);
        assert!(files[0].as_str().is_some_and(|f| f.ends_with("test_io.py")));

        let missing = toolbox()
            .dispatch(&call(
                "find",
                &json!({"pattern": "*", "start_path": dir.path().join("nope")}).to_string(),
            ))
            .await;
        assert_eq!(missing["success"], false);
    }

    #[test]
    fn find_walk_is_bounded() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(dir.path().join("a/b/c")).expect("mkdir");
        fs::write(dir.path().join("a/b/c/deep.py"), "").expect("write");
        for name in ["x1.py", "x2.py", "x3.py", "x4.py"] {
            fs::write(dir.path().join(name), "").expect("write");
        }
        let start = dir.path().to_string_lossy().to_string();
        let pattern = Pattern::new("*.py").expect("pattern");

        let all = find_matches(&start, &pattern, Toolbox::FIND_MAX_DEPTH, Toolbox::FIND_MAX_VISITED);
        assert_eq!(all.len(), 5);

        let shallow = find_matches(&start, &pattern, 2, Toolbox::FIND_MAX_VISITED);
        assert!(shallow.iter().all(|f| !f.ends_with("deep.py")));
        assert_eq!(shallow.len(), 4);

        let capped = find_matches(&start, &pattern, Toolbox::FIND_MAX_DEPTH, 3);
        assert!(capped.len() < 3);
    }

    #[tokio::test]
    async fn search_without_index_is_an_error_payload() {
        let result = toolbox()
            .dispatch(&call("search", r#"{"question":"q","kind":"file"}"#))
            .await;
        assert_eq!(result["success"], false);
        assert_eq!(result["error"], Toolbox::NO_INDEX);
        assert!(result["results"].is_null());
    }

    #[tokio::test]
    async fn read_file_full_falls_back_to_disk_without_index() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("lib.rs");
        fs::write(&file, "pub fn f() {}").expect("write");

        let result = toolbox()
            .dispatch(&call("read_file_full", &json!({"path": file}).to_string()))
            .await;
        assert_eq!(result["content"], "pub fn f() {}");
    }
}
