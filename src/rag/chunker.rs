use super::types::{Chunk, ChunkKind, FunctionSpan};

/// Number of lines in `content` under the `'\n'` split model (a trailing newline adds an empty line).
pub fn line_count(content: &str) -> usize {
    content.split('\n').count()
}

/// Split one file into a file-level chunk plus one function-level chunk per usable span.
///
/// Spans are clamped to the file: a start below 1 becomes 1 and an end past the last line becomes
/// the last line. Spans that still start past the end, or end before they start, are dropped.
pub fn chunk_file(file_path: &str, content: &str, spans: &[FunctionSpan]) -> Vec<Chunk> {
    let lines: Vec<&str> = content.split('\n').collect();
    let total = lines.len();

    let mut chunks = Vec::with_capacity(spans.len() + 1);
    chunks.push(Chunk {
        kind: ChunkKind::File,
        file_path: file_path.to_string(),
        function_name: None,
        content: content.to_string(),
        start_line: 1,
        end_line: total,
    });

    for span in spans {
        let Some((start, end)) = clamp_span(span, total) else {
            continue;
        };

        chunks.push(Chunk {
            kind: ChunkKind::Function,
            file_path: file_path.to_string(),
            function_name: Some(span.name.clone()),
            content: lines[start - 1..end].join("\n"),
            start_line: start,
            end_line: end,
        });
    }

    chunks
}

fn clamp_span(span: &FunctionSpan, total: usize) -> Option<(usize, usize)> {
    let start = span.start_line.max(1);
    let end = span.end_line.min(total);
    (start <= total && end >= start).then_some((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = "import os\n\ndef f():\n    x = 1\n    return x\n";

    #[test]
    fn emits_file_chunk_and_exact_function_slice() {
        let chunks = chunk_file("a.py", SOURCE, &[FunctionSpan::new("f", 3, 5)]);

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].kind, ChunkKind::File);
        assert_eq!(chunks[0].content, SOURCE);
        assert_eq!((chunks[0].start_line, chunks[0].end_line), (1, 6));

        let function = &chunks[1];
        assert_eq!(function.kind, ChunkKind::Function);
        assert_eq!(function.function_name.as_deref(), Some("f"));
        assert_eq!(function.content, "def f():\n    x = 1\n    return x");
        assert_eq!((function.start_line, function.end_line), (3, 5));
    }

    #[test]
    fn file_without_spans_yields_single_chunk() {
        let chunks = chunk_file("empty.rs", "", &[]);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].end_line, 1);
    }

    #[test]
    fn out_of_range_spans_are_clamped_or_dropped() {
        let spans = [
            FunctionSpan::new("tail", 4, 99),
            FunctionSpan::new("zero", 0, 1),
            FunctionSpan::new("beyond", 40, 50),
            FunctionSpan::new("inverted", 5, 2),
        ];
        let chunks = chunk_file("a.py", SOURCE, &spans);
        let total = line_count(SOURCE);

        let functions: Vec<_> = chunks
            .iter()
            .filter(|c| c.kind == ChunkKind::Function)
            .collect();
        assert_eq!(functions.len(), 2);
        assert_eq!((functions[0].start_line, functions[0].end_line), (4, total));
        assert_eq!((functions[1].start_line, functions[1].end_line), (1, 1));
        assert_eq!(functions[1].content, "import os");

        for chunk in &chunks {
            assert!(chunk.start_line >= 1);
            assert!(chunk.end_line >= chunk.start_line);
            assert!(chunk.end_line <= total);
        }
    }

    #[test]
    fn rechunking_is_byte_identical() {
        let spans = [FunctionSpan::new("f", 3, 5), FunctionSpan::new("f", 3, 5)];
        let first = chunk_file("a.py", SOURCE, &spans);
        let second = chunk_file("a.py", SOURCE, &spans);
        assert_eq!(first, second);
        assert_eq!(first.len(), 3);
    }

    #[test]
    fn carriage_returns_survive_slicing() {
        let content = "fn a() {\r\n}\r\nfn b() {}\r\n";
        let chunks = chunk_file("lib.rs", content, &[FunctionSpan::new("a", 1, 2)]);
        assert_eq!(chunks[1].content, "fn a() {\r\n}\r");
    }
}
