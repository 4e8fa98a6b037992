use std::path::Path;

use anyhow::Context;
use tree_sitter::{Language as TsLanguage, Node, Parser as TsParser};

use super::types::FunctionSpan;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeLanguage {
    Rust,
    TypeScript,
    Tsx,
    JavaScript,
    Python,
}

pub fn language_from_extension(path: &str) -> Option<CodeLanguage> {
    let ext = Path::new(path)
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_ascii_lowercase());

    match ext.as_deref() {
        Some("rs") => Some(CodeLanguage::Rust),
        Some("ts") => Some(CodeLanguage::TypeScript),
        Some("tsx") => Some(CodeLanguage::Tsx),
        Some("js") | Some("jsx") | Some("mjs") => Some(CodeLanguage::JavaScript),
        Some("py") => Some(CodeLanguage::Python),
        _ => None,
    }
}

fn tree_sitter_language(lang: CodeLanguage) -> TsLanguage {
    match lang {
        CodeLanguage::Rust => tree_sitter_rust::LANGUAGE.into(),
        CodeLanguage::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
        CodeLanguage::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
        CodeLanguage::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
        CodeLanguage::Python => tree_sitter_python::LANGUAGE.into(),
    }
}

fn function_node_kinds(lang: CodeLanguage) -> &'static [&'static str] {
    match lang {
        CodeLanguage::Rust => &["function_item", "function_signature_item"],
        CodeLanguage::TypeScript | CodeLanguage::Tsx | CodeLanguage::JavaScript => &[
            "function_declaration",
            "generator_function_declaration",
            "method_definition",
        ],
        CodeLanguage::Python => &["function_definition"],
    }
}

fn node_text<'a>(node: &Node, content: &'a str) -> &'a str {
    content.get(node.start_byte()..node.end_byte()).unwrap_or("")
}

fn function_name(node: &Node, content: &str) -> String {
    node.child_by_field_name("name")
        .map(|name_node| node_text(&name_node, content).trim())
        .filter(|text| !text.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| node.kind().to_string())
}

/// Function and method spans (1-based inclusive lines), ordered by where they start.
pub fn function_spans(content: &str, lang: CodeLanguage) -> anyhow::Result<Vec<FunctionSpan>> {
    let mut parser = TsParser::new();
    parser
        .set_language(&tree_sitter_language(lang))
        .context("failed to set tree-sitter language")?;

    let tree = match parser.parse(content, None) {
        Some(t) => t,
        None => return Ok(Vec::new()),
    };

    let kinds = function_node_kinds(lang);
    let mut found: Vec<(usize, FunctionSpan)> = Vec::new();
    let mut stack = vec![tree.root_node()];

    while let Some(node) = stack.pop() {
        if kinds.contains(&node.kind()) {
            found.push((
                node.start_byte(),
                FunctionSpan::new(
                    function_name(&node, content),
                    node.start_position().row + 1,
                    node.end_position().row + 1,
                ),
            ));
        }

        for idx in 0..node.named_child_count() {
            if let Some(child) = node.named_child(idx) {
                stack.push(child);
            }
        }
    }

    found.sort_by_key(|(start_byte, _)| *start_byte);
    Ok(found.into_iter().map(|(_, span)| span).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rust_functions_and_methods_are_found() {
        let content = r#"fn foo() {}

struct Bar {}

impl Bar {
    fn baz(&self) {
        let _ = 1;
    }
}
"#;

        let spans = function_spans(content, CodeLanguage::Rust).expect("parse rust");
        assert_eq!(
            spans,
            vec![FunctionSpan::new("foo", 1, 1), FunctionSpan::new("baz", 6, 8)]
        );
    }

    #[test]
    fn python_methods_are_found() {
        let content = "def foo():\n    pass\n\nclass Bar:\n    def baz(self):\n        pass\n";

        let spans = function_spans(content, CodeLanguage::Python).expect("parse py");
        let names: Vec<&str> = spans.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["foo", "baz"]);
        assert_eq!((spans[1].start_line, spans[1].end_line), (5, 6));
    }

    #[test]
    fn typescript_functions_are_found() {
        let content = "function foo() {}\nclass Widget {\n  method() {}\n}\n";

        let spans = function_spans(content, CodeLanguage::TypeScript).expect("parse ts");
        let names: Vec<&str> = spans.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["foo", "method"]);
    }

    #[test]
    fn extension_detection() {
        assert_eq!(language_from_extension("src/lib.RS"), Some(CodeLanguage::Rust));
        assert_eq!(language_from_extension("app.tsx"), Some(CodeLanguage::Tsx));
        assert_eq!(language_from_extension("main.go"), None);
    }
}
