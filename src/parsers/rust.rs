//! Rust source parser backed by tree-sitter-rust.
//!
//! Extracts top-level items — functions, type declarations, impl blocks
//! (one chunk each, header plus body), traits, module headers, constants,
//! statics and type aliases — in source order. Items nested inside `mod`
//! blocks are extracted as their own chunks; the module itself contributes
//! only its header. File-level `use` declarations are attached to each
//! chunk's metadata so a chunk is self-describing.

use tree_sitter::Node;

use crate::config::Language;

use super::{base_chunk, decode_utf8, ParseOutcome, Parser};

pub struct RustParser;

impl Parser for RustParser {
    fn language(&self) -> Language {
        Language::Rust
    }

    fn parse(&self, relative_path: &str, bytes: &[u8], repo_id: &str) -> ParseOutcome {
        let source = match decode_utf8(relative_path, bytes) {
            Ok(text) => text,
            Err(outcome) => return outcome,
        };
        let total_lines = source.lines().count();
        if source.trim().is_empty() {
            return ParseOutcome::ok(Vec::new(), total_lines);
        }

        let mut parser = tree_sitter::Parser::new();
        if parser
            .set_language(&tree_sitter_rust::LANGUAGE.into())
            .is_err()
        {
            return ParseOutcome::failed("tree-sitter-rust grammar version mismatch", total_lines);
        }
        let tree = match parser.parse(&source, None) {
            Some(tree) => tree,
            None => return ParseOutcome::failed("tree-sitter returned no tree", total_lines),
        };
        let root = tree.root_node();
        if root.has_error() {
            return ParseOutcome::failed(
                format!("syntax errors in {relative_path}"),
                total_lines,
            );
        }

        let imports = collect_use_declarations(root, &source);

        let mut chunks = Vec::new();
        let mut cursor = root.walk();
        for child in root.named_children(&mut cursor) {
            extract_item(child, &source, relative_path, repo_id, &imports, &mut chunks);
        }

        ParseOutcome::ok(chunks, total_lines)
    }
}

/// Map a tree-sitter node kind to our item category.
fn item_type_for(kind: &str) -> Option<&'static str> {
    match kind {
        "function_item" => Some("function"),
        "struct_item" => Some("struct"),
        "enum_item" => Some("enum"),
        "impl_item" => Some("impl"),
        "trait_item" => Some("trait"),
        "mod_item" => Some("module"),
        "const_item" => Some("const"),
        "static_item" => Some("static"),
        "type_item" => Some("type_alias"),
        _ => None,
    }
}

fn extract_item(
    node: Node,
    source: &str,
    relative_path: &str,
    repo_id: &str,
    imports: &[String],
    chunks: &mut Vec<crate::chunk::Chunk>,
) {
    let Some(item_type) = item_type_for(node.kind()) else {
        return;
    };

    if node.kind() == "mod_item" {
        extract_module(node, source, relative_path, repo_id, imports, chunks);
        return;
    }

    let start_line = node.start_position().row + 1;
    let end_line = node.end_position().row + 1;
    let content = node_text(node, source).to_string();
    let item_name = item_name_for(node, source)
        .unwrap_or_else(|| crate::chunk::Chunk::anonymous_name(start_line));

    let mut chunk = base_chunk(
        Language::Rust,
        relative_path,
        repo_id,
        item_type,
        item_name,
        content,
        start_line,
        end_line,
    );
    attach_metadata(&mut chunk, node, source, imports);
    chunks.push(chunk);
}

/// Modules contribute their header only; their items become chunks of
/// their own.
fn extract_module(
    node: Node,
    source: &str,
    relative_path: &str,
    repo_id: &str,
    imports: &[String],
    chunks: &mut Vec<crate::chunk::Chunk>,
) {
    let start_line = node.start_position().row + 1;
    let item_name = item_name_for(node, source)
        .unwrap_or_else(|| crate::chunk::Chunk::anonymous_name(start_line));

    let body = node.child_by_field_name("body");
    let (content, end_line) = match body {
        Some(body) => {
            let header = source[node.start_byte()..body.start_byte()].trim_end();
            (header.to_string(), body.start_position().row + 1)
        }
        // `mod name;` declarations have no body.
        None => (
            node_text(node, source).to_string(),
            node.end_position().row + 1,
        ),
    };

    let mut chunk = base_chunk(
        Language::Rust,
        relative_path,
        repo_id,
        "module",
        item_name,
        content,
        start_line,
        end_line,
    );
    attach_metadata(&mut chunk, node, source, imports);
    chunks.push(chunk);

    if let Some(body) = body {
        let mut cursor = body.walk();
        for child in body.named_children(&mut cursor) {
            extract_item(child, source, relative_path, repo_id, imports, chunks);
        }
    }
}

fn attach_metadata(
    chunk: &mut crate::chunk::Chunk,
    node: Node,
    source: &str,
    imports: &[String],
) {
    let header = header_text(node, source);
    chunk.metadata.insert(
        "visibility".into(),
        serde_json::Value::String(visibility_of(node, source)),
    );
    chunk.metadata.insert(
        "is_async".into(),
        serde_json::Value::Bool(header.contains("async ")),
    );
    chunk.metadata.insert(
        "is_unsafe".into(),
        serde_json::Value::Bool(header.contains("unsafe ")),
    );
    chunk.metadata.insert(
        "has_test_attr".into(),
        serde_json::Value::Bool(has_test_attribute(node, source)),
    );
    if !imports.is_empty() {
        chunk.metadata.insert(
            "imports".into(),
            serde_json::Value::Array(
                imports
                    .iter()
                    .map(|i| serde_json::Value::String(i.clone()))
                    .collect(),
            ),
        );
    }
}

fn node_text<'a>(node: Node, source: &'a str) -> &'a str {
    &source[node.start_byte()..node.end_byte()]
}

/// Text from the item start through the opening brace (or the whole node
/// for brace-less items); used for modifier sniffing.
fn header_text<'a>(node: Node, source: &'a str) -> &'a str {
    let text = node_text(node, source);
    match text.find('{') {
        Some(pos) => &text[..pos],
        None => text,
    }
}

fn item_name_for(node: Node, source: &str) -> Option<String> {
    if node.kind() == "impl_item" {
        let type_name = node
            .child_by_field_name("type")
            .map(|n| node_text(n, source).to_string())?;
        return Some(match node.child_by_field_name("trait") {
            Some(trait_node) => {
                format!("{} for {}", node_text(trait_node, source), type_name)
            }
            None => type_name,
        });
    }
    node.child_by_field_name("name")
        .map(|n| node_text(n, source).to_string())
}

fn visibility_of(node: Node, source: &str) -> String {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.kind() == "visibility_modifier" {
            return node_text(child, source).to_string();
        }
    }
    "private".to_string()
}

/// True when the item is preceded by a `#[test]`-like attribute (including
/// `#[tokio::test]` and `#[cfg(test)]` on modules).
fn has_test_attribute(node: Node, source: &str) -> bool {
    let mut prev = node.prev_named_sibling();
    while let Some(sibling) = prev {
        if sibling.kind() != "attribute_item" {
            break;
        }
        if node_text(sibling, source).contains("test") {
            return true;
        }
        prev = sibling.prev_named_sibling();
    }
    false
}

/// All `use` declarations in the file, stripped to their paths, capped to
/// keep payloads small.
fn collect_use_declarations(root: Node, source: &str) -> Vec<String> {
    const MAX_IMPORTS: usize = 15;
    let mut imports = Vec::new();
    collect_uses_recursive(root, source, &mut imports);
    imports.truncate(MAX_IMPORTS);
    imports
}

fn collect_uses_recursive(node: Node, source: &str, out: &mut Vec<String>) {
    if node.kind() == "use_declaration" {
        let text = node_text(node, source)
            .trim()
            .trim_start_matches("pub ")
            .trim_start_matches("use ")
            .trim_end_matches(';')
            .to_string();
        out.push(text);
        return;
    }
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        collect_uses_recursive(child, source, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> ParseOutcome {
        RustParser.parse("svc/auth.rs", source.as_bytes(), "svc")
    }

    #[test]
    fn single_function_round_trip() {
        let outcome = parse("pub fn verify_token(t: &str) -> bool { !t.is_empty() }");
        assert!(outcome.success);
        assert_eq!(outcome.chunks.len(), 1);
        let chunk = &outcome.chunks[0];
        assert_eq!(chunk.item_type, "function");
        assert_eq!(chunk.item_name, "verify_token");
        assert_eq!(chunk.start_line, 1);
        assert_eq!(chunk.end_line, 1);
        assert_eq!(chunk.metadata["visibility"], "pub");
    }

    #[test]
    fn extracts_types_impls_and_traits() {
        let source = r#"
pub struct Wallet {
    balance: u64,
}

pub trait Ledger {
    fn apply(&mut self, delta: i64);
}

impl Ledger for Wallet {
    fn apply(&mut self, delta: i64) {
        self.balance = (self.balance as i64 + delta) as u64;
    }
}
"#;
        let outcome = parse(source);
        assert!(outcome.success);
        let types: Vec<&str> = outcome.chunks.iter().map(|c| c.item_type.as_str()).collect();
        assert_eq!(types, vec!["struct", "trait", "impl"]);
        assert_eq!(outcome.chunks[2].item_name, "Ledger for Wallet");
    }

    #[test]
    fn module_header_only_but_nested_items_extracted() {
        let source = r#"
mod billing {
    pub fn invoice() {}
    pub struct Receipt;
}
"#;
        let outcome = parse(source);
        assert!(outcome.success);
        let module = outcome
            .chunks
            .iter()
            .find(|c| c.item_type == "module")
            .unwrap();
        assert_eq!(module.item_name, "billing");
        assert!(!module.content.contains("invoice"));
        assert!(outcome.chunks.iter().any(|c| c.item_name == "invoice"));
        assert!(outcome.chunks.iter().any(|c| c.item_name == "Receipt"));
    }

    #[test]
    fn async_and_test_markers_recorded() {
        let source = r#"
pub async fn fetch() {}

#[test]
fn works() {}
"#;
        let outcome = parse(source);
        let fetch = outcome.chunks.iter().find(|c| c.item_name == "fetch").unwrap();
        assert_eq!(fetch.metadata["is_async"], true);
        let test_fn = outcome.chunks.iter().find(|c| c.item_name == "works").unwrap();
        assert_eq!(test_fn.metadata["has_test_attr"], true);
    }

    #[test]
    fn use_declarations_land_in_metadata_not_content() {
        let source = "use std::collections::HashMap;\n\npub fn cache() -> HashMap<u8, u8> { HashMap::new() }\n";
        let outcome = parse(source);
        let chunk = outcome.chunks.iter().find(|c| c.item_name == "cache").unwrap();
        assert!(!chunk.content.contains("use std"));
        let imports = chunk.metadata["imports"].as_array().unwrap();
        assert_eq!(imports[0], "std::collections::HashMap");
    }

    #[test]
    fn constants_and_aliases_are_chunks() {
        let source = "pub const LIMIT: usize = 10;\nstatic NAME: &str = \"x\";\ntype Pair = (u8, u8);\n";
        let outcome = parse(source);
        let types: Vec<&str> = outcome.chunks.iter().map(|c| c.item_type.as_str()).collect();
        assert_eq!(types, vec!["const", "static", "type_alias"]);
    }

    #[test]
    fn syntax_errors_fail_without_chunks() {
        let outcome = parse("pub fn broken( {");
        assert!(!outcome.success);
        assert!(outcome.chunks.is_empty());
        assert!(outcome.error.unwrap().contains("auth.rs"));
    }

    #[test]
    fn line_spans_are_one_based_inclusive() {
        let source = "fn a() {\n    let x = 1;\n}\n";
        let outcome = parse(source);
        let chunk = &outcome.chunks[0];
        assert_eq!(chunk.start_line, 1);
        assert_eq!(chunk.end_line, 3);
        assert_eq!(chunk.content.lines().count(), 3);
    }
}
