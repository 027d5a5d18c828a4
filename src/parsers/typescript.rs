//! TypeScript-family parser backed by tree-sitter.
//!
//! One parser type covers the four tags (`.ts`, `.tsx`, `.js`, `.jsx`),
//! selecting the grammar per tag. Extracts declared and arrow functions,
//! classes, interfaces, type aliases, enums, constants, and top-level
//! export statements. A chunk is marked as a component when its name is
//! uppercase-initial AND its body references JSX elements or hook-style
//! identifiers (`use` + uppercase).

use tree_sitter::Node;

use crate::chunk::Chunk;
use crate::config::Language;

use super::{base_chunk, decode_utf8, ParseOutcome, Parser};

/// Chunks smaller than this are noise (stray semicolons, single re-exports
/// of one symbol) and are dropped.
const MIN_CHUNK_CHARS: usize = 30;

pub struct TypeScriptParser {
    language: Language,
}

impl TypeScriptParser {
    pub fn new(language: Language) -> Self {
        debug_assert!(matches!(
            language,
            Language::TypeScript | Language::Tsx | Language::JavaScript | Language::Jsx
        ));
        Self { language }
    }

    fn grammar(&self) -> tree_sitter::Language {
        match self.language {
            Language::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            Language::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
            // The JavaScript grammar handles JSX natively.
            _ => tree_sitter_javascript::LANGUAGE.into(),
        }
    }

    fn is_typescript(&self) -> bool {
        matches!(self.language, Language::TypeScript | Language::Tsx)
    }
}

impl Parser for TypeScriptParser {
    fn language(&self) -> Language {
        self.language
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
        if parser.set_language(&self.grammar()).is_err() {
            return ParseOutcome::failed("tree-sitter grammar version mismatch", total_lines);
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

        let imports = collect_imports(root, &source);

        let mut chunks = Vec::new();
        let mut cursor = root.walk();
        for child in root.named_children(&mut cursor) {
            self.extract(child, &source, relative_path, repo_id, &imports, false, &mut chunks);
        }

        ParseOutcome::ok(chunks, total_lines)
    }
}

impl TypeScriptParser {
    #[allow(clippy::too_many_arguments)]
    fn extract(
        &self,
        node: Node,
        source: &str,
        relative_path: &str,
        repo_id: &str,
        imports: &[String],
        exported: bool,
        chunks: &mut Vec<Chunk>,
    ) {
        // Export statements wrap a declaration; the chunk spans the whole
        // statement so the `export` keyword stays in the content.
        if node.kind() == "export_statement" {
            if let Some(declaration) = node.child_by_field_name("declaration") {
                let mut inner = Vec::new();
                self.extract(
                    declaration,
                    source,
                    relative_path,
                    repo_id,
                    imports,
                    true,
                    &mut inner,
                );
                for mut chunk in inner {
                    widen_to(&mut chunk, node, source);
                    chunks.push(chunk);
                }
            } else {
                // Bare re-export lists: `export { a, b } from "./mod"`.
                self.push_chunk(node, source, relative_path, repo_id, imports, "export", None, true, chunks);
            }
            return;
        }

        let item_type = match node.kind() {
            "function_declaration" | "generator_function_declaration" => "function",
            "class_declaration" | "abstract_class_declaration" => "class",
            "interface_declaration" => "interface",
            "type_alias_declaration" => "type_alias",
            "enum_declaration" => "enum",
            "lexical_declaration" | "variable_declaration" => {
                self.extract_variable(node, source, relative_path, repo_id, imports, exported, chunks);
                return;
            }
            _ => return,
        };

        self.push_chunk(
            node, source, relative_path, repo_id, imports, item_type, None, exported, chunks,
        );
    }

    /// `const X = ...` declarations: arrow-function values become
    /// `arrow_function` chunks, everything else `const`.
    #[allow(clippy::too_many_arguments)]
    fn extract_variable(
        &self,
        node: Node,
        source: &str,
        relative_path: &str,
        repo_id: &str,
        imports: &[String],
        exported: bool,
        chunks: &mut Vec<Chunk>,
    ) {
        let mut cursor = node.walk();
        let declarator = node
            .named_children(&mut cursor)
            .find(|c| c.kind() == "variable_declarator");
        let Some(declarator) = declarator else { return };

        let name = declarator
            .child_by_field_name("name")
            .map(|n| source[n.start_byte()..n.end_byte()].to_string());
        let is_arrow = declarator
            .child_by_field_name("value")
            .map(|v| matches!(v.kind(), "arrow_function" | "function_expression" | "function"))
            .unwrap_or(false);
        let item_type = if is_arrow { "arrow_function" } else { "const" };

        self.push_chunk(
            node, source, relative_path, repo_id, imports, item_type, name, exported, chunks,
        );
    }

    #[allow(clippy::too_many_arguments)]
    fn push_chunk(
        &self,
        node: Node,
        source: &str,
        relative_path: &str,
        repo_id: &str,
        imports: &[String],
        item_type: &str,
        name_override: Option<String>,
        exported: bool,
        chunks: &mut Vec<Chunk>,
    ) {
        let content = source[node.start_byte()..node.end_byte()].to_string();
        if content.trim().len() < MIN_CHUNK_CHARS {
            return;
        }
        let start_line = node.start_position().row + 1;
        let end_line = node.end_position().row + 1;
        let item_name = name_override
            .or_else(|| {
                node.child_by_field_name("name")
                    .map(|n| source[n.start_byte()..n.end_byte()].to_string())
            })
            .unwrap_or_else(|| Chunk::anonymous_name(start_line));

        let has_jsx = subtree_has_jsx(node);
        let is_component = item_name
            .chars()
            .next()
            .map(|c| c.is_ascii_uppercase())
            .unwrap_or(false)
            && (has_jsx || references_hooks(&content));
        let item_type = if is_component { "component" } else { item_type };

        let mut chunk = base_chunk(
            self.language,
            relative_path,
            repo_id,
            item_type,
            item_name,
            content,
            start_line,
            end_line,
        );
        chunk.metadata.insert(
            "is_typescript".into(),
            serde_json::Value::Bool(self.is_typescript()),
        );
        chunk
            .metadata
            .insert("has_jsx".into(), serde_json::Value::Bool(has_jsx));
        chunk
            .metadata
            .insert("is_component".into(), serde_json::Value::Bool(is_component));
        chunk
            .metadata
            .insert("exported".into(), serde_json::Value::Bool(exported));
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
        chunks.push(chunk);
    }
}

/// Widen a chunk extracted from an inner declaration to cover the wrapping
/// export statement.
fn widen_to(chunk: &mut Chunk, node: Node, source: &str) {
    chunk.content = source[node.start_byte()..node.end_byte()].to_string();
    chunk.start_line = node.start_position().row + 1;
    chunk.end_line = node.end_position().row + 1;
    chunk
        .metadata
        .insert("exported".into(), serde_json::Value::Bool(true));
}

/// Whether any node in the subtree is a JSX construct.
fn subtree_has_jsx(node: Node) -> bool {
    if node.kind().starts_with("jsx") {
        return true;
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if subtree_has_jsx(child) {
            return true;
        }
    }
    false
}

/// Whether the text references hook-style identifiers: `use` immediately
/// followed by an uppercase letter, as a whole word.
fn references_hooks(content: &str) -> bool {
    let bytes = content.as_bytes();
    let mut i = 0;
    while let Some(pos) = content[i..].find("use") {
        let start = i + pos;
        let after = start + 3;
        let word_start = start == 0
            || !(bytes[start - 1].is_ascii_alphanumeric() || bytes[start - 1] == b'_');
        if word_start && after < bytes.len() && bytes[after].is_ascii_uppercase() {
            return true;
        }
        i = after;
    }
    false
}

/// Module specifiers of every import statement in the file, capped.
fn collect_imports(root: Node, source: &str) -> Vec<String> {
    const MAX_IMPORTS: usize = 15;
    let mut imports = Vec::new();
    let mut cursor = root.walk();
    for child in root.named_children(&mut cursor) {
        if child.kind() != "import_statement" {
            continue;
        }
        if let Some(src) = child.child_by_field_name("source") {
            let text = source[src.start_byte()..src.end_byte()]
                .trim_matches(|c| c == '"' || c == '\'')
                .to_string();
            imports.push(text);
        }
        if imports.len() == MAX_IMPORTS {
            break;
        }
    }
    imports
}
