//! Solidity parser backed by tree-sitter-solidity.
//!
//! Extracts contracts, interfaces and libraries plus their members:
//! functions, modifiers, events, structs, enums, errors, state variables
//! and constructors. Visibility and state mutability are recorded as
//! metadata. There is no fallback of any kind: if the grammar cannot build
//! a tree the file is reported as failed.

use tree_sitter::Node;

use crate::chunk::Chunk;
use crate::config::Language;

use super::{base_chunk, decode_utf8, ParseOutcome, Parser};

/// Declarations shorter than this are noise (empty bodies, stray
/// semicolons).
const MIN_CHUNK_CHARS: usize = 20;

pub struct SolidityParser;

impl Parser for SolidityParser {
    fn language(&self) -> Language {
        Language::Solidity
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
            .set_language(&tree_sitter_solidity::LANGUAGE.into())
            .is_err()
        {
            return ParseOutcome::failed(
                "tree-sitter-solidity grammar version mismatch",
                total_lines,
            );
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
            extract(child, &source, relative_path, repo_id, &imports, &mut chunks);

            // Contract-level declarations also contribute their members.
            if is_container(child.kind()) {
                let mut inner_cursor = child.walk();
                for part in child.named_children(&mut inner_cursor) {
                    if part.kind() == "contract_body" {
                        let mut body_cursor = part.walk();
                        for member in part.named_children(&mut body_cursor) {
                            extract(member, &source, relative_path, repo_id, &imports, &mut chunks);
                        }
                    }
                }
            }
        }

        ParseOutcome::ok(chunks, total_lines)
    }
}

fn is_container(kind: &str) -> bool {
    matches!(
        kind,
        "contract_declaration" | "interface_declaration" | "library_declaration"
    )
}

/// Grammar node kind → item category. Both `_definition` and `_declaration`
/// spellings are accepted across grammar versions.
fn item_type_for(kind: &str) -> Option<&'static str> {
    match kind {
        "contract_declaration" => Some("contract"),
        "interface_declaration" => Some("interface"),
        "library_declaration" => Some("library"),
        "function_definition" | "function_declaration" => Some("function"),
        "modifier_definition" | "modifier_declaration" => Some("modifier"),
        "event_definition" | "event_declaration" => Some("event"),
        "struct_definition" | "struct_declaration" => Some("struct"),
        "enum_definition" | "enum_declaration" => Some("enum"),
        "error_definition" | "error_declaration" => Some("error"),
        "state_variable_declaration" => Some("state_variable"),
        "constructor_definition" | "constructor_declaration" => Some("constructor"),
        "fallback_receive_definition" => Some("fallback"),
        _ => None,
    }
}

fn extract(
    node: Node,
    source: &str,
    relative_path: &str,
    repo_id: &str,
    imports: &[String],
    chunks: &mut Vec<Chunk>,
) {
    let Some(item_type) = item_type_for(node.kind()) else {
        return;
    };

    let content = source[node.start_byte()..node.end_byte()].to_string();
    if content.trim().len() < MIN_CHUNK_CHARS {
        return;
    }
    let start_line = node.start_position().row + 1;
    let end_line = node.end_position().row + 1;
    let item_name = match item_type {
        "constructor" => "constructor".to_string(),
        "fallback" => "fallback".to_string(),
        _ => item_name_for(node, source)
            .unwrap_or_else(|| Chunk::anonymous_name(start_line)),
    };

    let header = content.find('{').map(|p| &content[..p]).unwrap_or(&content);

    let mut chunk = base_chunk(
        Language::Solidity,
        relative_path,
        repo_id,
        item_type,
        item_name,
        content.clone(),
        start_line,
        end_line,
    );
    chunk.metadata.insert(
        "visibility".into(),
        serde_json::Value::String(visibility_of(header)),
    );
    chunk.metadata.insert(
        "state_mutability".into(),
        serde_json::Value::String(mutability_of(header)),
    );
    if is_container(node.kind()) {
        chunk.metadata.insert(
            "contract_type".into(),
            serde_json::Value::String(contract_type_of(&content)),
        );
    }
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

fn item_name_for(node: Node, source: &str) -> Option<String> {
    if let Some(name) = node.child_by_field_name("name") {
        return Some(source[name.start_byte()..name.end_byte()].to_string());
    }
    let mut cursor = node.walk();
    let mut identifiers = node
        .named_children(&mut cursor)
        .filter(|c| c.kind() == "identifier")
        .map(|c| source[c.start_byte()..c.end_byte()].to_string());
    identifiers.next()
}

fn visibility_of(header: &str) -> String {
    for keyword in ["external", "public", "internal", "private"] {
        if header.split_whitespace().any(|w| w == keyword) {
            return keyword.to_string();
        }
    }
    "default".to_string()
}

fn mutability_of(header: &str) -> String {
    for keyword in ["pure", "view", "payable"] {
        if header.split_whitespace().any(|w| w == keyword) {
            return keyword.to_string();
        }
    }
    "nonpayable".to_string()
}

/// Coarse classification of what a contract is for, by token sniffing.
fn contract_type_of(content: &str) -> String {
    let lower = content.to_lowercase();
    if ["erc20", "erc721", "erc1155"].iter().any(|t| lower.contains(t)) {
        "token".to_string()
    } else if ["governor", "voting", "proposal"].iter().any(|t| lower.contains(t)) {
        "governance".to_string()
    } else if ["swap", "liquidity", "lending"].iter().any(|t| lower.contains(t)) {
        "defi".to_string()
    } else if ["ownable", "accesscontrol"].iter().any(|t| lower.contains(t)) {
        "access_control".to_string()
    } else if lower.contains("test") || lower.contains("mock") {
        "test".to_string()
    } else {
        "application".to_string()
    }
}

fn collect_imports(root: Node, source: &str) -> Vec<String> {
    const MAX_IMPORTS: usize = 15;
    let mut imports = Vec::new();
    let mut cursor = root.walk();
    for child in root.named_children(&mut cursor) {
        if child.kind() != "import_directive" {
            continue;
        }
        let text = source[child.start_byte()..child.end_byte()].to_string();
        // Keep only the quoted path.
        if let Some(path) = text.split('"').nth(1) {
            imports.push(path.to_string());
        }
        if imports.len() == MAX_IMPORTS {
            break;
        }
    }
    imports
}
