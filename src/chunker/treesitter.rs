use tree_sitter::{Language, Node, Parser, Query, QueryCursor, StreamingIterator};

use crate::types::{ChunkKind, CodeChunk};

use super::{
    build_chunk, doc_comment_above, first_line_signature, ChunkMeta, ChunkStrategy, ChunkerOutput,
    FileContext,
};
use crate::error::Result;

// ---------------------------------------------------------------------------
// AST strategies — one declarative table per language.
//
// Each rule is a tree-sitter query capturing @name and @def. Rules that fail
// to compile against the linked grammar are skipped (logged at debug), so a
// grammar upgrade degrades coverage instead of breaking files. A file whose
// parse fails entirely falls back to the window chunker upstream.
//
// Container discipline: a type-like declaration whose span fits in
// `chunk_size` lines becomes one chunk and swallows its members; a larger
// one is emitted header-only and its members stand alone.
// ---------------------------------------------------------------------------

pub(crate) struct DeclRule {
    query: &'static str,
    kind: ChunkKind,
    /// Type-like declaration that may swallow members.
    container: bool,
    /// Only match when the declaration sits at file scope (or directly
    /// under an export wrapper). Keeps locals out of the index.
    top_level_only: bool,
}

const fn rule(query: &'static str, kind: ChunkKind) -> DeclRule {
    DeclRule {
        query,
        kind,
        container: false,
        top_level_only: false,
    }
}

const fn container(query: &'static str, kind: ChunkKind) -> DeclRule {
    DeclRule {
        query,
        kind,
        container: true,
        top_level_only: false,
    }
}

const fn top_level(query: &'static str, kind: ChunkKind) -> DeclRule {
    DeclRule {
        query,
        kind,
        container: false,
        top_level_only: true,
    }
}

pub(crate) struct AstStrategy {
    name: &'static str,
    label: &'static str,
    exts: &'static [&'static str],
    language: fn() -> Language,
    rules: &'static [DeclRule],
    /// Node kinds that turn a contained Function into a Method.
    method_containers: &'static [&'static str],
    /// Refine the rule kind from the declaration's leading keyword
    /// (Swift folds class/struct/enum/actor/extension into one node kind).
    keyword_kinds: bool,
}

// ── Languages ───────────────────────────────────────────────────────────────

fn lang_rust() -> Language {
    tree_sitter_rust::LANGUAGE.into()
}
fn lang_typescript() -> Language {
    tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()
}
fn lang_tsx() -> Language {
    tree_sitter_typescript::LANGUAGE_TSX.into()
}
fn lang_javascript() -> Language {
    tree_sitter_javascript::LANGUAGE.into()
}
fn lang_python() -> Language {
    tree_sitter_python::LANGUAGE.into()
}
#[cfg(feature = "lang-go")]
fn lang_go() -> Language {
    tree_sitter_go::LANGUAGE.into()
}
#[cfg(feature = "lang-c")]
fn lang_c() -> Language {
    tree_sitter_c::LANGUAGE.into()
}
#[cfg(feature = "lang-cpp")]
fn lang_cpp() -> Language {
    tree_sitter_cpp::LANGUAGE.into()
}
#[cfg(feature = "lang-swift")]
fn lang_swift() -> Language {
    tree_sitter_swift::LANGUAGE.into()
}

// ── Rule tables ─────────────────────────────────────────────────────────────

static RUST_RULES: &[DeclRule] = &[
    rule(r#"(function_item name: (identifier) @name) @def"#, ChunkKind::Function),
    rule(r#"(struct_item name: (type_identifier) @name) @def"#, ChunkKind::Struct),
    rule(r#"(enum_item name: (type_identifier) @name) @def"#, ChunkKind::Enum),
    container(r#"(trait_item name: (type_identifier) @name) @def"#, ChunkKind::Interface),
    container(r#"(impl_item type: (_) @name) @def"#, ChunkKind::Extension),
    container(r#"(mod_item name: (identifier) @name) @def"#, ChunkKind::Namespace),
    rule(r#"(macro_definition name: (identifier) @name) @def"#, ChunkKind::Macro),
    rule(r#"(type_item name: (type_identifier) @name) @def"#, ChunkKind::Typealias),
    top_level(r#"(const_item name: (identifier) @name) @def"#, ChunkKind::Constant),
    top_level(r#"(static_item name: (identifier) @name) @def"#, ChunkKind::Constant),
];

static TS_RULES: &[DeclRule] = &[
    rule(r#"(function_declaration name: (identifier) @name) @def"#, ChunkKind::Function),
    container(r#"(class_declaration name: (type_identifier) @name) @def"#, ChunkKind::Class),
    rule(r#"(method_definition name: (property_identifier) @name) @def"#, ChunkKind::Method),
    container(r#"(interface_declaration name: (type_identifier) @name) @def"#, ChunkKind::Interface),
    rule(r#"(enum_declaration name: (identifier) @name) @def"#, ChunkKind::Enum),
    rule(r#"(type_alias_declaration name: (type_identifier) @name) @def"#, ChunkKind::Typealias),
    top_level(
        r#"(lexical_declaration (variable_declarator name: (identifier) @name)) @def"#,
        ChunkKind::Variable,
    ),
];

static JS_RULES: &[DeclRule] = &[
    rule(r#"(function_declaration name: (identifier) @name) @def"#, ChunkKind::Function),
    container(r#"(class_declaration name: (identifier) @name) @def"#, ChunkKind::Class),
    rule(r#"(method_definition name: (property_identifier) @name) @def"#, ChunkKind::Method),
    top_level(
        r#"(lexical_declaration (variable_declarator name: (identifier) @name)) @def"#,
        ChunkKind::Variable,
    ),
];

static PYTHON_RULES: &[DeclRule] = &[
    rule(r#"(function_definition name: (identifier) @name) @def"#, ChunkKind::Function),
    container(r#"(class_definition name: (identifier) @name) @def"#, ChunkKind::Class),
];

#[cfg(feature = "lang-go")]
static GO_RULES: &[DeclRule] = &[
    rule(r#"(function_declaration name: (identifier) @name) @def"#, ChunkKind::Function),
    rule(r#"(method_declaration name: (field_identifier) @name) @def"#, ChunkKind::Method),
    rule(
        r#"(type_declaration (type_spec name: (type_identifier) @name type: (struct_type))) @def"#,
        ChunkKind::Struct,
    ),
    rule(
        r#"(type_declaration (type_spec name: (type_identifier) @name type: (interface_type))) @def"#,
        ChunkKind::Interface,
    ),
    rule(
        r#"(type_declaration (type_spec name: (type_identifier) @name type: (type_identifier))) @def"#,
        ChunkKind::Typealias,
    ),
    top_level(r#"(const_declaration (const_spec name: (identifier) @name)) @def"#, ChunkKind::Constant),
    top_level(r#"(var_declaration (var_spec name: (identifier) @name)) @def"#, ChunkKind::Variable),
];

#[cfg(feature = "lang-c")]
static C_RULES: &[DeclRule] = &[
    rule(
        r#"(function_definition declarator: (function_declarator declarator: (identifier) @name)) @def"#,
        ChunkKind::CFunction,
    ),
    rule(
        r#"(struct_specifier name: (type_identifier) @name body: (field_declaration_list)) @def"#,
        ChunkKind::CStruct,
    ),
    rule(
        r#"(enum_specifier name: (type_identifier) @name body: (enumerator_list)) @def"#,
        ChunkKind::Enum,
    ),
    rule(r#"(type_definition declarator: (type_identifier) @name) @def"#, ChunkKind::CTypedef),
    rule(r#"(preproc_def name: (identifier) @name) @def"#, ChunkKind::CMacro),
    rule(r#"(preproc_function_def name: (identifier) @name) @def"#, ChunkKind::CMacro),
];

#[cfg(feature = "lang-cpp")]
static CPP_RULES: &[DeclRule] = &[
    rule(
        r#"(function_definition declarator: (function_declarator declarator: (identifier) @name)) @def"#,
        ChunkKind::Function,
    ),
    rule(
        r#"(function_definition declarator: (function_declarator declarator: (field_identifier) @name)) @def"#,
        ChunkKind::Method,
    ),
    rule(
        r#"(function_definition declarator: (function_declarator declarator: (qualified_identifier) @name)) @def"#,
        ChunkKind::Method,
    ),
    container(
        r#"(class_specifier name: (type_identifier) @name body: (field_declaration_list)) @def"#,
        ChunkKind::Class,
    ),
    container(
        r#"(struct_specifier name: (type_identifier) @name body: (field_declaration_list)) @def"#,
        ChunkKind::Struct,
    ),
    rule(r#"(enum_specifier name: (type_identifier) @name) @def"#, ChunkKind::Enum),
    container(
        r#"(namespace_definition name: (namespace_identifier) @name) @def"#,
        ChunkKind::Namespace,
    ),
    rule(r#"(type_definition declarator: (type_identifier) @name) @def"#, ChunkKind::CTypedef),
    rule(r#"(preproc_def name: (identifier) @name) @def"#, ChunkKind::CMacro),
];

#[cfg(feature = "lang-swift")]
static SWIFT_RULES: &[DeclRule] = &[
    container(r#"(class_declaration name: (type_identifier) @name) @def"#, ChunkKind::Class),
    container(r#"(protocol_declaration name: (type_identifier) @name) @def"#, ChunkKind::Protocol),
    rule(r#"(function_declaration name: (simple_identifier) @name) @def"#, ChunkKind::Function),
    rule(r#"(typealias_declaration name: (type_identifier) @name) @def"#, ChunkKind::Typealias),
    top_level(
        r#"(property_declaration (pattern (simple_identifier) @name)) @def"#,
        ChunkKind::Variable,
    ),
];

pub(crate) fn strategies() -> Vec<Box<dyn ChunkStrategy>> {
    let mut v: Vec<Box<dyn ChunkStrategy>> = vec![
        Box::new(AstStrategy {
            name: "rust",
            label: "rust",
            exts: &["rs"],
            language: lang_rust,
            rules: RUST_RULES,
            method_containers: &["impl_item", "trait_item"],
            keyword_kinds: false,
        }),
        Box::new(AstStrategy {
            name: "typescript",
            label: "typescript",
            exts: &["ts", "mts", "cts"],
            language: lang_typescript,
            rules: TS_RULES,
            method_containers: &["class_body"],
            keyword_kinds: false,
        }),
        Box::new(AstStrategy {
            name: "tsx",
            label: "typescript",
            exts: &["tsx"],
            language: lang_tsx,
            rules: TS_RULES,
            method_containers: &["class_body"],
            keyword_kinds: false,
        }),
        Box::new(AstStrategy {
            name: "javascript",
            label: "javascript",
            exts: &["js", "jsx", "mjs", "cjs"],
            language: lang_javascript,
            rules: JS_RULES,
            method_containers: &["class_body"],
            keyword_kinds: false,
        }),
        Box::new(AstStrategy {
            name: "python",
            label: "python",
            exts: &["py", "pyi"],
            language: lang_python,
            rules: PYTHON_RULES,
            method_containers: &["class_definition"],
            keyword_kinds: false,
        }),
    ];

    #[cfg(feature = "lang-go")]
    v.push(Box::new(AstStrategy {
        name: "go",
        label: "go",
        exts: &["go"],
        language: lang_go,
        rules: GO_RULES,
        method_containers: &[],
        keyword_kinds: false,
    }));

    #[cfg(feature = "lang-c")]
    v.push(Box::new(AstStrategy {
        name: "c",
        label: "c",
        exts: &["c"],
        language: lang_c,
        rules: C_RULES,
        method_containers: &[],
        keyword_kinds: false,
    }));

    #[cfg(feature = "lang-cpp")]
    v.push(Box::new(AstStrategy {
        name: "cpp",
        label: "cpp",
        exts: &["cpp", "cc", "cxx", "hpp", "hh"],
        language: lang_cpp,
        rules: CPP_RULES,
        method_containers: &["field_declaration_list"],
        keyword_kinds: false,
    }));

    #[cfg(feature = "lang-swift")]
    v.push(Box::new(AstStrategy {
        name: "swift",
        label: "swift",
        exts: &["swift"],
        language: lang_swift,
        rules: SWIFT_RULES,
        method_containers: &["class_declaration", "protocol_declaration"],
        keyword_kinds: true,
    }));

    v
}

// ── Collection & assembly ───────────────────────────────────────────────────

#[derive(Debug)]
struct RawDecl {
    name: String,
    kind: ChunkKind,
    start_line: u32,
    end_line: u32,
    container: bool,
    method_ancestor: bool,
    signature: String,
}

impl ChunkStrategy for AstStrategy {
    fn name(&self) -> &'static str {
        self.name
    }

    fn extensions(&self) -> &'static [&'static str] {
        self.exts
    }

    fn chunk(&self, ctx: &FileContext<'_>) -> Result<ChunkerOutput> {
        let language = (self.language)();
        let mut parser = Parser::new();
        if parser.set_language(&language).is_err() {
            tracing::debug!(strategy = self.name, "grammar rejected by parser; falling back");
            return Ok(ChunkerOutput::default());
        }
        let Some(tree) = parser.parse(ctx.content, None) else {
            tracing::debug!(strategy = self.name, path = ctx.path, "parse failed; falling back");
            return Ok(ChunkerOutput::default());
        };
        let root = tree.root_node();
        let source = ctx.content.as_bytes();

        let mut decls: Vec<RawDecl> = Vec::new();
        for r in self.rules {
            self.collect_rule(r, &language, root, source, &mut decls);
        }
        if decls.is_empty() {
            return Ok(ChunkerOutput::default());
        }

        decls.sort_by(|a, b| {
            a.start_line
                .cmp(&b.start_line)
                .then(b.end_line.cmp(&a.end_line))
        });
        decls.dedup_by(|a, b| {
            a.start_line == b.start_line && a.end_line == b.end_line && a.kind == b.kind
        });

        let chunks = self.assemble(ctx, decls);
        Ok(ChunkerOutput {
            chunks,
            snippets: vec![],
        })
    }
}

impl AstStrategy {
    fn collect_rule(
        &self,
        rule: &DeclRule,
        language: &Language,
        root: Node<'_>,
        source: &[u8],
        out: &mut Vec<RawDecl>,
    ) {
        let query = match Query::new(language, rule.query) {
            Ok(q) => q,
            Err(e) => {
                tracing::debug!(strategy = self.name, error = %e, "query skipped");
                return;
            }
        };

        let mut cursor = QueryCursor::new();
        let mut matches = cursor.matches(&query, root, source);
        while let Some(m) = matches.next() {
            let mut name_node: Option<Node<'_>> = None;
            let mut def_node: Option<Node<'_>> = None;
            for cap in m.captures {
                match query.capture_names()[cap.index as usize] {
                    "name" => name_node = Some(cap.node),
                    "def" => def_node = Some(cap.node),
                    _ => {}
                }
            }
            let (Some(name_node), Some(def_node)) = (name_node, def_node) else {
                continue;
            };

            if rule.top_level_only && !is_top_level(def_node, root) {
                continue;
            }

            let name = node_text(source, name_node).trim().to_string();
            if name.is_empty() {
                continue;
            }

            let def_text = node_text(source, def_node);
            let kind = if self.keyword_kinds {
                refine_by_keyword(def_text, rule.kind)
            } else {
                rule.kind
            };

            out.push(RawDecl {
                name: truncate(&name, 120),
                kind,
                start_line: def_node.start_position().row as u32 + 1,
                end_line: def_node.end_position().row as u32 + 1,
                container: rule.container,
                method_ancestor: has_ancestor_kind(def_node, self.method_containers),
                signature: first_line_signature(def_text),
            });
        }
    }

    fn assemble(&self, ctx: &FileContext<'_>, decls: Vec<RawDecl>) -> Vec<CodeChunk> {
        let max_span = ctx.cfg.chunk_size.max(1) as u32;

        // Container resolution, outermost first: small containers swallow
        // members; large ones shrink to their header region.
        let mut suppressed = vec![false; decls.len()];
        let mut effective_end: Vec<u32> = decls.iter().map(|d| d.end_line).collect();

        let mut container_order: Vec<usize> = (0..decls.len()).filter(|&i| decls[i].container).collect();
        container_order.sort_by(|&a, &b| {
            decls[a]
                .start_line
                .cmp(&decls[b].start_line)
                .then(decls[b].end_line.cmp(&decls[a].end_line))
        });

        for &ci in &container_order {
            if suppressed[ci] {
                continue;
            }
            let (cs, ce) = (decls[ci].start_line, decls[ci].end_line);
            let members: Vec<usize> = (0..decls.len())
                .filter(|&j| {
                    j != ci
                        && decls[j].start_line >= cs
                        && decls[j].end_line <= ce
                        && (decls[j].start_line, decls[j].end_line) != (cs, ce)
                })
                .collect();

            if ce - cs + 1 <= max_span {
                for j in members {
                    suppressed[j] = true;
                }
            } else {
                let first_member = members
                    .iter()
                    .map(|&j| decls[j].start_line)
                    .filter(|&s| s > cs)
                    .min();
                let header_end = first_member
                    .map(|s| s.saturating_sub(1))
                    .unwrap_or(cs + max_span - 1)
                    .min(ce);
                effective_end[ci] = header_end.max(cs);
            }
        }

        // Ancestry for breadcrumbs: nearest enclosing container by line range.
        let enclosing_name = |i: usize| -> Option<String> {
            let d = &decls[i];
            container_order
                .iter()
                .filter(|&&ci| {
                    ci != i
                        && decls[ci].start_line <= d.start_line
                        && decls[ci].end_line >= d.end_line
                })
                .min_by_key(|&&ci| decls[ci].end_line - decls[ci].start_line)
                .map(|&ci| decls[ci].name.clone())
        };

        let file_name = ctx
            .path
            .rsplit('/')
            .next()
            .unwrap_or(ctx.path)
            .to_string();

        let mut chunks: Vec<CodeChunk> = Vec::new();

        // Preamble before the first declaration: imports, module docs.
        if let Some(first_start) = decls
            .iter()
            .enumerate()
            .filter(|(i, _)| !suppressed[*i])
            .map(|(_, d)| d.start_line)
            .min()
        {
            if first_start > 1 {
                let non_empty = ctx.lines[..(first_start - 1) as usize]
                    .iter()
                    .filter(|l| !l.trim().is_empty())
                    .count();
                if non_empty >= 3 {
                    chunks.push(build_chunk(
                        ctx,
                        1,
                        first_start - 1,
                        ChunkKind::Section,
                        vec![],
                        ChunkMeta {
                            language: Some(self.label),
                            ..ChunkMeta::default()
                        },
                    ));
                }
            }
        }

        for (i, d) in decls.iter().enumerate() {
            if suppressed[i] {
                continue;
            }
            let kind = if d.kind == ChunkKind::Function && d.method_ancestor {
                ChunkKind::Method
            } else {
                d.kind
            };

            let breadcrumb = match enclosing_name(i) {
                Some(outer) => format!("{file_name} > {outer} > {}", d.name),
                None => format!("{file_name} > {}", d.name),
            };

            chunks.push(build_chunk(
                ctx,
                d.start_line,
                effective_end[i],
                kind,
                vec![d.name.clone()],
                ChunkMeta {
                    doc_comment: doc_comment_above(&ctx.lines, d.start_line),
                    signature: Some(d.signature.clone()),
                    breadcrumb: Some(breadcrumb),
                    language: Some(self.label),
                },
            ));
        }

        chunks
    }
}

// ── Node helpers ────────────────────────────────────────────────────────────

fn node_text<'a>(source: &'a [u8], node: Node<'_>) -> &'a str {
    std::str::from_utf8(&source[node.start_byte()..node.end_byte()]).unwrap_or("")
}

fn is_top_level(node: Node<'_>, root: Node<'_>) -> bool {
    match node.parent() {
        None => true,
        Some(p) if p.id() == root.id() => true,
        Some(p) => {
            // One wrapper deep is still top level (`export const …`).
            p.kind().contains("export")
                && p.parent().map(|gp| gp.id() == root.id()).unwrap_or(false)
        }
    }
}

fn has_ancestor_kind(node: Node<'_>, kinds: &[&str]) -> bool {
    if kinds.is_empty() {
        return false;
    }
    let mut cur = node.parent();
    while let Some(n) = cur {
        if kinds.contains(&n.kind()) {
            return true;
        }
        cur = n.parent();
    }
    false
}

/// Map a declaration's leading keyword (skipping access modifiers) onto the
/// chunk kind. Used by grammars that fold several declaration forms into one
/// node kind.
fn refine_by_keyword(def_text: &str, fallback: ChunkKind) -> ChunkKind {
    for word in def_text.split_whitespace().take(5) {
        let kind = match word {
            "struct" => Some(ChunkKind::Struct),
            "class" => Some(ChunkKind::Class),
            "enum" => Some(ChunkKind::Enum),
            "actor" => Some(ChunkKind::Actor),
            "extension" => Some(ChunkKind::Extension),
            "protocol" => Some(ChunkKind::Protocol),
            "init" => Some(ChunkKind::Initializer),
            "func" => Some(ChunkKind::Function),
            "var" => Some(ChunkKind::Variable),
            "let" => Some(ChunkKind::Constant),
            "typealias" => Some(ChunkKind::Typealias),
            "macro" => Some(ChunkKind::Macro),
            _ => None,
        };
        if let Some(k) = kind {
            return k;
        }
    }
    fallback
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::{chunk_file, xxh3_hex};
    use crate::config::ChunkingConfig;

    fn chunk(path: &str, content: &str) -> Vec<CodeChunk> {
        let hash = xxh3_hex(content.as_bytes());
        chunk_file(path, content, &hash, &ChunkingConfig::default())
            .unwrap()
            .chunks
    }

    #[test]
    fn rust_functions_and_types_become_chunks() {
        let src = r#"
/// Authenticates a user.
pub fn authenticate(user: &str) -> bool {
    verify_token(user)
}

pub struct Session {
    token: String,
}
"#;
        let chunks = chunk("src/auth.rs", src);
        let func = chunks
            .iter()
            .find(|c| c.symbols.contains(&"authenticate".to_string()))
            .expect("authenticate chunk");
        assert_eq!(func.kind, ChunkKind::Function);
        assert!(func.doc_comment.as_deref().unwrap().contains("Authenticates"));
        assert!(func.references.contains(&"verify_token".to_string()));
        assert!(func.start_line <= func.end_line);

        let st = chunks
            .iter()
            .find(|c| c.symbols.contains(&"Session".to_string()))
            .expect("Session chunk");
        assert_eq!(st.kind, ChunkKind::Struct);
        assert_eq!(st.language, "rust");
    }

    #[test]
    fn rust_impl_methods_fold_into_small_impl_block() {
        let src = r#"
struct Counter;

impl Counter {
    fn incr(&mut self) {}
    fn decr(&mut self) {}
}
"#;
        let chunks = chunk("src/counter.rs", src);
        // The impl fits within chunk_size, so methods are swallowed.
        assert!(chunks.iter().any(|c| c.kind == ChunkKind::Extension));
        assert!(!chunks.iter().any(|c| c.kind == ChunkKind::Method));
    }

    #[test]
    fn rust_large_impl_emits_header_and_methods() {
        let mut src = String::from("struct Big;\n\nimpl Big {\n");
        for i in 0..30 {
            src.push_str(&format!("    fn method_{i}(&self) {{\n"));
            for _ in 0..4 {
                src.push_str("        let _ = 1;\n");
            }
            src.push_str("    }\n");
        }
        src.push_str("}\n");

        let cfg = ChunkingConfig {
            chunk_size: 40,
            chunk_overlap: 4,
        };
        let hash = xxh3_hex(src.as_bytes());
        let chunks = chunk_file("src/big.rs", &src, &hash, &cfg).unwrap().chunks;

        let methods: Vec<_> = chunks.iter().filter(|c| c.kind == ChunkKind::Method).collect();
        assert!(methods.len() >= 25, "expected standalone methods, got {}", methods.len());
        // Header chunk for the impl survives, shrunk to its opening region.
        let header = chunks.iter().find(|c| c.kind == ChunkKind::Extension).unwrap();
        assert!(header.end_line < header.start_line + 40);
        // Breadcrumbs point back into the container.
        assert!(methods[0].breadcrumb.as_deref().unwrap().contains("Big"));
    }

    #[test]
    fn python_class_and_functions() {
        let src = r#"
import os

def main():
    run()

class Worker:
    def work(self):
        pass
"#;
        let chunks = chunk("app/job.py", src);
        assert!(chunks
            .iter()
            .any(|c| c.kind == ChunkKind::Function && c.symbols == vec!["main".to_string()]));
        assert!(chunks.iter().any(|c| c.kind == ChunkKind::Class));
    }

    #[test]
    fn typescript_interface_and_class() {
        let src = r#"
export interface Shape {
  area(): number;
}

export class Circle {
  radius: number;
  area(): number { return 3.14 * this.radius * this.radius; }
}
"#;
        let chunks = chunk("src/shapes.ts", src);
        assert!(chunks.iter().any(|c| c.kind == ChunkKind::Interface));
        assert!(chunks.iter().any(|c| c.kind == ChunkKind::Class));
    }

    #[test]
    fn local_variables_never_become_chunks() {
        let src = r#"
export const LIMIT = 10;

export function run() {
  const local = 1;
  return local;
}
"#;
        let chunks = chunk("src/run.ts", src);
        let vars: Vec<_> = chunks
            .iter()
            .filter(|c| c.kind == ChunkKind::Variable)
            .collect();
        assert_eq!(vars.len(), 1);
        assert_eq!(vars[0].symbols, vec!["LIMIT".to_string()]);
    }

    #[test]
    fn keyword_refinement_maps_swift_like_headers() {
        assert_eq!(refine_by_keyword("public struct Point {", ChunkKind::Class), ChunkKind::Struct);
        assert_eq!(refine_by_keyword("final class App {", ChunkKind::Class), ChunkKind::Class);
        assert_eq!(refine_by_keyword("actor Pool {", ChunkKind::Class), ChunkKind::Actor);
        assert_eq!(refine_by_keyword("extension String {", ChunkKind::Class), ChunkKind::Extension);
        assert_eq!(refine_by_keyword("weird input", ChunkKind::Class), ChunkKind::Class);
    }
}
