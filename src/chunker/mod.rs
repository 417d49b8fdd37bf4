use chrono::Utc;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::OnceLock;

use crate::config::ChunkingConfig;
use crate::error::{EngineError, Result};
use crate::types::{ChunkKind, CodeChunk, InfoSnippet};

mod data;
mod objc;
mod prose;
mod treesitter;
mod window;

// ---------------------------------------------------------------------------
// Chunker — file text in, ordered chunks + snippets out.
//
// A registry maps file extensions to a language strategy:
//
//   AST strategies (tree-sitter)  rs, ts/tsx, js/jsx, py, go, c, cpp, swift
//   Line strategies               ObjC (.m/.mm, sniffed .h)
//   Structural strategies         json, yaml
//   Prose strategies              markdown (sections → snippets), plain text
//   Window fallback               everything a strategy degrades to
//
// Failures are structured (`parse_error` / `parse_unavailable`) and never
// crash the caller; a file that yields nothing is recorded upstream as
// indexed with zero chunks so it is not retried until its bytes change.
// ---------------------------------------------------------------------------

/// Files at or below this size that produce no declarations become a single
/// whole-file chunk instead of line windows (fast path for small sources).
pub const SMALL_FILE_BYTES: usize = 8 * 1024;

/// Cap on lexically extracted references per chunk.
const MAX_REFERENCES: usize = 32;

// ---------------------------------------------------------------------------
// Hashing & identity
// ---------------------------------------------------------------------------

/// xxh3 hex digest of raw bytes. The engine-wide deterministic hash:
/// file hashes, content hashes, and chunk ids all derive from it.
#[inline]
pub fn xxh3_hex(bytes: &[u8]) -> String {
    format!("{:016x}", xxhash_rust::xxh3::xxh3_64(bytes))
}

/// Stable chunk identity: a pure function of `(path, start_line, kind,
/// first symbol)`. Re-parsing unchanged content reproduces the same id.
/// Line-shifting edits produce new ids; vector reuse is keyed on
/// `content_hash`, not on id stability.
pub fn chunk_id(path: &str, start_line: u32, kind: ChunkKind, first_symbol: Option<&str>) -> String {
    let seed = format!(
        "{path}\u{0}{start_line}\u{0}{}\u{0}{}",
        kind.as_str(),
        first_symbol.unwrap_or("")
    );
    xxh3_hex(seed.as_bytes())
}

/// Snippet identity, analogous to [`chunk_id`] but keyed on the title.
pub fn snippet_id(path: &str, start_line: u32, title: &str) -> String {
    let seed = format!("{path}\u{0}{start_line}\u{0}snippet\u{0}{title}");
    xxh3_hex(seed.as_bytes())
}

/// ~4 chars per token; bytes are a good-enough proxy for chars here.
pub fn estimate_tokens(content: &str) -> u32 {
    ((content.len() + 3) / 4) as u32
}

// ---------------------------------------------------------------------------
// Strategy plumbing
// ---------------------------------------------------------------------------

pub struct FileContext<'a> {
    pub path: &'a str,
    pub content: &'a str,
    pub lines: Vec<&'a str>,
    pub file_hash: &'a str,
    pub cfg: &'a ChunkingConfig,
}

#[derive(Debug, Default)]
pub struct ChunkerOutput {
    pub chunks: Vec<CodeChunk>,
    pub snippets: Vec<InfoSnippet>,
}

pub(crate) trait ChunkStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    /// Lowercase extensions (no dot) this strategy claims.
    fn extensions(&self) -> &'static [&'static str];
    fn chunk(&self, ctx: &FileContext<'_>) -> Result<ChunkerOutput>;
}

struct Registry {
    strategies: Vec<Box<dyn ChunkStrategy>>,
    by_ext: BTreeMap<&'static str, usize>,
}

impl Registry {
    fn build() -> Self {
        let strategies: Vec<Box<dyn ChunkStrategy>> = {
            let mut v: Vec<Box<dyn ChunkStrategy>> = Vec::new();
            v.extend(treesitter::strategies());
            v.push(Box::new(objc::ObjCStrategy));
            v.push(Box::new(data::JsonStrategy));
            v.push(Box::new(data::YamlStrategy));
            v.push(Box::new(prose::MarkdownStrategy));
            v.push(Box::new(prose::PlainTextStrategy));
            v
        };

        let mut by_ext = BTreeMap::new();
        for (idx, s) in strategies.iter().enumerate() {
            for ext in s.extensions() {
                // First registration wins; later strategies never shadow.
                by_ext.entry(*ext).or_insert(idx);
            }
        }
        Self { strategies, by_ext }
    }

    fn for_extension(&self, ext: &str) -> Option<&dyn ChunkStrategy> {
        self.by_ext.get(ext).map(|&i| self.strategies[i].as_ref())
    }
}

fn registry() -> &'static Registry {
    static REG: OnceLock<Registry> = OnceLock::new();
    REG.get_or_init(Registry::build)
}

/// Every extension some strategy claims; the scanner admits these when the
/// configured include set is empty.
pub fn supported_extensions() -> Vec<&'static str> {
    registry().by_ext.keys().copied().collect()
}

pub fn is_supported(path: &Path) -> bool {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    registry().by_ext.contains_key(ext.as_str())
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Chunk one file. `path` is repo-relative with '/' separators; `file_hash`
/// is the xxh3 digest of the full file bytes and is copied into every chunk.
pub fn chunk_file(
    path: &str,
    content: &str,
    file_hash: &str,
    cfg: &ChunkingConfig,
) -> Result<ChunkerOutput> {
    if content.trim().is_empty() {
        return Ok(ChunkerOutput::default());
    }

    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    // `.h` is ambiguous between C, C++ and ObjC; sniff the content.
    let strategy = if ext == "h" {
        header_strategy(content)
    } else {
        registry().for_extension(&ext)
    };

    let Some(strategy) = strategy else {
        return Err(EngineError::ParseUnavailable(Path::new(path).to_path_buf()));
    };

    let ctx = FileContext {
        path,
        content,
        lines: content.lines().collect(),
        file_hash,
        cfg,
    };

    let mut out = strategy.chunk(&ctx)?;

    // A strategy that found nothing at all degrades to the window fallback
    // so the file still participates in retrieval.
    if out.chunks.is_empty() && out.snippets.is_empty() {
        out.chunks = fallback_chunks(&ctx);
    }

    dedup_in_place(&mut out);
    Ok(out)
}

/// Resolve `.h` by sniffing: ObjC markers first, then C++ surface, else C.
/// Falls back across disabled grammar features to whatever is compiled in.
fn header_strategy(content: &str) -> Option<&'static dyn ChunkStrategy> {
    let reg = registry();
    if content.contains("@interface") || content.contains("@implementation") || content.contains("@protocol")
    {
        return reg.for_extension("m");
    }
    let looks_cpp = content.contains("template<")
        || content.contains("template <")
        || content.contains("namespace ")
        || content.contains("class ");
    if looks_cpp {
        if let Some(s) = reg.for_extension("cpp") {
            return Some(s);
        }
    }
    reg.for_extension("c").or_else(|| reg.for_extension("txt"))
}

/// Whole-file chunk for small files, line windows otherwise.
pub(crate) fn fallback_chunks(ctx: &FileContext<'_>) -> Vec<CodeChunk> {
    if ctx.content.len() <= SMALL_FILE_BYTES {
        let end = ctx.lines.len().max(1) as u32;
        return vec![build_chunk(
            ctx,
            1,
            end,
            ChunkKind::File,
            vec![],
            ChunkMeta::default(),
        )];
    }
    window::window_chunks(ctx, ChunkKind::Section)
}

// ---------------------------------------------------------------------------
// Chunk construction helpers (shared across strategies)
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone)]
pub(crate) struct ChunkMeta {
    pub doc_comment: Option<String>,
    pub signature: Option<String>,
    pub breadcrumb: Option<String>,
    pub language: Option<&'static str>,
}

/// Build a chunk for the inclusive 1-based line range `[start, end]`.
pub(crate) fn build_chunk(
    ctx: &FileContext<'_>,
    start: u32,
    end: u32,
    kind: ChunkKind,
    symbols: Vec<String>,
    meta: ChunkMeta,
) -> CodeChunk {
    let total = ctx.lines.len() as u32;
    let start = start.clamp(1, total.max(1));
    let end = end.clamp(start, total.max(1));

    let content = ctx.lines[(start - 1) as usize..end as usize].join("\n");
    let content_hash = xxh3_hex(content.as_bytes());
    let id = chunk_id(ctx.path, start, kind, symbols.first().map(String::as_str));
    let references = lexical_references(&content, &symbols);
    let token_count = estimate_tokens(&content);

    CodeChunk {
        id,
        path: ctx.path.to_string(),
        content,
        start_line: start,
        end_line: end,
        kind,
        symbols,
        references,
        file_hash: ctx.file_hash.to_string(),
        content_hash,
        doc_comment: meta.doc_comment,
        signature: meta.signature,
        breadcrumb: meta.breadcrumb,
        token_count,
        language: meta.language.unwrap_or("text").to_string(),
        generated_description: None,
        created_at: Utc::now(),
    }
}

pub(crate) fn build_snippet(
    ctx: &FileContext<'_>,
    start: u32,
    end: u32,
    title: String,
    breadcrumb: Option<String>,
    chunk_id: Option<String>,
) -> InfoSnippet {
    let total = ctx.lines.len() as u32;
    let start = start.clamp(1, total.max(1));
    let end = end.clamp(start, total.max(1));
    let content = ctx.lines[(start - 1) as usize..end as usize].join("\n");

    InfoSnippet {
        id: snippet_id(ctx.path, start, &title),
        path: ctx.path.to_string(),
        content,
        start_line: start,
        end_line: end,
        title,
        breadcrumb,
        chunk_id,
        created_at: Utc::now(),
    }
}

/// Words no language counts as an identifier worth chasing.
const STOP_WORDS: &[&str] = &[
    "fn", "let", "mut", "pub", "use", "mod", "impl", "struct", "enum", "trait", "type", "const",
    "static", "match", "return", "if", "else", "for", "while", "loop", "break", "continue",
    "async", "await", "self", "Self", "super", "crate", "where", "dyn", "ref", "move", "true",
    "false", "none", "null", "nil", "class", "def", "import", "from", "func", "var", "void",
    "int", "float", "double", "char", "bool", "string", "String", "new", "delete", "this",
    "public", "private", "protected", "internal", "extends", "implements", "interface", "export",
    "default", "function", "typeof", "instanceof", "switch", "case", "try", "catch", "finally",
    "throw", "throws", "raise", "pass", "lambda", "yield", "with", "not", "and", "elif", "print",
    "package", "chan", "defer", "range", "map", "make", "len", "cap", "nil", "init", "deinit",
    "guard", "extension", "protocol", "typealias", "actor", "some", "any",
];

/// Extract call-shaped and identifier-shaped tokens from chunk content.
///
/// A token qualifies as a reference when it is not a keyword, not one of the
/// chunk's own symbols, at least 3 chars, and either (a) immediately
/// followed by `(` — a call site — or (b) CamelCase / snake_case shaped.
/// First-seen order, capped at [`MAX_REFERENCES`].
pub(crate) fn lexical_references(content: &str, own_symbols: &[String]) -> Vec<String> {
    let own: HashSet<&str> = own_symbols.iter().map(String::as_str).collect();
    let stop: HashSet<&str> = STOP_WORDS.iter().copied().collect();

    let bytes = content.as_bytes();
    let mut seen: HashSet<String> = HashSet::new();
    let mut out: Vec<String> = Vec::new();

    let mut i = 0usize;
    while i < bytes.len() && out.len() < MAX_REFERENCES {
        let c = bytes[i] as char;
        if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < bytes.len() && ((bytes[i] as char).is_ascii_alphanumeric() || bytes[i] == b'_')
            {
                i += 1;
            }
            let token = &content[start..i];
            let followed_by_paren = bytes.get(i) == Some(&b'(');

            if token.len() >= 3 && !stop.contains(token) && !own.contains(token) {
                let has_shape = token.contains('_')
                    || (token.chars().any(|ch| ch.is_uppercase())
                        && token.chars().any(|ch| ch.is_lowercase()));
                if (followed_by_paren || has_shape) && seen.insert(token.to_string()) {
                    out.push(token.to_string());
                }
            }
        } else {
            i += 1;
        }
    }
    out
}

/// Contiguous comment lines directly above `start_line` (1-based), if any.
pub(crate) fn doc_comment_above(lines: &[&str], start_line: u32) -> Option<String> {
    if start_line <= 1 {
        return None;
    }
    let mut collected: Vec<&str> = Vec::new();
    let mut idx = (start_line - 2) as usize; // line above, 0-based
    loop {
        let t = lines.get(idx)?.trim_start();
        let is_comment = t.starts_with("///")
            || t.starts_with("//!")
            || t.starts_with("//")
            || t.starts_with('#') && !t.starts_with("#!")
            || t.starts_with("/*")
            || t.starts_with('*')
            || t.starts_with("--");
        if !is_comment {
            break;
        }
        collected.push(lines[idx].trim());
        if idx == 0 {
            break;
        }
        idx -= 1;
    }
    if collected.is_empty() {
        return None;
    }
    collected.reverse();
    Some(collected.join("\n"))
}

/// Collapse a declaration's text to a one-line signature: cut at the first
/// `{` or newline, squeeze whitespace, cap the length.
pub(crate) fn first_line_signature(def_text: &str) -> String {
    let mut s = def_text;
    if let Some(i) = s.find('{') {
        s = &s[..i];
    }
    if let Some(i) = s.find('\n') {
        s = &s[..i];
    }

    let mut out = String::with_capacity(s.len().min(200));
    let mut prev_ws = false;
    for ch in s.chars() {
        let is_ws = ch.is_whitespace();
        if is_ws {
            if !prev_ws {
                out.push(' ');
            }
        } else {
            out.push(ch);
        }
        prev_ws = is_ws;
        if out.len() >= 240 {
            break;
        }
    }

    out.trim().trim_end_matches('{').trim().to_string()
}

/// Drop duplicate `(path, start, end, kind)` rows and id collisions
/// (same start/kind/first-symbol with a different end), keeping the first.
fn dedup_in_place(out: &mut ChunkerOutput) {
    let mut seen = HashSet::new();
    let mut seen_ids = HashSet::new();
    out.chunks.retain(|c| {
        seen.insert((c.start_line, c.end_line, c.kind)) && seen_ids.insert(c.id.clone())
    });
    out.chunks
        .sort_by(|a, b| (a.start_line, a.end_line).cmp(&(b.start_line, b.end_line)));

    let mut seen_s = HashSet::new();
    out.snippets.retain(|s| seen_s.insert(s.id.clone()));
    out.snippets.sort_by_key(|s| s.start_line);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> ChunkingConfig {
        ChunkingConfig::default()
    }

    #[test]
    fn chunk_ids_are_stable_across_reparses() {
        let a = chunk_id("src/auth.rs", 10, ChunkKind::Function, Some("authenticate"));
        let b = chunk_id("src/auth.rs", 10, ChunkKind::Function, Some("authenticate"));
        assert_eq!(a, b);
        // Any tuple component changing changes the id.
        assert_ne!(a, chunk_id("src/auth.rs", 11, ChunkKind::Function, Some("authenticate")));
        assert_ne!(a, chunk_id("src/auth.rs", 10, ChunkKind::Method, Some("authenticate")));
        assert_ne!(a, chunk_id("src/other.rs", 10, ChunkKind::Function, Some("authenticate")));
    }

    #[test]
    fn content_hash_is_pure_function_of_content() {
        let h1 = xxh3_hex(b"fn main() {}");
        let h2 = xxh3_hex(b"fn main() {}");
        let h3 = xxh3_hex(b"fn main() { }");
        assert_eq!(h1, h2);
        assert_ne!(h1, h3);
    }

    #[test]
    fn lexical_references_pick_calls_and_shaped_identifiers() {
        let refs = lexical_references(
            "fn handler() { authenticate(user); let x = HttpClient::new(); retry_count += 1; }",
            &["handler".to_string()],
        );
        assert!(refs.contains(&"authenticate".to_string()));
        assert!(refs.contains(&"HttpClient".to_string()));
        assert!(refs.contains(&"retry_count".to_string()));
        // Keywords and own symbols never appear.
        assert!(!refs.iter().any(|r| r == "handler" || r == "let" || r == "fn"));
    }

    #[test]
    fn doc_comment_collected_above_declaration() {
        let lines: Vec<&str> = vec!["/// Adds numbers.", "/// Slowly.", "fn add() {}"];
        let doc = doc_comment_above(&lines, 3).unwrap();
        assert_eq!(doc, "/// Adds numbers.\n/// Slowly.");
        assert!(doc_comment_above(&lines, 1).is_none());
    }

    #[test]
    fn unknown_extension_is_parse_unavailable() {
        let err = chunk_file("a.blob", "data", "ffff", &cfg()).unwrap_err();
        assert!(matches!(err, EngineError::ParseUnavailable(_)));
    }

    #[test]
    fn empty_content_yields_nothing() {
        let out = chunk_file("a.rs", "   \n  ", "ffff", &cfg()).unwrap();
        assert!(out.chunks.is_empty());
        assert!(out.snippets.is_empty());
    }

    #[test]
    fn plain_text_still_produces_retrieval_units() {
        let out = chunk_file("notes.txt", "just words here\nand more words", "ffff", &cfg()).unwrap();
        assert!(!out.snippets.is_empty() || !out.chunks.is_empty());
    }

    #[test]
    fn signature_collapses_whitespace_and_braces() {
        let sig = first_line_signature("pub fn   index(\n    root: &Path,\n) -> Result<()> {");
        assert_eq!(sig, "pub fn index(");
    }
}
