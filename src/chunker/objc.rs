use crate::types::{ChunkKind, CodeChunk};

use super::{
    build_chunk, doc_comment_above, first_line_signature, ChunkMeta, ChunkStrategy, ChunkerOutput,
    FileContext,
};
use crate::error::Result;

// ---------------------------------------------------------------------------
// Objective-C — line scanner, no grammar.
//
// ObjC's surface is rigid enough that `@interface … @end`, `@implementation
// … @end`, `@property`, and `-/+` method forms can be recovered from lines,
// which keeps a whole grammar crate off the build for one legacy dialect.
// Containers follow the same small-swallows / large-header discipline as
// the AST strategies.
// ---------------------------------------------------------------------------

pub(crate) struct ObjCStrategy;

#[derive(Debug)]
struct Decl {
    kind: ChunkKind,
    name: String,
    start: u32, // 1-based inclusive
    end: u32,
    container: bool,
}

impl ChunkStrategy for ObjCStrategy {
    fn name(&self) -> &'static str {
        "objc"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["m", "mm"]
    }

    fn chunk(&self, ctx: &FileContext<'_>) -> Result<ChunkerOutput> {
        let decls = scan_decls(&ctx.lines);
        if decls.is_empty() {
            return Ok(ChunkerOutput::default());
        }

        let max_span = ctx.cfg.chunk_size.max(1) as u32;
        let mut suppressed = vec![false; decls.len()];
        let mut effective_end: Vec<u32> = decls.iter().map(|d| d.end).collect();

        for (ci, c) in decls.iter().enumerate() {
            if !c.container || suppressed[ci] {
                continue;
            }
            let members: Vec<usize> = decls
                .iter()
                .enumerate()
                .filter(|(j, d)| {
                    *j != ci && d.start >= c.start && d.end <= c.end && (d.start, d.end) != (c.start, c.end)
                })
                .map(|(j, _)| j)
                .collect();

            if c.end - c.start + 1 <= max_span {
                for j in members {
                    suppressed[j] = true;
                }
            } else {
                let first_member = members
                    .iter()
                    .map(|&j| decls[j].start)
                    .filter(|&s| s > c.start)
                    .min();
                effective_end[ci] = first_member
                    .map(|s| s.saturating_sub(1))
                    .unwrap_or(c.start + max_span - 1)
                    .min(c.end)
                    .max(c.start);
            }
        }

        let file_name = ctx.path.rsplit('/').next().unwrap_or(ctx.path);
        let mut chunks: Vec<CodeChunk> = Vec::new();

        for (i, d) in decls.iter().enumerate() {
            if suppressed[i] {
                continue;
            }
            let enclosing = decls
                .iter()
                .enumerate()
                .filter(|(j, c)| *j != i && c.container && c.start <= d.start && c.end >= d.end)
                .min_by_key(|(_, c)| c.end - c.start)
                .map(|(_, c)| c.name.clone());
            let breadcrumb = match enclosing {
                Some(outer) => format!("{file_name} > {outer} > {}", d.name),
                None => format!("{file_name} > {}", d.name),
            };

            let first_line = ctx.lines[(d.start - 1) as usize];
            chunks.push(build_chunk(
                ctx,
                d.start,
                effective_end[i],
                d.kind,
                vec![d.name.clone()],
                ChunkMeta {
                    doc_comment: doc_comment_above(&ctx.lines, d.start),
                    signature: Some(first_line_signature(first_line)),
                    breadcrumb: Some(breadcrumb),
                    language: Some("objc"),
                },
            ));
        }

        Ok(ChunkerOutput {
            chunks,
            snippets: vec![],
        })
    }
}

fn scan_decls(lines: &[&str]) -> Vec<Decl> {
    let mut decls = Vec::new();

    for (idx, raw) in lines.iter().enumerate() {
        let line_no = idx as u32 + 1;
        let t = raw.trim_start();

        if let Some(rest) = t.strip_prefix("@interface") {
            let (name, category) = parse_type_header(rest);
            let kind = if category {
                ChunkKind::ObjcCategory
            } else {
                ChunkKind::ObjcInterface
            };
            decls.push(Decl {
                kind,
                name,
                start: line_no,
                end: find_end(lines, idx),
                container: true,
            });
        } else if let Some(rest) = t.strip_prefix("@implementation") {
            let (name, category) = parse_type_header(rest);
            let kind = if category {
                ChunkKind::ObjcCategory
            } else {
                ChunkKind::ObjcImplementation
            };
            decls.push(Decl {
                kind,
                name,
                start: line_no,
                end: find_end(lines, idx),
                container: true,
            });
        } else if let Some(rest) = t.strip_prefix("@protocol") {
            // Forward declarations (`@protocol Foo;`) are not containers.
            if !rest.trim_end().ends_with(';') {
                let (name, _) = parse_type_header(rest);
                decls.push(Decl {
                    kind: ChunkKind::Protocol,
                    name,
                    start: line_no,
                    end: find_end(lines, idx),
                    container: true,
                });
            }
        } else if t.starts_with("@property") {
            if let Some(name) = parse_property_name(t) {
                decls.push(Decl {
                    kind: ChunkKind::ObjcProperty,
                    name,
                    start: line_no,
                    end: line_no,
                    container: false,
                });
            }
        } else if (t.starts_with("- (") || t.starts_with("+ (") || t.starts_with("-(") || t.starts_with("+("))
            && !t.starts_with("-->")
        {
            if let Some(selector) = parse_selector(t) {
                decls.push(Decl {
                    kind: ChunkKind::ObjcMethod,
                    name: selector,
                    start: line_no,
                    end: method_end(lines, idx),
                    container: false,
                });
            }
        }
    }

    decls
}

/// Matching `@end` for a container opened at `open_idx` (0-based).
fn find_end(lines: &[&str], open_idx: usize) -> u32 {
    for (idx, raw) in lines.iter().enumerate().skip(open_idx + 1) {
        if raw.trim_start().starts_with("@end") {
            return idx as u32 + 1;
        }
    }
    lines.len() as u32
}

/// End line of a method: the declaration line itself when it is a prototype
/// (`;` before any `{`), otherwise the line balancing the opening brace.
fn method_end(lines: &[&str], start_idx: usize) -> u32 {
    let mut depth: i32 = 0;
    let mut saw_brace = false;

    for (idx, raw) in lines.iter().enumerate().skip(start_idx) {
        for ch in raw.chars() {
            match ch {
                '{' => {
                    depth += 1;
                    saw_brace = true;
                }
                '}' => depth -= 1,
                ';' if !saw_brace => return idx as u32 + 1,
                _ => {}
            }
        }
        if saw_brace && depth <= 0 {
            return idx as u32 + 1;
        }
    }
    lines.len() as u32
}

/// `" Name : Super"` → ("Name", false); `" Name (Cat)"` → ("Name (Cat)", true).
fn parse_type_header(rest: &str) -> (String, bool) {
    let rest = rest.trim();
    let name: String = rest
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_')
        .collect();
    let after = rest[name.len()..].trim_start();
    if let Some(cat) = after.strip_prefix('(') {
        let cat_name: String = cat.chars().take_while(|c| *c != ')').collect();
        (format!("{name} ({})", cat_name.trim()), true)
    } else {
        (name, false)
    }
}

/// `- (void)doThing:(int)x withY:(int)y {` → `doThing:withY:`.
fn parse_selector(line: &str) -> Option<String> {
    let mut s = line.trim_start();
    s = s.strip_prefix('-').or_else(|| s.strip_prefix('+'))?.trim_start();
    s = skip_parens(s)?.trim_start();

    let mut selector = String::new();
    loop {
        let part: String = s
            .chars()
            .take_while(|c| c.is_alphanumeric() || *c == '_')
            .collect();
        if part.is_empty() {
            break;
        }
        s = s[part.len()..].trim_start();
        if let Some(after_colon) = s.strip_prefix(':') {
            selector.push_str(&part);
            selector.push(':');
            // Skip `(type)argname` and move to the next selector part.
            let mut rest = after_colon.trim_start();
            if rest.starts_with('(') {
                rest = skip_parens(rest)?;
            }
            let arg: String = rest
                .trim_start()
                .chars()
                .take_while(|c| c.is_alphanumeric() || *c == '_')
                .collect();
            s = rest.trim_start()[arg.len()..].trim_start();
        } else {
            if selector.is_empty() {
                selector = part;
            }
            break;
        }
    }

    if selector.is_empty() {
        None
    } else {
        Some(selector)
    }
}

fn skip_parens(s: &str) -> Option<&str> {
    let mut depth = 0i32;
    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[i + 1..]);
                }
            }
            _ => {}
        }
    }
    None
}

/// `@property (nonatomic, strong) NSString *title;` → `title`.
fn parse_property_name(line: &str) -> Option<String> {
    let body = line.trim_end().trim_end_matches(';');
    let last = body.split_whitespace().last()?;
    let name = last.trim_start_matches('*');
    if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return None;
    }
    Some(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::{chunk_file, xxh3_hex};
    use crate::config::ChunkingConfig;

    const SAMPLE: &str = r#"#import "Login.h"

@implementation LoginController

- (void)viewDidLoad {
    [super viewDidLoad];
    [self authenticate];
}

- (BOOL)authenticateWithUser:(NSString *)user token:(NSString *)token {
    return [self.keychain verify:user token:token];
}

@end
"#;

    fn chunks_for(content: &str, chunk_size: usize) -> Vec<CodeChunk> {
        let cfg = ChunkingConfig {
            chunk_size,
            chunk_overlap: 4,
        };
        let hash = xxh3_hex(content.as_bytes());
        chunk_file("app/Login.m", content, &hash, &cfg).unwrap().chunks
    }

    #[test]
    fn small_implementation_becomes_one_container_chunk() {
        let chunks = chunks_for(SAMPLE, 80);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].kind, ChunkKind::ObjcImplementation);
        assert_eq!(chunks[0].symbols, vec!["LoginController".to_string()]);
    }

    #[test]
    fn tight_budget_splits_out_methods() {
        let chunks = chunks_for(SAMPLE, 4);
        let methods: Vec<_> = chunks
            .iter()
            .filter(|c| c.kind == ChunkKind::ObjcMethod)
            .collect();
        assert_eq!(methods.len(), 2);
        assert!(methods
            .iter()
            .any(|m| m.symbols == vec!["authenticateWithUser:token:".to_string()]));
        // Implementation header survives as its own chunk.
        assert!(chunks.iter().any(|c| c.kind == ChunkKind::ObjcImplementation));
    }

    #[test]
    fn selector_parsing_handles_args_and_bare_forms() {
        assert_eq!(
            parse_selector("- (BOOL)authenticateWithUser:(NSString *)user token:(NSString *)t {").unwrap(),
            "authenticateWithUser:token:"
        );
        assert_eq!(parse_selector("- (void)reset {").unwrap(), "reset");
        assert_eq!(parse_selector("+ (instancetype)shared;").unwrap(), "shared");
    }

    #[test]
    fn categories_and_properties_are_recognized() {
        let src = r#"@interface NSString (Trimming)
@property (nonatomic, copy) NSString *cached;
- (NSString *)trimmed;
@end
"#;
        let cfg = ChunkingConfig {
            chunk_size: 1,
            chunk_overlap: 0,
        };
        let hash = xxh3_hex(src.as_bytes());
        let chunks = chunk_file("cat/NSString+Trimming.m", src, &hash, &cfg)
            .unwrap()
            .chunks;
        assert!(chunks.iter().any(|c| c.kind == ChunkKind::ObjcCategory));
        assert!(chunks
            .iter()
            .any(|c| c.kind == ChunkKind::ObjcProperty && c.symbols == vec!["cached".to_string()]));
        assert!(chunks.iter().any(|c| c.kind == ChunkKind::ObjcMethod));
    }
}
