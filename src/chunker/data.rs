use crate::types::{ChunkKind, CodeChunk};

use super::{build_chunk, ChunkMeta, ChunkStrategy, ChunkerOutput, FileContext};
use crate::error::Result;

// ---------------------------------------------------------------------------
// Data files — JSON and YAML.
//
// Both chunkers work on top-level structure only: each top-level member
// (object key / array element / document key) becomes a chunk, with runs of
// tiny members merged so a 2000-key lockfile does not explode into 2000
// one-line chunks. Nested structure stays inside its member's chunk.
// ---------------------------------------------------------------------------

/// Members shorter than this merge with their neighbours.
const TINY_MEMBER_LINES: u32 = 6;

#[derive(Debug)]
struct Member {
    start_line: u32,
    end_line: u32,
    kind: ChunkKind,
    key: Option<String>,
}

/// Merge runs of tiny members into grouped chunks bounded by `max_span`.
fn emit_members(
    ctx: &FileContext<'_>,
    members: Vec<Member>,
    language: &'static str,
) -> Vec<CodeChunk> {
    let max_span = ctx.cfg.chunk_size.max(1) as u32;
    let mut chunks = Vec::new();

    let mut group: Vec<&Member> = Vec::new();
    let flush = |group: &mut Vec<&Member>, chunks: &mut Vec<CodeChunk>| {
        if group.is_empty() {
            return;
        }
        let start = group.first().unwrap().start_line;
        let end = group.last().unwrap().end_line;
        let kind = if group.iter().all(|m| m.kind == ChunkKind::JsonArray) {
            ChunkKind::JsonArray
        } else if group.iter().all(|m| m.kind == ChunkKind::YamlSequence) {
            ChunkKind::YamlSequence
        } else {
            group.first().unwrap().kind
        };
        let symbols: Vec<String> = group.iter().filter_map(|m| m.key.clone()).take(8).collect();
        chunks.push(build_chunk(
            ctx,
            start,
            end,
            kind,
            symbols,
            ChunkMeta {
                language: Some(language),
                ..ChunkMeta::default()
            },
        ));
        group.clear();
    };

    for m in &members {
        let span = m.end_line - m.start_line + 1;
        if span >= TINY_MEMBER_LINES {
            flush(&mut group, &mut chunks);
            chunks.push(build_chunk(
                ctx,
                m.start_line,
                m.end_line,
                m.kind,
                m.key.clone().into_iter().collect(),
                ChunkMeta {
                    language: Some(language),
                    ..ChunkMeta::default()
                },
            ));
            continue;
        }

        let group_start = group.first().map(|g| g.start_line).unwrap_or(m.start_line);
        if m.end_line - group_start + 1 > max_span {
            flush(&mut group, &mut chunks);
        }
        group.push(m);
    }
    flush(&mut group, &mut chunks);

    chunks
}

// ── JSON ────────────────────────────────────────────────────────────────────

pub(crate) struct JsonStrategy;

impl ChunkStrategy for JsonStrategy {
    fn name(&self) -> &'static str {
        "json"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["json", "jsonc", "geojson"]
    }

    fn chunk(&self, ctx: &FileContext<'_>) -> Result<ChunkerOutput> {
        let root = ctx.content.trim_start().chars().next();
        let root_kind = match root {
            Some('{') => ChunkKind::JsonObject,
            Some('[') => ChunkKind::JsonArray,
            _ => {
                // Scalar root or not-quite-JSON: one chunk, done.
                return Ok(single_chunk(ctx, ChunkKind::JsonObject, "json"));
            }
        };

        let spans = top_level_spans(ctx.content);
        if spans.is_empty() {
            return Ok(single_chunk(ctx, root_kind, "json"));
        }

        let line_index = LineIndex::new(ctx.content);
        let members: Vec<Member> = spans
            .into_iter()
            .map(|s| {
                let value_char = ctx.content[s.value_start..].trim_start().chars().next();
                let kind = match value_char {
                    Some('[') => ChunkKind::JsonArray,
                    _ => ChunkKind::JsonObject,
                };
                Member {
                    start_line: line_index.line_of(s.start),
                    end_line: line_index.line_of(s.end),
                    kind,
                    key: s.key,
                }
            })
            .collect();

        Ok(ChunkerOutput {
            chunks: emit_members(ctx, members, "json"),
            snippets: vec![],
        })
    }
}

struct MemberSpan {
    start: usize,
    end: usize, // inclusive byte
    value_start: usize,
    key: Option<String>,
}

/// Byte spans of top-level members of a JSON object or array, found with a
/// depth/string-aware sweep (no full JSON parse — line spans are the point).
fn top_level_spans(content: &str) -> Vec<MemberSpan> {
    let bytes = content.as_bytes();
    let mut spans = Vec::new();

    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    let mut member_start: Option<usize> = None;
    let mut key_range: Option<(usize, usize)> = None;
    let mut current_key: Option<(usize, usize)> = None;
    let mut value_start: Option<usize> = None;

    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
                if depth == 1 && key_range.is_none() && member_start == Some(i_string_start(bytes, i))
                {
                    // String just closed was the first token of the member: a key
                    // candidate (objects) or a string element (arrays).
                    key_range = Some((member_start.unwrap() + 1, i));
                }
            }
            continue;
        }

        match b {
            b'"' => {
                in_string = true;
                if depth == 1 && member_start.is_none() {
                    member_start = Some(i);
                }
            }
            b'{' | b'[' => {
                if depth == 1 && member_start.is_none() {
                    member_start = Some(i);
                }
                if depth == 1 && value_start.is_none() && member_start.is_some() {
                    value_start = Some(i);
                }
                depth += 1;
            }
            b'}' | b']' => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = member_start.take() {
                        spans.push(close_member(content, s, i - 1, current_key.or(key_range), value_start));
                    }
                }
            }
            b':' if depth == 1 => {
                current_key = key_range.take();
                value_start = None;
            }
            b',' if depth == 1 => {
                if let Some(s) = member_start.take() {
                    spans.push(close_member(content, s, i - 1, current_key.take().or(key_range.take()), value_start.take()));
                }
                key_range = None;
                current_key = None;
                value_start = None;
            }
            b if !b.is_ascii_whitespace() => {
                if depth == 1 && member_start.is_none() {
                    member_start = Some(i);
                }
                if depth == 1 && value_start.is_none() && current_key.is_some() {
                    value_start = Some(i);
                }
            }
            _ => {}
        }
    }

    spans
}

fn i_string_start(bytes: &[u8], close: usize) -> usize {
    // Walk back to the opening quote; member_start was set there.
    let mut i = close;
    while i > 0 {
        i -= 1;
        if bytes[i] == b'"' && (i == 0 || bytes[i - 1] != b'\\') {
            return i;
        }
    }
    0
}

fn close_member(
    content: &str,
    start: usize,
    end: usize,
    key: Option<(usize, usize)>,
    value_start: Option<usize>,
) -> MemberSpan {
    // Trim trailing whitespace back to real content.
    let mut e = end.min(content.len().saturating_sub(1));
    let bytes = content.as_bytes();
    while e > start && bytes[e].is_ascii_whitespace() {
        e -= 1;
    }
    MemberSpan {
        start,
        end: e,
        value_start: value_start.unwrap_or(start),
        key: key.map(|(a, b)| content[a..b].to_string()).filter(|k| !k.is_empty()),
    }
}

// ── YAML ────────────────────────────────────────────────────────────────────

pub(crate) struct YamlStrategy;

impl ChunkStrategy for YamlStrategy {
    fn name(&self) -> &'static str {
        "yaml"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["yaml", "yml"]
    }

    fn chunk(&self, ctx: &FileContext<'_>) -> Result<ChunkerOutput> {
        let mut members: Vec<Member> = Vec::new();
        let total = ctx.lines.len() as u32;

        let mut i = 0usize;
        while i < ctx.lines.len() {
            let line = ctx.lines[i];
            let t = line.trim_end();
            let indented = line.starts_with(' ') || line.starts_with('\t');

            if t.is_empty() || t.starts_with('#') || t == "---" || t == "..." || indented {
                i += 1;
                continue;
            }

            let start_line = i as u32 + 1;
            let (kind, key) = if t.starts_with("- ") || t == "-" {
                (ChunkKind::YamlSequence, None)
            } else if let Some(colon) = t.find(':') {
                (ChunkKind::YamlMapping, Some(t[..colon].trim().to_string()))
            } else {
                (ChunkKind::YamlMapping, None)
            };

            // Node extends until the next top-level line.
            let mut j = i + 1;
            while j < ctx.lines.len() {
                let next = ctx.lines[j];
                let nt = next.trim_end();
                let next_top = !nt.is_empty()
                    && !next.starts_with(' ')
                    && !next.starts_with('\t')
                    && !nt.starts_with('#');
                if next_top {
                    break;
                }
                j += 1;
            }
            // Walk back over trailing blank lines.
            let mut end_line = j as u32;
            while end_line > start_line
                && ctx.lines[(end_line - 1) as usize].trim().is_empty()
            {
                end_line -= 1;
            }

            members.push(Member {
                start_line,
                end_line: end_line.min(total),
                kind,
                key,
            });
            i = j;
        }

        if members.is_empty() {
            return Ok(single_chunk(ctx, ChunkKind::YamlMapping, "yaml"));
        }

        Ok(ChunkerOutput {
            chunks: emit_members(ctx, members, "yaml"),
            snippets: vec![],
        })
    }
}

fn single_chunk(ctx: &FileContext<'_>, kind: ChunkKind, language: &'static str) -> ChunkerOutput {
    ChunkerOutput {
        chunks: vec![build_chunk(
            ctx,
            1,
            ctx.lines.len().max(1) as u32,
            kind,
            vec![],
            ChunkMeta {
                language: Some(language),
                ..ChunkMeta::default()
            },
        )],
        snippets: vec![],
    }
}

struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    fn new(content: &str) -> Self {
        let mut starts = vec![0usize];
        for (i, b) in content.bytes().enumerate() {
            if b == b'\n' {
                starts.push(i + 1);
            }
        }
        Self { starts }
    }

    fn line_of(&self, byte: usize) -> u32 {
        match self.starts.binary_search(&byte) {
            Ok(i) => i as u32 + 1,
            Err(i) => i as u32,
        }
    }
}
