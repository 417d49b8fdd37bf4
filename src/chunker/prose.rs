use pulldown_cmark::{CodeBlockKind, Event, Options, Parser, Tag};

use crate::types::ChunkKind;

use super::{
    build_chunk, build_snippet, window, ChunkMeta, ChunkStrategy, ChunkerOutput, FileContext,
    SMALL_FILE_BYTES,
};
use crate::error::Result;

// ---------------------------------------------------------------------------
// Prose — Markdown sections become info snippets (heading-ancestry
// breadcrumbs), fenced code blocks become code chunks. Plain text falls
// back to window-sized snippets.
// ---------------------------------------------------------------------------

pub(crate) struct MarkdownStrategy;

impl ChunkStrategy for MarkdownStrategy {
    fn name(&self) -> &'static str {
        "markdown"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["md", "markdown", "mdx"]
    }

    fn chunk(&self, ctx: &FileContext<'_>) -> Result<ChunkerOutput> {
        let line_starts = line_start_offsets(ctx.content);
        let line_of = |byte: usize| -> u32 {
            match line_starts.binary_search(&byte) {
                Ok(i) => i as u32 + 1,
                Err(i) => i as u32, // i >= 1 because offset 0 is always present
            }
        };
        let last_line = ctx.lines.len().max(1) as u32;

        struct Heading {
            level: u32,
            title: String,
            start_byte: usize,
        }

        let mut headings: Vec<Heading> = Vec::new();
        let mut code_blocks: Vec<(std::ops::Range<usize>, String)> = Vec::new();

        let parser = Parser::new_ext(ctx.content, Options::empty()).into_offset_iter();
        let mut pending_heading: Option<(u32, usize)> = None;
        let mut title_buf = String::new();

        for (event, range) in parser {
            match event {
                Event::Start(Tag::Heading { level, .. }) => {
                    pending_heading = Some((level as u32, range.start));
                    title_buf.clear();
                }
                Event::Text(t) | Event::Code(t) if pending_heading.is_some() => {
                    title_buf.push_str(&t);
                }
                Event::End(pulldown_cmark::TagEnd::Heading(_)) => {
                    if let Some((level, start_byte)) = pending_heading.take() {
                        headings.push(Heading {
                            level,
                            title: title_buf.trim().to_string(),
                            start_byte,
                        });
                    }
                }
                Event::Start(Tag::CodeBlock(kind)) => {
                    let lang = match &kind {
                        CodeBlockKind::Fenced(info) => {
                            let l = info.split_whitespace().next().unwrap_or("");
                            if l.is_empty() { "text" } else { l }
                        }
                        CodeBlockKind::Indented => "text",
                    };
                    code_blocks.push((range.clone(), lang.to_string()));
                }
                _ => {}
            }
        }

        let file_name = ctx.path.rsplit('/').next().unwrap_or(ctx.path).to_string();
        let mut out = ChunkerOutput::default();

        // Fenced/indented code inside prose is retrievable as code.
        for (range, lang) in &code_blocks {
            let start = line_of(range.start);
            // Range end is exclusive and often sits at the next line start.
            let end = line_of(range.end.saturating_sub(1)).max(start);
            let label: &'static str = match lang.as_str() {
                "rust" | "rs" => "rust",
                "python" | "py" => "python",
                "swift" => "swift",
                "go" => "go",
                "c" => "c",
                "cpp" | "c++" => "cpp",
                "typescript" | "ts" => "typescript",
                "javascript" | "js" => "javascript",
                _ => "text",
            };
            out.chunks.push(build_chunk(
                ctx,
                start,
                end,
                ChunkKind::MarkdownCodeBlock,
                vec![],
                ChunkMeta {
                    language: Some(label),
                    ..ChunkMeta::default()
                },
            ));
        }

        if headings.is_empty() {
            // No structure: the whole document is one snippet.
            out.snippets
                .push(build_snippet(ctx, 1, last_line, file_name, None, None));
            return Ok(out);
        }

        // Preface before the first heading.
        let first_heading_line = line_of(headings[0].start_byte);
        if first_heading_line > 1 {
            let has_text = ctx.lines[..(first_heading_line - 1) as usize]
                .iter()
                .any(|l| !l.trim().is_empty());
            if has_text {
                out.snippets.push(build_snippet(
                    ctx,
                    1,
                    first_heading_line - 1,
                    file_name.clone(),
                    None,
                    None,
                ));
            }
        }

        // One snippet per heading, spanning until the next heading of the
        // same or higher level. Breadcrumb is the heading ancestry.
        let mut stack: Vec<(u32, String)> = Vec::new();
        for (i, h) in headings.iter().enumerate() {
            while stack.last().map(|(l, _)| *l >= h.level).unwrap_or(false) {
                stack.pop();
            }

            let start = line_of(h.start_byte);
            let end = headings[i + 1..]
                .iter()
                .find(|n| n.level <= h.level)
                .map(|n| line_of(n.start_byte).saturating_sub(1))
                .unwrap_or(last_line)
                .max(start);

            let mut crumb_parts: Vec<&str> = vec![file_name.as_str()];
            crumb_parts.extend(stack.iter().map(|(_, t)| t.as_str()));
            crumb_parts.push(h.title.as_str());
            let breadcrumb = crumb_parts.join(" > ");

            out.snippets.push(build_snippet(
                ctx,
                start,
                end,
                h.title.clone(),
                Some(breadcrumb),
                None,
            ));

            stack.push((h.level, h.title.clone()));
        }

        Ok(out)
    }
}

pub(crate) struct PlainTextStrategy;

impl ChunkStrategy for PlainTextStrategy {
    fn name(&self) -> &'static str {
        "text"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["txt", "text", "rst", "adoc"]
    }

    fn chunk(&self, ctx: &FileContext<'_>) -> Result<ChunkerOutput> {
        let file_name = ctx.path.rsplit('/').next().unwrap_or(ctx.path).to_string();
        let mut out = ChunkerOutput::default();

        if ctx.content.len() <= SMALL_FILE_BYTES {
            out.snippets.push(build_snippet(
                ctx,
                1,
                ctx.lines.len().max(1) as u32,
                file_name,
                None,
                None,
            ));
            return Ok(out);
        }

        for (start, end) in
            window::window_spans(ctx.lines.len(), ctx.cfg.chunk_size, ctx.cfg.chunk_overlap)
        {
            out.snippets.push(build_snippet(
                ctx,
                start,
                end,
                format!("{file_name} (lines {start}-{end})"),
                None,
                None,
            ));
        }
        Ok(out)
    }
}

fn line_start_offsets(content: &str) -> Vec<usize> {
    let mut offsets = vec![0usize];
    for (i, b) in content.bytes().enumerate() {
        if b == b'\n' {
            offsets.push(i + 1);
        }
    }
    offsets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::{chunk_file, xxh3_hex};
    use crate::config::ChunkingConfig;

    const DOC: &str = r#"Intro paragraph.

# Install

Get the binary.

## Linux

Use the tarball.

```rust
fn main() {}
```

# Usage

Run it.
"#;

    fn output_for(path: &str, content: &str) -> ChunkerOutput {
        let hash = xxh3_hex(content.as_bytes());
        chunk_file(path, content, &hash, &ChunkingConfig::default()).unwrap()
    }

    #[test]
    fn markdown_sections_become_snippets_with_breadcrumbs() {
        let out = output_for("README.md", DOC);

        let titles: Vec<&str> = out.snippets.iter().map(|s| s.title.as_str()).collect();
        assert!(titles.contains(&"README.md")); // preface
        assert!(titles.contains(&"Install"));
        assert!(titles.contains(&"Linux"));
        assert!(titles.contains(&"Usage"));

        let linux = out.snippets.iter().find(|s| s.title == "Linux").unwrap();
        assert_eq!(linux.breadcrumb.as_deref(), Some("README.md > Install > Linux"));
        // The Linux section stops before "# Usage".
        assert!(linux.content.contains("tarball"));
        assert!(!linux.content.contains("Run it"));
    }

    #[test]
    fn fenced_code_blocks_become_code_chunks() {
        let out = output_for("README.md", DOC);
        let code: Vec<_> = out
            .chunks
            .iter()
            .filter(|c| c.kind == ChunkKind::MarkdownCodeBlock)
            .collect();
        assert_eq!(code.len(), 1);
        assert_eq!(code[0].language, "rust");
        assert!(code[0].content.contains("fn main"));
    }

    #[test]
    fn headingless_markdown_is_one_document_snippet() {
        let out = output_for("notes.md", "plain prose only\nsecond line\n");
        assert_eq!(out.snippets.len(), 1);
        assert_eq!(out.snippets[0].title, "notes.md");
        assert_eq!(out.snippets[0].start_line, 1);
    }

    #[test]
    fn plain_text_windows_into_snippets() {
        let small = output_for("notes.txt", "a note\nanother\n");
        assert_eq!(small.snippets.len(), 1);

        let big_content = "line\n".repeat(5000);
        let big = output_for("log.txt", &big_content);
        assert!(big.snippets.len() > 1);
        assert!(big.snippets[0].title.contains("log.txt"));
    }
}
