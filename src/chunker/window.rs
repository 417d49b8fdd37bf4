use crate::types::{ChunkKind, CodeChunk};

use super::{build_chunk, ChunkMeta, FileContext};

// Character-window fallback: fixed-size line windows with a small overlap.
// Used when no structural strategy produced anything for a file.

/// Inclusive 1-based `(start, end)` line spans covering `total_lines`.
pub(crate) fn window_spans(total_lines: usize, size: usize, overlap: usize) -> Vec<(u32, u32)> {
    let size = size.max(1);
    let overlap = overlap.min(size - 1);
    let step = size - overlap;

    let mut spans = Vec::new();
    let mut start = 0usize;
    while start < total_lines {
        let end = (start + size).min(total_lines);
        spans.push((start as u32 + 1, end as u32));
        if end == total_lines {
            break;
        }
        start += step;
    }
    spans
}

pub(crate) fn window_chunks(ctx: &FileContext<'_>, kind: ChunkKind) -> Vec<CodeChunk> {
    window_spans(ctx.lines.len(), ctx.cfg.chunk_size, ctx.cfg.chunk_overlap)
        .into_iter()
        .map(|(start, end)| build_chunk(ctx, start, end, kind, vec![], ChunkMeta::default()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spans_cover_every_line_exactly_once_at_zero_overlap() {
        let spans = window_spans(10, 4, 0);
        assert_eq!(spans, vec![(1, 4), (5, 8), (9, 10)]);
    }

    #[test]
    fn spans_overlap_by_configured_amount() {
        let spans = window_spans(10, 4, 1);
        assert_eq!(spans.first(), Some(&(1, 4)));
        assert_eq!(spans[1].0, 4); // next window starts on the last line of the previous
        assert_eq!(spans.last().unwrap().1, 10);
    }

    #[test]
    fn single_short_file_is_one_span() {
        assert_eq!(window_spans(3, 80, 8), vec![(1, 3)]);
        assert!(window_spans(0, 80, 8).is_empty());
    }

    #[test]
    fn overlap_ge_size_is_clamped() {
        // Would loop forever if overlap were allowed to equal size.
        let spans = window_spans(6, 2, 5);
        assert_eq!(spans.last().unwrap().1, 6);
    }
}
