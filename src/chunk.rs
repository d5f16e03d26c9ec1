//! Overlapping fixed-size text chunker.
//!
//! Splits normalized document text into [`Chunk`]s of at most `chunk_size`
//! characters. Consecutive chunks share exactly `overlap` characters so that
//! sentences straddling a boundary stay retrievable from either side.
//!
//! Boundaries prefer whitespace: a chunk ends just after the last whitespace
//! character that still moves the window forward past the overlap. When no
//! such whitespace exists (one very long word), the chunk is cut hard at
//! `chunk_size`.
//!
//! Each chunk records its overlap and start offset, so [`reconstruct`] can
//! rebuild the normalized text exactly, plus a SHA-256 hash of its text.

use sha2::{Digest, Sha256};

use crate::models::Chunk;

/// Approximate chars-per-token ratio used for prompt budgeting.
pub const CHARS_PER_TOKEN: usize = 4;

/// Rough token estimate for `text`.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// CRLF (and lone CR) to LF, surrounding whitespace trimmed.
pub fn normalize_text(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n").trim().to_string()
}

/// Split text into overlapping chunks with contiguous indices starting at 0.
///
/// Sizes are in characters. `overlap >= chunk_size` is clamped to
/// `chunk_size - 1`. Empty (or whitespace-only) text yields no chunks.
pub fn split(document_id: &str, text: &str, chunk_size: usize, overlap: usize) -> Vec<Chunk> {
    let chunk_size = chunk_size.max(1);
    let overlap = overlap.min(chunk_size - 1);

    let normalized = normalize_text(text);
    let chars: Vec<char> = normalized.chars().collect();
    let total = chars.len();

    let mut chunks = Vec::new();
    if total == 0 {
        return chunks;
    }

    let mut start = 0;
    loop {
        let limit = (start + chunk_size).min(total);
        let end = if limit == total {
            total
        } else {
            // Break after whitespace, but only where the next window still advances.
            (start + overlap + 1..=limit)
                .rev()
                .find(|&p| chars[p - 1].is_whitespace())
                .unwrap_or(limit)
        };

        let text: String = chars[start..end].iter().collect();
        let shared = if chunks.is_empty() { 0 } else { overlap };
        chunks.push(make_chunk(document_id, chunks.len(), text, shared, start));

        if end == total {
            break;
        }
        start = end - overlap;
    }

    chunks
}

/// Concatenate chunks, dropping each chunk's shared prefix.
///
/// For the output of [`split`] this equals the normalized input text.
pub fn reconstruct(chunks: &[Chunk]) -> String {
    let mut out = String::new();
    for chunk in chunks {
        out.extend(chunk.text.chars().skip(chunk.overlap));
    }
    out
}

fn make_chunk(document_id: &str, index: usize, text: String, overlap: usize, start: usize) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        document_id: document_id.to_string(),
        index,
        text,
        overlap,
        start,
        hash,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn char_len(s: &str) -> usize {
        s.chars().count()
    }

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = split("doc1", "Hello, world!", 1000, 200);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].overlap, 0);
        assert_eq!(chunks[0].text, "Hello, world!");
    }

    #[test]
    fn test_empty_text() {
        assert!(split("doc1", "", 1000, 200).is_empty());
        assert!(split("doc1", "  \r\n\t ", 1000, 200).is_empty());
    }

    #[test]
    fn test_normalizes_line_endings_and_trims() {
        let chunks = split("doc1", "  one\r\ntwo\r\n\r\nthree  ", 1000, 0);
        assert_eq!(chunks[0].text, "one\ntwo\n\nthree");
    }

    #[test]
    fn test_lengths_bounded_and_overlap_exact() {
        let text = (0..200)
            .map(|i| format!("word{}", i))
            .collect::<Vec<_>>()
            .join(" ");
        let chunks = split("doc1", &text, 50, 10);
        assert!(chunks.len() > 1);

        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.index, i);
            assert!(char_len(&c.text) <= 50, "chunk {} too long", i);
            assert!(!c.text.is_empty());
        }
        for pair in chunks.windows(2) {
            let prev: Vec<char> = pair[0].text.chars().collect();
            let next: Vec<char> = pair[1].text.chars().collect();
            assert_eq!(pair[1].overlap, 10);
            assert_eq!(prev[prev.len() - 10..], next[..10]);
        }
    }

    #[test]
    fn test_prefers_whitespace_boundaries() {
        let text = "alpha beta gamma delta epsilon zeta eta theta";
        let chunks = split("doc1", text, 12, 0);
        for c in &chunks[..chunks.len() - 1] {
            assert!(c.text.ends_with(' '), "chunk {:?} not cut at space", c.text);
        }
    }

    #[test]
    fn test_hard_cut_without_whitespace() {
        let text = "x".repeat(25);
        let chunks = split("doc1", &text, 10, 3);
        assert_eq!(char_len(&chunks[0].text), 10);
        assert_eq!(chunks[1].start, 7);
        assert_eq!(reconstruct(&chunks), text);
    }

    #[test]
    fn test_round_trip_equals_normalized_text() {
        let text = "Cats are mammals.\r\nThey purr.\n\n  Dogs bark loudly at night, \
                    and rocks are minerals that never move. Ünïcödé tëxt survives too.";
        for (size, overlap) in [(1, 0), (7, 3), (16, 5), (40, 39), (1000, 200)] {
            let chunks = split("doc1", text, size, overlap);
            assert_eq!(
                reconstruct(&chunks),
                normalize_text(text),
                "size={} overlap={}",
                size,
                overlap
            );
        }
    }

    #[test]
    fn test_overlap_clamped_below_chunk_size() {
        let chunks = split("doc1", "abcdefghij", 4, 10);
        for c in chunks.iter().skip(1) {
            assert_eq!(c.overlap, 3);
        }
        assert_eq!(reconstruct(&chunks), "abcdefghij");
    }

    #[test]
    fn test_start_offsets_point_into_normalized_text() {
        let text = "one two three four five six seven eight nine ten";
        let chars: Vec<char> = text.chars().collect();
        for c in split("doc1", text, 15, 4) {
            let expected: String = chars[c.start..c.start + char_len(&c.text)].iter().collect();
            assert_eq!(c.text, expected);
        }
    }

    #[test]
    fn test_deterministic() {
        let text = "Alpha beta gamma delta epsilon zeta eta theta iota kappa";
        let c1 = split("doc1", text, 20, 5);
        let c2 = split("doc1", text, 20, 5);
        assert_eq!(c1, c2);
        assert_eq!(c1[0].hash.len(), 64);
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }
}
