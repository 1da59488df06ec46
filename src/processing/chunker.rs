//! Whitespace normalization and fixed-window overlapping chunking (§4.4).

/// Trim, then collapse every run of Unicode whitespace to a single ASCII
/// space.
pub fn preprocess(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_space = false;
    for ch in text.trim().chars() {
        if ch.is_whitespace() {
            if !in_space {
                out.push(' ');
                in_space = true;
            }
        } else {
            out.push(ch);
            in_space = false;
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub content: String,
    pub chunk_index: u32,
}

/// Split preprocessed text on whitespace into words, then slide a window of
/// `chunk_size` words forward by `step = max(1, chunk_size - chunk_overlap)`
/// until the window start reaches the end of the word sequence. Emits no
/// chunks for empty text; callers synthesize a single empty chunk so every
/// document has at least one row (§3 Chunk invariant).
pub fn chunk(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<Chunk> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return Vec::new();
    }

    let chunk_size = chunk_size.max(1);
    let step = chunk_size.saturating_sub(chunk_overlap).max(1);

    let mut chunks = Vec::new();
    let mut i = 0usize;
    let mut index = 0u32;
    loop {
        let end = (i + chunk_size).min(words.len());
        chunks.push(Chunk {
            content: words[i..end].join(" "),
            chunk_index: index,
        });
        if end == words.len() {
            break;
        }
        index += 1;
        i += step;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn preprocess_trims_and_collapses_whitespace() {
        assert_eq!(preprocess("  hello\t\tworld\n\n "), "hello world");
    }

    #[test]
    fn empty_text_produces_no_chunks() {
        assert!(chunk("", 200, 50).is_empty());
        assert!(chunk("   ", 200, 50).is_empty());
    }

    #[test]
    fn chunk_indices_are_dense_and_zero_based() {
        let text = (0..500).map(|i| i.to_string()).collect::<Vec<_>>().join(" ");
        let chunks = chunk(&text, 200, 50);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as u32);
        }
    }

    #[test]
    fn chunk_count_matches_formula() {
        // k words, chunk_size s, overlap o -> step = max(1, s-o);
        // count = ceil(max(0, k-o) / step) (property 5, §8).
        let k = 237;
        let s = 50;
        let o = 10;
        let text = (0..k).map(|i| i.to_string()).collect::<Vec<_>>().join(" ");
        let chunks = chunk(&text, s, o);
        let step = (s - o).max(1);
        let expected = ((k.saturating_sub(o)) as f64 / step as f64).ceil() as usize;
        assert_eq!(chunks.len(), expected.max(1));
    }

    #[test]
    fn single_word_produces_one_chunk() {
        let chunks = chunk("solo", 200, 50);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "solo");
    }

    #[test]
    fn stops_once_window_reaches_the_end_without_a_trailing_chunk() {
        // k=7, chunk_size=3, overlap=1 -> step=2; windows start at 0,2,4 and
        // the window at i=4 already reaches the end, so no window starts at
        // i=6 (property 5: ceil((7-1)/2) = 3 chunks, not ceil(7/2) = 4).
        let text = "one two three four five six seven";
        let chunks = chunk(text, 3, 1);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].content, "one two three");
        assert_eq!(chunks[1].content, "three four five");
        assert_eq!(chunks[2].content, "five six seven");
    }

    #[test]
    fn reconstructs_words_by_striding_step() {
        let text = "a b c d e f g h";
        let chunks = chunk(text, 3, 1);
        // step = 2, windows: [a b c] [c d e] [e f g] [g h]
        assert_eq!(chunks[0].content, "a b c");
        assert_eq!(chunks[1].content, "c d e");
        assert_eq!(chunks.last().unwrap().content, "g h");
    }
}
