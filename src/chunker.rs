/// Markdown-aware chunker.
///
/// Splits a note's text into trimmed, non-empty segments bounded by
/// `chunk_size` characters (by `char` count), with `chunk_overlap` characters
/// carried over from the tail of the previous segment. Splitting is
/// deterministic for identical input and parameters, so re-ingesting
/// unchanged content yields byte-identical chunk boundaries.
use std::fs;
use std::path::Path;

use pulldown_cmark::{Event, Options, Parser, Tag, TagEnd};

#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub content: String,
    pub position: usize,
}

/// Chunk geometry, taken from the configuration.
#[derive(Debug, Clone, Copy)]
pub struct ChunkParams {
    pub size: usize,
    pub overlap: usize,
}

impl Default for ChunkParams {
    fn default() -> Self {
        Self {
            size: 400,
            overlap: 80,
        }
    }
}

/// Reads a markdown file and splits it into chunks.
pub fn chunk_file<P: AsRef<Path>>(filepath: P, params: ChunkParams) -> std::io::Result<Vec<Chunk>> {
    let content = fs::read_to_string(filepath)?;
    Ok(chunk_text(&content, params))
}

/// Splits markdown text into overlapping chunks.
///
/// An empty or whitespace-only input yields an empty vector.
pub fn chunk_text(content: &str, params: ChunkParams) -> Vec<Chunk> {
    let body = strip_frontmatter(content);
    let blocks = extract_blocks(body);
    pack_blocks(&blocks, params)
        .into_iter()
        .enumerate()
        .map(|(position, content)| Chunk { content, position })
        .collect()
}

/// Drop a leading YAML frontmatter fence (`---` ... `---`) if present.
fn strip_frontmatter(content: &str) -> &str {
    let rest = match content.strip_prefix("---") {
        Some(r) if r.starts_with('\n') || r.starts_with("\r\n") => r,
        _ => return content,
    };

    for (idx, _) in rest.match_indices('\n') {
        let after = &rest[idx + 1..];
        if after.starts_with("---") {
            let tail = &after[3..];
            if tail.is_empty() || tail.starts_with('\n') || tail.starts_with("\r\n") {
                return tail;
            }
        }
    }

    content
}

/// Extract plain-text blocks from markdown, breaking at headings,
/// paragraphs, list items, and code blocks.
fn extract_blocks(markdown: &str) -> Vec<String> {
    let parser = Parser::new_ext(markdown, Options::empty());

    fn flush(buf: &mut String, out: &mut Vec<String>) {
        let trimmed = buf.trim();
        if !trimmed.is_empty() {
            out.push(trimmed.to_string());
        }
        buf.clear();
    }

    let mut blocks = Vec::new();
    let mut current = String::new();

    for event in parser {
        match event {
            Event::Start(Tag::Heading { .. }) => flush(&mut current, &mut blocks),
            Event::End(
                TagEnd::Heading(_) | TagEnd::Paragraph | TagEnd::Item | TagEnd::CodeBlock,
            ) => flush(&mut current, &mut blocks),
            Event::Text(text) | Event::Code(text) => current.push_str(&text),
            Event::SoftBreak => current.push(' '),
            Event::HardBreak => current.push('\n'),
            Event::Rule => flush(&mut current, &mut blocks),
            _ => {}
        }
    }
    flush(&mut current, &mut blocks);

    blocks
}

/// Pack blocks greedily into chunks of at most `size` characters, seeding
/// each new chunk with up to `overlap` characters from the previous one.
fn pack_blocks(blocks: &[String], params: ChunkParams) -> Vec<String> {
    let ChunkParams { size, overlap } = params;

    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();

    for block in blocks {
        let block_len = block.chars().count();

        // A single oversized block is hard-split on its own.
        if block_len > size {
            if !current.trim().is_empty() {
                chunks.push(current.trim().to_string());
            }
            current = String::new();
            chunks.extend(split_large_block(block, size, overlap));
            continue;
        }

        let current_len = current.chars().count();
        if current_len > 0 && current_len + block_len + 2 > size {
            chunks.push(current.trim().to_string());
            current = String::new();
        }

        if current.is_empty() {
            if let Some(prev) = chunks.last() {
                let seed = overlap_tail(prev, overlap);
                let seed_len = seed.chars().count();
                if seed_len > 0 && seed_len + block_len + 2 <= size {
                    current = seed;
                }
            }
        }

        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(block);
    }

    if !current.trim().is_empty() {
        chunks.push(current.trim().to_string());
    }

    chunks
}

/// Splits an oversized block into `size`-bounded pieces, preferring sentence
/// boundaries and overlapping consecutive pieces by up to `overlap` characters.
fn split_large_block(block: &str, size: usize, overlap: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut chars: Vec<char> = block.trim().chars().collect();

    while chars.len() > size {
        let mut cut_point = size;

        // Search backwards from `size` to `size / 2` for a sentence boundary
        let min_search = size / 2;
        for i in (min_search..=size).rev() {
            if i < chars.len() {
                let r = chars[i];
                if r == '.' || r == '!' || r == '?' || r == '\n' || r == '。' {
                    cut_point = i + 1;
                    break;
                }
            }
        }

        if cut_point > chars.len() {
            cut_point = chars.len();
        }

        let piece: String = chars[..cut_point].iter().collect();
        let piece = piece.trim();
        if !piece.is_empty() {
            pieces.push(piece.to_string());
        }

        // Restart `overlap` characters before the cut, advanced to the next
        // whitespace boundary so no word is torn in half.
        let mut start = cut_point.saturating_sub(overlap).max(1);
        while start < cut_point && !chars[start].is_whitespace() {
            start += 1;
        }

        let remaining: String = chars[start..].iter().collect();
        chars = remaining.trim().chars().collect();
    }

    if !chars.is_empty() {
        let final_str: String = chars.into_iter().collect();
        let final_str = final_str.trim().to_string();
        if !final_str.is_empty() {
            pieces.push(final_str);
        }
    }

    pieces
}

/// Return the last `overlap` characters of `text`, aligned forward to a
/// whitespace boundary and trimmed. May be empty.
fn overlap_tail(text: &str, overlap: usize) -> String {
    if overlap == 0 {
        return String::new();
    }

    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return String::new();
    }

    let mut start = chars.len().saturating_sub(overlap);
    while start < chars.len() && !chars[start].is_whitespace() && start > 0 {
        start += 1;
        if start >= chars.len() {
            return String::new();
        }
    }

    let tail: String = chars[start..].iter().collect();
    tail.trim().to_string()
}
