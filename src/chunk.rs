//! Heading-hierarchy text chunker.
//!
//! Splits normalized markdown into [`BodyChunk`]s that respect a token
//! budget. Splitting follows the document structure: heading sections first,
//! paragraph boundaries (`\n\n`) within a section. A unit that fits is never
//! split; a single unit over the budget becomes its own oversized chunk,
//! degraded but successful. Nested sections yield nested chunk indexes
//! (`$chunk/01/00`) mirroring heading depth.
//!
//! The tokenizer is injected. The default approximates tokens as
//! `chars / 4`, which is close enough for budgeting.
//!
//! Determinism is load-bearing: identical input and tokenizer produce
//! byte-identical chunk boundaries and addresses, so re-ingesting unchanged
//! content yields unchanged observable URIs.

use crate::bundle::BodyChunk;
use crate::metadata::Section;

pub const CHARS_PER_TOKEN: usize = 4;
pub const DEFAULT_MAX_TOKENS: usize = 4000;
pub const DEFAULT_THRESHOLD_TOKENS: usize = 20000;

pub trait Tokenizer: Send + Sync {
    fn count(&self, text: &str) -> usize;
}

/// `chars / 4`, rounded up.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApproxTokenizer;

impl Tokenizer for ApproxTokenizer {
    fn count(&self, text: &str) -> usize {
        text.chars().count().div_ceil(CHARS_PER_TOKEN)
    }
}

/// The chunker's output: the ordered chunk tree (flattened, pre-addressed)
/// plus the table-of-contents sections for multi-chunk bodies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkedBody {
    pub chunks: Vec<BodyChunk>,
    pub sections: Vec<Section>,
}

/// Chunk `text` under the given budget. Documents whose total size is at or
/// under `threshold_tokens` stay whole as a single chunk, byte-identical to
/// the input: the body observation of a single-chunk document is the
/// document.
pub fn chunk_body(
    text: &str,
    tokenizer: &dyn Tokenizer,
    max_tokens: usize,
    threshold_tokens: usize,
) -> ChunkedBody {
    let trimmed = text.trim();
    if trimmed.is_empty() || tokenizer.count(trimmed) <= threshold_tokens {
        return ChunkedBody {
            chunks: vec![BodyChunk {
                indexes: vec![0],
                heading: None,
                text: text.to_string(),
            }],
            sections: Vec::new(),
        };
    }

    let group = parse_groups(trimmed);
    let node = build_node(&group, tokenizer, max_tokens);

    let mut out = ChunkedBody::default();
    match node {
        Node::Leaf { heading, text } => out.chunks.push(BodyChunk {
            indexes: vec![0],
            heading,
            text,
        }),
        Node::Section { children, .. } => {
            emit_nodes(&children, &[], &mut out);
        }
    }
    out
}

///
/// Heading hierarchy
///

struct Group {
    level: usize,
    heading: Option<String>,
    /// Paragraphs before the first child heading, heading line included.
    intro: Vec<String>,
    children: Vec<Group>,
}

/// ATX heading depth of a line, ignoring lines inside code fences.
fn heading_level(line: &str) -> Option<(usize, String)> {
    let hashes = line.chars().take_while(|c| *c == '#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let rest = &line[hashes..];
    if !rest.starts_with(' ') && !rest.is_empty() {
        return None;
    }
    let title = rest.trim().trim_end_matches('#').trim().to_string();
    Some((hashes, title))
}

struct Part {
    level: usize,
    heading: Option<String>,
    paragraphs: Vec<String>,
}

/// Flatten the document into heading-delimited parts, fence-aware.
fn parse_parts(text: &str) -> Vec<Part> {
    let mut parts: Vec<Part> = vec![Part {
        level: 0,
        heading: None,
        paragraphs: Vec::new(),
    }];
    let mut buffer = String::new();
    let mut in_fence = false;

    fn flush(buffer: &mut String, part: &mut Part) {
        part.paragraphs.extend(
            buffer
                .split("\n\n")
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string),
        );
        buffer.clear();
    }

    for line in text.lines() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
        }
        let heading = if in_fence { None } else { heading_level(line) };
        match heading {
            Some((level, title)) => {
                if let Some(part) = parts.last_mut() {
                    flush(&mut buffer, part);
                }
                parts.push(Part {
                    level,
                    heading: if title.is_empty() { None } else { Some(title) },
                    paragraphs: vec![line.trim().to_string()],
                });
            }
            None => {
                if !buffer.is_empty() {
                    buffer.push('\n');
                }
                buffer.push_str(line);
            }
        }
    }
    if let Some(part) = parts.last_mut() {
        flush(&mut buffer, part);
    }
    parts
}

fn parse_groups(text: &str) -> Group {
    let mut parts = parse_parts(text).into_iter().peekable();
    let preamble = parts.next().expect("preamble part always present");
    let mut root = Group {
        level: 0,
        heading: None,
        intro: preamble.paragraphs,
        children: Vec::new(),
    };
    build_children(&mut parts, &mut root);
    root
}

fn build_children(
    parts: &mut std::iter::Peekable<std::vec::IntoIter<Part>>,
    parent: &mut Group,
) {
    while let Some(next) = parts.peek() {
        if next.level <= parent.level {
            return;
        }
        let part = parts.next().expect("peeked part");
        let mut group = Group {
            level: part.level,
            heading: part.heading,
            intro: part.paragraphs,
            children: Vec::new(),
        };
        build_children(parts, &mut group);
        parent.children.push(group);
    }
}

///
/// Budgeted chunk tree
///

enum Node {
    Leaf {
        heading: Option<String>,
        text: String,
    },
    Section {
        heading: Option<String>,
        children: Vec<Node>,
    },
}

fn flatten_group(group: &Group) -> String {
    let mut parts: Vec<String> = group.intro.clone();
    for child in &group.children {
        parts.push(flatten_group(child));
    }
    parts.join("\n\n")
}

fn build_node(group: &Group, tokenizer: &dyn Tokenizer, max_tokens: usize) -> Node {
    let full = flatten_group(group);
    if tokenizer.count(&full) <= max_tokens {
        return Node::Leaf {
            heading: group.heading.clone(),
            text: full,
        };
    }

    let mut children: Vec<Node> = Vec::new();
    let mut first = true;
    for text in pack_paragraphs(&group.intro, tokenizer, max_tokens) {
        children.push(Node::Leaf {
            heading: if first { group.heading.clone() } else { None },
            text,
        });
        first = false;
    }
    for child in &group.children {
        children.push(build_node(child, tokenizer, max_tokens));
    }
    let children = pack_neighbors(children, tokenizer, max_tokens);

    Node::Section {
        heading: group.heading.clone(),
        children,
    }
}

/// Accumulate whole paragraphs into budget-sized chunks. An oversized
/// paragraph becomes its own oversized chunk.
fn pack_paragraphs(
    paragraphs: &[String],
    tokenizer: &dyn Tokenizer,
    max_tokens: usize,
) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut buffer = String::new();

    for paragraph in paragraphs {
        let joined_len = if buffer.is_empty() {
            tokenizer.count(paragraph)
        } else {
            tokenizer.count(&buffer) + tokenizer.count("\n\n") + tokenizer.count(paragraph)
        };
        if joined_len > max_tokens && !buffer.is_empty() {
            out.push(std::mem::take(&mut buffer));
        }
        if !buffer.is_empty() {
            buffer.push_str("\n\n");
        }
        buffer.push_str(paragraph);
        if tokenizer.count(&buffer) > max_tokens {
            out.push(std::mem::take(&mut buffer));
        }
    }
    if !buffer.is_empty() {
        out.push(buffer);
    }
    out
}

/// Bin-pack adjacent small leaves. Sections and oversized leaves act as
/// barriers, so structure is preserved.
fn pack_neighbors(
    nodes: Vec<Node>,
    tokenizer: &dyn Tokenizer,
    max_tokens: usize,
) -> Vec<Node> {
    let mut out: Vec<Node> = Vec::new();
    for node in nodes {
        let fits = match (&node, out.last()) {
            (Node::Leaf { text, .. }, Some(Node::Leaf { text: prev, .. })) => {
                tokenizer.count(prev) + tokenizer.count("\n\n") + tokenizer.count(text)
                    <= max_tokens
            }
            _ => false,
        };
        if fits {
            // The merged heading stays the first leaf's; the absorbed
            // heading line is still present in the text itself.
            if let (Node::Leaf { text, .. }, Some(Node::Leaf { text: prev, .. })) =
                (&node, out.last_mut())
            {
                prev.push_str("\n\n");
                prev.push_str(text);
            }
        } else {
            out.push(node);
        }
    }
    out
}

fn emit_nodes(nodes: &[Node], prefix: &[usize], out: &mut ChunkedBody) {
    for (position, node) in nodes.iter().enumerate() {
        let mut indexes = prefix.to_vec();
        indexes.push(position);
        match node {
            Node::Leaf { heading, text } => {
                out.sections.push(Section {
                    indexes: indexes.clone(),
                    heading: heading.clone(),
                });
                out.chunks.push(BodyChunk {
                    indexes,
                    heading: heading.clone(),
                    text: text.clone(),
                });
            }
            Node::Section { heading, children } => {
                out.sections.push(Section {
                    indexes: indexes.clone(),
                    heading: heading.clone(),
                });
                emit_nodes(children, &indexes, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(text: &str, max_tokens: usize, threshold: usize) -> ChunkedBody {
        chunk_body(text, &ApproxTokenizer, max_tokens, threshold)
    }

    fn doc() -> String {
        let mut text = String::from("Preamble paragraph.\n\n");
        for section in 0..4 {
            text.push_str(&format!("# Section {section}\n\n"));
            for para in 0..6 {
                text.push_str(&format!(
                    "Section {section} paragraph {para} with enough words to carry weight.\n\n"
                ));
            }
            text.push_str(&format!("## Sub {section}\n\n"));
            for para in 0..6 {
                text.push_str(&format!(
                    "Sub {section} paragraph {para} with enough words to carry weight.\n\n"
                ));
            }
        }
        text
    }

    #[test]
    fn test_under_threshold_single_chunk() {
        let body = chunk("Short document.\n\nTwo paragraphs.", 10, 1000);
        assert_eq!(body.chunks.len(), 1);
        assert_eq!(body.chunks[0].indexes, vec![0]);
        assert!(body.sections.is_empty());
    }

    #[test]
    fn test_under_threshold_content_kept_verbatim() {
        // A single-chunk body is the document, trailing newline included.
        let text = "# Guide\n\nShort and sweet.\n";
        let body = chunk(text, 10, 1000);
        assert_eq!(body.chunks.len(), 1);
        assert_eq!(body.chunks[0].text, text);
    }

    #[test]
    fn test_empty_input_single_empty_chunk() {
        let body = chunk("", 10, 0);
        assert_eq!(body.chunks.len(), 1);
        assert_eq!(body.chunks[0].text, "");
    }

    #[test]
    fn test_heading_sections_become_chunks() {
        let body = chunk(&doc(), 60, 0);
        assert!(body.chunks.len() > 1);
        // Every chunk address is unique and content is preserved in order.
        let mut addresses: Vec<Vec<usize>> =
            body.chunks.iter().map(|c| c.indexes.clone()).collect();
        let before = addresses.len();
        addresses.dedup();
        assert_eq!(addresses.len(), before);
        let rejoined: String = body
            .chunks
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        assert!(rejoined.contains("Preamble paragraph."));
        assert!(rejoined.contains("Sub 3 paragraph 5"));
    }

    #[test]
    fn test_nested_indexes_mirror_heading_depth() {
        let body = chunk(&doc(), 30, 0);
        assert!(
            body.chunks.iter().any(|c| c.indexes.len() > 1),
            "expected nested chunk addresses, got {:?}",
            body.chunks.iter().map(|c| &c.indexes).collect::<Vec<_>>()
        );
        // Nested chunks are announced by a section at their prefix.
        for chunk in &body.chunks {
            if chunk.indexes.len() > 1 {
                let prefix = &chunk.indexes[..chunk.indexes.len() - 1];
                assert!(body.sections.iter().any(|s| s.indexes == prefix));
            }
        }
    }

    #[test]
    fn test_oversized_paragraph_kept_whole() {
        let huge = "x".repeat(4000);
        let text = format!("Small intro.\n\n{huge}\n\nSmall outro.");
        let body = chunk(&text, 100, 0);
        assert!(body.chunks.iter().any(|c| c.text == huge));
    }

    #[test]
    fn test_small_neighbors_packed() {
        let text = "# A\n\ntiny\n\n# B\n\ntiny\n\n# C\n\ntiny";
        let body = chunk(text, 1000, 0);
        assert_eq!(body.chunks.len(), 1, "{:?}", body.chunks);
        assert!(body.chunks[0].text.contains("# A"));
        assert!(body.chunks[0].text.contains("# C"));
    }

    #[test]
    fn test_deterministic() {
        let text = doc();
        let a = chunk(&text, 60, 0);
        let b = chunk(&text, 60, 0);
        assert_eq!(a, b);
    }

    #[test]
    fn test_fenced_hash_not_a_heading() {
        let text = "Intro.\n\n```\n# not a heading\n```\n\n# Real\n\ncontent";
        let group = parse_groups(text);
        assert_eq!(group.children.len(), 1);
        assert_eq!(group.children[0].heading.as_deref(), Some("Real"));
    }

    #[test]
    fn test_heading_detection() {
        assert_eq!(heading_level("# Title"), Some((1, "Title".to_string())));
        assert_eq!(heading_level("### Deep ###"), Some((3, "Deep".to_string())));
        assert_eq!(heading_level("#NoSpace"), None);
        assert_eq!(heading_level("plain"), None);
        assert_eq!(heading_level("####### Too deep"), None);
    }
}
