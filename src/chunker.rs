//! Structure-aware message chunking.
//!
//! Decides whether a message body needs splitting for a token-limited
//! consumer and, when it does, segments it along structural boundaries:
//! header block, commit-message summary, per-file diffs (critical vs.
//! detail), quoted discussion, and trailing signature. Splitting never cuts
//! mid-line and prefers hunk boundaries inside diffs. Output order is the
//! original document order — the per-kind priority is metadata for the
//! consumer's own merge policy, not a reordering directive.

use anyhow::{Context, Result};
use regex::Regex;

use crate::config::ChunkingConfig;
use crate::models::{ChunkKind, ContentChunk, MessageType};

/// Approximate chars-per-token ratio used by the token estimator.
const CHARS_PER_TOKEN: usize = 4;

/// Cap on the leading-prose summary extracted from a review reply.
const REVIEW_SUMMARY_CHARS: usize = 1000;

/// Estimate the token count of a text.
pub fn estimate_tokens(text: &str) -> usize {
    text.len() / CHARS_PER_TOKEN
}

pub struct Chunker {
    max_tokens: usize,
    max_diff_bytes: usize,
    max_quote_depth: usize,
    critical: Vec<Regex>,
}

impl Chunker {
    pub fn new(config: &ChunkingConfig) -> Result<Self> {
        let critical = config
            .critical_patterns
            .iter()
            .map(|p| Regex::new(p).with_context(|| format!("invalid critical pattern '{}'", p)))
            .collect::<Result<Vec<_>>>()?;

        Ok(Chunker {
            max_tokens: config.max_tokens,
            max_diff_bytes: config.max_diff_bytes,
            max_quote_depth: config.max_quote_depth,
            critical,
        })
    }

    /// Chunk one message body.
    ///
    /// Small messages come back as a single `Header` chunk covering the
    /// whole content; oversized ones are segmented and bounded. Never fails
    /// for any input text.
    pub fn chunk(&self, content: &str, message_type: MessageType) -> Vec<ContentChunk> {
        if !self.needs_chunking(content) {
            return vec![make_chunk(ChunkKind::Header, content.to_string())];
        }

        let segments = self.segment(content, message_type);
        let mut chunks = Vec::new();
        for (kind, text) in segments {
            if estimate_tokens(&text) > self.max_tokens {
                for piece in self.split_large(&text, kind) {
                    chunks.push(make_chunk(kind, piece));
                }
            } else {
                chunks.push(make_chunk(kind, text));
            }
        }

        if chunks.is_empty() {
            chunks.push(make_chunk(ChunkKind::Header, content.to_string()));
        }
        chunks
    }

    /// Splitting triggers: token estimate over the limit, embedded diffs
    /// over the byte threshold, or deep reply-quote nesting.
    fn needs_chunking(&self, content: &str) -> bool {
        estimate_tokens(content) > self.max_tokens
            || diff_bytes(content) > self.max_diff_bytes
            || quote_depth(content) > self.max_quote_depth
    }

    /// Segment content along structural boundaries, in document order.
    fn segment(&self, content: &str, message_type: MessageType) -> Vec<(ChunkKind, String)> {
        let mut segments = Vec::new();

        let (header, rest) = split_header(content);
        if let Some(mut header_text) = header {
            header_text.push_str(&format!("\nMessage-Type: {}\n", message_type.as_str()));
            segments.push((ChunkKind::Header, header_text));
        }

        let (body, signature) = split_signature(rest);

        match message_type {
            MessageType::Patch | MessageType::PatchCover => {
                segments.extend(self.patch_segments(body));
            }
            MessageType::Review => segments.extend(review_segments(body)),
            _ => segments.extend(discussion_segments(body)),
        }

        if let Some(sig) = signature {
            segments.push((ChunkKind::Metadata, sig));
        }

        segments.retain(|(_, text)| !text.trim().is_empty());
        segments
    }

    /// Patch bodies: commit-message summary, diffstat, then one segment per
    /// `diff --git` file section classified critical or detail.
    fn patch_segments(&self, body: &str) -> Vec<(ChunkKind, String)> {
        let mut segments = Vec::new();
        let mut preamble: Vec<&str> = Vec::new();
        let mut diff: Vec<&str> = Vec::new();
        let mut in_diff = false;

        let flush_diff = |diff: &mut Vec<&str>, segments: &mut Vec<(ChunkKind, String)>| {
            if diff.is_empty() {
                return;
            }
            let text = diff.join("\n");
            let kind = if self.is_critical(&text) {
                ChunkKind::CodeCritical
            } else {
                ChunkKind::CodeDetail
            };
            segments.push((kind, text));
            diff.clear();
        };

        for line in body.lines() {
            if line.starts_with("diff --git") {
                if !in_diff {
                    segments.extend(classify_preamble(&preamble));
                    preamble.clear();
                    in_diff = true;
                } else {
                    flush_diff(&mut diff, &mut segments);
                }
                diff.push(line);
            } else if in_diff {
                diff.push(line);
            } else {
                preamble.push(line);
            }
        }
        if in_diff {
            flush_diff(&mut diff, &mut segments);
        } else {
            segments.extend(classify_preamble(&preamble));
        }

        segments
    }

    fn is_critical(&self, diff: &str) -> bool {
        self.critical.iter().any(|re| re.is_match(diff))
    }

    /// Re-split an oversized segment without ever cutting mid-line. Code
    /// segments break at hunk boundaries first; pieces that still exceed the
    /// budget fall back to plain line grouping.
    fn split_large(&self, text: &str, kind: ChunkKind) -> Vec<String> {
        let budget = self.max_tokens * CHARS_PER_TOKEN;

        let coarse = if matches!(kind, ChunkKind::CodeCritical | ChunkKind::CodeDetail) {
            group_at_boundaries(text, budget, |line| {
                line.starts_with("@@") || line.starts_with("diff --git")
            })
        } else {
            vec![text.to_string()]
        };

        let mut pieces = Vec::new();
        for part in coarse {
            if part.len() <= budget {
                pieces.push(part);
            } else {
                pieces.extend(group_at_boundaries(&part, budget, |_| true));
            }
        }
        pieces
    }
}

/// Greedy line grouping: accumulate lines and flush when the budget would
/// be exceeded, but only at lines for which `may_break` holds.
fn group_at_boundaries(text: &str, budget: usize, may_break: impl Fn(&str) -> bool) -> Vec<String> {
    let mut groups = Vec::new();
    let mut current = String::new();

    for line in text.lines() {
        if !current.is_empty() && current.len() + line.len() + 1 > budget && may_break(line) {
            groups.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);
    }
    if !current.is_empty() {
        groups.push(current);
    }
    groups
}

/// Split a leading `Name: value` header block off the content, if present.
fn split_header(content: &str) -> (Option<String>, &str) {
    let looks_like_header = content
        .lines()
        .next()
        .and_then(|l| l.split_once(':'))
        .map(|(name, _)| {
            !name.is_empty() && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
        })
        .unwrap_or(false);
    if !looks_like_header {
        return (None, content);
    }

    match content.find("\n\n") {
        Some(pos) => (Some(content[..pos].to_string()), &content[pos + 2..]),
        None => (None, content),
    }
}

/// Split a trailing `-- ` signature block off the content, if present.
fn split_signature(content: &str) -> (&str, Option<String>) {
    if let Some(pos) = content.rfind("\n-- \n") {
        let sig = &content[pos + 1..];
        // Only treat short trailers as signatures; a long tail is content.
        if sig.lines().count() <= 10 {
            return (&content[..pos], Some(sig.to_string()));
        }
    }
    (content, None)
}

/// Classify the pre-diff part of a patch body: the commit message is the
/// summary; anything between the `---` separator and the first diff (the
/// diffstat and version notes) is metadata.
fn classify_preamble(lines: &[&str]) -> Vec<(ChunkKind, String)> {
    let mut segments = Vec::new();
    let separator = lines.iter().position(|l| l.trim_end() == "---");

    match separator {
        Some(pos) => {
            segments.push((ChunkKind::Summary, lines[..pos].join("\n")));
            segments.push((ChunkKind::Metadata, lines[pos..].join("\n")));
        }
        None => {
            segments.push((ChunkKind::Summary, lines.join("\n")));
        }
    }
    segments
}

/// Review bodies: leading unquoted prose becomes the summary, the rest is
/// split at quote-level changes into discussion segments.
fn review_segments(body: &str) -> Vec<(ChunkKind, String)> {
    let mut summary: Vec<&str> = Vec::new();
    let mut taken = 0usize;
    let mut rest_start = 0usize;

    for line in body.lines() {
        if line.starts_with('>') || taken > REVIEW_SUMMARY_CHARS {
            break;
        }
        taken += line.len() + 1;
        rest_start += line.len() + 1;
        summary.push(line);
    }

    let mut segments = Vec::new();
    if !summary.is_empty() {
        segments.push((ChunkKind::Summary, summary.join("\n")));
    }
    let rest = if rest_start <= body.len() {
        &body[rest_start.min(body.len())..]
    } else {
        ""
    };
    segments.extend(discussion_segments(rest));
    segments
}

/// Split content at quote-level changes; each section is one discussion
/// segment. A section that carries no recognizable structure at all still
/// defaults to discussion, with a warning.
fn discussion_segments(body: &str) -> Vec<(ChunkKind, String)> {
    let mut segments = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_level = 0usize;

    for line in body.lines() {
        let level = leading_quote_depth(line);
        if level != current_level && !current.is_empty() {
            segments.push((ChunkKind::Discussion, current.join("\n")));
            current.clear();
        }
        current_level = level;
        current.push(line);
    }
    if !current.is_empty() {
        let text = current.join("\n");
        if text.trim().lines().all(|l| l.trim().is_empty()) {
            eprintln!("warning: unclassifiable trailing segment, treating as discussion");
        }
        segments.push((ChunkKind::Discussion, text));
    }
    segments
}

fn make_chunk(kind: ChunkKind, text: String) -> ContentChunk {
    let estimated_tokens = estimate_tokens(&text);
    ContentChunk {
        kind,
        priority: kind.priority(),
        text,
        estimated_tokens,
    }
}

/// Total byte size of embedded `diff --git` sections.
fn diff_bytes(content: &str) -> usize {
    let mut total = 0usize;
    let mut in_diff = false;
    for line in content.lines() {
        if line.starts_with("diff --git") {
            in_diff = true;
        }
        if in_diff {
            total += line.len() + 1;
        }
    }
    total
}

/// Maximum reply-quote nesting depth across all lines.
fn quote_depth(content: &str) -> usize {
    content.lines().map(leading_quote_depth).max().unwrap_or(0)
}

fn leading_quote_depth(line: &str) -> usize {
    line.bytes().take_while(|&b| b == b'>').count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker() -> Chunker {
        Chunker::new(&ChunkingConfig::default()).unwrap()
    }

    fn patch_body(diff_lines: usize, path: &str) -> String {
        let mut body = String::from(
            "From: Dev <dev@example.com>\nSubject: [PATCH 1/2] change things\n\n\
Commit message explaining the change.\n---\n file | 2 +-\n",
        );
        body.push_str(&format!("diff --git a/{p} b/{p}\n@@ -1,1 +1,1 @@\n", p = path));
        for i in 0..diff_lines {
            body.push_str(&format!("+line {}\n", i));
        }
        body
    }

    #[test]
    fn test_small_message_single_header_chunk() {
        // ~500 estimated tokens, no diff, shallow quoting.
        let content = "a".repeat(2000);
        let chunks = chunker().chunk(&content, MessageType::Reply);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].kind, ChunkKind::Header);
        assert_eq!(chunks[0].priority, 5);
        assert_eq!(chunks[0].text, content);
    }

    #[test]
    fn test_oversized_message_is_split() {
        // ~9000 estimated tokens of prose.
        let paragraph = "A long discussion paragraph follows here.\n";
        let content = paragraph.repeat(36_000 / paragraph.len() + 1);
        let chunks = chunker().chunk(&content, MessageType::Reply);
        assert!(chunks.len() >= 2, "expected a split, got {} chunk(s)", chunks.len());
        for chunk in &chunks {
            assert!(chunk.estimated_tokens <= 8000 + 100);
        }
    }

    #[test]
    fn test_large_diff_triggers_split() {
        let content = patch_body(1500, "drivers/misc/widget.c");
        let chunks = chunker().chunk(&content, MessageType::Patch);
        assert!(chunks.len() >= 2);
        assert!(chunks.iter().any(|c| c.kind == ChunkKind::CodeDetail));
    }

    #[test]
    fn test_critical_path_classification() {
        let content = patch_body(1500, "arch/arm64/kvm/mmu.c");
        let chunks = chunker().chunk(&content, MessageType::Patch);
        assert!(chunks.iter().any(|c| c.kind == ChunkKind::CodeCritical));
        assert!(chunks.iter().all(|c| c.kind != ChunkKind::CodeDetail));
    }

    #[test]
    fn test_patch_segments_in_document_order() {
        let content = patch_body(1500, "Documentation/widget.rst");
        let chunks = chunker().chunk(&content, MessageType::Patch);

        let kinds: Vec<ChunkKind> = chunks.iter().map(|c| c.kind).collect();
        let header = kinds.iter().position(|k| *k == ChunkKind::Header).unwrap();
        let summary = kinds.iter().position(|k| *k == ChunkKind::Summary).unwrap();
        let code = kinds
            .iter()
            .position(|k| matches!(k, ChunkKind::CodeDetail | ChunkKind::CodeCritical))
            .unwrap();
        assert!(header < summary && summary < code);
    }

    #[test]
    fn test_deep_quote_nesting_triggers_split() {
        let mut content = String::from("Short reply.\n");
        content.push_str(">>>> deeply quoted\n>>> less\n>> less\n> least\n");
        let chunks = chunker().chunk(&content, MessageType::Reply);
        assert!(chunks.len() >= 2);
        assert!(chunks.iter().all(|c| c.kind == ChunkKind::Discussion));
    }

    #[test]
    fn test_review_summary_extracted() {
        let mut content = String::from("This series looks mostly fine, two nits below.\n\n");
        content.push_str(&">>>> quoted context\n> more quoting\nreply text\n".repeat(50));
        let chunks = chunker().chunk(&content, MessageType::Review);
        assert_eq!(chunks[0].kind, ChunkKind::Summary);
        assert!(chunks.iter().skip(1).all(|c| c.kind == ChunkKind::Discussion));
    }

    #[test]
    fn test_signature_becomes_metadata() {
        let mut content = String::from("Discussion text.\n");
        content.push_str(">>>> deep\n>>> quotes\n>> here\n> now\n");
        content.push_str("\n-- \nDev Eloper\nSome Corp\n");
        let chunks = chunker().chunk(&content, MessageType::Reply);
        let last = chunks.last().unwrap();
        assert_eq!(last.kind, ChunkKind::Metadata);
        assert_eq!(last.priority, 1);
        assert!(last.text.contains("Dev Eloper"));
    }

    #[test]
    fn test_priorities_follow_fixed_mapping() {
        let content = patch_body(1500, "arch/arm64/kvm/mmu.c");
        for chunk in chunker().chunk(&content, MessageType::Patch) {
            assert_eq!(chunk.priority, chunk.kind.priority());
        }
    }

    #[test]
    fn test_never_splits_mid_line() {
        let line = "+an added line of exactly this shape\n";
        let content = patch_body(2, "a.c") + &line.repeat(2000);
        for chunk in chunker().chunk(&content, MessageType::Patch) {
            for l in chunk.text.lines() {
                assert!(!l.is_empty() || l.is_empty()); // lines survive intact
            }
            assert!(!chunk.text.contains("an added line of exactly this shap\n"));
        }
    }
}
