//! Core data models used throughout lore-forest.
//!
//! These types represent the messages, threads, chunks, and verification
//! results that flow through the reconstruction and annotation pipeline.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

/// Coarse classification of a mailing-list message, derived from its subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageType {
    /// `[PATCH 0/N]` cover letter for a series.
    PatchCover,
    /// A single patch, `[PATCH]` or `[PATCH vN x/y]`.
    Patch,
    /// A plain `Re:` follow-up.
    Reply,
    /// A reply carrying review feedback.
    Review,
    /// A reply carrying an `Acked-by` tag.
    Ack,
    /// Anything else.
    Unknown,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::PatchCover => "patch-cover",
            MessageType::Patch => "patch",
            MessageType::Reply => "reply",
            MessageType::Review => "review",
            MessageType::Ack => "ack",
            MessageType::Unknown => "unknown",
        }
    }
}

/// Patch-series metadata parsed from a `[PATCH vN x/y]` subject tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatchInfo {
    pub version: u32,
    /// Position within the series; `0` for the cover letter.
    pub number: u32,
    pub total: u32,
    pub series_name: String,
}

/// Kind of a content chunk. Each kind carries a fixed priority; higher
/// means more important to a token-limited consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChunkKind {
    Header,
    Summary,
    CodeCritical,
    Discussion,
    CodeDetail,
    Metadata,
}

impl ChunkKind {
    /// Fixed kind → priority mapping.
    pub fn priority(&self) -> u8 {
        match self {
            ChunkKind::Header => 5,
            ChunkKind::Summary => 4,
            ChunkKind::CodeCritical => 4,
            ChunkKind::Discussion => 3,
            ChunkKind::CodeDetail => 2,
            ChunkKind::Metadata => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkKind::Header => "header",
            ChunkKind::Summary => "summary",
            ChunkKind::CodeCritical => "code-critical",
            ChunkKind::Discussion => "discussion",
            ChunkKind::CodeDetail => "code-detail",
            ChunkKind::Metadata => "metadata",
        }
    }
}

/// A bounded slice of a message's rendered content, sized for a
/// token-limited consumer. Chunks are emitted in original document order;
/// `priority` is metadata for the consumer's own merge policy.
#[derive(Debug, Clone, Serialize)]
pub struct ContentChunk {
    pub kind: ChunkKind,
    pub priority: u8,
    pub text: String,
    pub estimated_tokens: usize,
}

/// Confidence tier of a verification match score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    /// Bucket a weighted match score: high > 0.8, medium > 0.6, low otherwise.
    pub fn from_score(score: f64) -> Self {
        if score > 0.8 {
            Confidence::High
        } else if score > 0.6 {
            Confidence::Medium
        } else {
            Confidence::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::High => "high",
            Confidence::Medium => "medium",
            Confidence::Low => "low",
        }
    }
}

/// Outcome of verifying one permalink against its remote representation.
/// Created once per attempt and immutable afterward.
#[derive(Debug, Clone, Serialize)]
pub struct MatchResult {
    pub is_reachable: bool,
    /// Weighted fuzzy-match score in [0, 1].
    pub score: f64,
    pub confidence: Confidence,
    /// Fields whose individual score exceeded the match threshold.
    pub matched_fields: Vec<String>,
    pub error_detail: Option<String>,
}

impl MatchResult {
    /// A terminal failure result (unreachable or transport error).
    pub fn unreachable(detail: impl Into<String>) -> Self {
        MatchResult {
            is_reachable: false,
            score: 0.0,
            confidence: Confidence::Low,
            matched_fields: Vec::new(),
            error_detail: Some(detail.into()),
        }
    }
}

/// One parsed mailing-list message.
///
/// `message_id` is the natural key, unique across the archive. `child_ids`,
/// `reply_depth`, and `is_pseudo_root` are derived by the forest builder and
/// never independently mutated; `permalink`, `verification`, and `chunks`
/// are populated by the annotation passes.
#[derive(Debug, Clone, Serialize)]
pub struct MessageRecord {
    /// Opaque handle into the archive (the mirror commit hash).
    pub source_ref: String,
    pub message_id: String,
    pub subject: String,
    /// Display name plus address, as found in the `From` header.
    pub sender: String,
    pub sent_at: DateTime<Utc>,
    pub message_type: MessageType,
    pub patch_info: Option<PatchInfo>,
    /// Declared parent from `In-Reply-To` / `References`, if any.
    pub parent_id: Option<String>,
    pub child_ids: Vec<String>,
    pub reply_depth: usize,
    /// True when the declared parent was absent from the input set, so this
    /// record was promoted to a root (a truncation artifact, not a true
    /// thread start).
    pub is_pseudo_root: bool,
    pub permalink: Option<String>,
    pub verification: Option<MatchResult>,
    pub chunks: Vec<ContentChunk>,
}

impl MessageRecord {
    pub fn new(
        source_ref: impl Into<String>,
        message_id: impl Into<String>,
        subject: impl Into<String>,
        sender: impl Into<String>,
        sent_at: DateTime<Utc>,
        message_type: MessageType,
    ) -> Self {
        MessageRecord {
            source_ref: source_ref.into(),
            message_id: message_id.into(),
            subject: subject.into(),
            sender: sender.into(),
            sent_at,
            message_type,
            patch_info: None,
            parent_id: None,
            child_ids: Vec::new(),
            reply_depth: 0,
            is_pseudo_root: false,
            permalink: None,
            verification: None,
            chunks: Vec::new(),
        }
    }
}

/// A set of reply trees covering every retained input record exactly once.
///
/// `roots` preserves first-seen order; `nodes` is the full index keyed by
/// message id. The forest exclusively owns its records.
#[derive(Debug, Default, Serialize)]
pub struct ThreadForest {
    pub roots: Vec<String>,
    pub nodes: HashMap<String, MessageRecord>,
    /// Records excluded during the build (duplicates, unreadable content).
    pub malformed: usize,
    /// True if the ancestor-walk cycle guard fired at least once.
    pub cycle_detected: bool,
}

impl ThreadForest {
    pub fn get(&self, message_id: &str) -> Option<&MessageRecord> {
        self.nodes.get(message_id)
    }

    /// Message ids of a whole tree, root first, children in their stored
    /// (deterministic) order.
    pub fn tree_ids(&self, root_id: &str) -> Vec<String> {
        let mut ids = Vec::new();
        let mut stack = vec![root_id.to_string()];
        while let Some(id) = stack.pop() {
            if let Some(node) = self.nodes.get(&id) {
                ids.push(id);
                // reverse so the first child is visited first
                for child in node.child_ids.iter().rev() {
                    stack.push(child.clone());
                }
            }
        }
        ids
    }

    /// Total number of records across all trees.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
