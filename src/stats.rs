//! Forest statistics and health overview.
//!
//! Aggregates counts and rates over a built forest: message and thread
//! totals, contributors, per-type breakdowns, reply depth, verification
//! match rates, and chunking coverage. Used by `loref stats` to give
//! confidence that reconstruction and annotation are working as expected.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};

use crate::models::{Confidence, MessageType, ThreadForest};

/// Per-thread summary, computed over one root and its descendants.
#[derive(Debug, Clone)]
pub struct ThreadStats {
    pub total_messages: usize,
    pub patches: usize,
    pub replies: usize,
    pub reviews: usize,
    pub acks: usize,
    pub max_depth: usize,
    pub contributors: Vec<String>,
    pub date_range: (DateTime<Utc>, DateTime<Utc>),
    /// For patch-series threads: `acked`, `under_review`, or `new`.
    pub series_status: Option<&'static str>,
}

/// Forest-wide aggregation.
#[derive(Debug, Clone, Default)]
pub struct ForestStats {
    pub total_messages: usize,
    pub total_threads: usize,
    pub pseudo_roots: usize,
    pub malformed: usize,
    pub contributors: usize,
    pub type_counts: BTreeMap<&'static str, usize>,
    pub max_depth: usize,
    pub date_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    pub verified_total: usize,
    pub verified_reachable: usize,
    pub verified_high: usize,
    pub chunked_messages: usize,
    pub total_chunks: usize,
}

/// Compute statistics for the tree rooted at `root_id`.
pub fn thread_stats(forest: &ThreadForest, root_id: &str) -> Option<ThreadStats> {
    let ids = forest.tree_ids(root_id);
    if ids.is_empty() {
        return None;
    }

    let mut patches = 0;
    let mut replies = 0;
    let mut reviews = 0;
    let mut acks = 0;
    let mut max_depth = 0;
    let mut contributors = HashSet::new();
    let mut earliest: Option<DateTime<Utc>> = None;
    let mut latest: Option<DateTime<Utc>> = None;

    for id in &ids {
        let node = forest.get(id)?;
        match node.message_type {
            MessageType::Patch | MessageType::PatchCover => patches += 1,
            MessageType::Reply => replies += 1,
            MessageType::Review => reviews += 1,
            MessageType::Ack => acks += 1,
            MessageType::Unknown => {}
        }
        max_depth = max_depth.max(node.reply_depth);
        contributors.insert(node.sender.clone());
        earliest = Some(earliest.map_or(node.sent_at, |e| e.min(node.sent_at)));
        latest = Some(latest.map_or(node.sent_at, |l| l.max(node.sent_at)));
    }

    let series_status = forest.get(root_id).and_then(|root| {
        root.patch_info.as_ref().map(|_| {
            if acks > 0 {
                "acked"
            } else if reviews > 0 {
                "under_review"
            } else {
                "new"
            }
        })
    });

    let mut contributors: Vec<String> = contributors.into_iter().collect();
    contributors.sort();

    Some(ThreadStats {
        total_messages: ids.len(),
        patches,
        replies,
        reviews,
        acks,
        max_depth,
        contributors,
        date_range: (earliest?, latest?),
        series_status,
    })
}

/// Aggregate the whole forest, including any verification and chunking
/// annotations already attached to its records.
pub fn collect(forest: &ThreadForest) -> ForestStats {
    let mut stats = ForestStats {
        total_messages: forest.len(),
        total_threads: forest.roots.len(),
        malformed: forest.malformed,
        ..Default::default()
    };

    let mut contributors = HashSet::new();
    let mut earliest: Option<DateTime<Utc>> = None;
    let mut latest: Option<DateTime<Utc>> = None;

    for node in forest.nodes.values() {
        *stats.type_counts.entry(node.message_type.as_str()).or_insert(0) += 1;
        contributors.insert(node.sender.as_str());
        stats.max_depth = stats.max_depth.max(node.reply_depth);
        if node.is_pseudo_root {
            stats.pseudo_roots += 1;
        }
        earliest = Some(earliest.map_or(node.sent_at, |e| e.min(node.sent_at)));
        latest = Some(latest.map_or(node.sent_at, |l| l.max(node.sent_at)));

        if let Some(verification) = &node.verification {
            stats.verified_total += 1;
            if verification.is_reachable {
                stats.verified_reachable += 1;
            }
            if verification.confidence == Confidence::High {
                stats.verified_high += 1;
            }
        }

        if !node.chunks.is_empty() {
            stats.total_chunks += node.chunks.len();
            if node.chunks.len() > 1 {
                stats.chunked_messages += 1;
            }
        }
    }

    stats.contributors = contributors.len();
    stats.date_range = earliest.zip(latest);
    stats
}

/// Print the forest overview in the `loref stats` table format.
pub fn print_stats(forest: &ThreadForest) {
    let stats = collect(forest);

    println!("lore-forest — Forest Stats");
    println!("==========================");
    println!();
    println!("  Messages:     {}", stats.total_messages);
    println!("  Threads:      {}", stats.total_threads);
    println!("  Pseudo-roots: {}", stats.pseudo_roots);
    println!("  Excluded:     {}", stats.malformed);
    println!("  Contributors: {}", stats.contributors);
    println!("  Max depth:    {}", stats.max_depth);
    if let Some((from, to)) = stats.date_range {
        println!(
            "  Date range:   {} .. {}",
            from.format("%Y-%m-%d %H:%M"),
            to.format("%Y-%m-%d %H:%M")
        );
    }

    if !stats.type_counts.is_empty() {
        println!();
        println!("  By type:");
        println!("  {:<16} {:>6}", "TYPE", "COUNT");
        println!("  {}", "-".repeat(24));
        for (ty, count) in &stats.type_counts {
            println!("  {:<16} {:>6}", ty, count);
        }
    }

    if stats.verified_total > 0 {
        println!();
        println!(
            "  Verified:     {}/{} reachable, {} high confidence",
            stats.verified_reachable, stats.verified_total, stats.verified_high
        );
    }

    if stats.total_chunks > 0 {
        println!();
        println!("  Chunks:       {}", stats.total_chunks);
        println!("  Split msgs:   {}", stats.chunked_messages);
    }

    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forest::build_forest;
    use crate::models::{MatchResult, MessageRecord, MessageType, PatchInfo};
    use chrono::TimeZone;

    fn record(id: &str, parent: Option<&str>, ty: MessageType, minute: u32) -> MessageRecord {
        let mut r = MessageRecord::new(
            format!("ref-{}", id),
            id,
            format!("Subject {}", id),
            format!("{}@example.com", id),
            Utc.with_ymd_and_hms(2025, 7, 5, 12, minute, 0).unwrap(),
            ty,
        );
        r.parent_id = parent.map(String::from);
        r
    }

    fn sample_forest() -> ThreadForest {
        let mut cover = record("cover", None, MessageType::PatchCover, 0);
        cover.patch_info = Some(PatchInfo {
            version: 1,
            number: 0,
            total: 2,
            series_name: "widgets".to_string(),
        });
        build_forest(vec![
            cover,
            record("p1", Some("cover"), MessageType::Patch, 1),
            record("rev", Some("p1"), MessageType::Review, 2),
            record("lone", None, MessageType::Unknown, 3),
        ])
    }

    #[test]
    fn test_thread_stats_counts_and_depth() {
        let forest = sample_forest();
        let stats = thread_stats(&forest, "cover").unwrap();
        assert_eq!(stats.total_messages, 3);
        assert_eq!(stats.patches, 2);
        assert_eq!(stats.reviews, 1);
        assert_eq!(stats.max_depth, 2);
        assert_eq!(stats.contributors.len(), 3);
        assert_eq!(stats.series_status, Some("under_review"));
    }

    #[test]
    fn test_series_status_new_without_feedback() {
        let mut cover = record("c", None, MessageType::PatchCover, 0);
        cover.patch_info = Some(PatchInfo {
            version: 2,
            number: 0,
            total: 1,
            series_name: String::new(),
        });
        let forest = build_forest(vec![cover]);
        assert_eq!(thread_stats(&forest, "c").unwrap().series_status, Some("new"));
    }

    #[test]
    fn test_collect_aggregates_verification() {
        let mut forest = sample_forest();
        forest.nodes.get_mut("cover").unwrap().verification = Some(MatchResult {
            is_reachable: true,
            score: 0.95,
            confidence: Confidence::High,
            matched_fields: vec!["message_id".to_string()],
            error_detail: None,
        });
        forest.nodes.get_mut("p1").unwrap().verification =
            Some(MatchResult::unreachable("HTTP 404"));

        let stats = collect(&forest);
        assert_eq!(stats.total_messages, 4);
        assert_eq!(stats.total_threads, 2);
        assert_eq!(stats.verified_total, 2);
        assert_eq!(stats.verified_reachable, 1);
        assert_eq!(stats.verified_high, 1);
        assert_eq!(stats.contributors, 4);
    }

    #[test]
    fn test_collect_empty_forest() {
        let stats = collect(&ThreadForest::default());
        assert_eq!(stats.total_messages, 0);
        assert!(stats.date_range.is_none());
    }
}
