//! Thread forest reconstruction.
//!
//! Links a flat collection of parsed messages into nested reply trees using
//! the declared parent references. Input may arrive in any order and may
//! reference parents that were never mirrored (the archive was queried with
//! a limit or date range); such records are promoted to pseudo-roots rather
//! than dropped. The build never fails on malformed input — duplicates are
//! excluded and counted, and reply cycles are detected and broken.

use std::collections::{HashMap, HashSet};

use crate::models::{MessageRecord, ThreadForest};

/// Build a [`ThreadForest`] from a flat record collection.
///
/// Two passes:
/// 1. Index every record by message id, keeping the first record seen for a
///    duplicated id and counting the rest as malformed.
/// 2. Resolve each declared parent against the index. A resolved parent
///    gains the record as a child; an unresolved parent leaves the record a
///    pseudo-root of its own tree. An ancestor walk guards against reply
///    cycles: the record at which a chain revisits itself has its link
///    broken and becomes a pseudo-root.
///
/// Guarantees: every retained record appears in exactly one tree, children
/// are ordered by (`sent_at`, `message_id`), and the root list preserves
/// first-seen input order.
pub fn build_forest(records: Vec<MessageRecord>) -> ThreadForest {
    let mut nodes: HashMap<String, MessageRecord> = HashMap::new();
    let mut order: Vec<String> = Vec::new();
    let mut malformed = 0usize;

    // Pass 1: index by message id, first seen wins.
    for record in records {
        if nodes.contains_key(&record.message_id) {
            eprintln!(
                "warning: duplicate message id '{}' (commit {}), keeping first",
                record.message_id, record.source_ref
            );
            malformed += 1;
            continue;
        }
        order.push(record.message_id.clone());
        nodes.insert(record.message_id.clone(), record);
    }

    // Pass 2a: tentative child → parent edges for parents present in the index.
    let mut parent_of: HashMap<String, String> = HashMap::new();
    for id in &order {
        let parent = nodes[id].parent_id.clone();
        if let Some(parent_id) = parent {
            if nodes.contains_key(&parent_id) {
                parent_of.insert(id.clone(), parent_id);
            }
        }
    }

    // Pass 2b: cycle guard. Walk every ancestor chain; if a chain revisits a
    // record before reaching a root, sever that record's link.
    let mut severed: HashSet<String> = HashSet::new();
    let mut cycle_detected = false;
    for start in &order {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut current = start.as_str();
        seen.insert(current);
        while let Some(parent_id) = parent_of.get(current) {
            if severed.contains(current) {
                break;
            }
            if seen.contains(parent_id.as_str()) {
                eprintln!("warning: reply cycle detected at '{}', breaking link", parent_id);
                severed.insert(parent_id.clone());
                cycle_detected = true;
                break;
            }
            seen.insert(parent_id.as_str());
            current = parent_id.as_str();
        }
    }
    for id in &severed {
        parent_of.remove(id);
        // The link is gone for good; clearing the reference keeps the
        // child-index invariant over records present in the forest.
        if let Some(node) = nodes.get_mut(id) {
            node.parent_id = None;
        }
    }

    // Pass 2c: attach children, flag pseudo-roots, collect roots in
    // first-seen order.
    let mut roots: Vec<String> = Vec::new();
    for id in &order {
        match parent_of.get(id) {
            Some(parent_id) => {
                let child = id.clone();
                if let Some(parent) = nodes.get_mut(parent_id) {
                    parent.child_ids.push(child);
                }
            }
            None => {
                let declared_parent = nodes[id].parent_id.is_some();
                let node = nodes.get_mut(id).expect("indexed above");
                node.is_pseudo_root = declared_parent || severed.contains(id);
                roots.push(id.clone());
            }
        }
    }

    // Deterministic child ordering: sent_at ascending, message id breaks ties.
    let sort_keys: HashMap<String, chrono::DateTime<chrono::Utc>> = nodes
        .iter()
        .map(|(id, node)| (id.clone(), node.sent_at))
        .collect();
    for node in nodes.values_mut() {
        node.child_ids
            .sort_by(|a, b| sort_keys[a].cmp(&sort_keys[b]).then_with(|| a.cmp(b)));
    }

    // Depth assignment, top-down from each root.
    let mut stack: Vec<(String, usize)> = roots.iter().map(|r| (r.clone(), 0)).collect();
    while let Some((id, depth)) = stack.pop() {
        if let Some(node) = nodes.get_mut(&id) {
            node.reply_depth = depth;
            for child in &node.child_ids {
                stack.push((child.clone(), depth + 1));
            }
        }
    }

    ThreadForest {
        roots,
        nodes,
        malformed,
        cycle_detected,
    }
}
