//! Pipeline orchestration.
//!
//! Coordinates the full flow: archive refs → raw messages → parsed records
//! → thread forest → permalink, verification, and chunk annotation passes.
//! Every failure is localized to one record (counted, warned, excluded);
//! nothing here aborts a run over a single bad message.

use anyhow::Result;

use crate::archive::{ArchiveSource, GitArchive};
use crate::chunker::Chunker;
use crate::config::Config;
use crate::forest::build_forest;
use crate::lore;
use crate::models::ThreadForest;
use crate::parse;
use crate::stats;
use crate::verify::Verifier;

/// Clone or update the archive mirror.
pub fn run_sync(config: &Config) -> Result<()> {
    let archive = GitArchive::new(&config.archive);
    archive.sync()?;
    println!("sync {}", config.archive.url);
    println!("  mirror: {}", archive.cache_dir().display());
    println!("ok");
    Ok(())
}

/// Read, parse, and link messages from the archive into a forest.
///
/// Unreadable or unparseable messages are excluded with a warning and
/// folded into the forest's malformed count alongside duplicates.
pub fn load_forest(
    config: &Config,
    archive: &dyn ArchiveSource,
    limit: Option<usize>,
    since: Option<&str>,
    until: Option<&str>,
) -> Result<ThreadForest> {
    let refs = archive.list_refs(limit, since, until)?;

    let mut records = Vec::with_capacity(refs.len());
    let mut failures = 0usize;
    for source_ref in &refs {
        let raw = match archive.read_raw_message(source_ref) {
            Ok(raw) => raw,
            Err(e) => {
                eprintln!("warning: skipping {}: {:#}", source_ref, e);
                failures += 1;
                continue;
            }
        };
        match parse::parse_message(source_ref, &raw) {
            Ok(record) => records.push(record),
            Err(e) => {
                eprintln!("warning: skipping {}: {:#}", source_ref, e);
                failures += 1;
            }
        }
    }

    let mut forest = build_forest(records);
    forest.malformed += failures;
    annotate_permalinks(&mut forest, config);
    Ok(forest)
}

/// Derive and attach the canonical permalink for every record. A record
/// whose id cannot form a URL is skipped with a warning and simply left
/// unannotated.
fn annotate_permalinks(forest: &mut ThreadForest, config: &Config) {
    for node in forest.nodes.values_mut() {
        match lore::generate_permalink(&config.lore.host, &config.lore.list, &node.message_id) {
            Ok(url) => node.permalink = Some(url),
            Err(e) => eprintln!("warning: no permalink for '{}': {:#}", node.message_id, e),
        }
    }
}

/// Build the forest and print a reconstruction summary, or the whole
/// forest as JSON when `json` is set.
pub fn run_build(
    config: &Config,
    archive: &dyn ArchiveSource,
    limit: Option<usize>,
    since: Option<&str>,
    until: Option<&str>,
    json: bool,
) -> Result<ThreadForest> {
    let forest = load_forest(config, archive, limit, since, until)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&forest)?);
        return Ok(forest);
    }

    println!("build {}", config.lore.list);
    println!("  messages: {}", forest.len());
    println!("  threads: {}", forest.roots.len());
    println!(
        "  pseudo-roots: {}",
        forest.nodes.values().filter(|n| n.is_pseudo_root).count()
    );
    println!("  excluded: {}", forest.malformed);
    if forest.cycle_detected {
        println!("  reply cycles broken: yes");
    }
    println!("ok");
    Ok(forest)
}

/// Build the forest, verify every permalink against the remote archive,
/// and print the aggregate match rate.
pub async fn run_verify(
    config: &Config,
    archive: &dyn ArchiveSource,
    limit: Option<usize>,
    since: Option<&str>,
    until: Option<&str>,
) -> Result<ThreadForest> {
    let mut forest = load_forest(config, archive, limit, since, until)?;

    let snapshot: Vec<_> = forest.nodes.values().cloned().collect();
    println!("verify {} ({} links)", config.lore.list, snapshot.len());

    let verifier = Verifier::new(&config.verify)?;
    let results = verifier.verify_batch(&snapshot).await;
    for (message_id, result) in results {
        if let Some(node) = forest.nodes.get_mut(&message_id) {
            node.verification = Some(result);
        }
    }

    let stats = stats::collect(&forest);
    println!(
        "  reachable: {}/{}",
        stats.verified_reachable, stats.verified_total
    );
    println!("  high confidence: {}", stats.verified_high);
    println!("ok");
    Ok(forest)
}

/// Build the forest and chunk every message body for the downstream
/// token-limited consumer.
pub fn run_chunk(
    config: &Config,
    archive: &dyn ArchiveSource,
    limit: Option<usize>,
    since: Option<&str>,
    until: Option<&str>,
) -> Result<ThreadForest> {
    let mut forest = load_forest(config, archive, limit, since, until)?;
    let chunker = Chunker::new(&config.chunking)?;

    let ids: Vec<String> = forest.nodes.keys().cloned().collect();
    for id in ids {
        let (source_ref, message_type) = {
            let node = &forest.nodes[&id];
            (node.source_ref.clone(), node.message_type)
        };
        let content = match archive.read_raw_message(&source_ref) {
            Ok(raw) => raw,
            Err(e) => {
                eprintln!("warning: no content for {}: {:#}", source_ref, e);
                continue;
            }
        };
        let chunks = chunker.chunk(&content, message_type);
        if let Some(node) = forest.nodes.get_mut(&id) {
            node.chunks = chunks;
        }
    }

    let stats = stats::collect(&forest);
    println!("chunk {}", config.lore.list);
    println!("  messages: {}", forest.len());
    println!("  chunks: {}", stats.total_chunks);
    println!("  split messages: {}", stats.chunked_messages);
    println!("ok");
    Ok(forest)
}

/// Build the forest and print the statistics table.
pub fn run_stats(
    config: &Config,
    archive: &dyn ArchiveSource,
    limit: Option<usize>,
    since: Option<&str>,
    until: Option<&str>,
) -> Result<()> {
    let forest = load_forest(config, archive, limit, since, until)?;
    stats::print_stats(&forest);
    Ok(())
}
