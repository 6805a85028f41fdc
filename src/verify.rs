//! Permalink verification against the remote archive.
//!
//! Each record's permalink is independently checked by fetching the raw
//! message (`<permalink minus trailing slash>/raw`) and fuzzy-matching the
//! remote headers against the local record with a weighted score:
//! message-id 0.40, subject 0.30, sender 0.20, date 0.10. Verification runs
//! on a bounded worker pool; a failed fetch is terminal for that record and
//! never aborts the batch.
//!
//! The HTTP side sits behind the [`Fetcher`] trait so tests can stub the
//! remote without touching the network.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::VerifyConfig;
use crate::lore::{raw_fetch_url, strip_angle_brackets};
use crate::models::{Confidence, MatchResult, MessageRecord};
use crate::parse;

const WEIGHT_MESSAGE_ID: f64 = 0.40;
const WEIGHT_SUBJECT: f64 = 0.30;
const WEIGHT_SENDER: f64 = 0.20;
const WEIGHT_DATE: f64 = 0.10;

/// Individual field score above which the field counts as matched.
const FIELD_MATCH_THRESHOLD: f64 = 0.8;

static ADDRESS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap());
static SUBJECT_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(re:|fwd:)\s*").unwrap());
static PATCH_BRACKET: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[patch[^\]]*\]\s*").unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Minimal HTTP surface the verifier needs: one GET returning status and body.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn get(&self, url: &str) -> Result<(u16, String)>;
}

/// Production fetcher backed by reqwest, with a per-request timeout and a
/// fixed identifying user agent.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: &VerifyConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .context("Failed to build HTTP client")?;
        Ok(HttpFetcher { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn get(&self, url: &str) -> Result<(u16, String)> {
        let response = self.client.get(url).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok((status, body))
    }
}

/// What a worker needs to verify one record; snapshotted so the batch holds
/// no borrow of the forest.
#[derive(Debug, Clone)]
struct VerifyJob {
    message_id: String,
    permalink: Option<String>,
    subject: String,
    sender: String,
    sent_at: DateTime<Utc>,
}

/// Bounded-concurrency permalink verifier.
pub struct Verifier {
    fetcher: Arc<dyn Fetcher>,
    concurrency: usize,
    delay: Duration,
}

impl Verifier {
    pub fn new(config: &VerifyConfig) -> Result<Self> {
        Ok(Verifier {
            fetcher: Arc::new(HttpFetcher::new(config)?),
            concurrency: config.concurrency.max(1),
            delay: Duration::from_millis(config.delay_ms),
        })
    }

    /// Construct with a custom fetcher (tests, alternative transports).
    pub fn with_fetcher(fetcher: Arc<dyn Fetcher>, concurrency: usize, delay: Duration) -> Self {
        Verifier {
            fetcher,
            concurrency: concurrency.max(1),
            delay,
        }
    }

    /// Verify a batch of records, returning one [`MatchResult`] per input
    /// record keyed by message id.
    ///
    /// Work is spread across a fixed pool of workers pulling from a shared
    /// queue; each worker pauses for the configured throttle delay before
    /// every request. Failures stay local to their record — the returned
    /// map always covers every input exactly once.
    pub async fn verify_batch(&self, records: &[MessageRecord]) -> HashMap<String, MatchResult> {
        let jobs: Arc<Vec<VerifyJob>> = Arc::new(
            records
                .iter()
                .map(|r| VerifyJob {
                    message_id: r.message_id.clone(),
                    permalink: r.permalink.clone(),
                    subject: r.subject.clone(),
                    sender: r.sender.clone(),
                    sent_at: r.sent_at,
                })
                .collect(),
        );

        let next = Arc::new(AtomicUsize::new(0));
        let (tx, mut rx) = tokio::sync::mpsc::channel::<(String, MatchResult)>(jobs.len().max(1));

        let workers = self.concurrency.min(jobs.len().max(1));
        for _ in 0..workers {
            let jobs = Arc::clone(&jobs);
            let next = Arc::clone(&next);
            let fetcher = Arc::clone(&self.fetcher);
            let delay = self.delay;
            let tx = tx.clone();

            tokio::spawn(async move {
                loop {
                    let i = next.fetch_add(1, Ordering::Relaxed);
                    let Some(job) = jobs.get(i) else { break };

                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    let result = verify_one(fetcher.as_ref(), job).await;
                    if tx.send((job.message_id.clone(), result)).await.is_err() {
                        break;
                    }
                }
            });
        }
        drop(tx);

        let mut results = HashMap::with_capacity(jobs.len());
        while let Some((message_id, result)) = rx.recv().await {
            results.insert(message_id, result);
        }
        results
    }
}

/// Fetch and score one record. Every failure path collapses into an
/// unreachable result; nothing propagates to the batch.
async fn verify_one(fetcher: &dyn Fetcher, job: &VerifyJob) -> MatchResult {
    let Some(permalink) = &job.permalink else {
        return MatchResult::unreachable("no permalink derived");
    };
    let url = raw_fetch_url(permalink);

    let (status, body) = match fetcher.get(&url).await {
        Ok(pair) => pair,
        Err(e) => return MatchResult::unreachable(format!("transport error: {:#}", e)),
    };
    if !(200..300).contains(&status) {
        return MatchResult::unreachable(format!("HTTP {}", status));
    }

    let remote = parse::extract_header_fields(&body);
    let (score, matched_fields) = fuzzy_match(&remote, job);

    MatchResult {
        is_reachable: true,
        score,
        confidence: Confidence::from_score(score),
        matched_fields,
        error_detail: None,
    }
}

/// Weighted fuzzy match of remote header fields against the local record.
fn fuzzy_match(remote: &parse::HeaderFields, job: &VerifyJob) -> (f64, Vec<String>) {
    let mut matched = Vec::new();

    // Message-id: exact equality after stripping angle brackets, nothing else.
    let id_score = if strip_angle_brackets(&remote.message_id)
        == strip_angle_brackets(&job.message_id)
        && !job.message_id.is_empty()
    {
        matched.push("message_id".to_string());
        1.0
    } else {
        0.0
    };

    // Subject: similarity on both the raw and normalized forms, best wins.
    let subject_score = subject_similarity(&remote.subject, &job.subject);
    if subject_score > FIELD_MATCH_THRESHOLD {
        matched.push("subject".to_string());
    }

    // Sender: exact address match, else similarity of extracted addresses.
    let remote_addr = extract_address(&remote.from);
    let local_addr = extract_address(&job.sender);
    let sender_score = if !remote_addr.is_empty()
        && remote_addr.eq_ignore_ascii_case(&local_addr)
    {
        1.0
    } else {
        string_similarity(&remote_addr, &local_addr)
    };
    if sender_score > FIELD_MATCH_THRESHOLD {
        matched.push("sender".to_string());
    }

    // Date: step decay by distance, absent or unparseable scores zero.
    let date_score = date_similarity(&remote.date, job.sent_at);
    if date_score > 0.9 {
        matched.push("date".to_string());
    }

    let score = id_score * WEIGHT_MESSAGE_ID
        + subject_score * WEIGHT_SUBJECT
        + sender_score * WEIGHT_SENDER
        + date_score * WEIGHT_DATE;

    (score, matched)
}

fn subject_similarity(a: &str, b: &str) -> f64 {
    let raw = string_similarity(a, b);
    let normalized = string_similarity(&normalize_subject(a), &normalize_subject(b));
    raw.max(normalized)
}

/// Case-insensitive similarity ratio in [0, 1]; empty input scores zero.
fn string_similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    strsim::jaro_winkler(&a.to_lowercase(), &b.to_lowercase())
}

/// Lower-case, strip a leading `re:`/`fwd:` and any `[PATCH ...]` tag, and
/// collapse runs of whitespace.
fn normalize_subject(subject: &str) -> String {
    let lower = subject.to_lowercase();
    let stripped = SUBJECT_PREFIX.replace(&lower, "");
    let stripped = PATCH_BRACKET.replace_all(&stripped, "");
    WHITESPACE.replace_all(stripped.trim(), " ").to_string()
}

/// Pull the bare address out of a `From` field.
fn extract_address(from_field: &str) -> String {
    ADDRESS
        .find(from_field)
        .map(|m| m.as_str().to_string())
        .unwrap_or_default()
}

/// Compare the remote date header against the local timestamp: within an
/// hour is a full match, within a day a near match, anything further a
/// half match; unparseable is no match.
fn date_similarity(remote_date: &str, local: DateTime<Utc>) -> f64 {
    if remote_date.trim().is_empty() {
        return 0.0;
    }
    let Ok(remote) = DateTime::parse_from_rfc2822(remote_date.trim()) else {
        return 0.0;
    };
    let diff = (remote.with_timezone(&Utc) - local).num_seconds().abs();
    if diff < 3600 {
        1.0
    } else if diff < 86400 {
        0.8
    } else {
        0.5
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MessageType;
    use chrono::TimeZone;

    fn job() -> VerifyJob {
        VerifyJob {
            message_id: "20250705071717.5062-1-ankita@nvidia.com".to_string(),
            permalink: Some(
                "https://lore.kernel.org/kvmarm/20250705071717.5062-1-ankita@nvidia.com/"
                    .to_string(),
            ),
            subject: "[PATCH v3 1/5] KVM: arm64: Expose device memory".to_string(),
            sender: "Ankita Agrawal <ankita@nvidia.com>".to_string(),
            sent_at: Utc.with_ymd_and_hms(2025, 7, 5, 7, 17, 17).unwrap(),
        }
    }

    fn remote_body(message_id: &str) -> String {
        format!(
            "From: Ankita Agrawal <ankita@nvidia.com>\n\
Date: Sat, 5 Jul 2025 07:17:17 +0000\n\
Subject: [PATCH v3 1/5] KVM: arm64: Expose device memory\n\
Message-ID: <{}>\n\n\
Body text.\n",
            message_id
        )
    }

    fn record_from_job(job: &VerifyJob) -> MessageRecord {
        let mut r = MessageRecord::new(
            "ref",
            job.message_id.clone(),
            job.subject.clone(),
            job.sender.clone(),
            job.sent_at,
            MessageType::Patch,
        );
        r.permalink = job.permalink.clone();
        r
    }

    struct StubFetcher {
        responses: HashMap<String, (u16, String)>,
    }

    #[async_trait]
    impl Fetcher for StubFetcher {
        async fn get(&self, url: &str) -> Result<(u16, String)> {
            match self.responses.get(url) {
                Some((status, body)) => Ok((*status, body.clone())),
                None => Ok((404, String::new())),
            }
        }
    }

    #[test]
    fn test_identical_message_id_scores_full_weight() {
        let job = job();
        let remote = parse::extract_header_fields(&remote_body(&job.message_id));
        let (score, matched) = fuzzy_match(&remote, &job);
        assert!(matched.contains(&"message_id".to_string()));
        assert!(score > 0.95, "all-field match should be near 1.0, got {}", score);
    }

    #[test]
    fn test_mismatched_message_id_capped() {
        let job = job();
        let remote = parse::extract_header_fields(&remote_body("other-id@example.com"));
        let (score, matched) = fuzzy_match(&remote, &job);
        assert!(!matched.contains(&"message_id".to_string()));
        // Without the 0.40 message-id weight the maximum is 0.60.
        assert!(score <= 0.6 + 1e-9, "score {} exceeds non-id maximum", score);
    }

    #[test]
    fn test_subject_normalization_ignores_patch_tag() {
        let sim = subject_similarity(
            "Re: [PATCH v3 1/5] KVM: arm64: Expose device memory",
            "[PATCH v3 1/5] KVM: arm64: Expose device memory",
        );
        assert!(sim > 0.99);
    }

    #[test]
    fn test_date_similarity_steps() {
        let local = Utc.with_ymd_and_hms(2025, 7, 5, 7, 0, 0).unwrap();
        assert_eq!(date_similarity("Sat, 5 Jul 2025 07:30:00 +0000", local), 1.0);
        assert_eq!(date_similarity("Sat, 5 Jul 2025 17:00:00 +0000", local), 0.8);
        assert_eq!(date_similarity("Mon, 7 Jul 2025 07:00:00 +0000", local), 0.5);
        assert_eq!(date_similarity("not a date", local), 0.0);
        assert_eq!(date_similarity("", local), 0.0);
    }

    #[test]
    fn test_extract_address() {
        assert_eq!(
            extract_address("Ankita Agrawal <ankita@nvidia.com>"),
            "ankita@nvidia.com"
        );
        assert_eq!(extract_address("no address here"), "");
    }

    #[tokio::test]
    async fn test_batch_covers_every_record_despite_404() {
        let good = job();
        let mut missing = job();
        missing.message_id = "missing@example.com".to_string();
        missing.permalink =
            Some("https://lore.kernel.org/kvmarm/missing@example.com/".to_string());

        let mut responses = HashMap::new();
        responses.insert(
            raw_fetch_url(good.permalink.as_ref().unwrap()),
            (200, remote_body(&good.message_id)),
        );
        // The second record's URL is absent → stub answers 404.
        let fetcher = Arc::new(StubFetcher { responses });

        let verifier = Verifier::with_fetcher(fetcher, 2, Duration::ZERO);
        let records = vec![record_from_job(&good), record_from_job(&missing)];
        let results = verifier.verify_batch(&records).await;

        assert_eq!(results.len(), 2);

        let ok = &results[&good.message_id];
        assert!(ok.is_reachable);
        assert_eq!(ok.confidence, Confidence::High);

        let bad = &results["missing@example.com"];
        assert!(!bad.is_reachable);
        assert_eq!(bad.score, 0.0);
        assert_eq!(bad.confidence, Confidence::Low);
        assert_eq!(bad.error_detail.as_deref(), Some("HTTP 404"));
    }

    #[tokio::test]
    async fn test_missing_permalink_is_terminal_not_fatal() {
        let mut record = record_from_job(&job());
        record.permalink = None;

        let fetcher = Arc::new(StubFetcher {
            responses: HashMap::new(),
        });
        let verifier = Verifier::with_fetcher(fetcher, 1, Duration::ZERO);
        let results = verifier.verify_batch(&[record]).await;

        let r = &results["20250705071717.5062-1-ankita@nvidia.com"];
        assert!(!r.is_reachable);
        assert!(r.error_detail.as_deref().unwrap().contains("no permalink"));
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let fetcher = Arc::new(StubFetcher {
            responses: HashMap::new(),
        });
        let verifier = Verifier::with_fetcher(fetcher, 3, Duration::ZERO);
        assert!(verifier.verify_batch(&[]).await.is_empty());
    }
}
