//! Raw message parsing.
//!
//! Turns the raw text of a mirrored message into a [`MessageRecord`]:
//! header extraction (structured parse with a regex fallback), subject-based
//! type classification, patch-series tag parsing, and a validity check that
//! feeds the malformed-record count. Deliberately not a full RFC-822
//! implementation — lore mirrors store one plain-text message per commit and
//! a best-effort parse is all the pipeline needs.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::lore::strip_angle_brackets;
use crate::models::{MessageRecord, MessageType, PatchInfo};

static PATCH_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\[PATCH\s*(?:v(\d+))?\s*(?:(\d+)/(\d+))?\](.*)$").unwrap()
});
static REF_IDS: Lazy<Regex> = Lazy::new(|| Regex::new(r"<([^>]+)>").unwrap());
static VALID_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9.\-_@]+$").unwrap());

static FALLBACK_SUBJECT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^Subject:\s*(.+)$").unwrap());
static FALLBACK_FROM: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^From:\s*(.+)$").unwrap());
static FALLBACK_DATE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^Date:\s*(.+)$").unwrap());
static FALLBACK_MSGID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^Message-I[Dd]:\s*<?([^>\r\n]+)>?\s*$").unwrap());

/// The header fields both the local parser and the remote verifier care
/// about, extracted best-effort from a raw headered message.
#[derive(Debug, Clone, Default)]
pub struct HeaderFields {
    pub subject: String,
    pub from: String,
    pub date: String,
    pub message_id: String,
    pub in_reply_to: String,
    pub references: String,
}

/// Extract header fields from a raw message.
///
/// Attempts a structured line-based parse of the header block first
/// (continuation lines unfolded); if that yields no message id, falls back
/// to multiline regex extraction over the whole text.
pub fn extract_header_fields(raw: &str) -> HeaderFields {
    let mut fields = parse_header_block(raw);
    if fields.message_id.is_empty() {
        fields = extract_fields_with_regex(raw);
    }
    fields
}

/// Structured pass: read `Name: value` lines up to the first blank line,
/// unfolding indented continuations.
fn parse_header_block(raw: &str) -> HeaderFields {
    let mut fields = HeaderFields::default();
    let mut current: Option<(String, String)> = None;

    for line in raw.lines() {
        if line.trim().is_empty() {
            break;
        }
        if (line.starts_with(' ') || line.starts_with('\t')) && current.is_some() {
            if let Some((_, value)) = current.as_mut() {
                value.push(' ');
                value.push_str(line.trim());
            }
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            if let Some((prev_name, prev_value)) = current.take() {
                store_field(&mut fields, &prev_name, &prev_value);
            }
            current = Some((name.trim().to_ascii_lowercase(), value.trim().to_string()));
        } else {
            // Not a header line at all; stop before eating body text.
            break;
        }
    }
    if let Some((name, value)) = current {
        store_field(&mut fields, &name, &value);
    }

    fields
}

fn store_field(fields: &mut HeaderFields, name: &str, value: &str) {
    let slot = match name {
        "subject" => &mut fields.subject,
        "from" => &mut fields.from,
        "date" => &mut fields.date,
        "message-id" => &mut fields.message_id,
        "in-reply-to" => &mut fields.in_reply_to,
        "references" => &mut fields.references,
        _ => return,
    };
    // First occurrence wins.
    if slot.is_empty() {
        *slot = value.to_string();
    }
}

/// Regex fallback for messages whose header block did not parse cleanly.
fn extract_fields_with_regex(raw: &str) -> HeaderFields {
    let capture = |re: &Regex| {
        re.captures(raw)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default()
    };
    HeaderFields {
        subject: capture(&FALLBACK_SUBJECT),
        from: capture(&FALLBACK_FROM),
        date: capture(&FALLBACK_DATE),
        message_id: capture(&FALLBACK_MSGID),
        in_reply_to: String::new(),
        references: String::new(),
    }
}

/// The message body: everything after the first blank line. Best effort —
/// multipart payloads are returned as-is.
pub fn message_body(raw: &str) -> &str {
    match raw.find("\n\n") {
        Some(pos) => &raw[pos + 2..],
        None => raw,
    }
}

/// Parse one raw mirrored message into a [`MessageRecord`].
///
/// Fails (for the caller to count as malformed) when the essential fields
/// are missing or nonsensical: empty or ill-formed message id, empty
/// sender, or a subject shorter than 3 characters.
pub fn parse_message(source_ref: &str, raw: &str) -> Result<MessageRecord> {
    let fields = extract_header_fields(raw);

    let message_id = strip_angle_brackets(&fields.message_id).to_string();
    if message_id.is_empty() {
        bail!("missing Message-ID in commit {}", source_ref);
    }
    if !VALID_ID.is_match(&message_id) {
        bail!("ill-formed Message-ID '{}' in commit {}", message_id, source_ref);
    }
    if fields.subject.trim().len() < 3 {
        bail!("missing or trivial Subject in commit {}", source_ref);
    }
    if fields.from.trim().is_empty() {
        bail!("missing From in commit {}", source_ref);
    }

    let sent_at = parse_date(&fields.date);
    let (message_type, patch_info) = classify_subject(&fields.subject);

    let mut record = MessageRecord::new(
        source_ref,
        message_id,
        fields.subject.trim(),
        fields.from.trim(),
        sent_at,
        message_type,
    );
    record.patch_info = patch_info;
    record.parent_id = extract_parent_id(&fields);
    Ok(record)
}

/// Parse an RFC 2822 date header. Unparseable dates fall back to now, so a
/// single bad header never invalidates an otherwise good message.
pub fn parse_date(date_str: &str) -> DateTime<Utc> {
    match DateTime::parse_from_rfc2822(date_str.trim()) {
        Ok(dt) => dt.with_timezone(&Utc),
        Err(_) => {
            if !date_str.trim().is_empty() {
                eprintln!("warning: unparseable Date header '{}'", date_str.trim());
            }
            Utc::now()
        }
    }
}

/// Declared parent: `In-Reply-To` wins; otherwise the last entry of
/// `References` (the most recent ancestor).
fn extract_parent_id(fields: &HeaderFields) -> Option<String> {
    let in_reply_to = strip_angle_brackets(fields.in_reply_to.trim());
    if !in_reply_to.is_empty() {
        return Some(in_reply_to.to_string());
    }

    REF_IDS
        .captures_iter(&fields.references)
        .last()
        .map(|c| c[1].to_string())
}

/// Classify a subject line into a [`MessageType`], parsing any
/// `[PATCH vN x/y]` tag into [`PatchInfo`].
pub fn classify_subject(subject: &str) -> (MessageType, Option<PatchInfo>) {
    let lower = subject.to_lowercase();

    // A "Re:" prefix outranks any [PATCH] tag quoted from the parent.
    if lower.starts_with("re:") {
        if lower.contains("reviewed-by") || lower.contains("review") {
            return (MessageType::Review, None);
        }
        if lower.contains("acked-by") {
            return (MessageType::Ack, None);
        }
        return (MessageType::Reply, None);
    }

    if let Some(caps) = PATCH_TAG.captures(subject) {
        let version = caps
            .get(1)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(1);
        let number: u32 = caps
            .get(2)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(0);
        let total = caps
            .get(3)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(1);
        let series_name = caps
            .get(4)
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default();

        let info = PatchInfo {
            version,
            number,
            total,
            series_name,
        };
        return if number == 0 {
            (MessageType::PatchCover, Some(info))
        } else {
            (MessageType::Patch, Some(info))
        };
    }

    (MessageType::Unknown, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    const RAW: &str = "From: Ankita Agrawal <ankita@nvidia.com>\n\
Date: Sat, 5 Jul 2025 07:17:17 +0000\n\
Subject: [PATCH v3 2/5] KVM: arm64: Expose device memory\n\
Message-ID: <20250705071717.5062-2-ankita@nvidia.com>\n\
In-Reply-To: <20250705071717.5062-1-ankita@nvidia.com>\n\
References: <20250705071717.5062-1-ankita@nvidia.com>\n\
\n\
Expose the device memory to the guest.\n";

    #[test]
    fn test_parse_full_message() {
        let record = parse_message("abc123", RAW).unwrap();
        assert_eq!(record.message_id, "20250705071717.5062-2-ankita@nvidia.com");
        assert_eq!(record.subject, "[PATCH v3 2/5] KVM: arm64: Expose device memory");
        assert_eq!(record.sender, "Ankita Agrawal <ankita@nvidia.com>");
        assert_eq!(record.message_type, MessageType::Patch);
        assert_eq!(
            record.parent_id.as_deref(),
            Some("20250705071717.5062-1-ankita@nvidia.com")
        );
        let info = record.patch_info.unwrap();
        assert_eq!((info.version, info.number, info.total), (3, 2, 5));
        assert_eq!(info.series_name, "KVM: arm64: Expose device memory");
    }

    #[test]
    fn test_references_fallback_takes_last() {
        let raw = "From: a@b.c\nSubject: Re: something useful\n\
Message-ID: <child@b.c>\nReferences: <first@b.c> <second@b.c>\n\nbody\n";
        let record = parse_message("r", raw).unwrap();
        assert_eq!(record.parent_id.as_deref(), Some("second@b.c"));
    }

    #[test]
    fn test_folded_header_unfolds() {
        let raw = "From: a@b.c\nSubject: Re: a very long subject\n that folds over\n\
Message-ID: <x@b.c>\n\nbody\n";
        let record = parse_message("r", raw).unwrap();
        assert_eq!(record.subject, "Re: a very long subject that folds over");
    }

    #[test]
    fn test_regex_fallback_when_block_malformed() {
        // Garbage first line defeats the structured pass.
        let raw = ">>>corrupted preamble\nSubject: Re: hello there\nFrom: dev@example.com\n\
Message-Id: <fallback@example.com>\n\nbody\n";
        let fields = extract_header_fields(raw);
        assert_eq!(fields.message_id, "fallback@example.com");
        assert_eq!(fields.subject, "Re: hello there");
    }

    #[test]
    fn test_missing_message_id_is_error() {
        assert!(parse_message("r", "From: a@b.c\nSubject: hi there\n\nbody").is_err());
    }

    #[test]
    fn test_trivial_subject_is_error() {
        let raw = "From: a@b.c\nSubject: x\nMessage-ID: <i@b.c>\n\nbody";
        assert!(parse_message("r", raw).is_err());
    }

    #[test]
    fn test_classify_cover_letter() {
        let (ty, info) = classify_subject("[PATCH v2 0/4] Add widget support");
        assert_eq!(ty, MessageType::PatchCover);
        assert_eq!(info.unwrap().number, 0);
    }

    #[test]
    fn test_classify_reply_review_ack() {
        assert_eq!(classify_subject("Re: [PATCH] thing").0, MessageType::Reply);
        assert_eq!(
            classify_subject("Re: review of the mapping change").0,
            MessageType::Review
        );
        assert_eq!(
            classify_subject("Re: acked-by added").0,
            MessageType::Ack
        );
        assert_eq!(classify_subject("Announcement").0, MessageType::Unknown);
    }

    #[test]
    fn test_message_body_split() {
        assert_eq!(message_body("A: b\n\nthe body"), "the body");
        assert_eq!(message_body("no blank line"), "no blank line");
    }
}
