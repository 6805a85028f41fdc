//! Permalink derivation for lore-style public-inbox archives.
//!
//! A message's canonical permalink is derived purely from its message id:
//! `https://<host>/<list>/<percent-encoded-id>/`. The trailing slash is part
//! of the canonical form; [`raw_fetch_url`] depends on it being present.

use anyhow::{bail, Result};

/// Derive the canonical permalink for a message id.
///
/// Angle brackets are stripped, the id is percent-encoded keeping
/// `@ . - _` unescaped, and the URL always ends with `/`.
///
/// Deterministic and total for every non-empty id; an empty id (after
/// stripping) is an input-contract violation and returns an error.
pub fn generate_permalink(host: &str, list: &str, message_id: &str) -> Result<String> {
    let clean = strip_angle_brackets(message_id);
    if clean.is_empty() {
        bail!("empty message id");
    }

    Ok(format!("https://{}/{}/{}/", host, list, percent_encode(clean)))
}

/// Derive the raw-content fetch URL from a permalink: trailing slash
/// removed, `/raw` appended.
pub fn raw_fetch_url(permalink: &str) -> String {
    format!("{}/raw", permalink.trim_end_matches('/'))
}

/// Remove one level of surrounding `<...>` if present.
pub fn strip_angle_brackets(message_id: &str) -> &str {
    message_id.trim_matches(|c| c == '<' || c == '>')
}

/// Percent-encode a message id, leaving alphanumerics and `@ . - _`
/// untouched (the characters lore itself keeps literal).
fn percent_encode(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for byte in id.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'@' | b'.' | b'-' | b'_' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}
