//! URL canonicalization and fingerprinting used as the document dedup key.

use sha2::{Digest, Sha256};
use url::Url;

/// Query parameters that only carry campaign/referral tracking.
const TRACKING_PARAMS: &[&str] = &[
    "fbclid", "gclid", "dclid", "msclkid", "igshid", "mc_cid", "mc_eid", "mkt_tok", "ref",
    "ref_src", "_hsenc", "_hsmi", "yclid",
];

fn is_tracking_param(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key.as_str())
}

/// Normalizes a URL so that trivially different links collapse to one form.
///
/// Lowercases scheme and host, defaults the scheme to `https`, defaults an empty
/// path to `/`, drops the fragment and tracking parameters, and sorts the
/// remaining query pairs. Never fails: unparsable input comes back trimmed.
pub fn canonicalize(url: &str) -> String {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    match try_canonicalize(trimmed) {
        Some(canonical) => canonical,
        None => trimmed.to_string(),
    }
}

/// `host:port[/...]` with no scheme. `Url::parse` would read the host as the scheme.
fn is_bare_host_with_port(raw: &str) -> bool {
    let Some((host, rest)) = raw.split_once(':') else {
        return false;
    };
    let host_ok = !host.is_empty()
        && host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.');
    let port_len = rest.chars().take_while(|c| c.is_ascii_digit()).count();
    let after_port = &rest[port_len..];
    host_ok
        && port_len > 0
        && (after_port.is_empty()
            || after_port.starts_with('/')
            || after_port.starts_with('?')
            || after_port.starts_with('#'))
}

fn with_default_scheme(raw: &str) -> Option<Url> {
    let rest = raw.strip_prefix("//").unwrap_or(raw);
    Url::parse(&format!("https://{}", rest)).ok()
}

fn try_canonicalize(raw: &str) -> Option<String> {
    let mut parsed = if is_bare_host_with_port(raw) {
        with_default_scheme(raw)?
    } else {
        match Url::parse(raw) {
            Ok(parsed) => parsed,
            Err(url::ParseError::RelativeUrlWithoutBase) => with_default_scheme(raw)?,
            Err(_) => return None,
        }
    };
    if parsed.cannot_be_a_base() || parsed.host_str().is_none() {
        return None;
    }

    parsed.set_fragment(None);
    if parsed.path().is_empty() {
        parsed.set_path("/");
    }

    let mut pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(key, _)| !is_tracking_param(key))
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    pairs.sort_by(|a, b| {
        a.0.to_lowercase()
            .cmp(&b.0.to_lowercase())
            .then_with(|| a.0.cmp(&b.0))
            .then_with(|| a.1.cmp(&b.1))
    });

    if pairs.is_empty() {
        parsed.set_query(None);
    } else {
        parsed.query_pairs_mut().clear().extend_pairs(pairs.iter());
    }

    Some(parsed.to_string())
}

/// SHA-256 hex digest of the canonical URL's UTF-8 bytes.
pub fn fingerprint(canonical_url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_url.as_bytes());
    hex::encode(hasher.finalize())
}

/// Convenience for `fingerprint(canonicalize(url))`.
pub fn url_hash(url: &str) -> String {
    fingerprint(&canonicalize(url))
}
