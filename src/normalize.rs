//! URL normalizer (C2).
//!
//! Pure function, no I/O: parse, scheme check, mutate in place, reserialize.
//! The step list: lowercase host, strip a leading `www.`, strip a trailing
//! slash except on the root path, drop query and fragment entirely. No
//! tracking-free query params are preserved — correspondence matching only
//! cares about path identity.

use url::Url;

/// Normalizes a URL for correspondence matching. Returns `None` if `raw`
/// does not parse or its scheme is not `http`/`https`.
pub fn normalize_url(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let mut url = Url::parse(trimmed).ok()?;
    let scheme = url.scheme().to_ascii_lowercase();
    if scheme != "http" && scheme != "https" {
        return None;
    }

    let host = url.host_str()?.to_ascii_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();
    url.set_host(Some(&host)).ok()?;

    url.set_query(None);
    url.set_fragment(None);

    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        url.set_path(path.trim_end_matches('/'));
    }

    Some(url.to_string())
}

/// The path component of a normalized URL, used by the correspondence
/// resolver's similarity comparisons.
pub fn path_of(normalized: &str) -> String {
    Url::parse(normalized)
        .map(|u| {
            let p = u.path().to_string();
            if p.is_empty() {
                "/".to_string()
            } else {
                p
            }
        })
        .unwrap_or_default()
}
