//! URL canonicalization.

use url::Url;

/// Canonicalize a URL so equivalent spellings collapse to one identity.
///
/// The host is lowercased, path and query keep their case, and exactly one
/// trailing slash is stripped. Input that does not parse as a URL is
/// returned unchanged.
pub fn normalize_url(raw: &str) -> String {
    let mut url = match Url::parse(raw.trim()) {
        Ok(url) => url,
        Err(_) => return raw.to_string(),
    };

    // Special schemes already lowercase the host while parsing; others don't.
    if let Some(host) = url.host_str().map(str::to_lowercase) {
        if url.set_host(Some(&host)).is_err() {
            return raw.to_string();
        }
    }

    let mut serialized = String::from(url);
    if serialized.ends_with('/') {
        serialized.pop();
    }
    serialized
}

/// Lowercased host of a URL.
pub fn site_domain(raw: &str) -> Option<String> {
    Url::parse(raw.trim())
        .ok()
        .and_then(|u| u.host_str().map(str::to_lowercase))
}

/// `scheme://host[:port]` of a URL.
pub fn origin(raw: &str) -> Option<String> {
    let url = Url::parse(raw.trim()).ok()?;
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
        None => format!("{}://{}", url.scheme(), host),
    })
}

/// Resolve a possibly relative reference against a base URL.
///
/// Returns `None` for empty references, `javascript:`/`data:` pseudo-links,
/// and references that cannot be resolved.
pub fn resolve_url(base: Option<&str>, reference: &str) -> Option<String> {
    let reference = reference.trim();
    if reference.is_empty() || reference.starts_with('#') {
        return None;
    }
    let lower = reference.to_lowercase();
    if lower.starts_with("javascript:") || lower.starts_with("data:") || lower.starts_with("mailto:")
    {
        return None;
    }

    if let Ok(absolute) = Url::parse(reference) {
        return Some(absolute.to_string());
    }

    let base = Url::parse(base?).ok()?;
    base.join(reference).ok().map(|u| u.to_string())
}
