//! Classification of image references.
//!
//! A published snapshot may only point at durable URLs: absolute
//! `http(s)://` URLs or root-relative paths. Anything an editor pastes or
//! uploads in dev mode (`data:` URLs, `blob:` object URLs) has to be promoted
//! to the blob store first.

/// What kind of reference a string is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    /// `http://host/...` or `https://host/...`.
    AbsoluteUrl,
    /// `/path/...` (but not protocol-relative `//host`).
    RootRelative,
    /// `data:` URL carrying the bytes inline.
    Inline,
    /// Anything else (`blob:` URLs, relative paths, empty strings).
    Other,
}

/// Classifies a reference string.
#[must_use]
pub fn classify_reference(reference: &str) -> ReferenceKind {
    let r = reference.trim();
    let lower = r.get(..8).unwrap_or(r).to_ascii_lowercase();

    if let Some(rest) = strip_scheme(r, &lower) {
        if rest.is_empty() || rest.starts_with('/') || rest.chars().any(char::is_whitespace) {
            return ReferenceKind::Other;
        }
        return ReferenceKind::AbsoluteUrl;
    }
    if r.starts_with('/') && !r.starts_with("//") {
        return ReferenceKind::RootRelative;
    }
    if lower.starts_with("data:") {
        return ReferenceKind::Inline;
    }
    ReferenceKind::Other
}

fn strip_scheme<'a>(r: &'a str, lower: &str) -> Option<&'a str> {
    if lower.starts_with("https://") {
        Some(&r[8..])
    } else if lower.starts_with("http://") {
        Some(&r[7..])
    } else {
        None
    }
}

/// Returns true for absolute http(s) URLs and root-relative paths.
#[must_use]
pub fn is_durable_url(reference: &str) -> bool {
    matches!(
        classify_reference(reference),
        ReferenceKind::AbsoluteUrl | ReferenceKind::RootRelative
    )
}

/// Returns true for `data:` URLs.
#[must_use]
pub fn is_inline_payload(reference: &str) -> bool {
    classify_reference(reference) == ReferenceKind::Inline
}

/// Appends `name=value` to a URL's query string, keeping any `#fragment`
/// at the end. An existing parameter with the same name is replaced.
#[must_use]
pub fn append_query_param(url: &str, name: &str, value: &str) -> String {
    let (base, fragment) = match url.find('#') {
        Some(idx) => (&url[..idx], &url[idx..]),
        None => (url, ""),
    };
    let (path, query) = match base.find('?') {
        Some(idx) => (&base[..idx], &base[idx + 1..]),
        None => (base, ""),
    };

    let prefix = format!("{name}=");
    let mut params: Vec<&str> = query
        .split('&')
        .filter(|p| !p.is_empty() && *p != name && !p.starts_with(&prefix))
        .collect();
    let param = format!("{name}={value}");
    params.push(&param);

    format!("{path}?{}{fragment}", params.join("&"))
}
