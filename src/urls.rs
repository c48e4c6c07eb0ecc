use url::Url;

use crate::storage;

/// Host identity used for same-site checks and on-disk directory names.
/// An explicit port is part of the identity; default ports are already
/// stripped by the parser.
pub fn url_host(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

/// Canonical de-duplication key for a URL. Same-host URLs key on their path,
/// everything else on the full URL; fragments are discarded and a single
/// trailing slash is collapsed.
pub fn normalize_key(url: &Url, base_host: &str) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    if url_host(&url) == base_host {
        normalize_trailing_slash(url.path())
    } else {
        normalize_trailing_slash(url.as_str())
    }
}

fn normalize_trailing_slash(value: &str) -> String {
    if value.is_empty() {
        return "/".to_string();
    }
    if value != "/" && value.ends_with('/') {
        value[..value.len() - 1].to_string()
    } else {
        value.to_string()
    }
}

/// Resolve a raw reference found on a page (or in a stylesheet) to the
/// path-relative form it must have in the stored file. Returns `None` when
/// the reference must be left untouched.
pub fn resolve_reference(
    base: &Url,
    reference: &str,
    main_host: &str,
    is_hyperlink: bool,
    relative_to_root: &str,
) -> Option<String> {
    let resolved = base.join(reference).ok()?;
    if !matches!(resolved.scheme(), "http" | "https") {
        return None;
    }

    let host = url_host(&resolved);
    let external = host != main_host;
    if external && is_hyperlink {
        // hyperlinks to other sites stay as they are
        return None;
    }

    let mut path = resolved.path().to_string();
    if external {
        path = format!("/_{host}{path}");
    }
    if is_hyperlink {
        path = storage::page_file_name(&path);
    }

    let mut result = if external {
        let path = path.strip_prefix('/').unwrap_or(&path);
        format!("{relative_to_root}{path}")
    } else {
        relative_between(&path, base.path())
    };
    if result.is_empty() {
        result = "/".to_string();
    }
    if let Some(fragment) = resolved.fragment() {
        result.push('#');
        result.push_str(fragment);
    }

    if result.ends_with('/') {
        result.push_str(storage::PAGE_DIR_INDEX);
    } else if let Some(pos) = result.rfind("/#") {
        result.insert_str(pos + 1, storage::PAGE_DIR_INDEX);
    }

    let result = result.strip_prefix('/').unwrap_or(&result);
    Some(result.to_string())
}

/// Path of `src_path` relative to the directory holding `base_path`. Shared
/// leading segments are stripped; every remaining directory of the base
/// becomes one `../`.
pub fn relative_between(src_path: &str, base_path: &str) -> String {
    let src: Vec<&str> = src_path.split('/').filter(|s| !s.is_empty()).collect();
    let base: Vec<&str> = base_path.split('/').filter(|s| !s.is_empty()).collect();
    let common = src
        .iter()
        .zip(base.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut up = base.len() - common;
    if up > 0 && !base_path.ends_with('/') {
        up -= 1; // the final segment of the base is a file name, not a directory
    }

    let mut out = String::new();
    for _ in 0..up {
        out.push_str("../");
    }
    out.push_str(&src[common..].join("/"));
    if src_path.ends_with('/') && !out.is_empty() && !out.ends_with('/') {
        out.push('/');
    }
    out
}

/// A `../` sequence leading from the URL's directory back to the site root.
pub fn relative_to_root(url: &Url) -> String {
    let segments: Vec<&str> = url.path().split('/').collect();
    let mut out = String::new();
    for (i, segment) in segments.iter().enumerate() {
        if !segment.is_empty() && i < segments.len() - 1 {
            out.push_str("../");
        }
    }
    out
}

/// Resolve every URL of a `srcset` attribute value, keeping the width and
/// density descriptors intact.
pub fn resolve_srcset(
    base: &Url,
    value: &str,
    main_host: &str,
    is_hyperlink: bool,
    relative_to_root: &str,
) -> String {
    let mut candidates = Vec::new();
    for candidate in value.split(',') {
        let candidate = candidate.trim();
        if candidate.is_empty() {
            continue;
        }
        let (url_part, descriptor) = match candidate.split_once(char::is_whitespace) {
            Some((url_part, descriptor)) => (url_part, descriptor.trim()),
            None => (candidate, ""),
        };
        let resolved = resolve_reference(base, url_part, main_host, is_hyperlink, relative_to_root)
            .unwrap_or_else(|| url_part.to_string());
        if descriptor.is_empty() {
            candidates.push(resolved);
        } else {
            candidates.push(format!("{resolved} {descriptor}"));
        }
    }
    candidates.join(", ")
}
