use http::uri::{Parts, PathAndQuery, Uri};
use http::{Method, StatusCode};

/// Whether a response status starts redirect evaluation.
pub(crate) fn is_redirect(status: StatusCode) -> bool {
    matches!(status.as_u16(), 301 | 302 | 303 | 307 | 308)
}

/// The method and body carried into a redirect's successor request.
#[derive(Debug, PartialEq)]
pub(crate) enum Replay {
    /// Keep the method, replay the body (307/308).
    SameMethod,
    /// Degrade to GET and drop the body (303, and 301/302 for methods that
    /// common clients rewrite).
    ForceGet,
}

pub(crate) fn replay_policy(status: StatusCode, method: &Method) -> Replay {
    match status.as_u16() {
        303 => Replay::ForceGet,
        301 | 302 if method != Method::GET && method != Method::HEAD => Replay::ForceGet,
        _ => Replay::SameMethod,
    }
}

/// Resolves a `Location` header value against the URI it was received on.
///
/// Handles absolute URIs, scheme-relative references, absolute paths and
/// relative paths (with dot-segment removal).
pub(crate) fn resolve_location(base: &Uri, location: &str) -> crate::Result<Uri> {
    if location.is_empty() {
        return Err(crate::Error::new_bad_redirect("empty location"));
    }

    let resolved = if location.starts_with("//") {
        // Scheme-relative: keep only the scheme.
        let scheme = base.scheme_str().unwrap_or("http");
        format!("{}:{}", scheme, location).parse::<Uri>()
    } else if is_absolute_uri(location) {
        location.parse::<Uri>()
    } else {
        let path = if location.starts_with('/') {
            remove_dot_segments(location)
        } else {
            // Relative reference: merge with the base path.
            let base_path = base.path();
            let dir = match base_path.rfind('/') {
                Some(idx) => &base_path[..=idx],
                None => "/",
            };
            remove_dot_segments(&format!("{}{}", dir, location))
        };

        let mut parts = Parts::default();
        parts.scheme = base.scheme().cloned();
        parts.authority = base.authority().cloned();
        parts.path_and_query = Some(
            path.parse::<PathAndQuery>()
                .map_err(|e| crate::Error::new_bad_redirect(e))?,
        );
        return Uri::from_parts(parts).map_err(|e| crate::Error::new_bad_redirect(e));
    };

    let uri = resolved.map_err(|e| crate::Error::new_bad_redirect(e))?;
    if uri.scheme().is_none() || uri.authority().is_none() {
        return Err(crate::Error::new_bad_redirect(
            "location is not an absolute uri",
        ));
    }
    Ok(uri)
}

// A URI reference with a scheme but no "://", e.g. "mailto:" or
// "http:/path"; `Uri` parsing decides whether it is usable.
fn is_absolute_uri(location: &str) -> bool {
    location
        .split_once(':')
        .map(|(scheme, _)| {
            !scheme.is_empty()
                && scheme
                    .bytes()
                    .all(|b| b.is_ascii_alphanumeric() || b == b'+' || b == b'-' || b == b'.')
        })
        .unwrap_or(false)
}

/// RFC 3986 §5.2.4, specialized to paths that start with `/`.
fn remove_dot_segments(path: &str) -> String {
    let query = path.find('?').map(|idx| &path[idx..]);
    let path = match path.find('?') {
        Some(idx) => &path[..idx],
        None => path,
    };

    let mut output: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "." => {}
            ".." => {
                output.pop();
            }
            other => output.push(other),
        }
    }

    let mut result = output.join("/");
    if result.is_empty() || !result.starts_with('/') {
        result.insert(0, '/');
    }
    if (path.ends_with("/.") || path.ends_with("/..")) && !result.ends_with('/') {
        result.push('/');
    }
    if let Some(query) = query {
        result.push_str(query);
    }
    result
}
