//! Path helpers for the `/`-delimited node namespace.

/// Joins a parent path and a child name.
#[must_use]
pub fn join(parent: &str, child: &str) -> String {
    let child = child.trim_start_matches('/');
    if parent == "/" {
        format!("/{child}")
    } else {
        format!("{}/{child}", parent.trim_end_matches('/'))
    }
}

/// Returns the parent of `path`, or `None` for the root.
#[must_use]
pub fn parent(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }

    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(index) => Some(&path[..index]),
        None => None,
    }
}

/// Returns the last segment of `path`.
#[must_use]
pub fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Checks that `path` is absolute, has no empty segments and no trailing
/// slash (the root `/` excepted).
#[must_use]
pub fn validate(path: &str) -> bool {
    if path == "/" {
        return true;
    }

    path.starts_with('/') && path[1..].split('/').all(|segment| !segment.is_empty())
}
