use crate::error::{FsError, Result};

/// Normalize a virtual path to its canonical relative form.
///
/// Separators are collapsed, `.` segments dropped and `..` resolved within
/// the path. The root is the empty string. Attempts to climb above the root
/// are rejected.
pub fn normalize(path: &str) -> Result<String> {
    let mut segments: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                if segments.pop().is_none() {
                    return Err(FsError::InvalidPath(format!(
                        "path traverses outside the root: {}",
                        path
                    )));
                }
            }
            s => {
                if s.chars().all(char::is_whitespace) {
                    return Err(FsError::InvalidPath(format!(
                        "whitespace-only segment in path: {}",
                        path
                    )));
                }
                segments.push(s);
            }
        }
    }

    Ok(segments.join("/"))
}

/// Join a normalized virtual path onto an absolute repository root path.
///
/// `root` must be absolute ("/" or "/some/root"); the result is always an
/// absolute node path without a trailing slash.
pub fn to_node_path(root: &str, relative: &str) -> String {
    let root = root.trim_end_matches('/');
    if relative.is_empty() {
        if root.is_empty() {
            "/".to_string()
        } else {
            root.to_string()
        }
    } else if root.is_empty() {
        format!("/{}", relative)
    } else {
        format!("{}/{}", root, relative)
    }
}

/// Parent of an absolute node path. The root's parent is the root itself.
pub fn parent_of(node_path: &str) -> &str {
    match node_path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &node_path[..idx],
    }
}

/// Last segment of an absolute node path ("" for the root).
pub fn name_of(node_path: &str) -> &str {
    match node_path.rfind('/') {
        Some(idx) => &node_path[idx + 1..],
        None => node_path,
    }
}

/// All strict ancestors of an absolute node path, closest to the root first.
/// "/a/b/c" yields "/a" and "/a/b"; the root itself is not included.
pub fn ancestors_of(node_path: &str) -> Vec<String> {
    let mut out = Vec::new();
    for (i, b) in node_path.bytes().enumerate().skip(1) {
        if b == b'/' {
            out.push(node_path[..i].to_string());
        }
    }
    out
}

/// True if `candidate` equals `base` or sits underneath it.
pub fn is_within(base: &str, candidate: &str) -> bool {
    if base == "/" {
        return candidate.starts_with('/');
    }
    candidate == base || candidate.starts_with(&format!("{}/", base))
}
