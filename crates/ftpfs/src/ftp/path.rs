//! Remote path helpers. Remote paths are always absolute and `/`-separated.

/// Normalise to an absolute path without empty, `.` or `..` segments and
/// without a trailing slash (except for the root). `..` never escapes `/`.
pub fn normalize(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    if segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", segments.join("/"))
    }
}

/// Join a single entry name onto a normalised directory path.
pub fn join(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        normalize(&format!("{}{}", dir, name))
    } else {
        normalize(&format!("{}/{}", dir, name))
    }
}

/// Split a normalised path into `(parent, name)`. The root has no parent.
pub fn split(path: &str) -> Option<(String, String)> {
    let path = normalize(path);
    if path == "/" {
        return None;
    }
    let pos = path.rfind('/')?;
    let parent = if pos == 0 { "/".to_string() } else { path[..pos].to_string() };
    Some((parent, path[pos + 1..].to_string()))
}

pub fn parent(path: &str) -> Option<String> {
    split(path).map(|(parent, _)| parent)
}

/// Whether `path` equals `prefix` or lies beneath it, segment-wise:
/// `/a` covers `/a/b` but not `/ab`. Both arguments must be normalised.
pub fn is_within(path: &str, prefix: &str) -> bool {
    if prefix == "/" || path == prefix {
        return true;
    }
    path.len() > prefix.len() && path.starts_with(prefix) && path.as_bytes()[prefix.len()] == b'/'
}

/// Every ancestor from the first component down to `path` itself:
/// `/a/b/c` → `["/a", "/a/b", "/a/b/c"]`.
pub fn ancestors_inclusive(path: &str) -> Vec<String> {
    let path = normalize(path);
    let mut out = Vec::new();
    let mut current = String::new();
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        current.push('/');
        current.push_str(segment);
        out.push(current.clone());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_segments() {
        assert_eq!(normalize(""), "/");
        assert_eq!(normalize("/"), "/");
        assert_eq!(normalize("pub//incoming/"), "/pub/incoming");
        assert_eq!(normalize("/pub/./a/../b"), "/pub/b");
        assert_eq!(normalize("/../../etc"), "/etc");
        assert_eq!(normalize("/my dir/file name.txt"), "/my dir/file name.txt");
    }

    #[test]
    fn joins_and_splits() {
        assert_eq!(join("/", "a"), "/a");
        assert_eq!(join("/a", "b"), "/a/b");
        assert_eq!(split("/a/b"), Some(("/a".to_string(), "b".to_string())));
        assert_eq!(split("/a"), Some(("/".to_string(), "a".to_string())));
        assert_eq!(split("/"), None);
        assert_eq!(parent("/a/b/c"), Some("/a/b".to_string()));
    }

    #[test]
    fn prefix_matching_is_segment_wise() {
        assert!(is_within("/a", "/a"));
        assert!(is_within("/a/b/c", "/a"));
        assert!(!is_within("/ab", "/a"));
        assert!(!is_within("/", "/a"));
        assert!(is_within("/anything", "/"));
    }

    #[test]
    fn lists_ancestors() {
        assert_eq!(ancestors_inclusive("/a/b/c"), vec!["/a", "/a/b", "/a/b/c"]);
        assert!(ancestors_inclusive("/").is_empty());
    }
}
