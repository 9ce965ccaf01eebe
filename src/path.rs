//! Helpers for the slash-separated path namespace.

use std::cmp::Ordering;

/// Normalizes `path` into the canonical form used for every store call.
///
/// The result always starts with `/`, never ends with `/` (unless it is the root), contains no
/// empty segments, and has `.` and `..` segments resolved. `..` never climbs above the root.
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

    let mut normalized = String::with_capacity(path.len() + 1);
    for segment in &segments {
        normalized.push('/');
        normalized.push_str(segment);
    }
    if normalized.is_empty() {
        normalized.push('/');
    }
    normalized
}

/// Joins a child name onto a normalized parent path.
pub fn join(parent: &str, child: &str) -> String {
    if parent == "/" {
        format!("/{}", child)
    } else {
        format!("{}/{}", parent, child)
    }
}

/// Returns the parent of a normalized path, or `None` for the root.
pub fn parent(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(i) => Some(&path[..i]),
        None => None,
    }
}

/// Returns the final segment of a normalized path.
pub fn basename(path: &str) -> &str {
    match path.rfind('/') {
        Some(i) => &path[i + 1..],
        None => path,
    }
}

/// Every proper prefix of `path` plus `path` itself, shortest first, excluding the root.
///
/// `/a/b/c` yields `/a`, `/a/b`, `/a/b/c`.
pub fn ancestors(path: &str) -> Vec<String> {
    let normalized = normalize(path);
    let mut prefixes = Vec::new();
    let mut current = String::new();
    for segment in normalized.split('/').filter(|s| !s.is_empty()) {
        current.push('/');
        current.push_str(segment);
        prefixes.push(current.clone());
    }
    prefixes
}

/// Extracts the store-assigned sequence number from the trailing digits of a node name.
///
/// Returns `None` if the name does not end in a digit, or the digits do not fit in a `u64`.
pub fn sequence_of(name: &str) -> Option<u64> {
    let digits = name
        .bytes()
        .rev()
        .take_while(|b| b.is_ascii_digit())
        .count();
    if digits == 0 {
        return None;
    }
    name[name.len() - digits..].parse().ok()
}

/// Orders node names by their numeric sequence suffix.
///
/// Raw string ordering is wrong once names carry different prefixes or digit counts, so the
/// trailing digits are compared as numbers. Names without a suffix sort after all sequenced
/// names; ties fall back to the full name so the ordering is total.
pub fn compare_sequence(a: &str, b: &str) -> Ordering {
    match (sequence_of(a), sequence_of(b)) {
        (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes() {
        assert_eq!(normalize("/"), "/");
        assert_eq!(normalize(""), "/");
        assert_eq!(normalize("/a/b/"), "/a/b");
        assert_eq!(normalize("a//b"), "/a/b");
        assert_eq!(normalize("/a/./b/../c"), "/a/c");
        assert_eq!(normalize("/../a"), "/a");
    }

    #[test]
    fn parents_and_names() {
        assert_eq!(parent("/"), None);
        assert_eq!(parent("/a"), Some("/"));
        assert_eq!(parent("/a/b/c"), Some("/a/b"));
        assert_eq!(basename("/a/b/c"), "c");
        assert_eq!(basename("/"), "");
        assert_eq!(join("/", "a"), "/a");
        assert_eq!(join("/a", "b"), "/a/b");
    }

    #[test]
    fn ancestors_shortest_first() {
        assert_eq!(ancestors("/a/b/c"), vec!["/a", "/a/b", "/a/b/c"]);
        assert_eq!(ancestors("a//b/"), vec!["/a", "/a/b"]);
        assert!(ancestors("/").is_empty());
    }

    #[test]
    fn sequence_suffix() {
        assert_eq!(sequence_of("-0000000000"), Some(0));
        assert_eq!(sequence_of("worker-0000000042"), Some(42));
        assert_eq!(sequence_of("leader"), None);
        assert_eq!(sequence_of("x-12345678901"), Some(12_345_678_901));
    }

    #[test]
    fn numeric_not_lexicographic() {
        let mut names = vec![
            "zeta-0000000003".to_string(),
            "alpha-0000000010".to_string(),
            "-0000000001".to_string(),
            "b-10000000000".to_string(),
            "a-9999999999".to_string(),
        ];
        names.sort_by(|a, b| compare_sequence(a, b));
        assert_eq!(
            names,
            vec![
                "-0000000001",
                "zeta-0000000003",
                "alpha-0000000010",
                "a-9999999999",
                "b-10000000000",
            ]
        );
    }
}
