//! Path normalization for bundle keys and lookups.

/// Normalize a path for bundle storage and lookup.
///
/// - Strip a `file://` prefix
/// - Replace backslashes with forward slashes
/// - Collapse `.` segments and resolve `..` segments lexically
/// - Strip leading slashes (bundle paths are rooted at the bundle)
///
/// The same normalization is applied when writing and when looking up, so
/// `./assets/tex.png`, `assets/tex.png` and `file:///assets/tex.png` all
/// name the same entry.
pub fn normalize_path(path: &str) -> String {
    let path = path.replace('\\', "/");
    let path = path.strip_prefix("file://").unwrap_or(&path);

    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            _ => segments.push(segment),
        }
    }
    segments.join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_paths_unchanged() {
        assert_eq!(normalize_path("main.js"), "main.js");
        assert_eq!(normalize_path("assets/tex.png"), "assets/tex.png");
    }

    #[test]
    fn test_dot_prefix_collapsed() {
        assert_eq!(normalize_path("./main.js"), "main.js");
        assert_eq!(normalize_path("./assets/./tex.png"), "assets/tex.png");
    }

    #[test]
    fn test_backslashes_and_leading_slash() {
        assert_eq!(normalize_path("assets\\tex.png"), "assets/tex.png");
        assert_eq!(normalize_path("/main.js"), "main.js");
    }

    #[test]
    fn test_file_url_prefix() {
        assert_eq!(normalize_path("file:///main.js"), "main.js");
        assert_eq!(normalize_path("file:///assets/tex.png"), "assets/tex.png");
    }

    #[test]
    fn test_parent_segments_resolved_lexically() {
        assert_eq!(normalize_path("a/b/../c.txt"), "a/c.txt");
        assert_eq!(normalize_path("a/../../b.txt"), "b.txt");
    }

    #[test]
    fn test_empty_results() {
        assert_eq!(normalize_path(""), "");
        assert_eq!(normalize_path("./"), "");
        assert_eq!(normalize_path("a/.."), "");
    }
}
