// src/key_mapper.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
//! Logical file name → backend object key.
//!
//! Keys are `normalize(join(prefix, name))` with POSIX lexical
//! normalization: `.` segments and repeated slashes collapse, `..` pops the
//! previous segment. Nothing here touches the network.

use url::Url;

/// Resolve a logical name under `prefix` into a canonical object key.
///
/// One leading `/` is stripped from `name` and Windows separators become
/// `/` before joining. An empty result normalizes to `"."`, which callers
/// treat as "the namespace root".
pub fn resolve_key(prefix: &str, name: &str) -> String {
    let name = name.replace('\\', "/");
    let name = name.strip_prefix('/').unwrap_or(&name);
    normalize(&join(prefix, name))
}

/// Listing prefix for a logical directory: `""` for the root, otherwise the
/// resolved key with a trailing `/`.
pub fn list_prefix(prefix: &str, path: &str) -> String {
    let key = resolve_key(prefix, path);
    if key == "." { String::new() } else { format!("{key}/") }
}

/// Entry name relative to a listing prefix, with any trailing `/` removed.
///
/// Used for both object keys and common prefixes returned by a delimited
/// listing.
pub fn relative_name<'a>(key: &'a str, list_prefix: &str) -> &'a str {
    key.strip_prefix(list_prefix).unwrap_or(key).trim_end_matches('/')
}

/// Logical name of an object key found under the namespace prefix.
pub fn name_for_key(prefix: &str, key: &str) -> String {
    let root = list_prefix(prefix, "");
    relative_name(key, &root).to_string()
}

/// Percent-encode each `/`-separated segment of `path` for use inside a URL
/// (copy sources, public URLs). Separators are kept.
pub fn encode_path(path: &str) -> String {
    let Ok(mut url) = Url::parse("s3storage:///") else {
        return path.to_string();
    };
    match url.path_segments_mut() {
        Ok(mut segments) => {
            segments.clear().extend(path.split('/'));
        }
        Err(()) => return path.to_string(),
    }
    url.path().strip_prefix('/').unwrap_or(url.path()).to_string()
}

/// `posixpath.join` for exactly two components.
fn join(base: &str, tail: &str) -> String {
    if tail.starts_with('/') || base.is_empty() {
        tail.to_string()
    } else if base.ends_with('/') {
        format!("{base}{tail}")
    } else {
        format!("{base}/{tail}")
    }
}

/// POSIX lexical path normalization.
pub fn normalize(path: &str) -> String {
    if path.is_empty() {
        return ".".to_string();
    }

    // POSIX keeps exactly two leading slashes, collapses three or more to one.
    let leading = if path.starts_with("//") && !path.starts_with("///") {
        2
    } else if path.starts_with('/') {
        1
    } else {
        0
    };

    let mut parts: Vec<&str> = Vec::new();
    for comp in path.split('/') {
        match comp {
            "" | "." => {}
            ".." => {
                if parts.last().is_some_and(|p| *p != "..") {
                    parts.pop();
                } else if leading == 0 {
                    parts.push("..");
                }
            }
            other => parts.push(other),
        }
    }

    let joined = format!("{}{}", "/".repeat(leading), parts.join("/"));
    if joined.is_empty() { ".".to_string() } else { joined }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leading_slash_is_ignored() {
        assert_eq!(resolve_key("", "/foo.txt"), "foo.txt");
        assert_eq!(resolve_key("", "foo.txt"), "foo.txt");
        assert_eq!(resolve_key("media", "/foo.txt"), "media/foo.txt");
    }

    #[test]
    fn test_dot_segments_resolve() {
        assert_eq!(
            resolve_key("", "admin/css/../img/sorting-icons.svg"),
            resolve_key("", "admin/img/sorting-icons.svg"),
        );
        assert_eq!(resolve_key("static/", "./a//b/./c.js"), "static/a/b/c.js");
    }

    #[test]
    fn test_windows_separators() {
        assert_eq!(resolve_key("p", "dir\\sub\\file.css"), "p/dir/sub/file.css");
    }

    #[test]
    fn test_escape_above_root_is_lexical() {
        assert_eq!(resolve_key("", "../x"), "../x");
        assert_eq!(resolve_key("media", "../x"), "x");
        assert_eq!(resolve_key("media", "../../x"), "../x");
        assert_eq!(normalize("/../x"), "/x");
    }

    #[test]
    fn test_empty_name_is_root() {
        assert_eq!(resolve_key("", ""), ".");
        assert_eq!(resolve_key("", "/"), ".");
        assert_eq!(list_prefix("", ""), "");
        assert_eq!(list_prefix("", "/bar"), "bar/");
        assert_eq!(list_prefix("", "bar/"), "bar/");
        assert_eq!(list_prefix("media", ""), "media/");
    }

    #[test]
    fn test_posix_double_slash() {
        assert_eq!(normalize("//a/b"), "//a/b");
        assert_eq!(normalize("///a/b"), "/a/b");
    }

    #[test]
    fn test_encode_path() {
        assert_eq!(encode_path("dir/a b.txt"), "dir/a%20b.txt");
        assert_eq!(encode_path("q?x#y.css"), "q%3Fx%23y.css");
        assert_eq!(encode_path("plain/key.js"), "plain/key.js");
    }

    #[test]
    fn test_relative_names() {
        assert_eq!(relative_name("bar/baz.txt", "bar/"), "baz.txt");
        assert_eq!(relative_name("bar/sub/", "bar/"), "sub");
        assert_eq!(name_for_key("media", "media/a/b.txt"), "a/b.txt");
        assert_eq!(name_for_key("", "a/b.txt"), "a/b.txt");
    }
}
