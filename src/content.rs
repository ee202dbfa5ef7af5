// src/content.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
//! Content-type guessing and the gzip allow-list.

use crate::constants::DEFAULT_CONTENT_TYPE;

/// Subtypes (after stripping any `+suffix`) that are worth compressing.
const COMPRESSIBLE_SUBTYPES: [&str; 4] = ["xml", "json", "html", "javascript"];

/// Guess the MIME type of `name` from its extension.
pub fn content_type(name: &str) -> String {
    mime_guess::from_path(name)
        .first()
        .map(|m| m.essence_str().to_string())
        .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string())
}

/// Whether objects of `content_type` should be offered to the compressor.
///
/// True for every `text/*` type, and for types whose subtype (or `+suffix`,
/// e.g. `application/ld+json`) is one of xml, json, html or javascript.
/// Media that is already compressed never qualifies.
pub fn is_compressible(content_type: &str) -> bool {
    let lowered = content_type.to_ascii_lowercase();
    let essence = lowered.split(';').next().unwrap_or_default().trim();
    let Some((family, subtype)) = essence.split_once('/') else {
        return false;
    };
    let subtype = subtype.rsplit('+').next().unwrap_or(subtype);
    family == "text" || COMPRESSIBLE_SUBTYPES.contains(&subtype)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_from_extension() {
        assert_eq!(content_type("foo.txt"), "text/plain");
        assert_eq!(content_type("dir/photo.jpg"), "image/jpeg");
        assert_eq!(content_type("styles/site.css"), "text/css");
        assert_eq!(content_type("data.json"), "application/json");
    }

    #[test]
    fn test_unknown_extension_falls_back() {
        assert_eq!(content_type("blob.unknownext"), DEFAULT_CONTENT_TYPE);
        assert_eq!(content_type("Makefile"), DEFAULT_CONTENT_TYPE);
    }

    #[test]
    fn test_compressible_types() {
        assert!(is_compressible("text/plain"));
        assert!(is_compressible("text/css"));
        assert!(is_compressible("TEXT/HTML"));
        assert!(is_compressible("application/json"));
        assert!(is_compressible("application/ld+json"));
        assert!(is_compressible("image/svg+xml"));
        assert!(is_compressible("application/javascript"));
        assert!(is_compressible("application/xhtml+xml"));
        assert!(is_compressible("text/plain; charset=utf-8"));
    }

    #[test]
    fn test_incompressible_types() {
        assert!(!is_compressible("image/jpeg"));
        assert!(!is_compressible("application/zip"));
        assert!(!is_compressible("application/octet-stream"));
        assert!(!is_compressible("video/mp4"));
        assert!(!is_compressible("garbage"));
    }
}
