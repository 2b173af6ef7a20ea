//! Bounds and grammar for everything callers hand us. All mutations and
//! reads go through these before any SQL runs.

use super::error::{ErrorCode, Result, ServiceError};

pub const MAX_PROJECT_CHARS: usize = 128;
pub const MAX_PATH_CHARS: usize = 512;

/// Project names are a flat namespace: trimmed, non-empty, bounded, and
/// restricted to `[A-Za-z0-9._-]`. Returns the trimmed form.
pub fn validate_project(project: &str) -> Result<String> {
    let trimmed = project.trim();
    if trimmed.is_empty() {
        return Err(ServiceError::invalid_query("project must not be empty"));
    }
    if trimmed.len() > MAX_PROJECT_CHARS {
        return Err(ServiceError::invalid_query("project name too long"));
    }
    if !trimmed
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'))
    {
        return Err(ServiceError::invalid_query(
            "project may only contain letters, digits, '.', '_' and '-'",
        ));
    }
    Ok(trimmed.to_owned())
}

/// Paths are either empty (the project root) or absolute slash-separated
/// names with no empty, `.` or `..` segments and a restricted byte set.
pub fn validate_path(path: &str) -> Result<()> {
    if path.is_empty() {
        return Ok(());
    }
    if path.len() > MAX_PATH_CHARS {
        return Err(ServiceError::invalid_path("path too long"));
    }
    if !path.starts_with('/') {
        return Err(ServiceError::invalid_path("path must start with '/'"));
    }
    if path.ends_with('/') {
        return Err(ServiceError::invalid_path("path must not end with '/'"));
    }
    if !path
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'/' | b'-'))
    {
        return Err(ServiceError::invalid_path(
            "path may only contain letters, digits, '.', '_', '/' and '-'",
        ));
    }
    for segment in path[1..].split('/') {
        if segment.is_empty() {
            return Err(ServiceError::invalid_path("path must not contain '//'"));
        }
        if segment == "." || segment == ".." {
            return Err(ServiceError::invalid_path(
                "path must not contain '.' or '..' segments",
            ));
        }
    }
    Ok(())
}

/// Only utf-8 is supported; the empty string means utf-8.
pub fn validate_encoding(content_encoding: &str) -> Result<()> {
    if content_encoding.is_empty() || content_encoding.eq_ignore_ascii_case("utf-8") {
        Ok(())
    } else {
        Err(ServiceError::invalid_query(format!(
            "unsupported content encoding: {content_encoding}"
        )))
    }
}

pub fn validate_payload_size(len: usize, max_payload_bytes: u64) -> Result<()> {
    if len as u64 > max_payload_bytes {
        return Err(ServiceError::new(
            ErrorCode::PayloadTooLarge,
            "payload exceeds the per-request limit",
        ));
    }
    Ok(())
}

/// All strict ancestors of a path: "/a/b/c" -> ["/a", "/a/b"].
pub fn ancestor_paths(path: &str) -> Vec<String> {
    let mut ancestors = Vec::new();
    for (idx, byte) in path.bytes().enumerate().skip(1) {
        if byte == b'/' {
            ancestors.push(path[..idx].to_owned());
        }
    }
    ancestors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_grammar() {
        assert_eq!(validate_project("  blog-api  ").unwrap(), "blog-api");
        assert_eq!(validate_project("a.b_c-1").unwrap(), "a.b_c-1");
        assert!(validate_project("").is_err());
        assert!(validate_project("   ").is_err());
        assert!(validate_project("has space").is_err());
        assert!(validate_project("slash/es").is_err());
        assert!(validate_project(&"x".repeat(129)).is_err());
    }

    #[test]
    fn path_grammar() {
        assert!(validate_path("").is_ok());
        assert!(validate_path("/a.txt").is_ok());
        assert!(validate_path("/dir/sub/file_name-1.md").is_ok());
        assert!(validate_path("relative").is_err());
        assert!(validate_path("/trailing/").is_err());
        assert!(validate_path("/dou//ble").is_err());
        assert!(validate_path("/a/./b").is_err());
        assert!(validate_path("/a/../b").is_err());
        assert!(validate_path("/with space").is_err());
        assert!(validate_path("/tab\there").is_err());
        assert!(validate_path(&format!("/{}", "x".repeat(MAX_PATH_CHARS))).is_err());
    }

    #[test]
    fn dotted_names_are_files_not_traversal() {
        assert!(validate_path("/notes.d/.gitignore").is_ok());
        assert!(validate_path("/a/...").is_ok());
    }

    #[test]
    fn encodings() {
        assert!(validate_encoding("").is_ok());
        assert!(validate_encoding("utf-8").is_ok());
        assert!(validate_encoding("UTF-8").is_ok());
        assert!(validate_encoding("latin-1").is_err());
    }

    #[test]
    fn ancestors() {
        assert!(ancestor_paths("/a.txt").is_empty());
        assert_eq!(ancestor_paths("/a/b/c"), vec!["/a", "/a/b"]);
    }
}
