//! Entry name handling: sanitizing, extraction paths and codepages.

use encoding_rs::{Encoding, UTF_8};
use oxizip_core::{OxiZipError, Result};
use std::borrow::Cow;
use std::path::{Component, Path, PathBuf};

/// Characters that cannot appear in a stored entry name.
const INVALID_CHARS: &[char] = &['<', '>', ':', '"', '|', '?', '*'];

/// Normalize a caller-supplied entry name.
///
/// Leading separators are stripped and `\` becomes `/`. Drive letters and
/// rooted paths are rejected, `.` segments are dropped and `..` pops the
/// previous segment; a `..` with nothing to pop is a traversal error. The
/// result has no leading or trailing `/`.
pub fn sanitize_entry_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(OxiZipError::invalid_name(name, "name is empty"));
    }

    let work = trimmed
        .trim_start_matches(['/', '\\'])
        .replace('\\', "/");

    let bytes = work.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        return Err(OxiZipError::invalid_name(name, "drive letters are not allowed"));
    }

    let mut stack: Vec<&str> = Vec::new();
    for part in work.split('/').filter(|part| !part.is_empty()) {
        match part {
            "." => {}
            ".." => {
                if stack.pop().is_none() {
                    return Err(OxiZipError::path_traversal(name));
                }
            }
            _ => {
                if part.chars().any(|c| c.is_control() || INVALID_CHARS.contains(&c)) {
                    return Err(OxiZipError::invalid_name(name, "name contains invalid characters"));
                }
                stack.push(part);
            }
        }
    }

    if stack.is_empty() {
        return Err(OxiZipError::invalid_name(name, "name has no path segments"));
    }
    Ok(stack.join("/"))
}

/// Every parent directory of a sanitized name, outermost first, each with a
/// trailing `/`. `a/b/c.txt` yields `a/` and `a/b/`.
pub fn parent_directories(name: &str) -> Vec<String> {
    name.match_indices('/')
        .map(|(index, _)| format!("{}/", &name[..index]))
        .collect()
}

/// Resolve an entry name below `base` for extraction.
///
/// Fails with [`OxiZipError::PathTraversal`] if the name is absolute or any
/// segment would leave `base`.
pub fn safe_extract_path(base: &Path, entry_name: &str) -> Result<PathBuf> {
    let normalized = entry_name.replace('\\', "/");
    let relative = Path::new(normalized.trim_end_matches('/'));

    let mut out = base.to_path_buf();
    let mut depth = 0usize;
    for component in relative.components() {
        match component {
            Component::Normal(part) => {
                out.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return Err(OxiZipError::path_traversal(entry_name));
                }
                out.pop();
                depth -= 1;
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(OxiZipError::path_traversal(entry_name));
            }
        }
    }
    if depth == 0 {
        return Err(OxiZipError::path_traversal(entry_name));
    }
    Ok(out)
}

/// Look up an encoding by WHATWG label (`"utf-8"`, `"shift_jis"`, `"cp437"`...).
pub fn encoding_for_label(label: &str) -> Result<&'static Encoding> {
    Encoding::for_label(label.as_bytes())
        .ok_or_else(|| OxiZipError::invalid_option(format!("unknown encoding {:?}", label)))
}

/// True if `encoding` stores names as UTF-8.
pub fn is_utf8(encoding: &'static Encoding) -> bool {
    encoding == UTF_8
}

/// Encode a name into header bytes. Unmappable characters become numeric
/// character references, as `encoding_rs` does.
pub fn encode_name<'a>(name: &'a str, encoding: &'static Encoding) -> Cow<'a, [u8]> {
    let (bytes, _, _) = encoding.encode(name);
    bytes
}

/// Decode raw header bytes into a name.
pub fn decode_name<'a>(raw: &'a [u8], encoding: &'static Encoding) -> Cow<'a, str> {
    let (text, _, _) = encoding.decode(raw);
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_normalizes() {
        assert_eq!(sanitize_entry_name("  a/b.txt ").unwrap(), "a/b.txt");
        assert_eq!(sanitize_entry_name("\\dir\\sub\\f.txt").unwrap(), "dir/sub/f.txt");
        assert_eq!(sanitize_entry_name("//x//y/").unwrap(), "x/y");
        assert_eq!(sanitize_entry_name("a/./b/../c").unwrap(), "a/c");
    }

    #[test]
    fn test_sanitize_rejects_traversal() {
        let err = sanitize_entry_name("../etc/passwd").unwrap_err();
        assert!(matches!(err, OxiZipError::PathTraversal { .. }));
        assert!(sanitize_entry_name("a/../../b").is_err());
    }

    #[test]
    fn test_sanitize_rejects_drive_and_chars() {
        assert!(matches!(
            sanitize_entry_name("C:\\windows\\x").unwrap_err(),
            OxiZipError::InvalidEntryName { .. }
        ));
        assert!(sanitize_entry_name("what?.txt").is_err());
        assert!(sanitize_entry_name("a\u{1}b").is_err());
        assert!(sanitize_entry_name("   ").is_err());
        assert!(sanitize_entry_name("/./").is_err());
    }

    #[test]
    fn test_parent_directories() {
        assert_eq!(parent_directories("a/b/c.txt"), vec!["a/", "a/b/"]);
        assert!(parent_directories("file.txt").is_empty());
    }

    #[test]
    fn test_safe_extract_path() {
        let base = Path::new("/out");
        assert_eq!(
            safe_extract_path(base, "dir/file.txt").unwrap(),
            Path::new("/out/dir/file.txt")
        );
        assert_eq!(safe_extract_path(base, "dir/").unwrap(), Path::new("/out/dir"));
        assert!(safe_extract_path(base, "../evil").is_err());
        assert!(safe_extract_path(base, "a/../../evil").is_err());
        assert!(safe_extract_path(base, "/etc/passwd").is_err());
        assert!(safe_extract_path(base, "").is_err());
    }

    #[test]
    fn test_codepage_roundtrip() {
        let sjis = encoding_for_label("shift_jis").unwrap();
        let raw = encode_name("日本語.txt", sjis);
        assert_ne!(raw.as_ref(), "日本語.txt".as_bytes());
        assert_eq!(decode_name(&raw, sjis), "日本語.txt");
        assert!(is_utf8(encoding_for_label("utf8").unwrap()));
        assert!(encoding_for_label("no-such-encoding").is_err());
    }
}
