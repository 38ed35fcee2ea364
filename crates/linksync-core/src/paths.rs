//! Path helpers for root-relative, forward-slash keys.
//!
//! Every path stored in the reference graph or the watcher snapshot is
//! expressed relative to the watched root with `/` separators, regardless of
//! platform. Destinations written inside notes may additionally be
//! percent-encoded; the decoded form is what gets joined and compared.

use std::path::Path;

use percent_encoding::percent_decode_str;

/// Converts a platform-native path into a forward-slash string.
pub fn to_slash(path: &Path) -> String {
    let s = path.to_string_lossy();
    if std::path::MAIN_SEPARATOR == '\\' {
        s.replace('\\', "/")
    } else {
        s.into_owned()
    }
}

/// Collapses `.` and `..` segments lexically, without touching the file
/// system. An empty result becomes `.`.
pub fn normalize(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut out: Vec<&str> = Vec::new();
    for seg in path.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                if out.last().is_some_and(|s| *s != "..") {
                    out.pop();
                } else if !absolute {
                    out.push("..");
                }
            }
            _ => out.push(seg),
        }
    }
    let joined = out.join("/");
    if absolute {
        format!("/{joined}")
    } else if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}

/// Joins a directory and a relative path, normalizing the result.
pub fn join(dir: &str, rel: &str) -> String {
    if dir.is_empty() || dir == "." {
        return normalize(rel);
    }
    normalize(&format!("{dir}/{rel}"))
}

/// Returns the directory portion of a slash path, `""` for bare file names.
pub fn parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(i) => &path[..i],
        None => "",
    }
}

/// Computes the relative path from `from_dir` to `to`.
///
/// Both arguments must already be root-relative and normalized.
pub fn relative_to(from_dir: &str, to: &str) -> String {
    let from: Vec<&str> = from_dir
        .split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .collect();
    let to_parts: Vec<&str> = to
        .split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .collect();
    let common = from
        .iter()
        .zip(&to_parts)
        .take_while(|(a, b)| a == b)
        .count();
    let mut parts: Vec<&str> = Vec::new();
    for _ in common..from.len() {
        parts.push("..");
    }
    parts.extend(&to_parts[common..]);
    if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}

/// Percent-decodes a destination. Undecodable input is returned verbatim.
pub fn percent_decode(path: &str) -> String {
    match percent_decode_str(path).decode_utf8() {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => path.to_string(),
    }
}

/// Re-encodes spaces when writing a destination back into a note.
/// Other characters pass through unchanged.
pub fn encode_spaces(path: &str) -> String {
    path.replace(' ', "%20")
}

pub fn is_absolute(path: &str) -> bool {
    path.starts_with('/') || Path::new(path).is_absolute()
}
