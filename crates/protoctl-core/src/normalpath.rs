//! Helpers for `/`-separated, bucket-relative paths.
//!
//! Bucket paths are always relative, never contain `.` or `..` components and
//! never end in a separator. The root of a bucket is spelled `.`.

use crate::error::{Error, Result};
use std::path::{Component, Path, PathBuf};

/// Cleans a relative path: collapses separators, resolves `.` and `..`.
///
/// A path that climbs above its start keeps its leading `..` components; use
/// [`normalize_and_validate`] to reject those.
pub fn normalize(path: &str) -> String {
    let path = path.replace('\\', "/");
    let absolute = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if matches!(parts.last(), Some(last) if *last != "..") {
                    parts.pop();
                } else if !absolute {
                    parts.push("..");
                }
            }
            other => parts.push(other),
        }
    }
    let joined = parts.join("/");
    if absolute {
        format!("/{}", joined)
    } else if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}

/// Normalizes a path and requires it to be relative and contained
pub fn normalize_and_validate(path: &str) -> Result<String> {
    let normalized = normalize(path);
    if normalized.starts_with('/') {
        return Err(Error::malformed_input(path, "expected a relative path"));
    }
    if normalized == ".." || normalized.starts_with("../") {
        return Err(Error::PathOutsideRoot {
            path: path.to_string(),
            root: ".".to_string(),
        });
    }
    Ok(normalized)
}

/// Joins two bucket paths
pub fn join(base: &str, path: &str) -> String {
    if base.is_empty() || base == "." {
        return normalize(path);
    }
    normalize(&format!("{}/{}", base, path))
}

/// Returns true if `child` equals `parent` or lies beneath it
pub fn is_equal_or_contains(parent: &str, child: &str) -> bool {
    if parent == "." || parent.is_empty() {
        return true;
    }
    child == parent
        || (child.len() > parent.len()
            && child.starts_with(parent)
            && child.as_bytes()[parent.len()] == b'/')
}

/// Returns `child` relative to `parent`, if it lies beneath it
pub fn strip_dir<'a>(parent: &str, child: &'a str) -> Option<&'a str> {
    if parent == "." || parent.is_empty() {
        return Some(child);
    }
    if child == parent {
        return Some(".");
    }
    child
        .strip_prefix(parent)
        .and_then(|rest| rest.strip_prefix('/'))
}

/// The directory part of a bucket path (`.` for top-level files)
pub fn dir(path: &str) -> String {
    match path.rfind('/') {
        Some(idx) => path[..idx].to_string(),
        None => ".".to_string(),
    }
}

/// The final component of a bucket path
pub fn base(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// The extension of a path including the dot, or an empty string
pub fn ext(path: &str) -> &str {
    let base = base(path);
    match base.rfind('.') {
        Some(idx) if idx > 0 => &base[idx..],
        _ => "",
    }
}

/// Lexically cleans a filesystem path without touching the disk
pub fn clean_os_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Converts `target` into a bucket path relative to `root`.
///
/// Both paths are resolved against `cwd` first. Fails if `target` does not lie
/// within `root`.
pub fn rel_to_root(cwd: &Path, root: &Path, target: &Path) -> Result<String> {
    let root = clean_os_path(&cwd.join(root));
    let target = clean_os_path(&cwd.join(target));
    let relative = target
        .strip_prefix(&root)
        .map_err(|_| Error::PathOutsideRoot {
            path: target.display().to_string(),
            root: root.display().to_string(),
        })?;
    let joined = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/");
    Ok(normalize(&joined))
}
