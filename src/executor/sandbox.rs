// Path confinement under the base directory

use crate::executor::{ExecutorError, Result};
use std::path::{Component, Path, PathBuf};

/// Resolve `relative` against `base` without touching the filesystem.
///
/// `.` and `..` are folded lexically. The result must stay within `base`;
/// an absolute `relative` is accepted only if it already lies inside `base`.
pub fn resolve_within(base: &Path, relative: &str) -> Result<PathBuf> {
    let base = normalize(base);
    let joined = normalize(&base.join(relative));

    if joined.starts_with(&base) {
        Ok(joined)
    } else {
        Err(ExecutorError::PathEscape(relative.to_string()))
    }
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                // Popping past the root is a no-op, same as the kernel
                if !out.pop() && !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other),
        }
    }
    out
}
