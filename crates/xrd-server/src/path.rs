//! Client path resolution.
//!
//! Client paths are normalized textually (no file-system lookups) and joined
//! under the configured root. A path whose `..` segments would climb out of
//! the root cannot be normalized and is refused with `kXR_ArgInvalid`.

use std::path::{Path, PathBuf};

use xrd_proto::{ErrorCode, XrootdError};

/// Resolve a client-supplied path against `root`.
pub fn resolve(root: &Path, client_path: &str) -> Result<PathBuf, XrootdError> {
    let normalized = normalize(client_path).ok_or_else(|| {
        XrootdError::new(
            ErrorCode::ArgInvalid,
            format!("Invalid path: {client_path}"),
        )
    })?;
    Ok(root.join(normalized))
}

/// Collapse `.` and `..` segments. Returns `None` when a `..` escapes the
/// top of the path.
fn normalize(path: &str) -> Option<PathBuf> {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            segment => segments.push(segment),
        }
    }
    Some(segments.iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> PathBuf {
        PathBuf::from("/srv/data")
    }

    #[test]
    fn plain_paths_join_under_root() {
        assert_eq!(resolve(&root(), "/a/b").unwrap(), PathBuf::from("/srv/data/a/b"));
        assert_eq!(resolve(&root(), "a/b").unwrap(), PathBuf::from("/srv/data/a/b"));
    }

    #[test]
    fn dots_collapse() {
        assert_eq!(
            resolve(&root(), "/a/./b/../c").unwrap(),
            PathBuf::from("/srv/data/a/c")
        );
        assert_eq!(resolve(&root(), "/a//b/").unwrap(), PathBuf::from("/srv/data/a/b"));
    }

    #[test]
    fn empty_path_is_the_root() {
        assert_eq!(resolve(&root(), "/").unwrap(), root());
        assert_eq!(resolve(&root(), "").unwrap(), root());
    }

    #[test]
    fn escapes_are_refused() {
        for path in ["/..", "..", "/a/../..", "/../etc/passwd", "a/b/../../.."] {
            let err = resolve(&root(), path).unwrap_err();
            assert_eq!(err.code, ErrorCode::ArgInvalid, "path {path:?}");
        }
    }

    #[test]
    fn climbing_back_inside_is_fine() {
        assert_eq!(
            resolve(&root(), "/a/../b").unwrap(),
            PathBuf::from("/srv/data/b")
        );
    }
}
