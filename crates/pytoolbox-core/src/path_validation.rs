//! Path validation.
//!
//! Keeps every path an operation touches inside the workspace root. The
//! containment check runs after `.`/`..` and symlinks are resolved, so a
//! symlink inside the workspace that points elsewhere is rejected like a
//! plain `../` traversal.

use std::ffi::OsString;
use std::fmt;
use std::ops::Deref;
use std::path::{Component, Path, PathBuf};

use crate::error::{Result, ToolboxError};
use crate::observability;

/// Limit on symlink hops while resolving one path.
const MAX_SYMLINK_HOPS: usize = 40;

/// An absolute path proven to lie under the workspace root.
///
/// Only [`PathGuard::resolve`] constructs it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolvedPath(PathBuf);

impl ResolvedPath {
    pub fn as_path(&self) -> &Path {
        &self.0
    }

}

impl Deref for ResolvedPath {
    type Target = Path;

    fn deref(&self) -> &Path {
        &self.0
    }
}

impl AsRef<Path> for ResolvedPath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for ResolvedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.display().fmt(f)
    }
}

/// Resolves caller-supplied paths against an immutable workspace root.
#[derive(Debug, Clone)]
pub struct PathGuard {
    root: PathBuf,
}

impl PathGuard {
    /// Canonicalize `root` and build a guard for it. The root must be an existing directory.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let canonical = root.canonicalize().map_err(|e| {
            ToolboxError::io(format!("Invalid workspace root {}", root.display()), e)
        })?;
        if !canonical.is_dir() {
            return Err(ToolboxError::NotADirectory { path: canonical });
        }
        Ok(Self { root: canonical })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `path` (relative to the root, or absolute) and prove it stays inside the root.
    ///
    /// The target does not need to exist; existing prefixes are canonicalized and
    /// the remaining components are applied lexically.
    pub fn resolve(&self, path: impl AsRef<Path>) -> Result<ResolvedPath> {
        let input = path.as_ref();
        let joined = if input.is_absolute() {
            input.to_path_buf()
        } else {
            self.root.join(input)
        };

        let resolved = resolve_components(&joined).map_err(|e| {
            ToolboxError::io(format!("Resolve path {}", input.display()), e)
        })?;

        if !resolved.starts_with(&self.root) {
            observability::security_path_violation(
                &input.display().to_string(),
                &resolved.display().to_string(),
                &self.root.display().to_string(),
            );
            return Err(ToolboxError::PathViolation {
                path: input.display().to_string(),
                root: self.root.clone(),
            });
        }
        Ok(ResolvedPath(resolved))
    }

    /// Render a resolved path relative to the root (`.` for the root itself).
    pub fn relative(&self, path: &ResolvedPath) -> PathBuf {
        match path.strip_prefix(&self.root) {
            Ok(rel) if rel.as_os_str().is_empty() => PathBuf::from("."),
            Ok(rel) => rel.to_path_buf(),
            Err(_) => path.to_path_buf(),
        }
    }
}

/// Walk `path` component by component, following symlinks like the OS would.
///
/// `current` is always canonical while it exists on disk. Below a missing
/// component the walk is lexical; a `..` that climbs back to an existing
/// directory re-enables symlink resolution.
fn resolve_components(path: &Path) -> std::io::Result<PathBuf> {
    let mut pending: Vec<OsString> = Vec::new();
    let mut current = PathBuf::new();
    let mut exists = true;
    let mut hops = 0usize;

    push_components(&mut pending, path, &mut current);
    current = current.canonicalize().unwrap_or(current);

    while let Some(part) = pending.pop() {
        if part == "." {
            continue;
        }
        if part == ".." {
            current.pop();
            exists = std::fs::symlink_metadata(&current).is_ok();
            continue;
        }
        let candidate = current.join(&part);
        if !exists {
            current = candidate;
            continue;
        }
        match std::fs::symlink_metadata(&candidate) {
            Ok(meta) if meta.file_type().is_symlink() => {
                hops += 1;
                if hops > MAX_SYMLINK_HOPS {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::Other,
                        "too many levels of symbolic links",
                    ));
                }
                let target = std::fs::read_link(&candidate)?;
                if target.is_absolute() {
                    current = PathBuf::new();
                }
                // Re-walk the link target before the remaining components.
                let mut target_parts = Vec::new();
                push_components(&mut target_parts, &target, &mut current);
                if target.is_absolute() {
                    current = current.canonicalize().unwrap_or(current);
                }
                pending.extend(target_parts);
            }
            Ok(_) => {
                current = candidate;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                exists = false;
                current = candidate;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(current)
}

// Components are consumed from the back of `pending`, so they are pushed reversed.
// Root and prefix components reset `current` instead of being queued.
fn push_components(pending: &mut Vec<OsString>, p: &Path, current: &mut PathBuf) {
    let mut normal = Vec::new();
    for c in p.components() {
        match c {
            Component::Prefix(_) | Component::RootDir => {
                current.push(c.as_os_str());
                normal.clear();
            }
            other => normal.push(other.as_os_str().to_os_string()),
        }
    }
    pending.extend(normal.into_iter().rev());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard() -> (tempfile::TempDir, PathGuard) {
        let tmp = tempfile::tempdir().unwrap();
        let ws = tmp.path().join("ws");
        std::fs::create_dir_all(ws.join("src")).unwrap();
        std::fs::write(ws.join("src").join("main.py"), "print(1)\n").unwrap();
        let guard = PathGuard::new(&ws).unwrap();
        (tmp, guard)
    }

    #[test]
    fn test_inside_paths_resolve_to_canonical_form() {
        let (_tmp, g) = guard();
        let p = g.resolve("src/main.py").unwrap();
        assert_eq!(
            p.as_path(),
            g.root().join("src").join("main.py").canonicalize().unwrap()
        );

        let p = g.resolve("./src/../src/main.py").unwrap();
        assert_eq!(p.as_path(), g.root().join("src").join("main.py"));

        let p = g.resolve(".").unwrap();
        assert_eq!(p.as_path(), g.root());
    }

    #[test]
    fn test_nonexistent_target_inside_root() {
        let (_tmp, g) = guard();
        let p = g.resolve("new/dir/file.txt").unwrap();
        assert_eq!(p.as_path(), g.root().join("new").join("dir").join("file.txt"));
        let p = g.resolve("new/../other.txt").unwrap();
        assert_eq!(p.as_path(), g.root().join("other.txt"));
    }

    #[test]
    fn test_parent_traversal_rejected() {
        let (_tmp, g) = guard();
        for p in ["..", "../outside.txt", "src/../../outside.txt", "a/b/../../../x"] {
            let err = g.resolve(p).unwrap_err();
            assert!(
                matches!(err, ToolboxError::PathViolation { .. }),
                "{} should be rejected, got {:?}",
                p,
                err
            );
        }
    }

    #[test]
    fn test_absolute_paths() {
        let (tmp, g) = guard();
        let inside = g.root().join("src").join("main.py");
        assert!(g.resolve(&inside).is_ok());

        let outside = tmp.path().join("elsewhere.txt");
        assert!(matches!(
            g.resolve(&outside),
            Err(ToolboxError::PathViolation { .. })
        ));

        // Absolute path that dips into the root and climbs back out.
        let sneaky = g.root().join("src").join("..").join("..").join("elsewhere.txt");
        assert!(matches!(
            g.resolve(&sneaky),
            Err(ToolboxError::PathViolation { .. })
        ));
    }

    #[test]
    fn test_sibling_with_common_prefix_rejected() {
        let (tmp, g) = guard();
        std::fs::create_dir_all(tmp.path().join("ws-evil")).unwrap();
        assert!(matches!(
            g.resolve("../ws-evil/x"),
            Err(ToolboxError::PathViolation { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_escape_rejected() {
        let (tmp, g) = guard();
        let outside = tmp.path().join("secret");
        std::fs::create_dir_all(&outside).unwrap();
        std::fs::write(outside.join("key.txt"), "x").unwrap();
        std::os::unix::fs::symlink(&outside, g.root().join("link")).unwrap();

        assert!(matches!(
            g.resolve("link/key.txt"),
            Err(ToolboxError::PathViolation { .. })
        ));
        assert!(matches!(
            g.resolve("link/new-file.txt"),
            Err(ToolboxError::PathViolation { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_missing_then_parent_then_symlink_rejected() {
        let (tmp, g) = guard();
        let outside = tmp.path().join("secret");
        std::fs::create_dir_all(&outside).unwrap();
        std::fs::write(outside.join("key.txt"), "x").unwrap();
        std::os::unix::fs::symlink("../secret", g.root().join("link")).unwrap();

        // Existing file behind the link.
        for p in ["missing/../link/key.txt", "missing/deeper/../../link/key.txt"] {
            assert!(
                matches!(g.resolve(p), Err(ToolboxError::PathViolation { .. })),
                "{} should be rejected",
                p
            );
        }
        // New file behind the link.
        assert!(matches!(
            g.resolve("missing/../link/planted.txt"),
            Err(ToolboxError::PathViolation { .. })
        ));

        // Climbing out of a missing directory still resolves in-root links.
        std::os::unix::fs::symlink(g.root().join("src"), g.root().join("alias")).unwrap();
        let p = g.resolve("missing/../alias/main.py").unwrap();
        assert_eq!(p.as_path(), g.root().join("src").join("main.py"));
    }

    #[cfg(unix)]
    #[test]
    fn test_dangling_symlink_escape_rejected() {
        let (tmp, g) = guard();
        let target = tmp.path().join("not-yet-created.txt");
        std::os::unix::fs::symlink(&target, g.root().join("dangling")).unwrap();
        assert!(matches!(
            g.resolve("dangling"),
            Err(ToolboxError::PathViolation { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_inside_root_allowed() {
        let (_tmp, g) = guard();
        std::os::unix::fs::symlink(g.root().join("src"), g.root().join("alias")).unwrap();
        let p = g.resolve("alias/main.py").unwrap();
        assert_eq!(p.as_path(), g.root().join("src").join("main.py"));

        // Relative link whose `..` is applied after following the link.
        std::fs::create_dir_all(g.root().join("deep").join("er")).unwrap();
        std::os::unix::fs::symlink("../../src", g.root().join("deep").join("er").join("up"))
            .unwrap();
        let p = g.resolve("deep/er/up/main.py").unwrap();
        assert_eq!(p.as_path(), g.root().join("src").join("main.py"));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_loop_is_io_error() {
        let (_tmp, g) = guard();
        std::os::unix::fs::symlink("b", g.root().join("a")).unwrap();
        std::os::unix::fs::symlink("a", g.root().join("b")).unwrap();
        assert!(matches!(g.resolve("a"), Err(ToolboxError::Io { .. })));
    }

    #[test]
    fn test_relative_rendering() {
        let (_tmp, g) = guard();
        let p = g.resolve("src/main.py").unwrap();
        assert_eq!(g.relative(&p), PathBuf::from("src").join("main.py"));
        let root = g.resolve("").unwrap();
        assert_eq!(g.relative(&root), PathBuf::from("."));
    }

    #[test]
    fn test_root_must_exist() {
        let tmp = tempfile::tempdir().unwrap();
        let err = PathGuard::new(tmp.path().join("missing")).unwrap_err();
        assert_eq!(err.kind(), "io_failure");
    }
}
