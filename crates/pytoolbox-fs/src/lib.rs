//! File operations confined to the workspace: read_file, write_file, delete_file,
//! list_directory, create_directory.
//!
//! Every path argument is resolved through [`PathGuard`] before the filesystem is
//! touched, so callers can pass user input straight through.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use pytoolbox_core::{PathGuard, Result, ToolboxError};

/// Entry type in a directory listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    File,
    Directory,
    /// Symlink whose target is missing
    Symlink,
}

/// One row of [`FileOperations::list_directory`].
#[derive(Debug, Clone, Serialize)]
pub struct DirEntryInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    /// Byte size (0 for directories)
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
    /// Path relative to the workspace root
    pub path: PathBuf,
}

/// What a write did, for reporting back to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct WriteOutcome {
    pub path: PathBuf,
    pub bytes: usize,
    pub appended: bool,
}

#[derive(Debug, Clone)]
pub struct FileOperations {
    guard: PathGuard,
}

impl FileOperations {
    pub fn new(guard: PathGuard) -> Self {
        Self { guard }
    }

    pub fn guard(&self) -> &PathGuard {
        &self.guard
    }

    /// Read a UTF-8 file, optionally limited to a 1-based inclusive line range.
    ///
    /// The range is clamped to the file; a start past the end yields an empty string.
    pub fn read_file(
        &self,
        path: &str,
        start_line: Option<usize>,
        end_line: Option<usize>,
    ) -> Result<String> {
        let resolved = self.guard.resolve(path)?;
        if !resolved.is_file() {
            return Err(ToolboxError::NotFound {
                path: PathBuf::from(path),
            });
        }
        if start_line == Some(0) {
            return Err(ToolboxError::invalid_input("start_line is 1-based"));
        }
        if let (Some(start), Some(end)) = (start_line, end_line) {
            if start > end {
                return Err(ToolboxError::invalid_input(format!(
                    "start_line ({}) > end_line ({})",
                    start, end
                )));
            }
        }

        let content = fs::read_to_string(&resolved)
            .map_err(|e| ToolboxError::io(format!("Read file {}", path), e))?;
        tracing::debug!(path = %resolved, bytes = content.len(), "read_file");

        if start_line.is_none() && end_line.is_none() {
            return Ok(content);
        }

        // Keep original line endings so a full-range read equals the file.
        let lines: Vec<&str> = content.split_inclusive('\n').collect();
        let total = lines.len();
        let start = start_line.unwrap_or(1);
        let end = end_line.unwrap_or(total).min(total);
        if start > end {
            return Ok(String::new());
        }
        Ok(lines[start - 1..end].concat())
    }

    /// Write `content`, creating parent directories. Appends instead of truncating when `append`.
    pub fn write_file(&self, path: &str, content: &str, append: bool) -> Result<WriteOutcome> {
        let resolved = self.guard.resolve(path)?;
        if resolved.is_dir() {
            return Err(ToolboxError::invalid_input(format!(
                "{} is a directory",
                path
            )));
        }
        if let Some(parent) = resolved.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                ToolboxError::io(format!("Create directory {}", parent.display()), e)
            })?;
        }

        if append {
            let mut f = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&resolved)
                .map_err(|e| ToolboxError::io(format!("Open {} for append", path), e))?;
            f.write_all(content.as_bytes())
                .map_err(|e| ToolboxError::io(format!("Append to {}", path), e))?;
        } else {
            fs::write(&resolved, content)
                .map_err(|e| ToolboxError::io(format!("Write file {}", path), e))?;
        }

        tracing::info!(path = %resolved, bytes = content.len(), append, "write_file");
        Ok(WriteOutcome {
            path: self.guard.relative(&resolved),
            bytes: content.len(),
            appended: append,
        })
    }

    /// Delete a regular file. Directories are not removed.
    pub fn delete_file(&self, path: &str) -> Result<PathBuf> {
        let resolved = self.guard.resolve(path)?;
        if !resolved.is_file() {
            return Err(ToolboxError::NotFound {
                path: PathBuf::from(path),
            });
        }
        fs::remove_file(&resolved)
            .map_err(|e| ToolboxError::io(format!("Delete file {}", path), e))?;
        tracing::info!(path = %resolved, "delete_file");
        Ok(self.guard.relative(&resolved))
    }

    /// List the immediate children of a directory, sorted by name.
    pub fn list_directory(&self, path: &str) -> Result<Vec<DirEntryInfo>> {
        let resolved = self.guard.resolve(path)?;
        if !resolved.exists() {
            return Err(ToolboxError::NotFound {
                path: PathBuf::from(path),
            });
        }
        if !resolved.is_dir() {
            return Err(ToolboxError::NotADirectory {
                path: PathBuf::from(path),
            });
        }

        let reader = fs::read_dir(&resolved)
            .map_err(|e| ToolboxError::io(format!("List directory {}", path), e))?;
        let rel_base = self.guard.relative(&resolved);

        let mut entries = Vec::new();
        for entry in reader {
            let entry =
                entry.map_err(|e| ToolboxError::io(format!("List directory {}", path), e))?;
            let name = entry.file_name().to_string_lossy().to_string();
            entries.push(describe(&entry.path(), name, &rel_base));
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// Create a directory and any missing parents. Succeeds if it already exists.
    pub fn create_directory(&self, path: &str) -> Result<PathBuf> {
        let resolved = self.guard.resolve(path)?;
        if resolved.exists() && !resolved.is_dir() {
            return Err(ToolboxError::NotADirectory {
                path: PathBuf::from(path),
            });
        }
        fs::create_dir_all(&resolved)
            .map_err(|e| ToolboxError::io(format!("Create directory {}", path), e))?;
        tracing::info!(path = %resolved, "create_directory");
        Ok(self.guard.relative(&resolved))
    }
}

fn describe(full: &Path, name: String, rel_base: &Path) -> DirEntryInfo {
    let rel = if rel_base == Path::new(".") {
        PathBuf::from(&name)
    } else {
        rel_base.join(&name)
    };
    // Follow symlinks for type and size; fall back to the link itself when dangling.
    let (entry_type, meta) = match fs::metadata(full) {
        Ok(m) if m.is_dir() => (EntryType::Directory, Some(m)),
        Ok(m) => (EntryType::File, Some(m)),
        Err(_) => (EntryType::Symlink, fs::symlink_metadata(full).ok()),
    };
    let size = match (&entry_type, &meta) {
        (EntryType::File, Some(m)) => m.len(),
        _ => 0,
    };
    let modified = meta
        .and_then(|m| m.modified().ok())
        .map(DateTime::<Utc>::from);
    DirEntryInfo {
        name,
        entry_type,
        size,
        modified,
        path: rel,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ops() -> (tempfile::TempDir, FileOperations) {
        let tmp = tempfile::tempdir().unwrap();
        let guard = PathGuard::new(tmp.path()).unwrap();
        (tmp, FileOperations::new(guard))
    }

    #[test]
    fn test_write_then_read_whole_and_range() {
        let (_tmp, ops) = ops();
        let out = ops.write_file("pkg/mod.py", "a\nb\nc\nd\n", false).unwrap();
        assert_eq!(out.path, PathBuf::from("pkg").join("mod.py"));
        assert_eq!(out.bytes, 8);

        assert_eq!(ops.read_file("pkg/mod.py", None, None).unwrap(), "a\nb\nc\nd\n");
        assert_eq!(ops.read_file("pkg/mod.py", Some(2), Some(3)).unwrap(), "b\nc\n");
        assert_eq!(ops.read_file("pkg/mod.py", Some(3), None).unwrap(), "c\nd\n");
        assert_eq!(ops.read_file("pkg/mod.py", None, Some(99)).unwrap(), "a\nb\nc\nd\n");
        assert_eq!(ops.read_file("pkg/mod.py", Some(10), None).unwrap(), "");
    }

    #[test]
    fn test_read_invalid_ranges() {
        let (_tmp, ops) = ops();
        ops.write_file("f.txt", "x\n", false).unwrap();
        assert_eq!(
            ops.read_file("f.txt", Some(0), None).unwrap_err().kind(),
            "invalid_input"
        );
        assert_eq!(
            ops.read_file("f.txt", Some(3), Some(2)).unwrap_err().kind(),
            "invalid_input"
        );
        assert_eq!(
            ops.read_file("missing.txt", None, None).unwrap_err().kind(),
            "not_found"
        );
    }

    #[test]
    fn test_append() {
        let (_tmp, ops) = ops();
        ops.write_file("log.txt", "one\n", false).unwrap();
        let out = ops.write_file("log.txt", "two\n", true).unwrap();
        assert!(out.appended);
        assert_eq!(ops.read_file("log.txt", None, None).unwrap(), "one\ntwo\n");
        ops.write_file("log.txt", "fresh", false).unwrap();
        assert_eq!(ops.read_file("log.txt", None, None).unwrap(), "fresh");
    }

    #[test]
    fn test_delete_file_only() {
        let (tmp, ops) = ops();
        ops.write_file("gone.txt", "x", false).unwrap();
        ops.delete_file("gone.txt").unwrap();
        assert!(!tmp.path().join("gone.txt").exists());

        ops.create_directory("dir").unwrap();
        assert_eq!(ops.delete_file("dir").unwrap_err().kind(), "not_found");
        assert!(tmp.path().join("dir").is_dir());
        assert_eq!(ops.delete_file("gone.txt").unwrap_err().kind(), "not_found");
    }

    #[test]
    fn test_list_directory_sorted_with_metadata() {
        let (_tmp, ops) = ops();
        ops.write_file("b.txt", "12345", false).unwrap();
        ops.write_file("a.txt", "1", false).unwrap();
        ops.create_directory("c").unwrap();
        ops.write_file("c/inner.py", "pass\n", false).unwrap();

        let entries = ops.list_directory(".").unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "b.txt", "c"]);
        assert_eq!(entries[1].size, 5);
        assert_eq!(entries[1].entry_type, EntryType::File);
        assert_eq!(entries[2].entry_type, EntryType::Directory);
        assert_eq!(entries[2].size, 0);
        assert!(entries[0].modified.is_some());

        let inner = ops.list_directory("c").unwrap();
        assert_eq!(inner.len(), 1);
        assert_eq!(inner[0].path, PathBuf::from("c").join("inner.py"));

        let json = serde_json::to_value(&inner[0]).unwrap();
        assert_eq!(json["type"], "file");
        assert_eq!(json["name"], "inner.py");
    }

    #[test]
    fn test_list_directory_errors() {
        let (_tmp, ops) = ops();
        ops.write_file("f.txt", "x", false).unwrap();
        assert_eq!(ops.list_directory("f.txt").unwrap_err().kind(), "not_a_directory");
        assert_eq!(ops.list_directory("nope").unwrap_err().kind(), "not_found");
    }

    #[test]
    fn test_create_directory_idempotent() {
        let (tmp, ops) = ops();
        ops.create_directory("a/b/c").unwrap();
        ops.create_directory("a/b/c").unwrap();
        assert!(tmp.path().join("a").join("b").join("c").is_dir());

        ops.write_file("file", "x", false).unwrap();
        assert_eq!(ops.create_directory("file").unwrap_err().kind(), "not_a_directory");
    }

    #[test]
    fn test_every_operation_is_confined() {
        let (_tmp, ops) = ops();
        let kind = "path_violation";
        assert_eq!(ops.read_file("../x", None, None).unwrap_err().kind(), kind);
        assert_eq!(ops.write_file("../x", "y", false).unwrap_err().kind(), kind);
        assert_eq!(ops.delete_file("../x").unwrap_err().kind(), kind);
        assert_eq!(ops.list_directory("..").unwrap_err().kind(), kind);
        assert_eq!(ops.create_directory("../d").unwrap_err().kind(), kind);
    }

    #[cfg(unix)]
    #[test]
    fn test_link_behind_missing_directory_is_confined() {
        let outer = tempfile::tempdir().unwrap();
        let ws = outer.path().join("ws");
        let secret = outer.path().join("secret");
        std::fs::create_dir_all(&ws).unwrap();
        std::fs::create_dir_all(&secret).unwrap();
        std::fs::write(secret.join("key.txt"), "TOP-SECRET").unwrap();
        std::os::unix::fs::symlink("../secret", ws.join("link")).unwrap();
        let ops = FileOperations::new(PathGuard::new(&ws).unwrap());

        let err = ops.read_file("missing/../link/key.txt", None, None).unwrap_err();
        assert_eq!(err.kind(), "path_violation");
        let err = ops.write_file("missing/../link/planted.txt", "x", false).unwrap_err();
        assert_eq!(err.kind(), "path_violation");
        assert!(!secret.join("planted.txt").exists());
    }
}
