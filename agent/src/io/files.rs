//! Workspace file access used by file steps and code generation.
//!
//! Every operation is total: failures come back as `false`/`None`/empty and
//! are logged at `warn`. Relative paths resolve against the workspace root.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct FileAccess {
    root: PathBuf,
}

impl FileAccess {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn resolve(&self, path: &str) -> PathBuf {
        let candidate = Path::new(path);
        if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.root.join(candidate)
        }
    }

    /// Write `content` to `path`, creating parent directories.
    pub fn create(&self, path: &str, content: &str) -> bool {
        match self.write(path, content) {
            Ok(()) => true,
            Err(err) => {
                warn!(path, err = %format!("{err:#}"), "create file failed");
                false
            }
        }
    }

    /// Replace the full contents of `path`.
    pub fn modify(&self, path: &str, content: &str) -> bool {
        match self.write(path, content) {
            Ok(()) => true,
            Err(err) => {
                warn!(path, err = %format!("{err:#}"), "modify file failed");
                false
            }
        }
    }

    /// Same as [`FileAccess::create`] but keeps the error for the caller.
    pub fn write(&self, path: &str, content: &str) -> Result<()> {
        let full = self.resolve(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        fs::write(&full, content).with_context(|| format!("write {}", full.display()))?;
        debug!(path = %full.display(), bytes = content.len(), "file written");
        Ok(())
    }

    pub fn read(&self, path: &str) -> Option<String> {
        let full = self.resolve(path);
        match fs::read_to_string(&full) {
            Ok(contents) => Some(contents),
            Err(err) => {
                warn!(path = %full.display(), err = %err, "read file failed");
                None
            }
        }
    }

    pub fn exists(&self, path: &str) -> bool {
        self.resolve(path).exists()
    }

    pub fn delete(&self, path: &str) -> bool {
        let full = self.resolve(path);
        match fs::remove_file(&full) {
            Ok(()) => true,
            Err(err) => {
                warn!(path = %full.display(), err = %err, "delete file failed");
                false
            }
        }
    }

    /// Entries directly under `dir` whose names match `pattern` (default `*`),
    /// as paths joined onto `dir`, sorted.
    pub fn list(&self, dir: &str, pattern: Option<&str>) -> Vec<String> {
        let pattern = match glob::Pattern::new(pattern.unwrap_or("*")) {
            Ok(p) => p,
            Err(err) => {
                warn!(dir, err = %err, "invalid list pattern");
                return Vec::new();
            }
        };
        let full = self.resolve(dir);
        let entries = match fs::read_dir(&full) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(path = %full.display(), err = %err, "list directory failed");
                return Vec::new();
            }
        };
        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| pattern.matches(name))
            .map(|name| Path::new(dir).join(name).to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_makes_parents_and_read_returns_content() {
        let temp = tempfile::tempdir().expect("tempdir");
        let files = FileAccess::new(temp.path());
        assert!(files.create("src/app/main.py", "print('hi')\n"));
        assert_eq!(
            files.read("src/app/main.py").as_deref(),
            Some("print('hi')\n")
        );
    }

    #[test]
    fn modify_replaces_full_content() {
        let temp = tempfile::tempdir().expect("tempdir");
        let files = FileAccess::new(temp.path());
        assert!(files.create("a.txt", "one\ntwo\n"));
        assert!(files.modify("a.txt", "three"));
        assert_eq!(files.read("a.txt").as_deref(), Some("three"));
    }

    #[test]
    fn missing_file_reads_none_and_delete_is_false() {
        let temp = tempfile::tempdir().expect("tempdir");
        let files = FileAccess::new(temp.path());
        assert_eq!(files.read("nope.txt"), None);
        assert!(!files.exists("nope.txt"));
        assert!(!files.delete("nope.txt"));
    }

    #[test]
    fn list_filters_by_pattern() {
        let temp = tempfile::tempdir().expect("tempdir");
        let files = FileAccess::new(temp.path());
        files.create("pkg/b.py", "");
        files.create("pkg/a.py", "");
        files.create("pkg/notes.md", "");

        assert_eq!(files.list("pkg", Some("*.py")), vec!["pkg/a.py", "pkg/b.py"]);
        assert_eq!(files.list("pkg", None).len(), 3);
        assert!(files.list("missing", None).is_empty());
    }

    #[test]
    fn delete_removes_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let files = FileAccess::new(temp.path());
        files.create("gone.txt", "x");
        assert!(files.delete("gone.txt"));
        assert!(!files.exists("gone.txt"));
    }
}
