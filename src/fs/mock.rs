// src/fs/mock.rs

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Result, anyhow};

use super::FileSystem;

#[derive(Debug, Clone)]
enum MockEntry {
    File(Vec<u8>),
    Dir,
}

/// In-memory filesystem. Clones share the same tree.
///
/// Directories are implicit: adding `a/b/c.txt` also creates `a` and `a/b`.
#[derive(Debug, Clone, Default)]
pub struct MockFileSystem {
    entries: Arc<Mutex<BTreeMap<PathBuf, MockEntry>>>,
}

impl MockFileSystem {
    pub fn new() -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(PathBuf::from("."), MockEntry::Dir);
        Self {
            entries: Arc::new(Mutex::new(entries)),
        }
    }

    pub fn add_file(&self, path: impl AsRef<Path>, content: impl Into<Vec<u8>>) {
        let path = path.as_ref();
        let mut entries = self.lock();
        insert_parents(&mut entries, path);
        entries.insert(path.to_path_buf(), MockEntry::File(content.into()));
    }

    pub fn remove(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        self.lock().retain(|p, _| !p.starts_with(path));
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<PathBuf, MockEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn parent_of(path: &Path) -> Option<&Path> {
    match path.parent() {
        Some(p) if p.as_os_str().is_empty() => Some(Path::new(".")),
        other => other,
    }
}

fn insert_parents(entries: &mut BTreeMap<PathBuf, MockEntry>, path: &Path) {
    let mut current = parent_of(path);
    while let Some(dir) = current {
        if dir == path || entries.contains_key(dir) {
            break;
        }
        entries.insert(dir.to_path_buf(), MockEntry::Dir);
        current = parent_of(dir).filter(|p| *p != dir);
    }
}

impl FileSystem for MockFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String> {
        match self.lock().get(path) {
            Some(MockEntry::File(content)) => {
                String::from_utf8(content.clone()).map_err(|e| anyhow!("Invalid UTF-8: {}", e))
            }
            Some(MockEntry::Dir) => Err(anyhow!("Is a directory: {:?}", path)),
            None => Err(anyhow!("File not found: {:?}", path)),
        }
    }

    fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        if self.is_dir(path) {
            return Err(anyhow!("Is a directory: {:?}", path));
        }
        self.add_file(path, contents);
        Ok(())
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        let mut entries = self.lock();
        if let Some(MockEntry::File(_)) = entries.get(path) {
            return Err(anyhow!("Is a file: {:?}", path));
        }
        insert_parents(&mut entries, path);
        entries.insert(path.to_path_buf(), MockEntry::Dir);
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        self.lock().contains_key(path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        matches!(self.lock().get(path), Some(MockEntry::Dir))
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let entries = self.lock();
        match entries.get(path) {
            Some(MockEntry::Dir) => Ok(entries
                .keys()
                .filter(|p| p.as_path() != path && parent_of(p) == Some(path))
                .cloned()
                .collect()),
            _ => Err(anyhow!("Not a directory or not found: {:?}", path)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_file_creates_parent_directories() {
        let fs = MockFileSystem::new();
        fs.add_file("ws/job1/out.dat", "42");

        assert!(fs.is_dir(Path::new("ws")));
        assert!(fs.is_dir(Path::new("ws/job1")));
        assert_eq!(fs.read_to_string(Path::new("ws/job1/out.dat")).unwrap(), "42");
        assert_eq!(
            fs.read_dir(Path::new("ws")).unwrap(),
            vec![PathBuf::from("ws/job1")]
        );
    }

    #[test]
    fn remove_drops_subtree() {
        let fs = MockFileSystem::new();
        fs.add_file("ws/a/x", "1");
        fs.add_file("ws/b/y", "2");
        fs.remove("ws/a");

        assert!(!fs.exists(Path::new("ws/a/x")));
        assert_eq!(fs.read_dir(Path::new("ws")).unwrap(), vec![PathBuf::from("ws/b")]);
    }
}
