use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use url::Url;

use crate::{
    Capabilities, DirEntry, FileSystem, FileType, FsError, Metadata, RelativePath, Result,
};

/// A tree of files and directories kept entirely in memory.
///
/// Directories are created implicitly for every inserted file. There are no
/// symlinks, so the descendant check is purely lexical.
#[derive(Debug)]
pub struct MemoryFileSystem {
    base: Url,
    inner: RwLock<Tree<Arc<[u8]>>>,
}

impl MemoryFileSystem {
    pub fn new(name: &str) -> Result<Self> {
        let base = Url::parse(&format!("ram://{name}/"))
            .map_err(|e| FsError::IllegalArgument(format!("invalid name '{name}': {e}")))?;
        Ok(Self {
            base,
            inner: RwLock::new(Tree::default()),
        })
    }

    /// Adds or replaces a file, creating its parent directories.
    pub fn insert_file(&self, path: &str, data: impl Into<Vec<u8>>) -> Result<()> {
        let path = writable_path(path)?;
        let data: Vec<u8> = data.into();
        let info = EntryInfo::now(0o644);
        self.inner.write().insert_file(&path, Arc::from(data), info)
    }

    pub fn create_dir(&self, path: &str) -> Result<()> {
        let path = writable_path(path)?;
        self.inner.write().insert_dir(path.segments(), EntryInfo::now(0o755))
    }
}

fn writable_path(path: &str) -> Result<RelativePath> {
    let path = RelativePath::parse(path)?;
    if path.escapes_root() || path.is_root() {
        return Err(FsError::IllegalArgument(format!(
            "'{path}' does not name an entry below the root"
        )));
    }
    Ok(path)
}

impl FileSystem for MemoryFileSystem {
    fn uri(&self, path: &RelativePath) -> Url {
        mem_uri(&self.base, path)
    }

    fn absolute(&self, path: &RelativePath) -> String {
        format!("/{path}")
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::DESCENDANT_CHECK | Capabilities::QUICK_RECURSIVE_LISTING
    }

    fn metadata(&self, path: &RelativePath) -> Result<Metadata> {
        self.inner.read().metadata(path, |data| data.len() as u64)
    }

    fn read_dir(&self, path: &RelativePath) -> Result<Vec<DirEntry>> {
        self.inner.read().read_dir(path)
    }

    fn open(&self, path: &RelativePath, _no_follow: bool) -> Result<Box<dyn Read + Send>> {
        let data = self.inner.read().file(path)?.clone();
        Ok(Box::new(Cursor::new(data)))
    }

    fn read_link(&self, path: &RelativePath) -> Result<Option<String>> {
        self.inner.read().metadata(path, |_| 0)?;
        Ok(None)
    }

    fn is_descendant(&self, path: &RelativePath) -> Result<bool> {
        Ok(!path.escapes_root())
    }
}

/// URIs of trees without a place on disk. Anything above the root collapses
/// onto the bare authority.
pub(crate) fn mem_uri(base: &Url, path: &RelativePath) -> Url {
    let mut url = base.clone();
    if path.escapes_root() {
        url.set_path("");
        return url;
    }
    if let Ok(mut segments) = url.path_segments_mut() {
        segments.pop_if_empty();
        segments.extend(path.segments());
    }
    url
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct EntryInfo {
    pub modified: u64,
    pub mode: Option<u32>,
}

impl EntryInfo {
    fn now(mode: u32) -> Self {
        let modified = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            modified,
            mode: Some(mode),
        }
    }
}

#[derive(Debug)]
enum Node<F> {
    Dir(EntryInfo),
    File(F, EntryInfo),
}

/// Entries keyed by their path segments. The root directory is implicit.
#[derive(Debug)]
pub(crate) struct Tree<F> {
    entries: BTreeMap<Vec<String>, Node<F>>,
    root: EntryInfo,
}

impl<F> Default for Tree<F> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
            root: EntryInfo::now(0o755),
        }
    }
}

impl<F> Tree<F> {
    pub fn insert_dir(&mut self, segments: &[String], info: EntryInfo) -> Result<()> {
        for depth in 1..=segments.len() {
            let key = segments[..depth].to_vec();
            match self.entries.get(&key) {
                Some(Node::Dir(_)) => {}
                Some(Node::File(..)) => {
                    return Err(FsError::IllegalArgument(format!(
                        "'{}' is a file",
                        key.join("/")
                    )));
                }
                None => {
                    self.entries.insert(key, Node::Dir(info));
                }
            }
        }
        Ok(())
    }

    pub fn insert_file(&mut self, path: &RelativePath, data: F, info: EntryInfo) -> Result<()> {
        let segments = path.segments();
        if let Some((_, parents)) = segments.split_last() {
            self.insert_dir(parents, info)?;
        }
        if let Some(Node::Dir(_)) = self.entries.get(segments) {
            return Err(FsError::IllegalArgument(format!("'{path}' is a directory")));
        }
        self.entries.insert(segments.to_vec(), Node::File(data, info));
        Ok(())
    }

    fn lookup(&self, path: &RelativePath) -> Result<Option<&Node<F>>> {
        if path.escapes_root() {
            return Err(FsError::NotFound(format!("{path} is outside of the root")));
        }
        if path.is_root() {
            return Ok(None);
        }
        match self.entries.get(path.segments()) {
            Some(node) => Ok(Some(node)),
            None => Err(FsError::NotFound(path.to_string())),
        }
    }

    pub fn metadata(&self, path: &RelativePath, len: impl Fn(&F) -> u64) -> Result<Metadata> {
        let (ft, len, info) = match self.lookup(path)? {
            None => (dir_type(), 0, self.root),
            Some(Node::Dir(info)) => (dir_type(), 0, *info),
            Some(Node::File(data, info)) => (file_type(), len(data), *info),
        };
        Ok(Metadata {
            ft,
            len,
            modified: info.modified,
            mode: info.mode,
        })
    }

    pub fn file(&self, path: &RelativePath) -> Result<&F> {
        match self.lookup(path)? {
            Some(Node::File(data, _)) => Ok(data),
            _ => Err(FsError::Io(std::io::Error::new(
                std::io::ErrorKind::IsADirectory,
                format!("'{path}' is a directory"),
            ))),
        }
    }

    pub fn read_dir(&self, path: &RelativePath) -> Result<Vec<DirEntry>> {
        if let Some(Node::File(..)) = self.lookup(path)? {
            return Err(FsError::Io(std::io::Error::new(
                std::io::ErrorKind::NotADirectory,
                format!("'{path}' is not a directory"),
            )));
        }
        let prefix = path.segments();
        let entries = self
            .entries
            .range(prefix.to_vec()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .filter(|(key, _)| key.len() == prefix.len() + 1)
            .map(|(key, node)| DirEntry {
                name: key[prefix.len()].clone(),
                file_type: match node {
                    Node::Dir(_) => dir_type(),
                    Node::File(..) => file_type(),
                },
            })
            .collect();
        Ok(entries)
    }
}

fn dir_type() -> FileType {
    FileType {
        dir: true,
        ..FileType::default()
    }
}

fn file_type() -> FileType {
    FileType {
        file: true,
        ..FileType::default()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use pretty_assertions::assert_eq;

    use super::*;

    fn rel(path: &str) -> RelativePath {
        RelativePath::parse(path).unwrap()
    }

    #[test]
    fn parents_are_implicit() {
        let fs = MemoryFileSystem::new("fixture").unwrap();
        fs.insert_file("a/b/c.txt", "c").unwrap();

        assert!(fs.metadata(&rel("a")).unwrap().is_dir());
        assert!(fs.metadata(&rel("a/b")).unwrap().is_dir());
        let meta = fs.metadata(&rel("a/b/c.txt")).unwrap();
        assert!(meta.is_file());
        assert_eq!(meta.len, 1);
        let names: Vec<String> = fs
            .read_dir(&rel("a"))
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["b"]);
    }

    #[test]
    fn read_dir_does_not_leak_siblings() {
        let fs = MemoryFileSystem::new("fixture").unwrap();
        fs.insert_file("a/x", "x").unwrap();
        fs.insert_file("a0/y", "y").unwrap();
        fs.insert_file("a/sub/z", "z").unwrap();
        let names: Vec<String> = fs
            .read_dir(&rel("a"))
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["sub", "x"]);
    }

    #[test]
    fn files_cannot_become_directories() {
        let fs = MemoryFileSystem::new("fixture").unwrap();
        fs.insert_file("a", "a").unwrap();
        assert!(fs.insert_file("a/b", "b").is_err());
        assert!(fs.insert_file("", "root").is_err());
        assert!(fs.insert_file("../up", "up").is_err());
    }

    #[test]
    fn open_reads_content() {
        let fs = MemoryFileSystem::new("fixture").unwrap();
        fs.insert_file("hello.txt", "hello").unwrap();
        let mut content = String::new();
        fs.open(&rel("hello.txt"), false)
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "hello");
        assert!(fs.open(&RelativePath::root(), false).is_err());
    }

    #[test]
    fn uris() {
        let fs = MemoryFileSystem::new("fixture").unwrap();
        assert_eq!(fs.uri(&rel("a/b")).as_str(), "ram://fixture/a/b");
        assert_eq!(fs.uri(&RelativePath::root()).as_str(), "ram://fixture/");
        assert_eq!(fs.uri(&RelativePath::root().parent()).as_str(), "ram://fixture");
    }
}
