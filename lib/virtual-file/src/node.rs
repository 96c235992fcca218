use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::io::{Read, Seek, Write};
use std::path::PathBuf;
use std::sync::Arc;

use tracing::trace;
use url::{Position, Url};

use crate::archive::{self, ArchiveOptions, TarCompression};
use crate::glob::GlobSpec;
use crate::{
    Capabilities, FileSystem, FsError, LocalFileSystem, LocalFsConfig, RelativePath, Result,
    ScanOptions,
};

/// A handle onto a path inside a [`FileSystem`].
///
/// Handles are cheap to clone and never cache anything: every probe goes to
/// the backend again. Two handles are equal when their URIs are.
#[derive(Clone, Debug)]
pub struct VirtualFile {
    fs: Arc<dyn FileSystem>,
    path: RelativePath,
}

impl VirtualFile {
    /// The root node of `fs`.
    pub fn root_of(fs: Arc<dyn FileSystem>) -> Self {
        Self {
            fs,
            path: RelativePath::root(),
        }
    }

    /// The root node of a strict local tree at `root`.
    pub fn for_path(root: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self::root_of(Arc::new(LocalFileSystem::new(root)?)))
    }

    pub fn for_config(config: LocalFsConfig) -> Result<Self> {
        Ok(Self::root_of(Arc::new(LocalFileSystem::with_config(config)?)))
    }

    pub fn file_system(&self) -> &Arc<dyn FileSystem> {
        &self.fs
    }

    pub fn relative_path(&self) -> &RelativePath {
        &self.path
    }

    fn at(&self, path: RelativePath) -> Self {
        Self {
            fs: self.fs.clone(),
            path,
        }
    }

    /// Last component of the absolute path. The parent of a root node is
    /// named after the directory holding the root.
    pub fn name(&self) -> String {
        if let Some(name) = self.path.file_name() {
            return name.to_string();
        }
        self.absolute()
            .rsplit(['/', '\\'])
            .find(|s| !s.is_empty())
            .unwrap_or_default()
            .to_string()
    }

    pub fn uri(&self) -> Url {
        self.fs.uri(&self.path)
    }

    pub fn absolute(&self) -> String {
        self.fs.absolute(&self.path)
    }

    /// The parent node, in the same tree. Above the root it is never
    /// accessible.
    pub fn parent(&self) -> Self {
        self.at(self.path.parent())
    }

    /// A node below this one. No check is made that it exists.
    pub fn child(&self, name: &str) -> Self {
        self.at(self.path.child(name))
    }

    pub fn is_directory(&self) -> bool {
        self.fs.metadata(&self.path).is_ok_and(|m| m.is_dir())
    }

    pub fn is_file(&self) -> bool {
        self.fs.metadata(&self.path).is_ok_and(|m| m.is_file())
    }

    pub fn exists(&self) -> bool {
        self.fs.metadata(&self.path).is_ok()
    }

    /// Immediate children. Symlinks that can not be followed are left out.
    pub fn list(&self) -> Result<Vec<VirtualFile>> {
        let Some(entries) = self.entries()? else {
            return Ok(Vec::new());
        };
        let mut children = Vec::with_capacity(entries.len());
        for entry in entries {
            let path = self.path.join_name(&entry.name);
            if entry.file_type.is_symlink() {
                match self.fs.metadata(&path) {
                    Ok(_) => {}
                    Err(err) if err.is_not_found() => {
                        trace!(%path, "hiding symlink that can not be followed");
                        continue;
                    }
                    Err(err) => return Err(err),
                }
            }
            children.push(self.at(path));
        }
        Ok(children)
    }

    /// Immediate children, symlinks included by name without being
    /// resolved. Nothing is listed through a node that is itself reached via
    /// a symlink below the root.
    pub fn list_no_follow(&self) -> Result<Vec<VirtualFile>> {
        if self.crosses_symlink()? {
            trace!(path = %self.path, "not listing through a symlink");
            return Ok(Vec::new());
        }
        let Some(entries) = self.entries()? else {
            return Ok(Vec::new());
        };
        Ok(entries
            .into_iter()
            .map(|entry| self.at(self.path.join_name(&entry.name)))
            .collect())
    }

    /// Immediate children whose real location stays inside the tree.
    /// Backends without a descendant check list nothing.
    pub fn list_only_descendants(&self) -> Result<Vec<VirtualFile>> {
        if !self.supports_is_descendant() {
            return Ok(Vec::new());
        }
        let mut children = self.list()?;
        children.retain(|child| self.fs.is_descendant(&child.path).unwrap_or(false));
        Ok(children)
    }

    /// Starts a glob listing below this node.
    pub fn glob(&self, includes: &str) -> GlobListing<'_> {
        GlobListing {
            node: self,
            spec: GlobSpec::new(Some(includes), None),
            options: ScanOptions {
                follow_links: true,
                include_directories: false,
            },
        }
    }

    /// Relative paths of the files below this node matching `includes` and
    /// none of `excludes`. Both are comma separated pattern lists.
    pub fn list_glob(
        &self,
        includes: &str,
        excludes: Option<&str>,
        include_directories: bool,
    ) -> Result<Vec<String>> {
        let mut listing = self.glob(includes).include_directories(include_directories);
        if let Some(excludes) = excludes {
            listing = listing.exclude(excludes);
        }
        listing.list()
    }

    pub fn open(&self) -> Result<Box<dyn Read + Send>> {
        self.fs.open(&self.path, false)
    }

    /// Opens the file, failing if any component below the root is a
    /// symlink.
    pub fn open_no_follow(&self) -> Result<Box<dyn Read + Send>> {
        self.fs.open(&self.path, true)
    }

    /// Size in bytes, `0` when unknown.
    pub fn length(&self) -> u64 {
        self.fs.metadata(&self.path).map(|m| m.len).unwrap_or(0)
    }

    /// Milliseconds since the epoch, `0` when unknown.
    pub fn last_modified(&self) -> u64 {
        self.fs.metadata(&self.path).map(|m| m.modified).unwrap_or(0)
    }

    /// Permission bits, `-1` when unknown.
    pub fn mode(&self) -> i32 {
        self.fs
            .metadata(&self.path)
            .ok()
            .and_then(|m| m.mode)
            .map(|mode| (mode & 0o7777) as i32)
            .unwrap_or(-1)
    }

    pub fn can_read(&self) -> bool {
        self.fs.can_read(&self.path)
    }

    /// Target of the symlink at this node. `None` for anything else,
    /// including symlinks that must not be followed.
    pub fn read_link(&self) -> Result<Option<String>> {
        match self.fs.read_link(&self.path) {
            Err(err) if err.is_not_found() => Ok(None),
            other => other,
        }
    }

    /// Whether `rel`, resolved from this node, stays inside the tree.
    ///
    /// Always `false` on backends without a descendant check. Absolute paths
    /// are rejected.
    pub fn is_descendant(&self, rel: &str) -> Result<bool> {
        let rel = RelativePath::parse(rel)?;
        if !self.supports_is_descendant() {
            return Ok(false);
        }
        self.fs.is_descendant(&self.path.join(&rel))
    }

    pub fn supports_is_descendant(&self) -> bool {
        self.fs.capabilities().contains(Capabilities::DESCENDANT_CHECK)
    }

    pub fn supports_quick_recursive_listing(&self) -> bool {
        self.fs
            .capabilities()
            .contains(Capabilities::QUICK_RECURSIVE_LISTING)
    }

    /// Whether this node or anything between it and the root is a symlink.
    pub fn has_symlink(&self) -> Result<bool> {
        self.fs.has_symlink(&self.path)
    }

    pub fn external_url(&self) -> Option<Url> {
        self.fs.external_url(&self.path)
    }

    /// See [`archive::zip`].
    pub fn zip<W: Write + Seek>(&self, out: W, options: &ArchiveOptions) -> Result<usize> {
        archive::zip(self, out, options)
    }

    /// See [`archive::tar`].
    pub fn tar<W: Write>(
        &self,
        out: W,
        options: &ArchiveOptions,
        compression: TarCompression,
    ) -> Result<usize> {
        archive::tar(self, out, options, compression)
    }

    /// Directory entries, or `None` when there is no directory to list.
    fn entries(&self) -> Result<Option<Vec<crate::DirEntry>>> {
        match self.fs.read_dir(&self.path) {
            Ok(entries) => Ok(Some(entries)),
            Err(err) if err.is_not_found() || is_not_a_directory(&err) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// A symlink strictly below the root on the way to this node.
    fn crosses_symlink(&self) -> Result<bool> {
        if self.path.is_root() {
            return Ok(false);
        }
        self.fs.has_symlink(&self.path)
    }
}

fn is_not_a_directory(err: &FsError) -> bool {
    matches!(err, FsError::Io(e) if e.kind() == std::io::ErrorKind::NotADirectory)
}

impl PartialEq for VirtualFile {
    fn eq(&self, other: &Self) -> bool {
        self.uri() == other.uri()
    }
}

impl Eq for VirtualFile {}

impl Hash for VirtualFile {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.uri().as_str().hash(state);
    }
}

impl PartialOrd for VirtualFile {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Scheme and authority, then the decoded path segments. Escaped names
/// sort by their own characters, not by their encoding.
fn order_key(uri: &Url) -> (String, Vec<String>) {
    let segments = uri
        .path_segments()
        .map(|segments| {
            segments
                .map(|s| match urlencoding::decode(s) {
                    Ok(decoded) => decoded.into_owned(),
                    Err(_) => s.to_string(),
                })
                .collect()
        })
        .unwrap_or_default();
    (uri[..Position::BeforePath].to_string(), segments)
}

impl Ord for VirtualFile {
    fn cmp(&self, other: &Self) -> Ordering {
        order_key(&self.uri()).cmp(&order_key(&other.uri()))
    }
}

impl fmt::Display for VirtualFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.uri())
    }
}

/// A glob listing being set up, see [`VirtualFile::glob`].
#[derive(Debug, Clone)]
#[must_use = "nothing is listed until `list` is called"]
pub struct GlobListing<'a> {
    node: &'a VirtualFile,
    spec: GlobSpec,
    options: ScanOptions,
}

impl GlobListing<'_> {
    /// Comma separated patterns to leave out.
    pub fn exclude(mut self, excludes: &str) -> Self {
        self.spec.excludes = Some(excludes.to_string());
        self
    }

    /// Also leave out version control metadata and editor droppings.
    pub fn default_excludes(mut self, enabled: bool) -> Self {
        self.spec = self.spec.default_excludes(enabled);
        self
    }

    pub fn case_sensitive(mut self, enabled: bool) -> Self {
        self.spec = self.spec.case_sensitive(enabled);
        self
    }

    pub fn include_directories(mut self, enabled: bool) -> Self {
        self.options.include_directories = enabled;
        self
    }

    /// With this off symlinks are skipped, and nothing is listed below a
    /// node reached through one.
    pub fn follow_links(mut self, enabled: bool) -> Self {
        self.options.follow_links = enabled;
        self
    }

    /// Relative paths of the matching entries, sorted.
    pub fn list(self) -> Result<Vec<String>> {
        let pattern = self.spec.compile()?;
        let node = self.node;
        node.fs.scan(&node.path, &pattern, self.options)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{MemoryFileSystem, ZipFileSystem};

    fn memory_root() -> VirtualFile {
        let fs = MemoryFileSystem::new("node").unwrap();
        for path in ["a/aa.txt", "a/ab/ab.txt", "b.txt"] {
            fs.insert_file(path, path).unwrap();
        }
        VirtualFile::root_of(Arc::new(fs))
    }

    #[test]
    fn names_and_navigation() {
        let root = memory_root();
        let child = root.child("a/ab");
        assert_eq!(child.name(), "ab");
        assert_eq!(child.parent(), root.child("a"));
        assert_eq!(child.child("..").child(".."), root);
        assert_eq!(root.child("a").to_string(), "ram://node/a");
    }

    #[test]
    fn equality_follows_uri() {
        let root = memory_root();
        let mut set = HashSet::new();
        set.insert(root.child("a"));
        set.insert(root.child("a/./"));
        set.insert(root.child("b.txt"));
        assert_eq!(set.len(), 2);

        let mut nodes = vec![root.child("b.txt"), root.child("a"), root.child("a/aa.txt")];
        nodes.sort();
        let names: Vec<String> = nodes.iter().map(VirtualFile::name).collect();
        assert_eq!(names, vec!["a", "aa.txt", "b.txt"]);
    }

    #[test]
    fn ordering_follows_names_not_escapes() {
        let root = memory_root();
        let spaced = root.child("a b");
        let bang = root.child("a!");
        assert!(spaced.uri().as_str().ends_with("a%20b"), "{spaced}");
        assert!(spaced < bang);
        assert!(bang > spaced);
        assert_eq!(spaced.cmp(&root.child("a b/")), Ordering::Equal);
        assert!(root < root.child("a b"));

        let mut nodes = vec![bang.clone(), root.child("a"), spaced.clone()];
        nodes.sort();
        let names: Vec<String> = nodes.iter().map(VirtualFile::name).collect();
        assert_eq!(names, vec!["a", "a b", "a!"]);
    }

    #[test]
    fn probes_are_total() {
        let root = memory_root();
        let missing = root.child("missing");
        assert!(!missing.exists());
        assert!(!missing.is_file());
        assert!(!missing.is_directory());
        assert_eq!(missing.length(), 0);
        assert_eq!(missing.last_modified(), 0);
        assert_eq!(missing.mode(), -1);
        assert_eq!(missing.read_link().unwrap(), None);
        assert!(missing.list().unwrap().is_empty());
        assert!(root.child("b.txt").list().unwrap().is_empty());
        assert!(missing.open().is_err());

        assert!(root.parent().list().unwrap().is_empty());
        assert!(!root.parent().exists());
    }

    #[test]
    fn listing_and_content() {
        let root = memory_root();
        let names: Vec<String> = root.list().unwrap().iter().map(VirtualFile::name).collect();
        assert_eq!(names, vec!["a", "b.txt"]);
        assert_eq!(root.child("a/aa.txt").length(), 8);

        let mut content = String::new();
        root.child("a/ab/ab.txt")
            .open()
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "a/ab/ab.txt");
    }

    #[test]
    fn descendant_check_on_memory() {
        let root = memory_root();
        assert!(root.supports_is_descendant());
        assert!(root.is_descendant("a/ab").unwrap());
        assert!(root.child("a").is_descendant("../b.txt").unwrap());
        assert!(!root.is_descendant("../outside").unwrap());
        assert!(root.is_descendant("/etc/passwd").is_err());
        assert_eq!(root.list_only_descendants().unwrap().len(), 2);
    }

    #[test]
    fn minimal_backend_degrades() {
        let mut buf = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buf);
            writer
                .start_file("dir/file.txt", zip::write::SimpleFileOptions::default())
                .unwrap();
            writer.write_all(b"content").unwrap();
            writer.finish().unwrap();
        }
        buf.set_position(0);
        let fs = ZipFileSystem::from_reader("minimal.zip", buf).unwrap();
        let root = VirtualFile::root_of(Arc::new(fs));

        assert!(!root.supports_is_descendant());
        assert!(!root.supports_quick_recursive_listing());
        assert!(!root.is_descendant("dir").unwrap());
        assert!(root.list_only_descendants().unwrap().is_empty());
        assert!(!root.has_symlink().unwrap());
        assert_eq!(root.list_glob("**", None, false).unwrap(), vec!["dir/file.txt"]);
        assert_eq!(
            root.list_glob("**", None, true).unwrap(),
            vec!["dir", "dir/file.txt"]
        );
        assert_eq!(root.child("dir/file.txt").length(), 7);
    }
}
