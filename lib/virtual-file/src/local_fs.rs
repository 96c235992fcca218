use std::ffi::{OsStr, OsString};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use tracing::{debug, trace};
use url::Url;

use crate::guard::normalize_path;
use crate::platform::{self, DirHandle};
use crate::{
    Capabilities, DirEntry, FileSystem, FsError, LocalFsConfig, Metadata, RelativePath,
    Result, SymlinkGuard,
};

/// A tree rooted at a directory of the host filesystem.
///
/// With the default strict configuration nothing outside of the root is ever
/// reachable: symlinks that resolve outside of it look like missing entries.
/// The root is canonicalized again on every call, and the canonical location
/// is then opened component by component without following symlinks.
#[derive(Debug)]
pub struct LocalFileSystem {
    config: LocalFsConfig,
    root: PathBuf,
    root_url: Url,
    guard: SymlinkGuard,
}

/// Where an entry lives, as an open parent directory and a name.
enum Target {
    Root(DirHandle),
    Entry { parent: DirHandle, name: OsString },
}

impl Target {
    fn into_dir(self) -> io::Result<DirHandle> {
        match self {
            Target::Root(dir) => Ok(dir),
            Target::Entry { parent, name } => platform::open_dir_at(&parent, &name),
        }
    }
}

impl LocalFileSystem {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        Self::with_config(LocalFsConfig::new(root))
    }

    pub fn with_config(config: LocalFsConfig) -> Result<Self> {
        config.validate()?;
        let root = normalize_path(&std::path::absolute(&config.root)?);
        let root_url = Url::from_directory_path(&root).map_err(|()| {
            FsError::IllegalArgument(format!("{} can not be turned into a URL", root.display()))
        })?;
        debug!(root = %root.display(), strict = config.strict, "local file system");
        Ok(Self {
            guard: SymlinkGuard::new(config.max_symlinks),
            config,
            root,
            root_url,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &LocalFsConfig {
        &self.config
    }

    fn root_real(&self) -> Result<PathBuf> {
        Ok(dunce::canonicalize(&self.root)?)
    }

    fn absolute_path(&self, path: &RelativePath) -> PathBuf {
        normalize_path(&path.to_path(&self.root))
    }

    /// Resolves `path` and opens the directory that holds it.
    fn target(&self, path: &RelativePath) -> Result<Target> {
        if self.config.strict && path.escapes_root() {
            return Err(FsError::NotFound(format!("{path} is outside of the root")));
        }
        let root_real = self.root_real()?;
        let res = self.guard.resolve(&root_real, path)?;
        if !res.exists {
            return Err(FsError::NotFound(path.to_string()));
        }

        let (base, rel) = match res.relative_to(&root_real) {
            Some(rel) => (root_real.as_path(), rel),
            None if self.config.strict => {
                trace!(%path, real = %res.real.display(), "symlink escapes the root");
                return Err(FsError::IllegalSymlink(path.to_string()));
            }
            None => match (res.real.parent(), res.real.file_name()) {
                (Some(parent), Some(name)) => (parent, Path::new(name)),
                _ => (res.real.as_path(), Path::new("")),
            },
        };
        let base_dir = platform::open_root_dir(base)?;
        let mut components: Vec<&OsStr> = rel.iter().collect();
        match components.pop() {
            None => Ok(Target::Root(base_dir)),
            Some(name) => Ok(Target::Entry {
                parent: platform::walk_dirs(&base_dir, components)?,
                name: name.to_os_string(),
            }),
        }
    }

    /// Opens `path` refusing every symlink from the root down.
    fn open_no_follow(&self, path: &RelativePath) -> Result<Box<dyn Read + Send>> {
        if path.escapes_root() {
            return Err(FsError::NotFound(format!("{path} is outside of the root")));
        }
        let Some((name, dirs)) = path.segments().split_last() else {
            return Err(is_a_directory(path));
        };
        let mut dir = platform::open_root_dir(&self.root_real()?)?;
        for segment in dirs {
            let stat = platform::stat_at(&dir, OsStr::new(segment), true)?;
            if stat.ft.is_symlink() {
                return Err(FsError::IllegalSymlink(format!("{path} crosses a symlink")));
            }
            dir = platform::open_dir_at(&dir, OsStr::new(segment))?;
        }
        let stat = platform::stat_at(&dir, OsStr::new(name), true)?;
        if stat.ft.is_symlink() {
            return Err(FsError::IllegalSymlink(format!("{path} is a symlink")));
        }
        if stat.ft.is_dir() {
            return Err(is_a_directory(path));
        }
        Ok(Box::new(platform::open_file_at(&dir, OsStr::new(name))?))
    }
}

fn is_a_directory(path: &RelativePath) -> FsError {
    FsError::Io(io::Error::new(
        io::ErrorKind::IsADirectory,
        format!("'{path}' is a directory"),
    ))
}

impl FileSystem for LocalFileSystem {
    fn uri(&self, path: &RelativePath) -> Url {
        let mut url = self.root_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty();
            for _ in 0..path.ups() {
                segments.pop();
            }
            segments.extend(path.segments());
        }
        url
    }

    fn absolute(&self, path: &RelativePath) -> String {
        self.absolute_path(path).to_string_lossy().into_owned()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::DESCENDANT_CHECK
            | Capabilities::QUICK_RECURSIVE_LISTING
            | Capabilities::SYMLINKS
    }

    fn metadata(&self, path: &RelativePath) -> Result<Metadata> {
        let stat = match self.target(path)? {
            Target::Root(dir) => platform::stat_dir(&dir)?,
            Target::Entry { parent, name } => platform::stat_at(&parent, &name, true)?,
        };
        Ok(stat.metadata())
    }

    fn read_dir(&self, path: &RelativePath) -> Result<Vec<DirEntry>> {
        let dir = self.target(path)?.into_dir()?;
        let mut entries: Vec<DirEntry> = platform::read_dir(&dir)?
            .into_iter()
            .map(|entry| DirEntry {
                name: entry.name,
                file_type: entry.ft,
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn open(&self, path: &RelativePath, no_follow: bool) -> Result<Box<dyn Read + Send>> {
        if no_follow {
            return self.open_no_follow(path);
        }
        match self.target(path)? {
            Target::Root(_) => Err(is_a_directory(path)),
            Target::Entry { parent, name } => {
                if platform::stat_at(&parent, &name, true)?.ft.is_dir() {
                    return Err(is_a_directory(path));
                }
                Ok(Box::new(platform::open_file_at(&parent, &name)?))
            }
        }
    }

    fn read_link(&self, path: &RelativePath) -> Result<Option<String>> {
        let Some(name) = path.file_name() else {
            return Ok(None);
        };
        let root_real = self.root_real()?;
        if self.config.strict && !self.guard.is_descendant(&root_real, path)? {
            trace!(%path, "not reading a link that escapes the root");
            return Ok(None);
        }
        let parent = self.target(&path.parent())?.into_dir()?;
        let name = OsStr::new(name);
        if !platform::stat_at(&parent, name, true)?.ft.is_symlink() {
            return Ok(None);
        }
        let target = platform::readlink_at(&parent, name)?;
        Ok(Some(String::from_utf8_lossy(&target).into_owned()))
    }

    fn is_descendant(&self, path: &RelativePath) -> Result<bool> {
        let root_real = self.root_real()?;
        Ok(self.guard.is_descendant(&root_real, path)?)
    }

    fn has_symlink(&self, path: &RelativePath) -> Result<bool> {
        if path.is_root() {
            return Ok(fs::symlink_metadata(&self.root).is_ok_and(|m| m.file_type().is_symlink()));
        }
        let mut current = self.root_real()?;
        for _ in 0..path.ups() {
            current.pop();
        }
        for segment in path.segments() {
            current.push(segment);
            match fs::symlink_metadata(&current) {
                Ok(meta) if meta.file_type().is_symlink() => return Ok(true),
                Ok(_) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
                Err(err) => return Err(err.into()),
            }
        }
        Ok(false)
    }

    fn canonical(&self, path: &RelativePath) -> Result<String> {
        let root_real = self.root_real()?;
        let res = self.guard.resolve(&root_real, path)?;
        if self.config.strict && !res.is_beneath(&root_real) {
            return Err(FsError::IllegalSymlink(path.to_string()));
        }
        Ok(res.real.to_string_lossy().into_owned())
    }

    fn can_read(&self, path: &RelativePath) -> bool {
        match self.target(path) {
            Ok(Target::Root(dir)) => platform::can_read_at(&dir, None),
            Ok(Target::Entry { parent, name }) => platform::can_read_at(&parent, Some(&name)),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn rel(path: &str) -> RelativePath {
        RelativePath::parse(path).unwrap()
    }

    #[test]
    fn uri_is_structural() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFileSystem::new(dir.path()).unwrap();
        let uri = fs.uri(&rel("a dir/b.txt"));
        assert_eq!(uri.scheme(), "file");
        assert!(uri.as_str().ends_with("/a%20dir/b.txt"), "{uri}");
        assert!(!fs.uri(&RelativePath::root()).as_str().ends_with('/'));
        assert!(fs.metadata(&rel("a dir/b.txt")).is_err());
    }

    #[test]
    fn read_dir_is_sorted() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b", "c", "a"] {
            fs::write(dir.path().join(name), name).unwrap();
        }
        let fs = LocalFileSystem::new(dir.path()).unwrap();
        let names: Vec<String> = fs
            .read_dir(&RelativePath::root())
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn parent_of_root_is_unreachable() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("ws")).unwrap();
        let fs = LocalFileSystem::new(dir.path().join("ws")).unwrap();
        let parent = RelativePath::root().parent();
        assert!(fs.metadata(&parent).is_err());
        assert!(!fs.is_descendant(&parent).unwrap());
        assert_eq!(
            fs.absolute(&parent),
            normalize_path(&std::path::absolute(dir.path()).unwrap())
                .to_string_lossy()
                .into_owned()
        );
    }

    #[test]
    fn opening_a_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        let fs = LocalFileSystem::new(dir.path()).unwrap();
        assert!(fs.open(&rel("sub"), false).is_err());
        assert!(fs.open(&rel("sub"), true).is_err());
        assert!(fs.open(&RelativePath::root(), false).is_err());
    }
}
