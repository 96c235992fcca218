use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use crate::RelativePath;

pub const DEFAULT_MAX_SYMLINKS: u16 = 40;

/// Resolves relative paths against a canonical root, one segment at a time,
/// replacing every symlink met on the way by its target.
///
/// Every symlink has to land inside the root. Links may jump around within
/// it, so `a/_b/_a` is fine as long as both `_b` and `_a` point somewhere
/// below the root, but a path that leaves once stays outside even if a later
/// link points back in.
#[derive(Debug, Clone, Copy)]
pub struct SymlinkGuard {
    max_symlinks: u16,
}

/// Where a relative path ends up on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Real location. Canonical up to the first missing component.
    pub real: PathBuf,
    /// Every component exists.
    pub exists: bool,
    /// A symlink on the way points at something that does not exist.
    pub dangling: bool,
    /// At least one symlink was crossed.
    pub crossed_symlink: bool,
    /// A symlink on the way landed outside of the root.
    pub escaped: bool,
}

impl Resolution {
    /// Whether the path never left `root_real` through a symlink and ends
    /// up beneath it.
    pub fn is_beneath(&self, root_real: &Path) -> bool {
        !self.escaped && self.real.starts_with(root_real)
    }

    /// Location relative to `root_real`, if it is beneath it.
    pub fn relative_to<'a>(&'a self, root_real: &Path) -> Option<&'a Path> {
        if self.escaped {
            return None;
        }
        self.real.strip_prefix(root_real).ok()
    }
}

impl Default for SymlinkGuard {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SYMLINKS)
    }
}

impl SymlinkGuard {
    pub fn new(max_symlinks: u16) -> Self {
        Self { max_symlinks }
    }

    pub fn resolve(&self, root_real: &Path, path: &RelativePath) -> io::Result<Resolution> {
        let mut real = root_real.to_path_buf();
        for _ in 0..path.ups() {
            real.pop();
        }

        let mut ret = Resolution {
            real,
            exists: true,
            dangling: false,
            crossed_symlink: false,
            escaped: false,
        };
        let mut hops = 0u16;
        for segment in path.segments() {
            let candidate = ret.real.join(segment);
            if !ret.exists {
                ret.real = candidate;
                continue;
            }
            match fs::symlink_metadata(&candidate) {
                Ok(meta) if meta.file_type().is_symlink() => {
                    ret.crossed_symlink = true;
                    hops += 1;
                    if hops > self.max_symlinks {
                        return Err(too_many_links(&candidate));
                    }
                    match dunce::canonicalize(&candidate) {
                        Ok(target) => ret.real = target,
                        Err(err) if is_missing(&err) => {
                            let target = fs::read_link(&candidate)?;
                            ret.real = normalize_path(&ret.real.join(target));
                            ret.exists = false;
                            ret.dangling = true;
                        }
                        Err(err) => return Err(err),
                    }
                    if !ret.real.starts_with(root_real) {
                        ret.escaped = true;
                    }
                }
                Ok(_) => ret.real = candidate,
                Err(err) if is_missing(&err) => {
                    ret.real = candidate;
                    ret.exists = false;
                }
                Err(err) => return Err(err),
            }
        }
        Ok(ret)
    }

    pub fn is_descendant(&self, root_real: &Path, path: &RelativePath) -> io::Result<bool> {
        Ok(self.resolve(root_real, path)?.is_beneath(root_real))
    }
}

fn is_missing(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::NotFound | io::ErrorKind::NotADirectory)
}

fn too_many_links(path: &Path) -> io::Error {
    io::Error::other(format!(
        "too many levels of symbolic links: {}",
        path.display()
    ))
}

/// Lexically removes `.` and `..` components.
pub(crate) fn normalize_path(path: &Path) -> PathBuf {
    let mut ret = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(..) | Component::RootDir => ret.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                ret.pop();
            }
            Component::Normal(c) => ret.push(c),
        }
    }
    ret
}

#[cfg(all(test, unix))]
mod tests {
    use std::os::unix::fs::symlink;

    use pretty_assertions::assert_eq;

    use super::*;

    fn rel(path: &str) -> RelativePath {
        RelativePath::parse(path).unwrap()
    }

    #[test]
    fn plain_paths_stay_beneath() {
        let dir = tempfile::tempdir().unwrap();
        let root = dunce::canonicalize(dir.path()).unwrap();
        fs::create_dir_all(root.join("a/b")).unwrap();

        let guard = SymlinkGuard::default();
        let res = guard.resolve(&root, &rel("a/b")).unwrap();
        assert_eq!(res.real, root.join("a/b"));
        assert!(res.exists);
        assert!(!res.crossed_symlink);
        assert!(guard.is_descendant(&root, &rel("a/missing/deeper")).unwrap());
        assert!(!guard.is_descendant(&root, &rel("../elsewhere")).unwrap());
    }

    #[test]
    fn escaping_symlink_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let base = dunce::canonicalize(dir.path()).unwrap();
        let root = base.join("ws");
        fs::create_dir_all(root.join("safe")).unwrap();
        fs::create_dir_all(base.join("other")).unwrap();
        symlink("../other", root.join("hack")).unwrap();
        symlink("safe", root.join("supported")).unwrap();

        let guard = SymlinkGuard::default();
        let res = guard.resolve(&root, &rel("hack")).unwrap();
        assert_eq!(res.real, base.join("other"));
        assert!(res.crossed_symlink);
        assert!(!res.is_beneath(&root));

        let res = guard.resolve(&root, &rel("supported")).unwrap();
        assert_eq!(res.relative_to(&root), Some(Path::new("safe")));
    }

    #[test]
    fn leaving_the_root_is_final() {
        let dir = tempfile::tempdir().unwrap();
        let root = dunce::canonicalize(dir.path()).unwrap();
        fs::create_dir_all(root.join("a/aa")).unwrap();
        fs::create_dir_all(root.join("b")).unwrap();
        symlink(root.join("b"), root.join("a/_b")).unwrap();
        symlink(root.join("a"), root.join("b/_a")).unwrap();

        let guard = SymlinkGuard::default();
        assert!(guard.is_descendant(&root, &rel("a/_b/_a/aa")).unwrap());

        let a = root.join("a");
        let res = guard.resolve(&a, &rel("_b/_a/aa")).unwrap();
        assert_eq!(res.real, a.join("aa"));
        assert!(res.escaped);
        assert!(!res.is_beneath(&a));
        assert_eq!(res.relative_to(&a), None);
        assert!(guard.is_descendant(&a, &rel("../a/aa")).unwrap());
    }

    #[test]
    fn dangling_links_resolve_lexically() {
        let dir = tempfile::tempdir().unwrap();
        let root = dunce::canonicalize(dir.path()).unwrap();
        symlink("physical", root.join("link")).unwrap();
        symlink("../../nowhere", root.join("away")).unwrap();

        let guard = SymlinkGuard::default();
        let res = guard.resolve(&root, &rel("link")).unwrap();
        assert!(res.dangling);
        assert!(!res.exists);
        assert!(res.is_beneath(&root));

        let res = guard.resolve(&root, &rel("away")).unwrap();
        assert!(!res.is_beneath(&root));
    }

    #[test]
    fn hop_limit_is_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let root = dunce::canonicalize(dir.path()).unwrap();
        fs::create_dir_all(root.join("d")).unwrap();
        symlink(".", root.join("d/self")).unwrap();

        let guard = SymlinkGuard::new(2);
        assert!(guard.resolve(&root, &rel("d/self/self")).is_ok());
        assert!(guard.resolve(&root, &rel("d/self/self/self")).is_err());
    }
}
