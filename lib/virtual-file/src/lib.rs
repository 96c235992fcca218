//! Symlink-aware virtual filesystem views.
//!
//! A [`VirtualFile`] is a lightweight handle onto a path inside a
//! [`FileSystem`]. Every backend enforces the same contract: paths are
//! relative to the root the tree was created for, and symlinks that resolve
//! outside that root behave as if they did not exist.

pub mod archive;
mod config;
pub mod glob;
mod guard;
mod local_fs;
mod mem_fs;
mod node;
mod path;
mod platform;
pub mod remote;
mod scanner;
mod zip_fs;

use std::fmt;
use std::io::{self, Read};

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

pub use crate::config::LocalFsConfig;
pub use crate::glob::GlobPattern;
pub use crate::guard::{Resolution, SymlinkGuard};
pub use crate::local_fs::LocalFileSystem;
pub use crate::mem_fs::MemoryFileSystem;
pub use crate::node::{GlobListing, VirtualFile};
pub use crate::path::RelativePath;
pub use crate::remote::RemoteFileSystem;
pub use crate::zip_fs::ZipFileSystem;

pub type Result<T> = std::result::Result<T, FsError>;

bitflags! {
    /// Optional abilities a backend can answer natively.
    ///
    /// Callers query these instead of probing for unsupported calls.
    pub struct Capabilities: u8 {
        /// `is_descendant` gives real answers instead of `false`.
        const DESCENDANT_CHECK = 1 << 0;
        /// Recursive glob listing runs close to the data.
        const QUICK_RECURSIVE_LISTING = 1 << 1;
        /// The backend can contain symbolic links.
        const SYMLINKS = 1 << 2;
    }
}

/// A read-only tree of files rooted somewhere.
///
/// Every path handed to a `FileSystem` is relative to that root. Paths with
/// pending parent references (`ups > 0`) point outside of it and every
/// backend treats them as inaccessible.
pub trait FileSystem: fmt::Debug + Send + Sync {
    /// Identity of the entry, stable for the lifetime of the tree.
    fn uri(&self, path: &RelativePath) -> Url;

    /// Absolute, platform-specific path of the entry. Purely structural.
    fn absolute(&self, path: &RelativePath) -> String;

    fn capabilities(&self) -> Capabilities;

    /// Metadata of the entry, following symlinks.
    fn metadata(&self, path: &RelativePath) -> Result<Metadata>;

    /// Immediate children of a directory. Symlinks are reported as such.
    fn read_dir(&self, path: &RelativePath) -> Result<Vec<DirEntry>>;

    /// Open the entry for reading.
    ///
    /// With `no_follow` set, any symlink between the root and the entry
    /// (the entry itself included) fails the call.
    fn open(&self, path: &RelativePath, no_follow: bool) -> Result<Box<dyn Read + Send>>;

    /// Raw target of a symlink, `None` for anything else.
    fn read_link(&self, path: &RelativePath) -> Result<Option<String>>;

    /// Whether `path`, once every symlink on the way is resolved, still ends
    /// up beneath the root.
    fn is_descendant(&self, _path: &RelativePath) -> Result<bool> {
        Ok(false)
    }

    /// Whether `path` or any component between it and the root is a
    /// symlink. The root itself only counts when `path` is the root.
    fn has_symlink(&self, _path: &RelativePath) -> Result<bool> {
        Ok(false)
    }

    /// Location identifier after resolving symlinks, used to detect cycles.
    fn canonical(&self, path: &RelativePath) -> Result<String> {
        Ok(self.absolute(path))
    }

    fn can_read(&self, path: &RelativePath) -> bool {
        self.metadata(path).is_ok()
    }

    /// Relative paths of everything below `path` matching `pattern`.
    fn scan(
        &self,
        path: &RelativePath,
        pattern: &GlobPattern,
        options: ScanOptions,
    ) -> Result<Vec<String>> {
        scanner::scan(self, path, pattern, options)
    }

    /// A URL that can be handed to a third party to fetch the content.
    fn external_url(&self, _path: &RelativePath) -> Option<Url> {
        None
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileType {
    pub dir: bool,
    pub file: bool,
    pub symlink: bool,
}

impl FileType {
    pub fn is_dir(&self) -> bool {
        self.dir
    }

    pub fn is_file(&self) -> bool {
        self.file
    }

    pub fn is_symlink(&self) -> bool {
        self.symlink
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub ft: FileType,
    pub len: u64,
    /// Milliseconds since the unix epoch.
    pub modified: u64,
    /// Permission bits, when the backend has them.
    pub mode: Option<u32>,
}

impl Metadata {
    pub fn is_dir(&self) -> bool {
        self.ft.is_dir()
    }

    pub fn is_file(&self) -> bool {
        self.ft.is_file()
    }

    pub fn file_type(&self) -> FileType {
        self.ft
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    pub file_type: FileType,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanOptions {
    pub follow_links: bool,
    pub include_directories: bool,
}

#[derive(Error, Debug)]
pub enum FsError {
    /// The requested entry does not exist
    #[error("entity not found: {0}")]
    NotFound(String),
    /// A symlink resolves outside of the root
    #[error("illegal symlink, resolves outside of the root: {0}")]
    IllegalSymlink(String),
    /// The caller handed in something malformed, like an absolute path
    #[error("illegal argument: {0}")]
    IllegalArgument(String),
    /// An archive entry would be written outside of the extraction target
    #[error("{archive} contains illegal file name that breaks out of the target directory: {entry}")]
    BreaksOut { archive: String, entry: String },
    #[error("operation not supported: {0}")]
    Unsupported(&'static str),
    #[error("io error: {0}")]
    Io(io::Error),
    #[error("archive error: {0}")]
    Archive(String),
    #[error("remote error: {0}")]
    Remote(String),
}

impl FsError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, FsError::NotFound(_) | FsError::IllegalSymlink(_))
            || matches!(self, FsError::Io(e) if e.kind() == io::ErrorKind::NotFound)
    }
}

impl From<io::Error> for FsError {
    fn from(io_error: io::Error) -> Self {
        match io_error.kind() {
            io::ErrorKind::NotFound => FsError::NotFound(io_error.to_string()),
            io::ErrorKind::InvalidInput => FsError::IllegalArgument(io_error.to_string()),
            _ => FsError::Io(io_error),
        }
    }
}

impl From<FsError> for io::Error {
    fn from(fs_error: FsError) -> Self {
        let kind = match &fs_error {
            FsError::NotFound(_) | FsError::IllegalSymlink(_) => io::ErrorKind::NotFound,
            FsError::IllegalArgument(_) => io::ErrorKind::InvalidInput,
            FsError::Unsupported(_) => io::ErrorKind::Unsupported,
            FsError::Io(e) => e.kind(),
            FsError::BreaksOut { .. } | FsError::Archive(_) | FsError::Remote(_) => {
                io::ErrorKind::Other
            }
        };
        io::Error::new(kind, fs_error)
    }
}

impl From<zip::result::ZipError> for FsError {
    fn from(zip_error: zip::result::ZipError) -> Self {
        match zip_error {
            zip::result::ZipError::Io(e) => e.into(),
            zip::result::ZipError::FileNotFound => {
                FsError::NotFound("file not found in archive".to_string())
            }
            other => FsError::Archive(other.to_string()),
        }
    }
}
