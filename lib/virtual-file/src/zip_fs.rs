use std::fmt;
use std::fs::File;
use std::io::{Cursor, Read, Seek};
use std::path::Path;

use parking_lot::Mutex;
use tracing::debug;
use url::Url;
use zip::ZipArchive;

use crate::archive::zip_datetime_to_millis;
use crate::mem_fs::{EntryInfo, Tree, mem_uri};
use crate::{Capabilities, DirEntry, FileSystem, FsError, Metadata, RelativePath, Result};

trait ReadSeek: Read + Seek {}

impl<T: Read + Seek> ReadSeek for T {}

type ArchiveReader = Box<dyn ReadSeek + Send>;

/// Upper bound on what is reserved up front for an entry. Sizes come from
/// the archive and can not be trusted.
const MAX_PREALLOCATION: u64 = 64 * 1024;

/// The entries of a zip archive, served in place.
///
/// This is the minimal tier: no symlinks, no descendant check and no
/// recursive listing shortcut.
pub struct ZipFileSystem {
    base: Url,
    archive: Mutex<ZipArchive<ArchiveReader>>,
    /// Archive index and uncompressed size of every file.
    index: Tree<(usize, u64)>,
}

impl fmt::Debug for ZipFileSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZipFileSystem")
            .field("base", &self.base)
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

impl ZipFileSystem {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::from_reader(&name, File::open(path)?)
    }

    pub fn from_reader<R>(name: &str, reader: R) -> Result<Self>
    where
        R: Read + Seek + Send + 'static,
    {
        let mut archive = ZipArchive::new(Box::new(reader) as ArchiveReader)?;
        let mut index = Tree::default();
        for i in 0..archive.len() {
            let entry = archive.by_index_raw(i)?;
            let Some(rel) = entry
                .enclosed_name()
                .and_then(|p| RelativePath::parse(&p.to_string_lossy()).ok())
            else {
                debug!(entry = entry.name(), "skipping zip entry outside of the archive root");
                continue;
            };
            if rel.is_root() {
                continue;
            }
            let info = EntryInfo {
                modified: entry.last_modified().map(zip_datetime_to_millis).unwrap_or(0),
                mode: entry.unix_mode().map(|m| m & 0o7777),
            };
            let inserted = if entry.is_dir() {
                index.insert_dir(rel.segments(), info)
            } else {
                index.insert_file(&rel, (i, entry.size()), info)
            };
            if let Err(err) = inserted {
                debug!(entry = entry.name(), error = %err, "skipping conflicting zip entry");
            }
        }

        let mut base = Url::parse("zip:///")
            .map_err(|e| FsError::IllegalArgument(format!("invalid archive name '{name}': {e}")))?;
        if let Ok(mut segments) = base.path_segments_mut() {
            segments.pop_if_empty().push(name).push("");
        }
        Ok(Self {
            base,
            archive: Mutex::new(archive),
            index,
        })
    }
}

impl FileSystem for ZipFileSystem {
    fn uri(&self, path: &RelativePath) -> Url {
        mem_uri(&self.base, path)
    }

    fn absolute(&self, path: &RelativePath) -> String {
        format!("/{path}")
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::empty()
    }

    fn metadata(&self, path: &RelativePath) -> Result<Metadata> {
        self.index.metadata(path, |(_, len)| *len)
    }

    fn read_dir(&self, path: &RelativePath) -> Result<Vec<DirEntry>> {
        self.index.read_dir(path)
    }

    fn open(&self, path: &RelativePath, _no_follow: bool) -> Result<Box<dyn Read + Send>> {
        let (index, len) = *self.index.file(path)?;
        let mut archive = self.archive.lock();
        let mut entry = archive.by_index(index)?;
        let mut data = Vec::with_capacity(len.min(MAX_PREALLOCATION) as usize);
        (&mut entry).take(len).read_to_end(&mut data)?;
        Ok(Box::new(Cursor::new(data)))
    }

    fn read_link(&self, path: &RelativePath) -> Result<Option<String>> {
        self.metadata(path)?;
        Ok(None)
    }
}
