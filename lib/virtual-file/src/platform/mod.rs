//! Handle-based access to the host filesystem.
//!
//! Everything below the root is reached through directory handles opened
//! one component at a time without following symlinks, so a component that
//! is swapped for a link after it was checked fails the call instead of
//! redirecting it.

#[cfg(not(unix))]
mod fallback;
#[cfg(unix)]
mod unix;

#[cfg(not(unix))]
pub(crate) use fallback::*;
#[cfg(unix)]
pub(crate) use unix::*;

use crate::FileType;

#[derive(Debug, Clone, Copy)]
pub(crate) struct Stat {
    pub ft: FileType,
    pub len: u64,
    /// Milliseconds since the unix epoch.
    pub modified: u64,
    pub mode: Option<u32>,
}

#[derive(Debug, Clone)]
pub(crate) struct DirEntryInfo {
    pub name: String,
    pub ft: FileType,
}

impl Stat {
    pub fn metadata(&self) -> crate::Metadata {
        crate::Metadata {
            ft: self.ft,
            len: self.len,
            modified: self.modified,
            mode: self.mode,
        }
    }
}

/// Opens `components` below `dir` one by one, refusing symlinks.
pub(crate) fn walk_dirs<'a, I>(dir: &DirHandle, components: I) -> std::io::Result<DirHandle>
where
    I: IntoIterator<Item = &'a std::ffi::OsStr>,
{
    let mut current = dir.try_clone()?;
    for name in components {
        current = open_dir_at(&current, name)?;
    }
    Ok(current)
}
