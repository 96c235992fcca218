//! Path based stand-in for platforms without `openat`.
//!
//! Symlinks are still refused per component, but the check and the use are
//! two separate calls.

use std::ffi::OsStr;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use super::{DirEntryInfo, Stat};
use crate::FileType;

#[derive(Debug)]
pub(crate) struct DirHandle {
    path: PathBuf,
}

impl DirHandle {
    pub fn try_clone(&self) -> io::Result<Self> {
        Ok(Self {
            path: self.path.clone(),
        })
    }
}

fn refuse_symlink(path: &Path) -> io::Result<fs::Metadata> {
    let meta = fs::symlink_metadata(path)?;
    if meta.file_type().is_symlink() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} is a symlink", path.display()),
        ));
    }
    Ok(meta)
}

pub(crate) fn open_root_dir(path: &Path) -> io::Result<DirHandle> {
    let meta = fs::metadata(path)?;
    if !meta.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::NotADirectory,
            format!("{} is not a directory", path.display()),
        ));
    }
    Ok(DirHandle {
        path: path.to_path_buf(),
    })
}

pub(crate) fn open_dir_at(parent: &DirHandle, name: &OsStr) -> io::Result<DirHandle> {
    let path = parent.path.join(name);
    let meta = refuse_symlink(&path)?;
    if !meta.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::NotADirectory,
            format!("{} is not a directory", path.display()),
        ));
    }
    Ok(DirHandle { path })
}

pub(crate) fn open_file_at(parent: &DirHandle, name: &OsStr) -> io::Result<File> {
    let path = parent.path.join(name);
    refuse_symlink(&path)?;
    File::open(path)
}

pub(crate) fn stat_dir(dir: &DirHandle) -> io::Result<Stat> {
    Ok(stat_from_std(&fs::metadata(&dir.path)?))
}

pub(crate) fn stat_at(parent: &DirHandle, name: &OsStr, nofollow: bool) -> io::Result<Stat> {
    let path = parent.path.join(name);
    let meta = if nofollow {
        fs::symlink_metadata(path)?
    } else {
        fs::metadata(path)?
    };
    Ok(stat_from_std(&meta))
}

pub(crate) fn readlink_at(parent: &DirHandle, name: &OsStr) -> io::Result<Vec<u8>> {
    let target = fs::read_link(parent.path.join(name))?;
    Ok(target.to_string_lossy().into_owned().into_bytes())
}

pub(crate) fn can_read_at(dir: &DirHandle, name: Option<&OsStr>) -> bool {
    let path = match name {
        Some(name) => dir.path.join(name),
        None => dir.path.clone(),
    };
    match fs::metadata(&path) {
        Ok(meta) if meta.is_dir() => fs::read_dir(&path).is_ok(),
        Ok(_) => File::open(&path).is_ok(),
        Err(_) => false,
    }
}

pub(crate) fn read_dir(dir: &DirHandle) -> io::Result<Vec<DirEntryInfo>> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(&dir.path)? {
        let entry = entry?;
        let ft = entry.file_type()?;
        entries.push(DirEntryInfo {
            name: entry.file_name().to_string_lossy().into_owned(),
            ft: FileType {
                dir: ft.is_dir(),
                file: ft.is_file(),
                symlink: ft.is_symlink(),
            },
        });
    }
    Ok(entries)
}

fn stat_from_std(meta: &fs::Metadata) -> Stat {
    let ft = meta.file_type();
    let modified = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    Stat {
        ft: FileType {
            dir: ft.is_dir(),
            file: ft.is_file(),
            symlink: ft.is_symlink(),
        },
        len: meta.len(),
        modified,
        mode: None,
    }
}
