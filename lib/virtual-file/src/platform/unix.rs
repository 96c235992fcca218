use std::ffi::{CStr, CString, OsStr};
use std::fs::File;
use std::io;
use std::mem;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::path::Path;

use super::{DirEntryInfo, Stat};
use crate::FileType;

#[derive(Debug)]
pub(crate) struct DirHandle {
    fd: OwnedFd,
}

impl DirHandle {
    pub fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    pub fn try_clone(&self) -> io::Result<Self> {
        Ok(Self {
            fd: self.fd.try_clone()?,
        })
    }
}

fn c_name(name: &OsStr) -> io::Result<CString> {
    CString::new(name.as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "name contains NUL"))
}

pub(crate) fn open_root_dir(path: &Path) -> io::Result<DirHandle> {
    let cstr = c_name(path.as_os_str())?;
    let flags = libc::O_RDONLY | libc::O_DIRECTORY | libc::O_CLOEXEC;
    let fd = unsafe { libc::open(cstr.as_ptr(), flags) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(DirHandle {
        fd: unsafe { OwnedFd::from_raw_fd(fd) },
    })
}

pub(crate) fn open_dir_at(parent: &DirHandle, name: &OsStr) -> io::Result<DirHandle> {
    let cstr = c_name(name)?;
    let flags = libc::O_RDONLY | libc::O_DIRECTORY | libc::O_CLOEXEC | libc::O_NOFOLLOW;
    let fd = unsafe { libc::openat(parent.as_raw_fd(), cstr.as_ptr(), flags) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(DirHandle {
        fd: unsafe { OwnedFd::from_raw_fd(fd) },
    })
}

/// Opens a file for reading. A symlink in place of `name` fails with `ELOOP`.
pub(crate) fn open_file_at(parent: &DirHandle, name: &OsStr) -> io::Result<File> {
    let cstr = c_name(name)?;
    let flags = libc::O_RDONLY | libc::O_CLOEXEC | libc::O_NOFOLLOW;
    let fd = unsafe { libc::openat(parent.as_raw_fd(), cstr.as_ptr(), flags) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(unsafe { File::from_raw_fd(fd) })
}

pub(crate) fn stat_dir(dir: &DirHandle) -> io::Result<Stat> {
    let mut st = unsafe { mem::zeroed::<libc::stat>() };
    let res = unsafe { libc::fstat(dir.as_raw_fd(), &mut st) };
    if res < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(stat_from_libc(&st))
}

pub(crate) fn stat_at(parent: &DirHandle, name: &OsStr, nofollow: bool) -> io::Result<Stat> {
    let cstr = c_name(name)?;
    let mut st = unsafe { mem::zeroed::<libc::stat>() };
    let flags = if nofollow {
        libc::AT_SYMLINK_NOFOLLOW
    } else {
        0
    };
    let res = unsafe { libc::fstatat(parent.as_raw_fd(), cstr.as_ptr(), &mut st, flags) };
    if res < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(stat_from_libc(&st))
}

pub(crate) fn readlink_at(parent: &DirHandle, name: &OsStr) -> io::Result<Vec<u8>> {
    let cstr = c_name(name)?;
    let mut buf = vec![0u8; 1024];
    loop {
        let res = unsafe {
            libc::readlinkat(
                parent.as_raw_fd(),
                cstr.as_ptr(),
                buf.as_mut_ptr() as *mut _,
                buf.len(),
            )
        };
        if res < 0 {
            return Err(io::Error::last_os_error());
        }
        let len = res as usize;
        if len < buf.len() {
            buf.truncate(len);
            return Ok(buf);
        }
        buf.resize(buf.len() * 2, 0);
    }
}

/// Whether the current process may read `name`, or `dir` itself when
/// `name` is `None`.
pub(crate) fn can_read_at(dir: &DirHandle, name: Option<&OsStr>) -> bool {
    let cstr = match name.map(c_name).transpose() {
        Ok(Some(cstr)) => cstr,
        Ok(None) => c".".to_owned(),
        Err(_) => return false,
    };
    let res = unsafe { libc::faccessat(dir.as_raw_fd(), cstr.as_ptr(), libc::R_OK, 0) };
    res == 0
}

pub(crate) fn read_dir(dir: &DirHandle) -> io::Result<Vec<DirEntryInfo>> {
    let dup_fd = unsafe { libc::dup(dir.as_raw_fd()) };
    if dup_fd < 0 {
        return Err(io::Error::last_os_error());
    }
    let dirp = unsafe { libc::fdopendir(dup_fd) };
    if dirp.is_null() {
        unsafe { libc::close(dup_fd) };
        return Err(io::Error::last_os_error());
    }
    // the duplicate shares its offset with `dir`, start from the top
    unsafe { libc::rewinddir(dirp) };

    let mut raw = Vec::new();
    loop {
        set_errno(0);
        let ent = unsafe { libc::readdir(dirp) };
        if ent.is_null() {
            let err = errno();
            if err == 0 {
                break;
            }
            unsafe { libc::closedir(dirp) };
            return Err(io::Error::from_raw_os_error(err));
        }
        let name = unsafe { CStr::from_ptr((*ent).d_name.as_ptr()) }
            .to_bytes()
            .to_vec();
        if name == b"." || name == b".." {
            continue;
        }
        raw.push(name);
    }
    unsafe { libc::closedir(dirp) };

    let mut entries = Vec::with_capacity(raw.len());
    for name in raw {
        let os_name = OsStr::from_bytes(&name);
        let stat = match stat_at(dir, os_name, true) {
            Ok(stat) => stat,
            // removed while listing
            Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
            Err(err) => return Err(err),
        };
        entries.push(DirEntryInfo {
            name: String::from_utf8_lossy(&name).into_owned(),
            ft: stat.ft,
        });
    }
    Ok(entries)
}

fn stat_from_libc(st: &libc::stat) -> Stat {
    let fmt = st.st_mode & libc::S_IFMT;
    let ft = FileType {
        dir: fmt == libc::S_IFDIR,
        file: fmt == libc::S_IFREG,
        symlink: fmt == libc::S_IFLNK,
    };
    Stat {
        ft,
        len: st.st_size as u64,
        modified: mtime_millis(st),
        mode: Some((st.st_mode & 0o7777) as u32),
    }
}

#[cfg(target_os = "macos")]
fn mtime_millis(st: &libc::stat) -> u64 {
    let secs = st.st_mtimespec.tv_sec.max(0) as u64;
    secs * 1000 + st.st_mtimespec.tv_nsec as u64 / 1_000_000
}

#[cfg(not(target_os = "macos"))]
fn mtime_millis(st: &libc::stat) -> u64 {
    let secs = st.st_mtime.max(0) as u64;
    secs * 1000 + st.st_mtime_nsec as u64 / 1_000_000
}

#[cfg(target_os = "linux")]
fn errno() -> i32 {
    unsafe { *libc::__errno_location() }
}

#[cfg(not(target_os = "linux"))]
fn errno() -> i32 {
    unsafe { *libc::__error() }
}

#[cfg(target_os = "linux")]
fn set_errno(val: i32) {
    unsafe {
        *libc::__errno_location() = val;
    }
}

#[cfg(not(target_os = "linux"))]
fn set_errno(val: i32) {
    unsafe {
        *libc::__error() = val;
    }
}
