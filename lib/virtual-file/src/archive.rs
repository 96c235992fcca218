//! Zip and tar export of a subtree, and extraction that refuses to write
//! outside of its target directory.

use std::fs::{self, File};
use std::io::{self, Read, Seek, Write};
use std::path::{Path, PathBuf};

use filetime::FileTime;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use time::{Date, Month, OffsetDateTime, PrimitiveDateTime, Time};
use tracing::{debug, trace};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::guard::normalize_path;
use crate::path::is_absolute;
use crate::{FsError, Metadata, RelativePath, Result, VirtualFile};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TarCompression {
    #[default]
    None,
    Gzip,
}

/// What goes into an archive and under which name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveOptions {
    includes: String,
    excludes: Option<String>,
    default_excludes: bool,
    follow_links: bool,
    only_descendants: bool,
    prefix: String,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self {
            includes: "**".to_string(),
            excludes: None,
            default_excludes: false,
            follow_links: true,
            only_descendants: false,
            prefix: String::new(),
        }
    }
}

impl ArchiveOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn includes(mut self, includes: &str) -> Self {
        self.includes = includes.to_string();
        self
    }

    pub fn excludes(mut self, excludes: &str) -> Self {
        self.excludes = Some(excludes.to_string());
        self
    }

    pub fn default_excludes(mut self, enabled: bool) -> Self {
        self.default_excludes = enabled;
        self
    }

    /// With this off, symlinks are neither archived nor walked through.
    pub fn follow_links(mut self, enabled: bool) -> Self {
        self.follow_links = enabled;
        self
    }

    /// Only archive entries whose real location is inside the tree.
    pub fn only_descendants(mut self, enabled: bool) -> Self {
        self.only_descendants = enabled;
        self
    }

    /// Prepended to every entry name. A trailing `/` is added when missing.
    pub fn prefix(mut self, prefix: &str) -> Self {
        self.prefix = prefix.to_string();
        self
    }

    fn normalized_prefix(&self) -> Result<String> {
        let prefix = self.prefix.replace('\\', "/");
        if prefix.is_empty() {
            return Ok(prefix);
        }
        if is_absolute(&prefix) || prefix.split('/').any(|s| s == "..") {
            return Err(FsError::IllegalArgument(format!(
                "archive prefix '{}' must stay relative",
                self.prefix
            )));
        }
        if prefix.ends_with('/') {
            Ok(prefix)
        } else {
            Ok(format!("{prefix}/"))
        }
    }

    /// Relative paths of the files to archive, below `source`.
    fn select(&self, source: &VirtualFile) -> Result<Vec<String>> {
        let mut listing = source
            .glob(&self.includes)
            .default_excludes(self.default_excludes)
            .follow_links(self.follow_links);
        if let Some(excludes) = &self.excludes {
            listing = listing.exclude(excludes);
        }
        let mut entries = listing.list()?;
        if self.only_descendants {
            entries.retain(|rel| source.is_descendant(rel).unwrap_or(false));
        }
        Ok(entries)
    }
}

/// Writes the files below `source` selected by `options` as a zip archive.
/// Returns the number of entries written.
pub fn zip<W: Write + Seek>(
    source: &VirtualFile,
    out: W,
    options: &ArchiveOptions,
) -> Result<usize> {
    let prefix = options.normalized_prefix()?;
    let mut writer = ZipWriter::new(out);
    let mut count = 0;
    for rel in options.select(source)? {
        let Some((meta, mut reader)) = open_entry(source, &rel, options)? else {
            continue;
        };
        let file_options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .last_modified_time(zip_datetime(meta.modified))
            .unix_permissions(meta.mode.unwrap_or(0o644))
            .large_file(meta.len >= u32::MAX as u64);
        writer.start_file(format!("{prefix}{rel}"), file_options)?;
        io::copy(&mut reader, &mut writer)?;
        count += 1;
    }
    writer.finish()?;
    Ok(count)
}

/// Writes the files below `source` selected by `options` as a tar archive.
/// Returns the number of entries written.
pub fn tar<W: Write>(
    source: &VirtualFile,
    out: W,
    options: &ArchiveOptions,
    compression: TarCompression,
) -> Result<usize> {
    match compression {
        TarCompression::None => {
            let mut builder = tar::Builder::new(out);
            let count = write_tar(&mut builder, source, options)?;
            builder.into_inner()?;
            Ok(count)
        }
        TarCompression::Gzip => {
            let mut builder = tar::Builder::new(GzEncoder::new(out, Compression::default()));
            let count = write_tar(&mut builder, source, options)?;
            builder.into_inner()?.finish()?;
            Ok(count)
        }
    }
}

fn write_tar<W: Write>(
    builder: &mut tar::Builder<W>,
    source: &VirtualFile,
    options: &ArchiveOptions,
) -> Result<usize> {
    let prefix = options.normalized_prefix()?;
    let mut count = 0;
    for rel in options.select(source)? {
        let Some((meta, reader)) = open_entry(source, &rel, options)? else {
            continue;
        };
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(meta.len);
        header.set_mode(meta.mode.unwrap_or(0o644));
        header.set_mtime(meta.modified / 1000);
        builder.append_data(&mut header, format!("{prefix}{rel}"), reader)?;
        count += 1;
    }
    Ok(count)
}

type EntryReader = Box<dyn Read + Send>;

/// Opens a selected entry. Entries that vanished since the scan are skipped.
fn open_entry(
    source: &VirtualFile,
    rel: &str,
    options: &ArchiveOptions,
) -> Result<Option<(Metadata, EntryReader)>> {
    let path = source.relative_path().join(&RelativePath::parse(rel)?);
    let fs = source.file_system();
    let opened = fs
        .metadata(&path)
        .and_then(|meta| Ok((meta, fs.open(&path, !options.follow_links)?)));
    match opened {
        Ok(entry) => Ok(Some(entry)),
        Err(err) if err.is_not_found() => {
            trace!(%rel, "entry vanished before it could be archived");
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

/// Extracts a zip archive below `target`.
///
/// Every entry name is checked before anything is written; a single entry
/// that would land outside of `target` fails the whole extraction.
pub fn unzip<R: Read + Seek>(target: &Path, archive: R) -> Result<usize> {
    extract_zip("zip archive", target, archive)
}

pub fn unzip_file(target: &Path, zip_file: &Path) -> Result<usize> {
    let file = File::open(zip_file)?;
    extract_zip(&zip_file.display().to_string(), target, file)
}

fn extract_zip<R: Read + Seek>(name: &str, target: &Path, archive: R) -> Result<usize> {
    let mut archive = ZipArchive::new(archive)?;
    fs::create_dir_all(target)?;
    let target_real = dunce::canonicalize(target)?;

    let mut plan = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let entry = archive.by_index_raw(index)?;
        let Some(dest) = destination(name, &target_real, entry.name())? else {
            continue;
        };
        plan.push((index, dest, entry.is_dir()));
    }

    let mut count = 0;
    for (index, dest, is_dir) in plan {
        if is_dir {
            create_dir_inside(name, &target_real, &dest)?;
            continue;
        }
        if let Some(parent) = dest.parent() {
            create_dir_inside(name, &target_real, parent)?;
        }
        let mut entry = archive.by_index(index)?;
        let mut out = create_file(&dest)?;
        io::copy(&mut entry, &mut out)?;
        drop(out);
        restore_attributes(
            &dest,
            entry.unix_mode(),
            entry.last_modified().map(zip_datetime_to_millis),
        );
        count += 1;
    }
    debug!(archive = name, target = %target.display(), count, "unzipped");
    Ok(count)
}

/// Extracts a tar archive below `target`.
///
/// Entries are checked as they are read. Symlink entries are only recreated
/// when they point inside of `target`.
pub fn untar<R: Read>(target: &Path, archive: R, compression: TarCompression) -> Result<usize> {
    match compression {
        TarCompression::None => extract_tar("tar archive", target, archive),
        TarCompression::Gzip => extract_tar("tar archive", target, GzDecoder::new(archive)),
    }
}

pub fn untar_file(target: &Path, tar_file: &Path, compression: TarCompression) -> Result<usize> {
    let file = File::open(tar_file)?;
    let name = tar_file.display().to_string();
    match compression {
        TarCompression::None => extract_tar(&name, target, file),
        TarCompression::Gzip => extract_tar(&name, target, GzDecoder::new(file)),
    }
}

fn extract_tar<R: Read>(name: &str, target: &Path, archive: R) -> Result<usize> {
    let mut archive = tar::Archive::new(archive);
    fs::create_dir_all(target)?;
    let target_real = dunce::canonicalize(target)?;

    let mut count = 0;
    for entry in archive.entries()? {
        let mut entry = entry?;
        let entry_name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
        let Some(dest) = destination(name, &target_real, &entry_name)? else {
            continue;
        };
        let header = entry.header();
        let kind = header.entry_type();
        let mode = header.mode().ok();
        let mtime = header.mtime().ok().map(|secs| secs * 1000);

        match kind {
            tar::EntryType::Directory => create_dir_inside(name, &target_real, &dest)?,
            tar::EntryType::Regular | tar::EntryType::Continuous => {
                if let Some(parent) = dest.parent() {
                    create_dir_inside(name, &target_real, parent)?;
                }
                let mut out = create_file(&dest)?;
                io::copy(&mut entry, &mut out)?;
                drop(out);
                restore_attributes(&dest, mode, mtime);
                count += 1;
            }
            tar::EntryType::Symlink => {
                let Some(link) = entry.link_name()?.map(|l| l.into_owned()) else {
                    continue;
                };
                let Some(parent) = dest.parent() else {
                    continue;
                };
                let resolved = normalize_path(&parent.join(&link));
                if !resolved.starts_with(&target_real) {
                    debug!(
                        entry = %entry_name,
                        link = %link.display(),
                        "skipping symlink out of the target"
                    );
                    continue;
                }
                create_dir_inside(name, &target_real, parent)?;
                create_symlink(&link, &dest)?;
            }
            other => {
                trace!(entry = %entry_name, kind = ?other, "skipping unsupported tar entry");
            }
        }
    }
    debug!(archive = name, target = %target.display(), count, "untarred");
    Ok(count)
}

/// Where an entry goes, or `None` for entries naming the target itself.
fn destination(archive: &str, target_real: &Path, entry: &str) -> Result<Option<PathBuf>> {
    let breaks_out = || FsError::BreaksOut {
        archive: archive.to_string(),
        entry: entry.to_string(),
    };
    if is_absolute(entry) {
        return Err(breaks_out());
    }
    let rel = RelativePath::parse(entry).map_err(|_| breaks_out())?;
    if rel.escapes_root() {
        return Err(breaks_out());
    }
    if rel.is_root() {
        return Ok(None);
    }
    Ok(Some(rel.to_path(target_real)))
}

/// Creates `dir` and makes sure symlinks already in place did not redirect
/// it out of the target.
fn create_dir_inside(archive: &str, target_real: &Path, dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)?;
    let real = dunce::canonicalize(dir)?;
    if !real.starts_with(target_real) {
        return Err(FsError::BreaksOut {
            archive: archive.to_string(),
            entry: dir.display().to_string(),
        });
    }
    Ok(())
}

/// Creates a regular file, replacing a symlink that may sit in its place.
fn create_file(dest: &Path) -> io::Result<File> {
    if fs::symlink_metadata(dest).is_ok_and(|m| m.file_type().is_symlink()) {
        fs::remove_file(dest)?;
    }
    File::create(dest)
}

#[cfg(unix)]
fn create_symlink(link: &Path, dest: &Path) -> io::Result<()> {
    if fs::symlink_metadata(dest).is_ok() {
        fs::remove_file(dest)?;
    }
    std::os::unix::fs::symlink(link, dest)
}

#[cfg(not(unix))]
fn create_symlink(link: &Path, dest: &Path) -> io::Result<()> {
    trace!(
        link = %link.display(),
        dest = %dest.display(),
        "symlinks are not extracted on this platform"
    );
    Ok(())
}

/// Restores permission bits and mtime. Setuid, setgid and sticky bits from
/// the archive are dropped.
fn restore_attributes(dest: &Path, mode: Option<u32>, modified: Option<u64>) {
    #[cfg(unix)]
    if let Some(mode) = mode {
        use std::os::unix::fs::PermissionsExt;
        let permissions = fs::Permissions::from_mode(mode & 0o777);
        if let Err(err) = fs::set_permissions(dest, permissions) {
            debug!(dest = %dest.display(), error = %err, "could not restore permissions");
        }
    }
    #[cfg(not(unix))]
    let _ = mode;

    if let Some(millis) = modified {
        let mtime = FileTime::from_unix_time((millis / 1000) as i64, 0);
        if let Err(err) = filetime::set_file_mtime(dest, mtime) {
            debug!(dest = %dest.display(), error = %err, "could not restore mtime");
        }
    }
}

/// Zip timestamps carry no zone and count from 1980; out of range values
/// are clamped to the earliest representable time.
pub(crate) fn zip_datetime(millis: u64) -> zip::DateTime {
    OffsetDateTime::from_unix_timestamp((millis / 1000) as i64)
        .ok()
        .and_then(|t| {
            zip::DateTime::from_date_and_time(
                u16::try_from(t.year()).ok()?,
                t.month() as u8,
                t.day(),
                t.hour(),
                t.minute(),
                t.second(),
            )
            .ok()
        })
        .unwrap_or_default()
}

pub(crate) fn zip_datetime_to_millis(datetime: zip::DateTime) -> u64 {
    let date = Month::try_from(datetime.month())
        .ok()
        .and_then(|month| {
            Date::from_calendar_date(datetime.year() as i32, month, datetime.day()).ok()
        });
    let time = Time::from_hms(datetime.hour(), datetime.minute(), datetime.second()).ok();
    match (date, time) {
        (Some(date), Some(time)) => {
            let secs = PrimitiveDateTime::new(date, time).assume_utc().unix_timestamp();
            secs.max(0) as u64 * 1000
        }
        _ => 0,
    }
}
