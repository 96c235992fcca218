use std::collections::VecDeque;

use tracing::{debug, trace};

use crate::{FileSystem, GlobPattern, RelativePath, Result, ScanOptions};

struct PendingDir {
    path: RelativePath,
    rel: String,
    /// Canonical locations of the directories above, to cut symlink cycles.
    ancestors: Vec<String>,
}

/// Walks everything below `base` and returns the relative paths selected by
/// `pattern`, sorted.
///
/// A `base` that is missing, not a directory or hidden by the boundary
/// yields nothing. Without `follow_links` symlinks are skipped entirely, and
/// so is a `base` reached through one below the root.
pub(crate) fn scan<F: FileSystem + ?Sized>(
    fs: &F,
    base: &RelativePath,
    pattern: &GlobPattern,
    options: ScanOptions,
) -> Result<Vec<String>> {
    match fs.metadata(base) {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => return Ok(Vec::new()),
        Err(err) if err.is_not_found() => return Ok(Vec::new()),
        Err(err) => return Err(err),
    }
    if !options.follow_links && !base.is_root() && fs.has_symlink(base)? {
        trace!(%base, "not scanning below a symlink");
        return Ok(Vec::new());
    }

    let ancestors = if options.follow_links {
        vec![fs.canonical(base)?]
    } else {
        Vec::new()
    };
    let mut results = Vec::new();
    let mut remaining = VecDeque::new();
    remaining.push_back(PendingDir {
        path: base.clone(),
        rel: String::new(),
        ancestors,
    });

    while let Some(dir) = remaining.pop_front() {
        let entries = match fs.read_dir(&dir.path) {
            Ok(entries) => entries,
            Err(err) if err.is_not_found() => {
                trace!(path = %dir.path, "directory vanished while scanning");
                continue;
            }
            Err(err) => return Err(err),
        };

        for entry in entries {
            let rel = if dir.rel.is_empty() {
                entry.name.clone()
            } else {
                format!("{}/{}", dir.rel, entry.name)
            };
            let path = dir.path.join_name(&entry.name);

            let mut ft = entry.file_type;
            if ft.is_symlink() {
                if !options.follow_links {
                    continue;
                }
                match fs.metadata(&path) {
                    Ok(meta) => ft = meta.ft,
                    Err(err) if err.is_not_found() => {
                        trace!(%rel, "skipping symlink that can not be followed");
                        continue;
                    }
                    Err(err) => return Err(err),
                }
            }

            if !ft.is_dir() {
                if pattern.matches(&rel) {
                    results.push(rel);
                }
                continue;
            }

            if options.include_directories && pattern.matches(&rel) {
                results.push(rel.clone());
            }
            if !pattern.may_match_below(&rel) {
                continue;
            }
            let ancestors = if options.follow_links {
                let id = match fs.canonical(&path) {
                    Ok(id) => id,
                    Err(err) if err.is_not_found() => continue,
                    Err(err) => return Err(err),
                };
                if dir.ancestors.contains(&id) {
                    debug!(%rel, "symlink cycle, not descending");
                    continue;
                }
                let mut ancestors = dir.ancestors.clone();
                ancestors.push(id);
                ancestors
            } else {
                Vec::new()
            };
            remaining.push_back(PendingDir {
                path,
                rel,
                ancestors,
            });
        }
    }

    results.sort();
    Ok(results)
}
