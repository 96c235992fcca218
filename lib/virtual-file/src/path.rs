use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{FsError, Result};

/// A normalized path relative to the root of a tree.
///
/// Both `/` and `\` separate segments, empty and `.` segments vanish and
/// `..` cancels the previous segment. A `..` with nothing left to cancel is
/// kept as a pending parent reference, which means the path points outside
/// of the root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelativePath {
    ups: usize,
    segments: Vec<String>,
}

impl RelativePath {
    pub fn root() -> Self {
        Self::default()
    }

    /// Parses user input. Absolute paths are rejected.
    pub fn parse(path: &str) -> Result<Self> {
        if is_absolute(path) {
            return Err(FsError::IllegalArgument(format!("'{path}' is an absolute path")));
        }
        let mut ret = Self::root();
        ret.push_all(path);
        Ok(ret)
    }

    /// Descends into `name`. Separators inside `name` descend further and a
    /// leading separator is ignored.
    pub fn child(&self, name: &str) -> Self {
        let mut ret = self.clone();
        ret.push_all(name);
        ret
    }

    /// Appends a single directory entry name, separators and all.
    pub(crate) fn join_name(&self, name: &str) -> Self {
        let mut ret = self.clone();
        ret.segments.push(name.to_string());
        ret
    }

    pub fn join(&self, other: &RelativePath) -> Self {
        let mut ret = self.clone();
        for _ in 0..other.ups {
            ret.pop();
        }
        ret.segments.extend(other.segments.iter().cloned());
        ret
    }

    pub fn parent(&self) -> Self {
        let mut ret = self.clone();
        ret.pop();
        ret
    }

    pub fn file_name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Number of pending `..` references above the root.
    pub fn ups(&self) -> usize {
        self.ups
    }

    pub fn is_root(&self) -> bool {
        self.ups == 0 && self.segments.is_empty()
    }

    pub fn escapes_root(&self) -> bool {
        self.ups > 0
    }

    /// Lexically places this path below `base`.
    pub fn to_path(&self, base: &Path) -> PathBuf {
        let mut ret = base.to_path_buf();
        for _ in 0..self.ups {
            ret.push("..");
        }
        for segment in &self.segments {
            ret.push(segment);
        }
        ret
    }

    fn push_all(&mut self, path: &str) {
        for segment in path.split(['/', '\\']) {
            match segment {
                "" | "." => {}
                ".." => self.pop(),
                other => self.segments.push(other.to_string()),
            }
        }
    }

    fn pop(&mut self) {
        if self.segments.pop().is_none() {
            self.ups += 1;
        }
    }
}

impl fmt::Display for RelativePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for _ in 0..self.ups {
            if !first {
                f.write_str("/")?;
            }
            f.write_str("..")?;
            first = false;
        }
        for segment in &self.segments {
            if !first {
                f.write_str("/")?;
            }
            f.write_str(segment)?;
            first = false;
        }
        Ok(())
    }
}

pub(crate) fn is_absolute(path: &str) -> bool {
    let bytes = path.as_bytes();
    if matches!(bytes.first(), Some(b'/') | Some(b'\\')) {
        return true;
    }
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}
