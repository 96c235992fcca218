//! Ant-style glob patterns.
//!
//! A pattern is a `/`-separated list of segments. Within a segment `*`, `?`
//! and `[...]` work like shell globs, a `**` segment matches zero or more
//! whole segments, and a trailing `/` is shorthand for `/**`. Several
//! patterns can be given at once, separated by commas.

use serde::{Deserialize, Serialize};

use crate::{FsError, Result};

/// Patterns excluded from listings and archives unless asked otherwise.
///
/// These cover the metadata directories and scratch files of common version
/// control systems and editors.
pub const DEFAULT_EXCLUDES: &[&str] = &[
    "**/*~",
    "**/#*#",
    "**/.#*",
    "**/%*%",
    "**/._*",
    "**/CVS",
    "**/CVS/**",
    "**/.cvsignore",
    "**/SCCS",
    "**/SCCS/**",
    "**/vssver.scc",
    "**/.svn",
    "**/.svn/**",
    "**/.DS_Store",
    "**/.git",
    "**/.git/**",
    "**/.gitattributes",
    "**/.gitignore",
    "**/.gitmodules",
    "**/.hg",
    "**/.hg/**",
    "**/.hgignore",
    "**/.hgsub",
    "**/.hgsubstate",
    "**/.hgtags",
    "**/.bzr",
    "**/.bzr/**",
    "**/.bzrignore",
];

/// The uncompiled form of a [`GlobPattern`], cheap to clone and send around.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobSpec {
    pub includes: Option<String>,
    pub excludes: Option<String>,
    pub default_excludes: bool,
    pub case_sensitive: bool,
}

impl Default for GlobSpec {
    fn default() -> Self {
        Self {
            includes: None,
            excludes: None,
            default_excludes: false,
            case_sensitive: true,
        }
    }
}

impl GlobSpec {
    /// `includes == None` selects everything, `Some("")` selects nothing.
    pub fn new(includes: Option<&str>, excludes: Option<&str>) -> Self {
        Self {
            includes: includes.map(str::to_string),
            excludes: excludes.map(str::to_string),
            ..Self::default()
        }
    }

    pub fn default_excludes(mut self, enabled: bool) -> Self {
        self.default_excludes = enabled;
        self
    }

    pub fn case_sensitive(mut self, enabled: bool) -> Self {
        self.case_sensitive = enabled;
        self
    }

    pub fn compile(self) -> Result<GlobPattern> {
        let includes = match &self.includes {
            None => None,
            Some(list) => Some(compile_list(list)?),
        };
        let mut excludes = match &self.excludes {
            None => Vec::new(),
            Some(list) => compile_list(list)?,
        };
        if self.default_excludes {
            for pattern in DEFAULT_EXCLUDES {
                excludes.push(Compiled::new(pattern)?);
            }
        }
        let options = glob::MatchOptions {
            case_sensitive: self.case_sensitive,
            require_literal_separator: true,
            require_literal_leading_dot: false,
        };
        Ok(GlobPattern {
            spec: self,
            includes,
            excludes,
            options,
        })
    }
}

/// A compiled include/exclude pattern set.
///
/// A path matches when at least one include matches and no exclude does.
#[derive(Debug, Clone)]
pub struct GlobPattern {
    spec: GlobSpec,
    includes: Option<Vec<Compiled>>,
    excludes: Vec<Compiled>,
    options: glob::MatchOptions,
}

impl GlobPattern {
    pub fn new(includes: Option<&str>, excludes: Option<&str>) -> Result<Self> {
        GlobSpec::new(includes, excludes).compile()
    }

    /// Matches every path.
    pub fn all() -> Self {
        Self {
            spec: GlobSpec::default(),
            includes: None,
            excludes: Vec::new(),
            options: glob::MatchOptions::new(),
        }
    }

    pub fn spec(&self) -> &GlobSpec {
        &self.spec
    }

    /// Whether the `/`-separated relative `path` is selected.
    pub fn matches(&self, path: &str) -> bool {
        let segments = split(path);
        let included = match &self.includes {
            None => true,
            Some(includes) => includes
                .iter()
                .any(|p| p.matches(&segments, self.options)),
        };
        included
            && !self
                .excludes
                .iter()
                .any(|p| p.matches(&segments, self.options))
    }

    /// Whether anything below `dir` could still be selected.
    pub fn may_match_below(&self, dir: &str) -> bool {
        let segments = split(dir);
        let included = match &self.includes {
            None => true,
            Some(includes) => includes
                .iter()
                .any(|p| p.matches_prefix(&segments, self.options)),
        };
        included && !self.excludes_subtree(dir)
    }

    /// Whether some exclude rules out everything below `dir`.
    pub fn excludes_subtree(&self, dir: &str) -> bool {
        let segments = split(dir);
        self.excludes
            .iter()
            .any(|p| p.covers_subtree(&segments, self.options))
    }
}

#[derive(Debug, Clone)]
enum Segment {
    Recursive,
    Single(glob::Pattern),
}

#[derive(Debug, Clone)]
struct Compiled {
    segments: Vec<Segment>,
}

impl Compiled {
    fn new(pattern: &str) -> Result<Self> {
        let mut pattern = pattern.trim().replace('\\', "/");
        if pattern.ends_with('/') {
            pattern.push_str("**");
        }
        let mut segments = Vec::new();
        for segment in pattern.split('/').filter(|s| !s.is_empty()) {
            if segment == "**" {
                // consecutive `**` are equivalent to a single one
                if !matches!(segments.last(), Some(Segment::Recursive)) {
                    segments.push(Segment::Recursive);
                }
                continue;
            }
            let compiled = glob::Pattern::new(segment).map_err(|e| {
                FsError::IllegalArgument(format!("invalid glob pattern '{pattern}': {e}"))
            })?;
            segments.push(Segment::Single(compiled));
        }
        Ok(Self { segments })
    }

    fn matches(&self, path: &[&str], options: glob::MatchOptions) -> bool {
        matches_from(&self.segments, path, options)
    }

    fn matches_prefix(&self, dir: &[&str], options: glob::MatchOptions) -> bool {
        prefix_from(&self.segments, dir, options)
    }

    fn covers_subtree(&self, dir: &[&str], options: glob::MatchOptions) -> bool {
        covers_from(&self.segments, dir, options)
    }
}

fn matches_from(segments: &[Segment], path: &[&str], options: glob::MatchOptions) -> bool {
    walk(segments, path, options, false)
}

/// Whether a path starting with `dir` and continuing below could match.
fn prefix_from(segments: &[Segment], dir: &[&str], options: glob::MatchOptions) -> bool {
    let Some((first, tail)) = dir.split_first() else {
        return !segments.is_empty();
    };
    match segments.split_first() {
        None => false,
        Some((Segment::Recursive, _)) => true,
        Some((Segment::Single(pattern), rest)) => {
            pattern.matches_with(first, options) && prefix_from(rest, tail, options)
        }
    }
}

/// Whether every path strictly below `dir` matches.
fn covers_from(segments: &[Segment], dir: &[&str], options: glob::MatchOptions) -> bool {
    walk(segments, dir, options, true)
}

/// Matches `segments` against `path` in `O(segments * path)`.
///
/// Cell `(i, j)` tells whether `segments[i..]` accepts `path[j..]`. With
/// `covers` set, a trailing `**` accepts anything and running out of
/// segments accepts nothing.
fn walk(segments: &[Segment], path: &[&str], options: glob::MatchOptions, covers: bool) -> bool {
    let width = path.len() + 1;
    let mut table = vec![false; (segments.len() + 1) * width];
    if !covers {
        table[segments.len() * width + path.len()] = true;
    }
    for (i, segment) in segments.iter().enumerate().rev() {
        for j in (0..width).rev() {
            table[i * width + j] = match segment {
                Segment::Recursive => {
                    (covers && i + 1 == segments.len())
                        || table[(i + 1) * width + j]
                        || (j < path.len() && table[i * width + j + 1])
                }
                Segment::Single(pattern) => {
                    j < path.len()
                        && pattern.matches_with(path[j], options)
                        && table[(i + 1) * width + j + 1]
                }
            };
        }
    }
    table[0]
}

fn compile_list(list: &str) -> Result<Vec<Compiled>> {
    list.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(Compiled::new)
        .collect()
}

fn split(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}
