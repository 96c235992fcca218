use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::guard::DEFAULT_MAX_SYMLINKS;
use crate::{FsError, Result};

/// Configuration of a [`LocalFileSystem`](crate::LocalFileSystem).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalFsConfig {
    pub root: PathBuf,
    /// Treat symlinks resolving outside of `root` as absent.
    ///
    /// Turning this off restores the unchecked behaviour where any link is
    /// followed wherever it points.
    pub strict: bool,
    /// Upper bound on symlinks crossed while resolving a single path.
    pub max_symlinks: u16,
}

impl Default for LocalFsConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::new(),
            strict: true,
            max_symlinks: DEFAULT_MAX_SYMLINKS,
        }
    }
}

impl LocalFsConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn max_symlinks(mut self, max_symlinks: u16) -> Self {
        self.max_symlinks = max_symlinks;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.root.as_os_str().is_empty() {
            return Err(FsError::IllegalArgument("root must not be empty".to_string()));
        }
        if self.max_symlinks == 0 {
            return Err(FsError::IllegalArgument(
                "max_symlinks must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_strict() {
        let cfg = LocalFsConfig::new("/srv/ws");
        assert!(cfg.strict);
        assert_eq!(cfg.max_symlinks, DEFAULT_MAX_SYMLINKS);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn invalid_configs_are_rejected() {
        assert!(LocalFsConfig::default().validate().is_err());
        assert!(LocalFsConfig::new("/srv").max_symlinks(0).validate().is_err());
    }

    #[test]
    fn config_survives_the_wire() {
        let bytes = bincode::serialize(&LocalFsConfig::new("/srv/ws").strict(false)).unwrap();
        let cfg: LocalFsConfig = bincode::deserialize(&bytes).unwrap();
        assert_eq!(cfg.root, PathBuf::from("/srv/ws"));
        assert!(!cfg.strict);
    }
}
