//! The same expectations, checked against every backend.

mod common;

use std::collections::HashSet;
use std::io::Cursor;

use anyhow::Result;
use pretty_assertions::assert_eq;
use virtual_file::archive::ArchiveOptions;
use virtual_file::{FsError, VirtualFile};

use common::*;

fn glob(root: &VirtualFile, includes: &str, excludes: Option<&str>) -> Result<Vec<String>> {
    Ok(root.list_glob(includes, excludes, false)?)
}

#[test]
fn glob_listing() -> Result<()> {
    let dir = tempfile::tempdir()?;
    for (backend, root) in glob_backends(dir.path()) {
        assert_eq!(
            glob(&root, "**/*.txt", None)?,
            vec![".hg/config.txt", "sub/mid.txt", "sub/subsub/lowest.txt", "top.txt"],
            "{backend}"
        );
        assert_eq!(
            root.glob("**/*.txt").default_excludes(true).list()?,
            vec!["sub/mid.txt", "sub/subsub/lowest.txt", "top.txt"],
            "{backend}"
        );
        assert_eq!(
            glob(&root, "**", None)?,
            vec![
                ".hg/config.txt",
                "sub/mid.txt",
                "sub/subsub/lowest.txt",
                "top.txt",
                "very/deep/path/here"
            ],
            "{backend}"
        );
        assert!(glob(&root, "", None)?.is_empty(), "{backend}");
        assert_eq!(
            glob(&root, "sub/", None)?,
            vec!["sub/mid.txt", "sub/subsub/lowest.txt"],
            "{backend}"
        );
        for excludes in ["sub/subsub/", "sub/subsub/**", "**/subsub/"] {
            assert_eq!(
                glob(&root, "sub/", Some(excludes))?,
                vec!["sub/mid.txt"],
                "{backend}: {excludes}"
            );
        }
        assert_eq!(
            glob(&root, "sub/", Some("**/notthere/"))?,
            vec!["sub/mid.txt", "sub/subsub/lowest.txt"],
            "{backend}"
        );
        assert_eq!(
            glob(&root, "**/mid*,**/conf*", None)?,
            vec![".hg/config.txt", "sub/mid.txt"],
            "{backend}"
        );
        assert_eq!(glob(&root, "*.txt", None)?, vec!["top.txt"], "{backend}");
        assert_eq!(
            glob(&root, "**", Some("**/mid*,**/conf*"))?,
            vec!["sub/subsub/lowest.txt", "top.txt", "very/deep/path/here"],
            "{backend}"
        );
    }
    Ok(())
}

#[test]
fn glob_listing_is_idempotent() -> Result<()> {
    let dir = tempfile::tempdir()?;
    for (backend, root) in glob_backends(dir.path()) {
        let first = glob(&root, "**/*.txt", Some("top.txt"))?;
        let second = glob(&root, "**/*.txt", Some("top.txt"))?;
        assert_eq!(first, second, "{backend}");
        assert_eq!(first.len(), 3, "{backend}");
    }
    Ok(())
}

#[test]
fn glob_listing_with_directories() -> Result<()> {
    let dir = tempfile::tempdir()?;
    for (backend, root) in glob_backends(dir.path()) {
        assert_eq!(
            root.list_glob("sub/**", None, true)?,
            vec!["sub", "sub/mid.txt", "sub/subsub", "sub/subsub/lowest.txt"],
            "{backend}"
        );
        assert_eq!(
            root.child("very").list_glob("**", None, true)?,
            vec!["deep", "deep/path", "deep/path/here"],
            "{backend}"
        );
        assert_eq!(
            root.glob("**/TOP.TXT").case_sensitive(false).list()?,
            vec!["top.txt"],
            "{backend}"
        );
    }
    Ok(())
}

#[test]
fn children_and_content() -> Result<()> {
    let dir = tempfile::tempdir()?;
    for (backend, root) in glob_backends(dir.path()) {
        assert_eq!(
            names(&root.list()?),
            vec![".hg", "sub", "top.txt", "very"],
            "{backend}"
        );
        assert_eq!(
            names(&root.child("sub").list_no_follow()?),
            vec!["mid.txt", "subsub"],
            "{backend}"
        );

        let mid = root.child("sub").child("mid.txt");
        assert!(mid.exists(), "{backend}");
        assert!(mid.is_file(), "{backend}");
        assert!(!mid.is_directory(), "{backend}");
        assert!(mid.can_read(), "{backend}");
        assert_eq!(mid.length(), "sub/mid.txt".len() as u64, "{backend}");
        assert_eq!(read_to_string(&mid)?, "sub/mid.txt", "{backend}");
        assert_eq!(mid.read_link()?, None, "{backend}");
        assert!(mid.list()?.is_empty(), "{backend}");
        assert_eq!(mid.name(), "mid.txt", "{backend}");
        assert_eq!(mid.parent(), root.child("sub"), "{backend}");

        let sub = root.child("sub");
        assert!(sub.is_directory(), "{backend}");
        assert!(sub.open().is_err(), "{backend}");
    }
    Ok(())
}

#[test]
fn missing_entries_are_quiet() -> Result<()> {
    let dir = tempfile::tempdir()?;
    for (backend, root) in glob_backends(dir.path()) {
        let missing = root.child("sub/missing.txt");
        assert!(!missing.exists(), "{backend}");
        assert!(!missing.is_file(), "{backend}");
        assert!(!missing.is_directory(), "{backend}");
        assert!(!missing.can_read(), "{backend}");
        assert_eq!(missing.length(), 0, "{backend}");
        assert_eq!(missing.last_modified(), 0, "{backend}");
        assert_eq!(missing.mode(), -1, "{backend}");
        assert_eq!(missing.read_link()?, None, "{backend}");
        assert!(missing.list()?.is_empty(), "{backend}");
        assert!(missing.list_no_follow()?.is_empty(), "{backend}");
        assert!(glob(&missing, "**", None)?.is_empty(), "{backend}");

        let err = missing.open().err().expect("missing file opened");
        assert!(err.is_not_found(), "{backend}: {err}");
    }
    Ok(())
}

#[test]
fn parent_of_root_is_out_of_reach() -> Result<()> {
    let dir = tempfile::tempdir()?;
    for (backend, root) in glob_backends(dir.path()) {
        let parent = root.parent();
        assert!(!parent.exists(), "{backend}");
        assert!(!parent.is_directory(), "{backend}");
        assert!(parent.list()?.is_empty(), "{backend}");
        assert!(glob(&parent, "**", None)?.is_empty(), "{backend}");
        assert!(!root.is_descendant("..")?, "{backend}");
        assert!(parent.child("top.txt").open().is_err(), "{backend}");
        assert_ne!(parent, root, "{backend}");
    }
    Ok(())
}

#[test]
fn absolute_paths_are_rejected() -> Result<()> {
    let dir = tempfile::tempdir()?;
    for (backend, root) in glob_backends(dir.path()) {
        for path in ["/etc/passwd", "\\windows", "C:/Windows"] {
            let err = root.is_descendant(path).err().expect("absolute path accepted");
            assert!(matches!(err, FsError::IllegalArgument(_)), "{backend}: {err}");
        }
    }
    Ok(())
}

#[test]
fn capabilities_by_tier() -> Result<()> {
    let dir = tempfile::tempdir()?;
    for (backend, root) in glob_backends(dir.path()) {
        let full = backend != "zip";
        assert_eq!(root.supports_is_descendant(), full, "{backend}");
        assert_eq!(root.supports_quick_recursive_listing(), full, "{backend}");
        assert_eq!(root.is_descendant("sub/mid.txt")?, full, "{backend}");
        assert_eq!(root.child("sub").is_descendant("../top.txt")?, full, "{backend}");
        assert_eq!(root.list_only_descendants()?.len(), if full { 4 } else { 0 });
        assert!(!root.has_symlink()?, "{backend}");
        assert_eq!(root.external_url(), None, "{backend}");
    }
    Ok(())
}

#[test]
fn nodes_compare_by_uri() -> Result<()> {
    let dir = tempfile::tempdir()?;
    for (backend, root) in glob_backends(dir.path()) {
        let sub = root.child("sub");
        assert_eq!(sub.child("..").child("sub"), sub, "{backend}");
        assert_eq!(root.child("sub\\subsub"), sub.child("subsub"), "{backend}");
        assert!(sub < sub.child("mid.txt"), "{backend}");
        assert!(root.child("top.txt") > sub, "{backend}");

        let set: HashSet<VirtualFile> = [sub.clone(), root.child("sub/"), root.child("top.txt")]
            .into_iter()
            .collect();
        assert_eq!(set.len(), 2, "{backend}");
        assert!(sub.to_string().ends_with("/sub"), "{backend}: {sub}");
    }
    Ok(())
}

#[test]
fn zip_export_from_every_backend() -> Result<()> {
    let dir = tempfile::tempdir()?;
    for (backend, root) in glob_backends(dir.path()) {
        let mut out = Cursor::new(Vec::new());
        let options = ArchiveOptions::new()
            .default_excludes(true)
            .prefix("export");
        let count = root.zip(&mut out, &options)?;
        assert_eq!(count, 4, "{backend}");

        out.set_position(0);
        let archive = zip::ZipArchive::new(out)?;
        let mut names: Vec<&str> = archive.file_names().collect();
        names.sort();
        assert_eq!(
            names,
            vec![
                "export/sub/mid.txt",
                "export/sub/subsub/lowest.txt",
                "export/top.txt",
                "export/very/deep/path/here"
            ],
            "{backend}"
        );
    }
    Ok(())
}
