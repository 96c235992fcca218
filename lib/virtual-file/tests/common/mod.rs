#![allow(dead_code)]

use std::fs;
use std::io::{Cursor, Read, Write};
use std::path::Path;
use std::sync::Arc;

use virtual_file::{
    FileSystem, LocalFileSystem, MemoryFileSystem, VirtualFile, ZipFileSystem, remote,
};

/// Files of the glob fixture, with their content.
pub const GLOB_FILES: &[&str] = &[
    "top.txt",
    "sub/mid.txt",
    "sub/subsub/lowest.txt",
    ".hg/config.txt",
    "very/deep/path/here",
];

pub fn write_glob_fixture(root: &Path) {
    for path in GLOB_FILES {
        let file = root.join(path);
        fs::create_dir_all(file.parent().unwrap()).unwrap();
        fs::write(file, path).unwrap();
    }
}

pub fn memory_glob_fixture() -> MemoryFileSystem {
    let fs = MemoryFileSystem::new("glob").unwrap();
    for path in GLOB_FILES {
        fs.insert_file(path, *path).unwrap();
    }
    fs
}

pub fn zip_glob_fixture() -> ZipFileSystem {
    let mut buf = Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut buf);
        for path in GLOB_FILES {
            writer
                .start_file(*path, zip::write::SimpleFileOptions::default())
                .unwrap();
            writer.write_all(path.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
    }
    buf.set_position(0);
    ZipFileSystem::from_reader("glob.zip", buf).unwrap()
}

/// The glob fixture on every backend, by name.
pub fn glob_backends(dir: &Path) -> Vec<(&'static str, VirtualFile)> {
    write_glob_fixture(dir);
    let local: Arc<dyn FileSystem> = Arc::new(LocalFileSystem::new(dir).unwrap());
    let remote = remote::spawn(local.clone()).unwrap();
    vec![
        ("local", VirtualFile::root_of(local)),
        ("remote", VirtualFile::root_of(Arc::new(remote))),
        ("memory", VirtualFile::root_of(Arc::new(memory_glob_fixture()))),
        ("zip", VirtualFile::root_of(Arc::new(zip_glob_fixture()))),
    ]
}

/// Builds this tree below `root`:
///
/// ```text
/// a/aa/aaa/_b2 -> root/b
/// a/aa/aa.txt
/// a/ab/ab.txt
/// a/_b -> root/b
/// b/_a -> root/a
/// b/_aatxt -> root/a/aa/aa.txt
/// b/ba/ba.txt
/// ```
#[cfg(unix)]
pub fn write_symlink_fixture(root: &Path) {
    use std::os::unix::fs::symlink;

    fs::create_dir_all(root.join("a/aa/aaa")).unwrap();
    fs::create_dir_all(root.join("a/ab")).unwrap();
    fs::create_dir_all(root.join("b/ba")).unwrap();
    fs::write(root.join("a/aa/aa.txt"), "aa").unwrap();
    fs::write(root.join("a/ab/ab.txt"), "ab").unwrap();
    fs::write(root.join("b/ba/ba.txt"), "ba").unwrap();
    symlink(root.join("b"), root.join("a/aa/aaa/_b2")).unwrap();
    symlink(root.join("b"), root.join("a/_b")).unwrap();
    symlink(root.join("a"), root.join("b/_a")).unwrap();
    symlink(root.join("a/aa/aa.txt"), root.join("b/_aatxt")).unwrap();
}

/// A local node at `root`, and the same tree served through a remote agent.
pub fn local_and_remote(root: &Path) -> Vec<(&'static str, VirtualFile)> {
    let local: Arc<dyn FileSystem> = Arc::new(LocalFileSystem::new(root).unwrap());
    let remote = remote::spawn(local.clone()).unwrap();
    vec![
        ("local", VirtualFile::root_of(local)),
        ("remote", VirtualFile::root_of(Arc::new(remote))),
    ]
}

pub fn read_to_string(node: &VirtualFile) -> anyhow::Result<String> {
    let mut content = String::new();
    node.open()?.read_to_string(&mut content)?;
    Ok(content)
}

pub fn names(nodes: &[VirtualFile]) -> Vec<String> {
    let mut names: Vec<String> = nodes.iter().map(VirtualFile::name).collect();
    names.sort();
    names
}
