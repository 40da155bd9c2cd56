//! Common assertions for zext testing

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug, PartialEq, Eq)]
enum Entry {
    Dir,
    File(Vec<u8>),
}

/// Asserts that two directory trees hold the same paths and file contents
pub fn assert_dirs_equal(dir1: &Path, dir2: &Path) -> Result<()> {
    let entries1 = collect_entries(dir1)?;
    let entries2 = collect_entries(dir2)?;

    let paths1: Vec<&PathBuf> = entries1.keys().collect();
    let paths2: Vec<&PathBuf> = entries2.keys().collect();
    assert_eq!(
        paths1, paths2,
        "Different entries under {:?} and {:?}",
        dir1, dir2
    );

    for (rel, entry1) in &entries1 {
        let entry2 = &entries2[rel];
        match (entry1, entry2) {
            (Entry::File(a), Entry::File(b)) => {
                assert!(a == b, "Content mismatch for {:?}", rel);
            }
            (Entry::Dir, Entry::Dir) => {}
            _ => panic!("File type mismatch for {:?}", rel),
        }
    }

    Ok(())
}

pub fn assert_file_contents(path: &Path, expected: &[u8]) -> Result<()> {
    let actual = std::fs::read(path).with_context(|| format!("reading {:?}", path))?;
    assert!(actual == expected, "Content mismatch for {:?}", path);
    Ok(())
}

/// Missing directories count as empty
pub fn assert_dir_is_empty(path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }
    let leftovers: Vec<_> = std::fs::read_dir(path)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .collect();
    assert!(leftovers.is_empty(), "Expected {:?} to be empty, found {:?}", path, leftovers);
    Ok(())
}

fn collect_entries(dir: &Path) -> Result<BTreeMap<PathBuf, Entry>> {
    let mut entries = BTreeMap::new();
    for entry in WalkDir::new(dir).min_depth(1) {
        let entry = entry?;
        let rel = entry.path().strip_prefix(dir)?.to_path_buf();
        let value = if entry.file_type().is_dir() {
            Entry::Dir
        } else {
            Entry::File(std::fs::read(entry.path())?)
        };
        entries.insert(rel, value);
    }
    Ok(entries)
}
