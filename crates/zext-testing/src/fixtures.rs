//! Common test fixtures for zext testing

use crate::TestDir;
use anyhow::Result;
use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;
use std::path::PathBuf;

/// Deterministic pseudo-random content that does not compress well
pub fn random_bytes(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut data = vec![0u8; len];
    rng.fill(data.as_mut_slice());
    data
}

/// Creates `name/` with text, binary, empty and nested files.
///
/// Returns the directory path.
pub fn create_sample_tree(test_dir: &TestDir, name: &str) -> Result<PathBuf> {
    let root = test_dir.create_dir(name)?;
    test_dir.create_file(&format!("{name}/readme.txt"), b"sample tree\n")?;
    test_dir.create_file(&format!("{name}/empty.dat"), b"")?;
    test_dir.create_file(&format!("{name}/data/blob.bin"), &random_bytes(200 * 1024, 7))?;
    test_dir.create_file(
        &format!("{name}/data/log.txt"),
        "line\n".repeat(2000).as_bytes(),
    )?;
    test_dir.create_dir(&format!("{name}/data/empty_dir"))?;
    test_dir.create_file(&format!("{name}/data/deep/deeper/leaf.txt"), b"leaf")?;
    Ok(root)
}

/// Creates `name/` holding a handful of small files across two levels
pub fn create_nested_tree(test_dir: &TestDir, name: &str, files: usize) -> Result<PathBuf> {
    let root = test_dir.create_dir(name)?;
    for i in 0..files {
        let rel = if i % 2 == 0 {
            format!("{name}/file{i}.txt")
        } else {
            format!("{name}/sub/file{i}.txt")
        };
        test_dir.create_file(&rel, format!("content {i}").as_bytes())?;
    }
    Ok(root)
}
