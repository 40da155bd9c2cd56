//! Path checks for archive entries

use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{error, warn};

/// Join an archive entry name onto `base`, refusing anything that could
/// land outside it.
///
/// Returns the offending reason on failure so callers can wrap it in the
/// error of their format.
pub fn sanitize_path(base: &Path, untrusted: &Path) -> Result<PathBuf, String> {
    let mut result = base.to_path_buf();

    for component in untrusted.components() {
        match component {
            Component::Normal(name) => {
                result.push(name);
            }
            Component::CurDir => {}
            Component::ParentDir => {
                error!(path = ?untrusted, "Entry contains parent directory component");
                return Err(format!("Path traversal attempt detected: {:?}", untrusted));
            }
            Component::RootDir => {
                error!(path = ?untrusted, "Entry path is absolute");
                return Err(format!("Absolute path not allowed: {:?}", untrusted));
            }
            Component::Prefix(_) => {
                error!(path = ?untrusted, "Entry path contains a drive prefix");
                return Err(format!("Path prefix not allowed: {:?}", untrusted));
            }
        }
    }

    Ok(result)
}

/// Check that a symlink at `link_path` pointing to `target` stays inside
/// `base`.
///
/// `target` is resolved lexically against the directory holding the link.
/// Absolute targets are always refused.
pub fn validate_symlink(base: &Path, link_path: &Path, target: &Path) -> Result<(), String> {
    if target.has_root() {
        warn!(link = ?link_path, target = ?target, "Symlink has absolute target");
        return Err(format!(
            "Symlink points outside extraction directory: {:?} -> {:?}",
            link_path, target
        ));
    }

    let link_parent = link_path
        .parent()
        .ok_or_else(|| "Symlink has no parent directory".to_string())?;
    let relative_parent = link_parent.strip_prefix(base).map_err(|_| {
        format!(
            "Symlink lies outside extraction directory: {:?}",
            link_path
        )
    })?;

    let mut normalized = PathBuf::new();
    for component in relative_parent.components() {
        if let Component::Normal(name) = component {
            normalized.push(name);
        }
    }

    for component in target.components() {
        match component {
            Component::ParentDir => {
                if !normalized.pop() {
                    warn!(link = ?link_path, target = ?target, "Symlink target escapes extraction directory");
                    return Err(format!(
                        "Symlink target would escape extraction directory: {:?} -> {:?}",
                        link_path, target
                    ));
                }
            }
            Component::Normal(name) => normalized.push(name),
            Component::CurDir => {}
            _ => {
                warn!(link = ?link_path, target = ?target, component = ?component, "Unexpected path component in symlink target");
                return Err(format!(
                    "Invalid symlink target: {:?} -> {:?}",
                    link_path, target
                ));
            }
        }
    }

    Ok(())
}

/// Fail when the deepest existing ancestor of `path` (the path itself
/// included) resolves outside `base`.
///
/// Catches writes that would pass through a symlink created by an earlier
/// entry. `base` must exist.
pub fn ensure_inside(base: &Path, path: &Path) -> Result<(), String> {
    let root = base
        .canonicalize()
        .map_err(|e| format!("Cannot resolve extraction directory {:?}: {}", base, e))?;

    for ancestor in path.ancestors() {
        if fs::symlink_metadata(ancestor).is_err() {
            continue;
        }
        let resolved = ancestor
            .canonicalize()
            .map_err(|e| format!("Cannot resolve {:?}: {}", ancestor, e))?;
        if resolved.starts_with(&root) {
            return Ok(());
        }
        error!(path = ?path, resolved = ?resolved, "Entry resolves outside extraction directory");
        return Err(format!(
            "Path would escape extraction directory: {:?}",
            path
        ));
    }

    Err(format!("Path would escape extraction directory: {:?}", path))
}

/// Whether `candidate` is `root` or lies below it.
///
/// Both paths are canonicalized when they exist so that relative and
/// symlinked spellings compare equal.
pub fn is_within(root: &Path, candidate: &Path) -> bool {
    let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
    let candidate = match candidate.canonicalize() {
        Ok(p) => p,
        Err(_) => match (candidate.parent(), candidate.file_name()) {
            (Some(parent), Some(name)) => parent
                .canonicalize()
                .map(|p| p.join(name))
                .unwrap_or_else(|_| candidate.to_path_buf()),
            _ => candidate.to_path_buf(),
        },
    };
    candidate.starts_with(root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sanitize_path_normal() {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path();
        let result = sanitize_path(base, Path::new("subdir/./file.txt")).unwrap();
        assert_eq!(result, base.join("subdir/file.txt"));
    }

    #[test]
    fn test_sanitize_path_parent_dir() {
        let temp_dir = TempDir::new().unwrap();
        assert!(sanitize_path(temp_dir.path(), Path::new("../etc/passwd")).is_err());
        assert!(sanitize_path(temp_dir.path(), Path::new("a/../../b")).is_err());
    }

    #[test]
    fn test_sanitize_path_absolute() {
        let temp_dir = TempDir::new().unwrap();
        assert!(sanitize_path(temp_dir.path(), Path::new("/etc/passwd")).is_err());
    }

    #[test]
    fn test_validate_symlink() {
        let base = Path::new("/extract");
        let link = base.join("dir/link");

        assert!(validate_symlink(base, &link, Path::new("file.txt")).is_ok());
        assert!(validate_symlink(base, &link, Path::new("../other/file.txt")).is_ok());
        assert!(validate_symlink(base, &link, Path::new("../../etc/passwd")).is_err());
        assert!(validate_symlink(base, &link, Path::new("/etc/passwd")).is_err());
        assert!(validate_symlink(base, &base.join("top"), Path::new("..")).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_ensure_inside_follows_links() {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path().join("out");
        let outside = temp_dir.path().join("outside");
        std::fs::create_dir_all(base.join("real")).unwrap();
        std::fs::create_dir(&outside).unwrap();
        std::os::unix::fs::symlink(&outside, base.join("evil")).unwrap();
        std::os::unix::fs::symlink("real", base.join("alias")).unwrap();

        assert!(ensure_inside(&base, &base.join("real/new/file")).is_ok());
        assert!(ensure_inside(&base, &base.join("alias/file")).is_ok());
        assert!(ensure_inside(&base, &base.join("evil/file")).is_err());
        assert!(ensure_inside(&base, &base.join("evil")).is_err());
    }

    #[test]
    fn test_is_within() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        std::fs::create_dir(root.join("inner")).unwrap();

        assert!(is_within(root, &root.join("inner")));
        assert!(is_within(root, &root.join("inner/not-yet.zip")));
        assert!(!is_within(&root.join("inner"), &root.join("other.zip")));
    }
}
