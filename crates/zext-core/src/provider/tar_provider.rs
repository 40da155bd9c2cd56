//! Tar provider

use super::copy::{copy_cancellable, CancellableRead};
use super::zip_provider::{entry_name, is_same_file};
use super::{has_extension, FormatProvider, SourceSpec, StageContext};
use crate::cancel::CancellationToken;
use crate::error::StageError;
use crate::security::{ensure_inside, is_within, sanitize_path, validate_symlink};
use filetime::FileTime;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tar::{Archive, Builder, EntryType, Header};
use tracing::{debug, info};
use walkdir::WalkDir;

const EXTENSIONS: &[&str] = &["tar"];

#[derive(Debug, Clone, Copy, Default)]
pub struct TarProvider;

impl TarProvider {
    fn open(&self, source: &Path) -> Result<Archive<BufReader<File>>, StageError> {
        let file = File::open(source).map_err(|e| StageError::io(e, source))?;
        Ok(Archive::new(BufReader::new(file)))
    }

    fn corrupt(&self, source: &Path, err: io::Error) -> StageError {
        StageError::from_io(err, source, self.name())
    }

    fn rejected(&self, source: &Path, detail: String) -> StageError {
        StageError::FormatCorrupt {
            path: source.to_path_buf(),
            format: self.name(),
            detail,
        }
    }

    fn unpack(
        &self,
        source: &Path,
        destination: &Path,
        ctx: &StageContext<'_>,
    ) -> Result<(), StageError> {
        fs::create_dir_all(destination).map_err(|e| StageError::io(e, destination))?;
        let root = destination
            .canonicalize()
            .map_err(|e| StageError::io(e, destination))?;
        let mut archive = self.open(source)?;
        let entries = archive.entries().map_err(|e| self.corrupt(source, e))?;

        for entry in entries {
            ctx.cancel.check()?;
            let mut entry = entry.map_err(|e| self.corrupt(source, e))?;
            let name = entry
                .path()
                .map_err(|e| self.corrupt(source, e))?
                .into_owned();
            let target =
                sanitize_path(&root, &name).map_err(|detail| self.rejected(source, detail))?;

            if ctx.log_files {
                info!(entry = %name.display(), "Extracting");
            }

            let entry_type = entry.header().entry_type();
            if entry_type.is_dir() {
                ensure_inside(&root, &target).map_err(|detail| self.rejected(source, detail))?;
                fs::create_dir_all(&target).map_err(|e| StageError::io(e, &target))?;
                continue;
            }
            if let Some(parent) = target.parent() {
                ensure_inside(&root, parent).map_err(|detail| self.rejected(source, detail))?;
                fs::create_dir_all(parent).map_err(|e| StageError::io(e, parent))?;
            }

            match entry_type {
                EntryType::Regular | EntryType::Continuous => {
                    remove_link(&target)?;
                    let out = File::create(&target).map_err(|e| StageError::io(e, &target))?;
                    let mut out = BufWriter::new(out);
                    copy_cancellable(&mut entry, &mut out, ctx.cancel).map_err(|e| {
                        e.into_stage_error(
                            |e| StageError::from_io(e, source, "tar"),
                            |e| StageError::io(e, &target),
                        )
                    })?;
                    out.flush().map_err(|e| StageError::io(e, &target))?;
                    drop(out);
                    restore_metadata(entry.header(), &target);
                }
                EntryType::Symlink => {
                    let link = self.link_name(&entry, source)?;
                    let resolved = resolved_location(&target)?;
                    validate_symlink(&root, &resolved, &link)
                        .map_err(|detail| self.rejected(source, detail))?;
                    remove_existing(&target)?;
                    entry
                        .unpack(&target)
                        .map_err(|e| StageError::io(e, &target))?;
                }
                EntryType::Link => {
                    let link = self.link_name(&entry, source)?;
                    let original = sanitize_path(&root, &link)
                        .map_err(|detail| self.rejected(source, detail))?;
                    ensure_inside(&root, &original)
                        .map_err(|detail| self.rejected(source, detail))?;
                    remove_existing(&target)?;
                    fs::hard_link(&original, &target).map_err(|e| StageError::io(e, &target))?;
                }
                other => {
                    debug!(entry = %name.display(), kind = ?other, "Skipping unsupported tar entry");
                }
            }
        }

        Ok(())
    }

    fn link_name<R: io::Read>(
        &self,
        entry: &tar::Entry<'_, R>,
        source: &Path,
    ) -> Result<PathBuf, StageError> {
        entry
            .link_name()
            .map_err(|e| self.corrupt(source, e))?
            .map(|link| link.into_owned())
            .ok_or_else(|| self.rejected(source, "Link entry without a target".to_string()))
    }

    fn pack(
        &self,
        source: &Path,
        destination: &Path,
        ctx: &StageContext<'_>,
    ) -> Result<(), StageError> {
        let out = File::create(destination).map_err(|e| StageError::io(e, destination))?;
        let mut builder = Builder::new(BufWriter::new(out));
        builder.follow_symlinks(false);
        let dest_in_tree = is_within(source, destination);
        let write_err = |e: io::Error| {
            if ctx.cancel.is_cancelled() {
                StageError::Cancelled
            } else {
                StageError::io(e, destination)
            }
        };

        for entry in WalkDir::new(source).sort_by_file_name() {
            ctx.cancel.check()?;
            let entry = entry?;
            let path = entry.path();

            // Prevent recursive compression
            if dest_in_tree && is_same_file(path, destination) {
                continue;
            }
            let Some(name) = entry_name(source, path) else {
                continue;
            };

            if !entry.file_type().is_file() {
                builder
                    .append_path_with_name(path, &name)
                    .map_err(write_err)?;
                continue;
            }

            if ctx.log_files {
                info!(entry = %name, "Compressing");
            }
            let meta = entry.metadata()?;
            let mut header = Header::new_gnu();
            header.set_metadata(&meta);
            let file = File::open(path).map_err(|e| StageError::io(e, path))?;
            let reader = CancellableRead::new(BufReader::new(file), ctx.cancel);
            builder
                .append_data(&mut header, &name, reader)
                .map_err(write_err)?;
        }

        let mut out = builder.into_inner().map_err(write_err)?;
        out.flush().map_err(|e| StageError::io(e, destination))?;
        Ok(())
    }
}

/// `target` with its parent directory resolved through any links
fn resolved_location(target: &Path) -> Result<PathBuf, StageError> {
    match (target.parent(), target.file_name()) {
        (Some(parent), Some(name)) => parent
            .canonicalize()
            .map(|p| p.join(name))
            .map_err(|e| StageError::io(e, parent)),
        _ => Ok(target.to_path_buf()),
    }
}

/// Drop a symlink sitting where a regular file is about to be written so the
/// write does not follow it.
fn remove_link(target: &Path) -> Result<(), StageError> {
    match fs::symlink_metadata(target) {
        Ok(meta) if meta.file_type().is_symlink() => {
            fs::remove_file(target).map_err(|e| StageError::io(e, target))
        }
        _ => Ok(()),
    }
}

/// Drop any non-directory at `target` before a link is created there.
fn remove_existing(target: &Path) -> Result<(), StageError> {
    match fs::symlink_metadata(target) {
        Ok(meta) if !meta.is_dir() => {
            fs::remove_file(target).map_err(|e| StageError::io(e, target))
        }
        _ => Ok(()),
    }
}

fn restore_metadata(header: &Header, target: &Path) {
    if let Ok(mtime) = header.mtime() {
        let mtime = FileTime::from_unix_time(mtime as i64, 0);
        if let Err(e) = filetime::set_file_mtime(target, mtime) {
            debug!(path = %target.display(), error = %e, "Could not restore modification time");
        }
    }

    #[cfg(unix)]
    if let Ok(mode) = header.mode() {
        use std::os::unix::fs::PermissionsExt;
        let permissions = fs::Permissions::from_mode(mode & 0o7777);
        if let Err(e) = fs::set_permissions(target, permissions) {
            debug!(path = %target.display(), error = %e, "Could not apply entry permissions");
        }
    }
}

impl FormatProvider for TarProvider {
    fn name(&self) -> &'static str {
        "tar"
    }

    fn can_extract(&self, path: &Path) -> bool {
        has_extension(path, EXTENSIONS)
    }

    fn can_compress_from(&self, _path: &Path) -> bool {
        true
    }

    fn can_compress_as_destination(&self, path: &Path) -> bool {
        has_extension(path, EXTENSIONS)
    }

    fn extractable_extensions(&self) -> &'static [&'static str] {
        EXTENSIONS
    }

    fn compressible_extensions(&self) -> &'static [&'static str] {
        EXTENSIONS
    }

    fn compressible_source_extensions(&self) -> SourceSpec {
        SourceSpec::Any
    }

    fn supports_piped_conflict_detection(&self) -> bool {
        false
    }

    fn scan_conflicts(
        &self,
        source: &Path,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, StageError> {
        let mut archive = self.open(source)?;
        let entries = archive.entries().map_err(|e| self.corrupt(source, e))?;
        let mut existing = Vec::new();

        for entry in entries {
            cancel.check()?;
            let entry = entry.map_err(|e| self.corrupt(source, e))?;
            let name = entry.path().map_err(|e| self.corrupt(source, e))?;
            if destination.join(&name).exists() {
                existing.push(name.to_string_lossy().into_owned());
            }
        }

        Ok(existing)
    }

    fn extract(
        &self,
        source: &Path,
        destination: &Path,
        ctx: &StageContext<'_>,
    ) -> Result<(), StageError> {
        debug!(source = %source.display(), "Reading tar archive");
        self.unpack(source, destination, ctx)
    }

    fn compress(
        &self,
        source: &Path,
        destination: &Path,
        ctx: &StageContext<'_>,
    ) -> Result<(), StageError> {
        let result = self.pack(source, destination, ctx);
        if result.is_err() {
            let _ = fs::remove_file(destination);
        }
        result
    }
}
