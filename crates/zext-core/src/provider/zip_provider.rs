//! Zip provider

use super::copy::copy_cancellable;
use super::{has_extension, FormatProvider, SourceSpec, StageContext};
use crate::cancel::CancellationToken;
use crate::error::StageError;
use crate::security::{is_within, sanitize_path};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Seek, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const EXTENSIONS: &[&str] = &["zip"];

#[derive(Debug, Clone, Copy, Default)]
pub struct ZipProvider;

/// Map a zip error on `path` into a stage error
pub(crate) fn zip_error(err: ZipError, path: &Path, format: &'static str) -> StageError {
    match err {
        ZipError::Io(e) => StageError::from_io(e, path, format),
        other => StageError::FormatCorrupt {
            path: path.to_path_buf(),
            format,
            detail: other.to_string(),
        },
    }
}

pub(crate) fn open_archive(
    source: &Path,
    format: &'static str,
) -> Result<ZipArchive<BufReader<File>>, StageError> {
    let file = File::open(source).map_err(|e| StageError::io(e, source))?;
    ZipArchive::new(BufReader::new(file)).map_err(|e| zip_error(e, source, format))
}

/// Entry names of `source` whose extracted path already exists
pub(crate) fn scan_archive(
    source: &Path,
    destination: &Path,
    cancel: &CancellationToken,
    format: &'static str,
) -> Result<Vec<String>, StageError> {
    let mut archive = open_archive(source, format)?;
    let mut existing = Vec::new();

    for i in 0..archive.len() {
        cancel.check()?;
        let entry = archive
            .by_index_raw(i)
            .map_err(|e| zip_error(e, source, format))?;
        if destination.join(entry.name()).exists() {
            existing.push(entry.name().to_string());
        }
    }

    Ok(existing)
}

/// Extract every entry of `source` below `destination`
pub(crate) fn extract_archive(
    source: &Path,
    destination: &Path,
    ctx: &StageContext<'_>,
    format: &'static str,
) -> Result<(), StageError> {
    let mut archive = open_archive(source, format)?;
    extract_entries(&mut archive, source, destination, ctx, format)
}

fn extract_entries<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    source: &Path,
    destination: &Path,
    ctx: &StageContext<'_>,
    format: &'static str,
) -> Result<(), StageError> {
    for i in 0..archive.len() {
        ctx.cancel.check()?;
        let mut entry = archive
            .by_index(i)
            .map_err(|e| zip_error(e, source, format))?;
        let name = entry.name().to_string();
        let target = sanitize_path(destination, Path::new(&name)).map_err(|detail| {
            StageError::FormatCorrupt {
                path: source.to_path_buf(),
                format,
                detail,
            }
        })?;

        if ctx.log_files {
            info!(entry = %name, "Extracting");
        }

        if entry.is_dir() {
            fs::create_dir_all(&target).map_err(|e| StageError::io(e, &target))?;
            continue;
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| StageError::io(e, parent))?;
        }
        let out = File::create(&target).map_err(|e| StageError::io(e, &target))?;
        let mut out = BufWriter::new(out);
        copy_cancellable(&mut entry, &mut out, ctx.cancel).map_err(|e| {
            e.into_stage_error(
                |e| StageError::from_io(e, source, format),
                |e| StageError::io(e, &target),
            )
        })?;
        out.flush().map_err(|e| StageError::io(e, &target))?;
        drop(out);

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            let permissions = fs::Permissions::from_mode(mode & 0o7777);
            if let Err(e) = fs::set_permissions(&target, permissions) {
                debug!(path = %target.display(), error = %e, "Could not apply entry permissions");
            }
        }
    }

    Ok(())
}

/// Archive name for `path` below `source`: `<source name>/<relative path>`
pub(crate) fn entry_name(source: &Path, path: &Path) -> Option<String> {
    let base = source.file_name()?;
    let rel = path.strip_prefix(source).ok()?;
    let mut name = PathBuf::from(base);
    name.push(rel);
    Some(
        name.components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/"),
    )
}

impl ZipProvider {
    fn write_archive(
        &self,
        source: &Path,
        destination: &Path,
        ctx: &StageContext<'_>,
    ) -> Result<(), StageError> {
        let out = File::create(destination).map_err(|e| StageError::io(e, destination))?;
        let mut writer = ZipWriter::new(BufWriter::new(out));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        let zip_err = |e| zip_error(e, destination, "zip");
        let dest_in_tree = is_within(source, destination);

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

            if entry.file_type().is_dir() {
                writer
                    .add_directory(format!("{}/", name), options)
                    .map_err(zip_err)?;
                continue;
            }

            if ctx.log_files {
                info!(entry = %name, "Compressing");
            }
            #[cfg(unix)]
            let options = {
                use std::os::unix::fs::PermissionsExt;
                match entry.metadata() {
                    Ok(meta) => options.unix_permissions(meta.permissions().mode()),
                    Err(_) => options,
                }
            };
            writer.start_file(name, options).map_err(zip_err)?;
            let file = File::open(path).map_err(|e| StageError::io(e, path))?;
            let mut file = BufReader::new(file);
            copy_cancellable(&mut file, &mut writer, ctx.cancel).map_err(|e| {
                e.into_stage_error(
                    |e| StageError::io(e, path),
                    |e| StageError::io(e, destination),
                )
            })?;
        }

        let mut out = writer.finish().map_err(zip_err)?;
        out.flush().map_err(|e| StageError::io(e, destination))?;
        Ok(())
    }
}

pub(crate) fn is_same_file(path: &Path, destination: &Path) -> bool {
    if path.file_name() != destination.file_name() {
        return false;
    }
    match (path.canonicalize(), destination.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

impl FormatProvider for ZipProvider {
    fn name(&self) -> &'static str {
        "zip"
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
        scan_archive(source, destination, cancel, self.name())
    }

    fn extract(
        &self,
        source: &Path,
        destination: &Path,
        ctx: &StageContext<'_>,
    ) -> Result<(), StageError> {
        debug!(source = %source.display(), "Reading zip archive");
        extract_archive(source, destination, ctx, self.name())
    }

    fn compress(
        &self,
        source: &Path,
        destination: &Path,
        ctx: &StageContext<'_>,
    ) -> Result<(), StageError> {
        let result = self.write_archive(source, destination, ctx);
        if result.is_err() {
            let _ = fs::remove_file(destination);
        }
        result
    }
}
