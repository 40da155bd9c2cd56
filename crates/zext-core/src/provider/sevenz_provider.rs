//! 7z archives, extract only

use super::copy::copy_cancellable;
use super::{has_extension, FormatProvider, SourceSpec, StageContext};
use crate::cancel::CancellationToken;
use crate::error::StageError;
use crate::security::sanitize_path;
use sevenz_rust::{Password, SevenZReader};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{debug, info};

const EXTENSIONS: &[&str] = &["7z"];

#[derive(Debug, Clone, Copy, Default)]
pub struct SevenZProvider;

impl SevenZProvider {
    fn open(&self, source: &Path) -> Result<SevenZReader<File>, StageError> {
        if let Err(e) = fs::metadata(source) {
            return Err(StageError::io(e, source));
        }
        SevenZReader::open(source, Password::empty()).map_err(|e| self.corrupt(source, e))
    }

    fn corrupt(&self, source: &Path, err: sevenz_rust::Error) -> StageError {
        StageError::FormatCorrupt {
            path: source.to_path_buf(),
            format: self.name(),
            detail: err.to_string(),
        }
    }
}

impl FormatProvider for SevenZProvider {
    fn name(&self) -> &'static str {
        "7z"
    }

    fn can_extract(&self, path: &Path) -> bool {
        has_extension(path, EXTENSIONS)
    }

    fn can_compress_from(&self, _path: &Path) -> bool {
        false
    }

    fn can_compress_as_destination(&self, _path: &Path) -> bool {
        false
    }

    fn extractable_extensions(&self) -> &'static [&'static str] {
        EXTENSIONS
    }

    fn compressible_extensions(&self) -> &'static [&'static str] {
        &[]
    }

    fn compressible_source_extensions(&self) -> SourceSpec {
        SourceSpec::Extensions(&[])
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
        let reader = self.open(source)?;
        let mut existing = Vec::new();
        for entry in &reader.archive().files {
            cancel.check()?;
            if destination.join(&entry.name).exists() {
                existing.push(entry.name.clone());
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
        debug!(source = %source.display(), "Reading 7z archive");
        let mut reader = self.open(source)?;
        // The callback can only report codec errors, so ours are parked here
        // and the walk is stopped by returning `false`.
        let mut failure: Option<StageError> = None;

        reader
            .for_each_entries(|entry, data| {
                if let Err(e) = ctx.cancel.check() {
                    failure = Some(e);
                    return Ok(false);
                }
                let target = match sanitize_path(destination, Path::new(&entry.name)) {
                    Ok(t) => t,
                    Err(detail) => {
                        failure = Some(StageError::FormatCorrupt {
                            path: source.to_path_buf(),
                            format: "7z",
                            detail,
                        });
                        return Ok(false);
                    }
                };
                if ctx.log_files {
                    info!(entry = %entry.name, "Extracting");
                }

                let written = if entry.is_directory {
                    fs::create_dir_all(&target).map_err(|e| StageError::io(e, &target))
                } else {
                    write_entry(data, &target, source, ctx.cancel)
                };
                match written {
                    Ok(()) => Ok(true),
                    Err(e) => {
                        failure = Some(e);
                        Ok(false)
                    }
                }
            })
            .map_err(|e| self.corrupt(source, e))?;

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn compress(
        &self,
        _source: &Path,
        _destination: &Path,
        _ctx: &StageContext<'_>,
    ) -> Result<(), StageError> {
        Err(StageError::Unsupported {
            format: self.name(),
            operation: "compression",
        })
    }
}

fn write_entry(
    data: &mut dyn std::io::Read,
    target: &Path,
    source: &Path,
    cancel: &CancellationToken,
) -> Result<(), StageError> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(|e| StageError::io(e, parent))?;
    }
    let out = File::create(target).map_err(|e| StageError::io(e, target))?;
    let mut out = BufWriter::new(out);
    copy_cancellable(data, &mut out, cancel).map_err(|e| {
        e.into_stage_error(
            |e| StageError::from_io(e, source, "7z"),
            |e| StageError::io(e, target),
        )
    })?;
    out.flush().map_err(|e| StageError::io(e, target))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_capabilities() {
        assert!(SevenZProvider.can_extract(Path::new("backup.7Z")));
        assert!(!SevenZProvider.can_compress_as_destination(Path::new("backup.7z")));
        assert!(!SevenZProvider.supports_piped_conflict_detection());
    }

    #[test]
    fn test_garbage_is_corrupt() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("broken.7z");
        fs::write(&archive, b"this is not a 7z archive at all").unwrap();

        let err = SevenZProvider
            .scan_conflicts(&archive, temp_dir.path(), &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, StageError::FormatCorrupt { .. }), "{err:?}");
    }

    #[test]
    fn test_missing_archive_is_io() {
        let temp_dir = TempDir::new().unwrap();
        let err = SevenZProvider
            .scan_conflicts(
                &temp_dir.path().join("nope.7z"),
                temp_dir.path(),
                &CancellationToken::new(),
            )
            .unwrap_err();
        assert!(matches!(err, StageError::Io { .. }), "{err:?}");
    }
}
