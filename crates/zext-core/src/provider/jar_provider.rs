//! Java archives, extract only

use super::zip_provider::{extract_archive, scan_archive};
use super::{has_extension, FormatProvider, SourceSpec, StageContext};
use crate::cancel::CancellationToken;
use crate::error::StageError;
use std::path::Path;
use tracing::debug;

const EXTENSIONS: &[&str] = &["jar"];

#[derive(Debug, Clone, Copy, Default)]
pub struct JarProvider;

impl FormatProvider for JarProvider {
    fn name(&self) -> &'static str {
        "jar"
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
        scan_archive(source, destination, cancel, self.name())
    }

    fn extract(
        &self,
        source: &Path,
        destination: &Path,
        ctx: &StageContext<'_>,
    ) -> Result<(), StageError> {
        debug!(source = %source.display(), "Reading jar archive");
        extract_archive(source, destination, ctx, self.name())
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
