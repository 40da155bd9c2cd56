//! Format providers and the registry that picks one for a path
//!
//! A [`FormatProvider`] is a stateless capability object for one archive
//! format. The [`ProviderRegistry`] holds them in registration order, which
//! decides ties: extraction lookups return the last match.

mod copy;
mod jar_provider;
mod sevenz_provider;
mod single_file;
mod tar_provider;
mod zip_provider;

pub use self::copy::{copy_cancellable, CancellableRead, CopyError, COPY_BUFFER_SIZE};
pub use self::jar_provider::JarProvider;
pub use self::sevenz_provider::SevenZProvider;
pub use self::single_file::{Codec, SingleFileProvider};
pub use self::tar_provider::TarProvider;
pub use self::zip_provider::ZipProvider;

use crate::cancel::CancellationToken;
use crate::error::StageError;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, OnceLock};

/// What a provider accepts as compression input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceSpec {
    /// Files and directories
    Any,
    /// Anything that is not a directory
    Files,
    /// Files with one of the listed extensions
    Extensions(&'static [&'static str]),
}

impl SourceSpec {
    pub fn accepts(&self, path: &Path) -> bool {
        match self {
            SourceSpec::Any => true,
            SourceSpec::Files => !path.is_dir(),
            SourceSpec::Extensions(exts) => !path.is_dir() && has_extension(path, exts),
        }
    }

    /// Human readable list for error messages
    pub fn describe(&self) -> Vec<String> {
        match self {
            SourceSpec::Any => vec!["any".to_string()],
            SourceSpec::Files => vec!["non-directory".to_string()],
            SourceSpec::Extensions(exts) => exts.iter().map(|e| e.to_string()).collect(),
        }
    }
}

/// Per-run inputs handed to every provider operation.
#[derive(Debug, Clone, Copy)]
pub struct StageContext<'a> {
    pub cancel: &'a CancellationToken,
    /// Log every entry written
    pub log_files: bool,
}

/// One archive format.
///
/// Capabilities a format lacks are answered with `false` or an empty list.
/// `extract`/`compress` are only called by the pipeline after the matching
/// predicate returned `true`.
pub trait FormatProvider: Send + Sync + fmt::Debug {
    /// Short format name used in logs and errors
    fn name(&self) -> &'static str;

    fn can_extract(&self, path: &Path) -> bool;

    fn can_compress_from(&self, path: &Path) -> bool;

    fn can_compress_as_destination(&self, path: &Path) -> bool;

    fn extractable_extensions(&self) -> &'static [&'static str];

    fn compressible_extensions(&self) -> &'static [&'static str];

    fn compressible_source_extensions(&self) -> SourceSpec;

    /// Whether conflicts can be computed without reading `source`, which may
    /// not exist yet when it is an intermediate file of a chain.
    fn supports_piped_conflict_detection(&self) -> bool;

    /// Paths (or entry names) that extracting `source` into `destination`
    /// would overwrite.
    fn scan_conflicts(
        &self,
        source: &Path,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, StageError>;

    /// Extract `source` into the directory `destination`
    fn extract(
        &self,
        source: &Path,
        destination: &Path,
        ctx: &StageContext<'_>,
    ) -> Result<(), StageError>;

    /// Compress `source` into the file `destination`
    fn compress(
        &self,
        source: &Path,
        destination: &Path,
        ctx: &StageContext<'_>,
    ) -> Result<(), StageError>;
}

/// Case-insensitive check of the final extension of `path`
pub(crate) fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

/// Ordered set of providers.
///
/// Read-only after construction; aggregated extension lists are computed on
/// first use.
#[derive(Debug)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn FormatProvider>>,
    extractable: OnceLock<Vec<String>>,
    compressible: OnceLock<Vec<String>>,
}

impl ProviderRegistry {
    pub fn new(providers: Vec<Arc<dyn FormatProvider>>) -> Self {
        Self {
            providers,
            extractable: OnceLock::new(),
            compressible: OnceLock::new(),
        }
    }

    /// Registry with every shipped format
    pub fn with_defaults() -> Self {
        Self::new(vec![
            Arc::new(ZipProvider),
            Arc::new(SevenZProvider),
            Arc::new(JarProvider),
            Arc::new(SingleFileProvider::new(Codec::Xz)),
            Arc::new(SingleFileProvider::new(Codec::Gzip)),
            Arc::new(SingleFileProvider::new(Codec::Zstd)),
            Arc::new(SingleFileProvider::new(Codec::Brotli)),
            Arc::new(TarProvider),
        ])
    }

    pub fn providers(&self) -> &[Arc<dyn FormatProvider>] {
        &self.providers
    }

    /// Last registered provider that can extract `path`
    pub fn find_for_extraction(&self, path: &Path) -> Option<Arc<dyn FormatProvider>> {
        self.providers
            .iter()
            .rev()
            .find(|p| p.can_extract(path))
            .cloned()
    }

    /// First registered provider that can write `path`
    pub fn find_for_compression_destination(
        &self,
        path: &Path,
    ) -> Option<Arc<dyn FormatProvider>> {
        self.providers
            .iter()
            .find(|p| p.can_compress_as_destination(path))
            .cloned()
    }

    /// Whether `provider` accepts `path` as compression input
    pub fn find_for_compression_source(&self, provider: &dyn FormatProvider, path: &Path) -> bool {
        provider.can_compress_from(path)
    }

    /// First provider that writes `destination` and accepts `source`.
    ///
    /// When providers exist for the destination but none accepts the source,
    /// the first of them is returned as the error so its accepted lists can be
    /// reported.
    pub fn resolve_compression(
        &self,
        source: &Path,
        destination: &Path,
    ) -> Option<Result<Arc<dyn FormatProvider>, Arc<dyn FormatProvider>>> {
        let mut rejected = None;
        for provider in &self.providers {
            if !provider.can_compress_as_destination(destination) {
                continue;
            }
            if self.find_for_compression_source(provider.as_ref(), source) {
                return Some(Ok(Arc::clone(provider)));
            }
            rejected.get_or_insert_with(|| Arc::clone(provider));
        }
        rejected.map(Err)
    }

    /// Lower-cased union of every extractable extension
    pub fn all_extractable_extensions(&self) -> &[String] {
        self.extractable
            .get_or_init(|| collect_extensions(&self.providers, |p| p.extractable_extensions()))
    }

    /// Lower-cased union of every compressible extension
    pub fn all_compressible_extensions(&self) -> &[String] {
        self.compressible
            .get_or_init(|| collect_extensions(&self.providers, |p| p.compressible_extensions()))
    }

    pub fn is_extractable_extension(&self, ext: &str) -> bool {
        let ext = ext.to_ascii_lowercase();
        self.all_extractable_extensions().contains(&ext)
    }

    pub fn is_compressible_extension(&self, ext: &str) -> bool {
        let ext = ext.to_ascii_lowercase();
        self.all_compressible_extensions().contains(&ext)
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn collect_extensions<F>(providers: &[Arc<dyn FormatProvider>], list: F) -> Vec<String>
where
    F: Fn(&dyn FormatProvider) -> &'static [&'static str],
{
    let mut out: Vec<String> = Vec::new();
    for provider in providers {
        for ext in list(provider.as_ref()) {
            let ext = ext.to_ascii_lowercase();
            if !out.contains(&ext) {
                out.push(ext);
            }
        }
    }
    out
}
