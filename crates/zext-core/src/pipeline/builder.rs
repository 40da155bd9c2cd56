//! Decomposition of a request into an ordered chain of stages

use super::names::{compression_walk, extraction_walk, split_extensions, strip_last_extension};
use crate::error::BuildError;
use crate::provider::{FormatProvider, ProviderRegistry};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Direction of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Extract,
    Compress,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Extract => write!(f, "extract"),
            Mode::Compress => write!(f, "compress"),
        }
    }
}

/// Options that change how a compound file name is decomposed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildFlags {
    /// Process every recognised extension of the source, not just the last
    pub expand_compound: bool,
    /// Stop the extraction walk at this extension. Implies `expand_compound`.
    pub stop_at: Option<String>,
}

impl BuildFlags {
    pub fn expands(&self) -> bool {
        self.expand_compound || self.stop_at.is_some()
    }
}

/// One single-format operation.
#[derive(Clone)]
pub struct Stage {
    source: PathBuf,
    destination: PathBuf,
    provider: Arc<dyn FormatProvider>,
}

impl Stage {
    pub fn new(source: PathBuf, destination: PathBuf, provider: Arc<dyn FormatProvider>) -> Self {
        Self {
            source,
            destination,
            provider,
        }
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn provider(&self) -> &dyn FormatProvider {
        self.provider.as_ref()
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("source", &self.source)
            .field("destination", &self.destination)
            .field("provider", &self.provider.name())
            .finish()
    }
}

/// Stages in execution order. Immutable once built.
#[derive(Debug, Clone)]
pub struct PipelineChain {
    mode: Mode,
    source: PathBuf,
    destination: PathBuf,
    stages: Vec<Stage>,
}

impl PipelineChain {
    /// Assemble a chain from already-resolved stages.
    ///
    /// `stages` must not be empty.
    pub fn new(mode: Mode, source: PathBuf, destination: PathBuf, stages: Vec<Stage>) -> Self {
        Self {
            mode,
            source,
            destination,
            stages,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// The file or directory the request names as input
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// The path the request names as output
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// More than one stage, so intermediate files will be produced
    pub fn is_piped(&self) -> bool {
        self.stages.len() > 1
    }

    /// Provider names in execution order, e.g. `gzip -> tar`
    pub fn summary(&self) -> String {
        self.stages
            .iter()
            .map(|s| s.provider.name())
            .collect::<Vec<_>>()
            .join(" -> ")
    }
}

/// Builds chains against a registry.
#[derive(Debug, Clone, Copy)]
pub struct PipelineBuilder<'a> {
    registry: &'a ProviderRegistry,
}

impl<'a> PipelineBuilder<'a> {
    pub fn new(registry: &'a ProviderRegistry) -> Self {
        Self { registry }
    }

    pub fn build(
        &self,
        source: &Path,
        destination: &Path,
        mode: Mode,
        flags: &BuildFlags,
    ) -> Result<PipelineChain, BuildError> {
        let chain = match mode {
            Mode::Extract => self.build_extraction(source, destination, flags)?,
            Mode::Compress => self.build_compression(source, destination)?,
        };
        debug!(mode = %mode, stages = chain.len(), chain = %chain.summary(), "Built pipeline");
        Ok(chain)
    }

    fn extraction_stage(&self, source: &Path, destination: &Path) -> Result<Stage, BuildError> {
        let provider = self
            .registry
            .find_for_extraction(source)
            .ok_or_else(|| BuildError::UnsupportedFormat {
                path: source.to_path_buf(),
                reason: "no provider can extract this file".to_string(),
            })?;
        Ok(Stage::new(
            source.to_path_buf(),
            destination.to_path_buf(),
            provider,
        ))
    }

    fn build_extraction(
        &self,
        source: &Path,
        destination: &Path,
        flags: &BuildFlags,
    ) -> Result<PipelineChain, BuildError> {
        let file_name = file_name_of(source)?;
        let (_, extensions) = split_extensions(&file_name);

        if !flags.expands() || extensions.len() < 2 {
            let stage = self.extraction_stage(source, destination)?;
            return Ok(chain_of(Mode::Extract, source, destination, vec![stage]));
        }

        let walked = extraction_walk(&extensions, flags.stop_at.as_deref(), |ext| {
            self.registry.is_extractable_extension(ext)
        });
        if walked.is_empty() {
            return Err(BuildError::UnsupportedFormat {
                path: source.to_path_buf(),
                reason: match &flags.stop_at {
                    Some(stop) => format!("nothing to extract before .{}", stop),
                    None => "no extractable extension".to_string(),
                },
            });
        }

        let mut stages = Vec::with_capacity(walked.len());
        let mut current = source.to_path_buf();
        let mut name = file_name.as_str();
        for _ in &walked {
            stages.push(self.extraction_stage(&current, destination)?);
            name = strip_last_extension(name);
            current = destination.join(name);
        }

        Ok(chain_of(Mode::Extract, source, destination, stages))
    }

    fn compression_stage(
        &self,
        source: &Path,
        destination: &Path,
    ) -> Result<Stage, BuildError> {
        match self.registry.resolve_compression(source, destination) {
            Some(Ok(provider)) => Ok(Stage::new(
                source.to_path_buf(),
                destination.to_path_buf(),
                provider,
            )),
            Some(Err(provider)) => Err(BuildError::IncompatibleSourceForDestination {
                destination: destination.to_path_buf(),
                accepted_sources: provider.compressible_source_extensions().describe(),
                accepted_destinations: provider
                    .compressible_extensions()
                    .iter()
                    .map(|e| e.to_string())
                    .collect(),
            }),
            None => Err(BuildError::UnsupportedFormat {
                path: destination.to_path_buf(),
                reason: "no provider can write this format".to_string(),
            }),
        }
    }

    fn build_compression(
        &self,
        source: &Path,
        destination: &Path,
    ) -> Result<PipelineChain, BuildError> {
        let dest_name = file_name_of(destination)?;
        let (_, dest_extensions) = split_extensions(&dest_name);
        if dest_extensions.is_empty() {
            return Err(BuildError::MissingExtension(destination.to_path_buf()));
        }

        if dest_extensions.len() < 2 {
            let stage = self.compression_stage(source, destination)?;
            return Ok(chain_of(Mode::Compress, source, destination, vec![stage]));
        }

        let source_name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let (_, source_extensions) = split_extensions(&source_name);
        let walked = compression_walk(&dest_extensions, source_extensions.last().copied(), |ext| {
            self.registry.is_compressible_extension(ext)
        });
        if walked.is_empty() {
            return Err(BuildError::UnsupportedFormat {
                path: destination.to_path_buf(),
                reason: "no compressible extension differs from the source".to_string(),
            });
        }

        // Outermost first: each stage reads the destination minus its
        // extension, and the innermost reads the real source.
        let parent = destination.parent().unwrap_or_else(|| Path::new(""));
        let mut outward = Vec::with_capacity(walked.len());
        let mut stage_dest = destination.to_path_buf();
        let mut name = dest_name.as_str();
        for (i, _) in walked.iter().enumerate() {
            name = strip_last_extension(name);
            let stage_source = if i + 1 == walked.len() {
                source.to_path_buf()
            } else {
                parent.join(name)
            };
            outward.push(self.compression_stage(&stage_source, &stage_dest)?);
            stage_dest = parent.join(name);
        }
        outward.reverse();

        Ok(chain_of(Mode::Compress, source, destination, outward))
    }
}

fn chain_of(mode: Mode, source: &Path, destination: &Path, stages: Vec<Stage>) -> PipelineChain {
    PipelineChain::new(
        mode,
        source.to_path_buf(),
        destination.to_path_buf(),
        stages,
    )
}

fn file_name_of(path: &Path) -> Result<String, BuildError> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| BuildError::UnsupportedFormat {
            path: path.to_path_buf(),
            reason: "path has no file name".to_string(),
        })
}
