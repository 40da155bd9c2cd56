//! Pre-flight detection of files a chain would overwrite

use crate::cancel::CancellationToken;
use crate::error::{BuildError, StageError};
use crate::paging::{PagedList, DEFAULT_PAGE_SIZE};
use crate::pipeline::{Mode, PipelineChain, Stage};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Existing files a request would overwrite.
///
/// The list reflects the filesystem at scan time only; every stage is
/// scanned again right before it runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictReport {
    source: PathBuf,
    destination: PathBuf,
    conflicts: PagedList<String>,
}

impl ConflictReport {
    pub fn new(source: PathBuf, destination: PathBuf, conflicts: PagedList<String>) -> Self {
        Self {
            source,
            destination,
            conflicts,
        }
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn conflicts(&self) -> &PagedList<String> {
        &self.conflicts
    }

    pub fn len(&self) -> usize {
        self.conflicts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conflicts.is_empty()
    }
}

/// Outcome of a pre-flight scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    Clear,
    Conflicts(ConflictReport),
}

impl ScanOutcome {
    pub fn is_clear(&self) -> bool {
        matches!(self, ScanOutcome::Clear)
    }
}

/// Scans chains for overwrite conflicts.
#[derive(Debug, Clone, Copy)]
pub struct ConflictScanner {
    page_size: usize,
}

impl Default for ConflictScanner {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE)
    }
}

impl ConflictScanner {
    pub fn new(page_size: usize) -> Self {
        Self { page_size }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Scan the whole chain.
    ///
    /// Never writes to the filesystem. Fails only when a piped extraction
    /// into a non-empty destination contains a stage that cannot predict its
    /// conflicts.
    pub fn scan(
        &self,
        chain: &PipelineChain,
        override_requested: bool,
    ) -> Result<ScanOutcome, BuildError> {
        if override_requested {
            return Ok(ScanOutcome::Clear);
        }

        let conflicts = match chain.mode() {
            Mode::Extract => {
                if dir_is_empty(chain.destination()) {
                    return Ok(ScanOutcome::Clear);
                }
                if chain.is_piped() {
                    self.check_piped_feasibility(chain)?;
                }
                self.scan_extraction(chain)
            }
            Mode::Compress => chain
                .stages()
                .iter()
                .filter(|s| s.destination().exists())
                .map(|s| s.destination().display().to_string())
                .collect(),
        };

        Ok(self.outcome(chain.source(), chain.destination(), conflicts))
    }

    /// Wrap a conflict list into an outcome
    pub fn outcome(&self, source: &Path, destination: &Path, conflicts: Vec<String>) -> ScanOutcome {
        if conflicts.is_empty() {
            ScanOutcome::Clear
        } else {
            ScanOutcome::Conflicts(ConflictReport::new(
                source.to_path_buf(),
                destination.to_path_buf(),
                PagedList::new(conflicts, self.page_size),
            ))
        }
    }

    /// Conflicts of one stage, as checked right before it runs
    pub fn scan_stage(
        &self,
        mode: Mode,
        stage: &Stage,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, StageError> {
        match mode {
            Mode::Extract => {
                if dir_is_empty(stage.destination()) {
                    return Ok(Vec::new());
                }
                stage
                    .provider()
                    .scan_conflicts(stage.source(), stage.destination(), cancel)
            }
            Mode::Compress => {
                if stage.destination().exists() {
                    Ok(vec![stage.destination().display().to_string()])
                } else {
                    Ok(Vec::new())
                }
            }
        }
    }

    fn check_piped_feasibility(&self, chain: &PipelineChain) -> Result<(), BuildError> {
        let mut risky: Vec<String> = Vec::new();
        for stage in chain.stages().iter().skip(1) {
            let provider = stage.provider();
            if !provider.supports_piped_conflict_detection() {
                let name = provider.name().to_string();
                if !risky.contains(&name) {
                    risky.push(name);
                }
            }
        }
        if risky.is_empty() {
            Ok(())
        } else {
            warn!(
                destination = %chain.destination().display(),
                formats = %risky.join(", "),
                "Piped extraction into a non-empty destination cannot be scanned"
            );
            Err(BuildError::PipedConflictRisk {
                risky_extensions: risky,
            })
        }
    }

    fn scan_extraction(&self, chain: &PipelineChain) -> Vec<String> {
        // Pre-flight scans are never cancelled
        let cancel = CancellationToken::new();
        let mut conflicts = Vec::new();
        for stage in chain.stages() {
            match stage
                .provider()
                .scan_conflicts(stage.source(), stage.destination(), &cancel)
            {
                Ok(found) => {
                    debug!(
                        source = %stage.source().display(),
                        format = stage.provider().name(),
                        conflicts = found.len(),
                        "Scanned stage"
                    );
                    conflicts.extend(found);
                }
                Err(e) => {
                    // the stage will fail again, with this error, when it runs
                    warn!(source = %stage.source().display(), error = %e, "Conflict scan failed");
                }
            }
        }
        conflicts
    }
}

/// Missing directories count as empty
fn dir_is_empty(path: &Path) -> bool {
    match fs::read_dir(path) {
        Ok(mut entries) => entries.next().is_none(),
        Err(_) => true,
    }
}
