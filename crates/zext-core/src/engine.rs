//! Composition root facade
//!
//! [`Engine`] owns the provider registry, the executor and the pending
//! warning store, and exposes the operations a command layer needs:
//! build and scan a request, submit the resulting job, inspect and clear
//! warnings, and control the executor.

use crate::cancel::CancellationToken;
use crate::config::Config;
use crate::error::{BuildError, SubmitError};
use crate::executor::{
    Accepted, ExecutorStatus, ShutdownObserver, TaskHandle, TaskQueueExecutor, TerminateOutcome,
};
use crate::paging::DEFAULT_PAGE_SIZE;
use crate::pipeline::{BuildFlags, Job, Mode, PipelineBuilder};
use crate::provider::ProviderRegistry;
use crate::scan::{ConflictReport, ConflictScanner, ScanOutcome};
use crate::warn::PendingWarnStore;
use crate::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Engine behaviour taken from the configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    pub page_size: usize,
    pub log_files: bool,
    /// When false every request behaves as if override was requested
    pub warn_on_conflicts: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            log_files: true,
            warn_on_conflicts: true,
        }
    }
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            page_size: config.extraction.page_size.max(1),
            log_files: config.extraction.log_files,
            warn_on_conflicts: config.extraction.warn_on_conflicts,
        }
    }
}

/// One extraction or compression request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub mode: Mode,
    pub flags: BuildFlags,
    pub override_requested: bool,
}

impl Request {
    pub fn extract(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            mode: Mode::Extract,
            flags: BuildFlags::default(),
            override_requested: false,
        }
    }

    pub fn compress(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            mode: Mode::Compress,
            ..Self::extract(source, destination)
        }
    }

    pub fn with_flags(mut self, flags: BuildFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_override(mut self, override_requested: bool) -> Self {
        self.override_requested = override_requested;
        self
    }
}

/// Result of [`Engine::build_and_scan`]
#[derive(Debug)]
pub enum Prepared {
    /// Nothing would be overwritten; the job can be submitted
    Ready(Job),
    /// Existing files would be overwritten; nothing was queued
    Blocked(ConflictReport),
}

/// A job the executor accepted
#[derive(Debug, Clone)]
pub struct Submitted {
    accepted: Accepted,
    summary: String,
}

impl Submitted {
    pub fn handle(&self) -> &TaskHandle {
        self.accepted.handle()
    }

    /// Waiting tasks including this one; 1 means it runs next
    pub fn position(&self) -> usize {
        self.accepted.position()
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }
}

/// Owns the registry, executor and warning store.
#[derive(Debug)]
pub struct Engine {
    registry: Arc<ProviderRegistry>,
    executor: TaskQueueExecutor,
    warnings: Arc<PendingWarnStore>,
    settings: EngineSettings,
}

impl Engine {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        executor: TaskQueueExecutor,
        warnings: Arc<PendingWarnStore>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            registry,
            executor,
            warnings,
            settings,
        }
    }

    /// Build an engine with the default providers and the configured executor
    pub fn from_config(config: &Config) -> Result<Self> {
        let executor = TaskQueueExecutor::new(config.executor_settings())?;
        Ok(Self::new(
            Arc::new(ProviderRegistry::with_defaults()),
            executor,
            Arc::new(PendingWarnStore::new()),
            EngineSettings::from_config(config),
        ))
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn settings(&self) -> EngineSettings {
        self.settings
    }

    /// Applies to requests built after the call
    pub fn set_settings(&mut self, settings: EngineSettings) {
        self.settings = settings;
    }

    fn scanner(&self) -> ConflictScanner {
        ConflictScanner::new(self.settings.page_size)
    }

    /// Validate, build and scan a request.
    ///
    /// Extraction always starts by clearing the requester's pending warning,
    /// and records a new one when the scan finds conflicts. Nothing is
    /// written to the filesystem.
    pub fn build_and_scan(
        &self,
        request: &Request,
        requester: &str,
    ) -> std::result::Result<Prepared, BuildError> {
        if request.mode == Mode::Extract {
            self.warnings.clear_for_requester(requester);
        }
        validate(request)?;

        let chain = PipelineBuilder::new(&self.registry).build(
            &request.source,
            &request.destination,
            request.mode,
            &request.flags,
        )?;

        let override_requested = request.override_requested || !self.settings.warn_on_conflicts;
        let scanner = self.scanner();
        match scanner.scan(&chain, override_requested)? {
            ScanOutcome::Clear => {
                debug!(requester, chain = %chain.summary(), "Request is ready");
                Ok(Prepared::Ready(Job::new(
                    chain,
                    override_requested,
                    requester,
                    self.settings.log_files,
                    scanner,
                )))
            }
            ScanOutcome::Conflicts(report) => {
                info!(
                    requester,
                    conflicts = report.len(),
                    destination = %report.destination().display(),
                    "Request would overwrite existing files"
                );
                if request.mode == Mode::Extract {
                    self.warnings.record_conflict(requester, report.clone());
                }
                Ok(Prepared::Blocked(report))
            }
        }
    }

    /// Hand a job to the executor
    pub fn submit(&self, job: Job) -> std::result::Result<Submitted, SubmitError> {
        let summary = format!("{} {}", job.chain().mode(), job.chain().summary());
        let warnings = Arc::clone(&self.warnings);
        let accepted = self.executor.submit(Box::new(move |cancel: &CancellationToken| {
            job.run(cancel, &warnings)
        }))?;
        info!(chain = %summary, position = accepted.position(), "Task queued");
        Ok(Submitted { accepted, summary })
    }

    pub fn was_just_warned(&self, requester: &str, source: &Path, destination: &Path) -> bool {
        self.warnings.was_just_warned(requester, source, destination)
    }

    pub fn warn_data(&self, requester: &str) -> Option<ConflictReport> {
        self.warnings.get_conflict(requester)
    }

    pub fn clear_warn_data(&self, requester: &str) {
        self.warnings.clear_for_requester(requester);
    }

    pub fn status(&self) -> ExecutorStatus {
        self.executor.status()
    }

    pub fn terminate(&self, force: bool, wait: bool) -> TerminateOutcome {
        self.executor.terminate(force, wait)
    }

    pub fn terminate_with_observer(
        &self,
        force: bool,
        wait: bool,
        observer: &dyn ShutdownObserver,
    ) -> TerminateOutcome {
        self.executor.terminate_with_observer(force, wait, observer)
    }

    pub fn set_max_pool_size(&self, size: usize) -> bool {
        self.executor.set_max_pool_size(size)
    }
}

fn validate(request: &Request) -> std::result::Result<(), BuildError> {
    if !request.source.exists() {
        return Err(BuildError::SourceNotFound(request.source.clone()));
    }
    if request.mode == Mode::Extract
        && request.destination.exists()
        && !request.destination.is_dir()
    {
        return Err(BuildError::DestinationNotDirectory(
            request.destination.clone(),
        ));
    }
    Ok(())
}
