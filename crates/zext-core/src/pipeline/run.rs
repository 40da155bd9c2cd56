//! Sequential execution of a built chain on a worker thread

use super::builder::{Mode, PipelineChain};
use crate::cancel::CancellationToken;
use crate::error::StageError;
use crate::paging::PagedList;
use crate::provider::StageContext;
use crate::scan::{ConflictReport, ConflictScanner};
use crate::warn::PendingWarnStore;
use std::fs;
use tracing::{debug, error, info, warn};

/// Result of one task
#[derive(Debug)]
pub struct TaskOutcome {
    summary: String,
    completed_stages: usize,
    total_stages: usize,
    result: Result<(), StageError>,
}

impl TaskOutcome {
    pub fn new(
        summary: impl Into<String>,
        completed_stages: usize,
        total_stages: usize,
        result: Result<(), StageError>,
    ) -> Self {
        Self {
            summary: summary.into(),
            completed_stages,
            total_stages,
            result,
        }
    }

    /// Chain description, e.g. `extract gzip -> tar`
    pub fn summary(&self) -> &str {
        &self.summary
    }

    pub fn completed_stages(&self) -> usize {
        self.completed_stages
    }

    pub fn total_stages(&self) -> usize {
        self.total_stages
    }

    pub fn result(&self) -> &Result<(), StageError> {
        &self.result
    }

    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.result, Err(StageError::Cancelled))
    }

    pub fn error(&self) -> Option<&StageError> {
        self.result.as_ref().err()
    }
}

/// A chain ready to run, with everything it needs besides the executor.
#[derive(Debug, Clone)]
pub struct Job {
    chain: PipelineChain,
    override_requested: bool,
    requester: String,
    log_files: bool,
    scanner: ConflictScanner,
}

impl Job {
    pub fn new(
        chain: PipelineChain,
        override_requested: bool,
        requester: impl Into<String>,
        log_files: bool,
        scanner: ConflictScanner,
    ) -> Self {
        Self {
            chain,
            override_requested,
            requester: requester.into(),
            log_files,
            scanner,
        }
    }

    pub fn chain(&self) -> &PipelineChain {
        &self.chain
    }

    pub fn requester(&self) -> &str {
        &self.requester
    }

    pub fn override_requested(&self) -> bool {
        self.override_requested
    }

    /// Run every stage in order and report how far the chain got.
    ///
    /// A failing stage abandons the rest of the chain. Intermediate sources
    /// are deleted after the stage that consumed them succeeds.
    pub fn run(&self, cancel: &CancellationToken, warnings: &PendingWarnStore) -> TaskOutcome {
        let mode = self.chain.mode();
        let summary = format!("{} {}", mode, self.chain.summary());
        let total = self.chain.len();

        let mut completed = 0;
        let result = self.run_stages(cancel, warnings, &mut completed);

        match &result {
            Ok(()) => info!(
                chain = %summary,
                destination = %self.chain.destination().display(),
                "Task complete"
            ),
            Err(StageError::Cancelled) => warn!(
                chain = %summary,
                completed,
                total,
                "Task was cancelled"
            ),
            Err(e) => error!(
                chain = %summary,
                completed,
                total,
                error = %e,
                details = ?e,
                "Task failed"
            ),
        }

        TaskOutcome::new(summary, completed, total, result)
    }

    fn run_stages(
        &self,
        cancel: &CancellationToken,
        warnings: &PendingWarnStore,
        completed: &mut usize,
    ) -> Result<(), StageError> {
        let mode = self.chain.mode();
        let total = self.chain.len();
        let ctx = StageContext {
            cancel,
            log_files: self.log_files,
        };

        if mode == Mode::Extract {
            let dest = self.chain.destination();
            fs::create_dir_all(dest).map_err(|e| StageError::io(e, dest))?;
        }

        for (index, stage) in self.chain.stages().iter().enumerate() {
            cancel.check()?;

            if !self.override_requested {
                let conflicts = self.scanner.scan_stage(mode, stage, cancel)?;
                if !conflicts.is_empty() {
                    let count = conflicts.len();
                    if mode == Mode::Extract {
                        warnings.record_conflict(
                            &self.requester,
                            ConflictReport::new(
                                stage.source().to_path_buf(),
                                stage.destination().to_path_buf(),
                                PagedList::new(conflicts, self.scanner.page_size()),
                            ),
                        );
                    }
                    return Err(StageError::ConflictDetected { count });
                }
            }

            let provider = stage.provider();
            info!(
                stage = index + 1,
                of = total,
                format = provider.name(),
                source = %stage.source().display(),
                "Starting {}",
                mode
            );
            match mode {
                Mode::Extract => provider.extract(stage.source(), stage.destination(), &ctx)?,
                Mode::Compress => provider.compress(stage.source(), stage.destination(), &ctx)?,
            }
            *completed += 1;

            if index > 0 {
                match fs::remove_file(stage.source()) {
                    Ok(()) => debug!(path = %stage.source().display(), "Removed intermediate file"),
                    Err(e) => warn!(
                        path = %stage.source().display(),
                        error = %e,
                        "Could not remove intermediate file"
                    ),
                }
            }

            if index + 1 < total {
                debug!(
                    stage = index + 1,
                    output = %stage.destination().display(),
                    "Intermediate stage complete"
                );
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{ExecutorSettings, TaskQueueExecutor};
    use crate::pipeline::{BuildFlags, PipelineBuilder};
    use crate::provider::{
        Codec, FormatProvider, ProviderRegistry, SingleFileProvider, SourceSpec,
    };
    use crossbeam_channel::{bounded, Sender};
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    /// What the gzip wrapper does around its extractions
    #[derive(Debug)]
    enum Hook {
        CancelAfterFirst(CancellationToken),
        CancelBeforeSecond(CancellationToken),
        DeleteSecondSource,
        BlockUntilCancelled(Sender<()>),
    }

    #[derive(Debug)]
    struct HookedGzip {
        inner: SingleFileProvider,
        hook: Hook,
        calls: AtomicUsize,
    }

    impl HookedGzip {
        fn registry(hook: Hook) -> ProviderRegistry {
            ProviderRegistry::new(vec![Arc::new(HookedGzip {
                inner: SingleFileProvider::new(Codec::Gzip),
                hook,
                calls: AtomicUsize::new(0),
            })])
        }
    }

    impl FormatProvider for HookedGzip {
        fn name(&self) -> &'static str {
            self.inner.name()
        }

        fn can_extract(&self, path: &Path) -> bool {
            self.inner.can_extract(path)
        }

        fn can_compress_from(&self, path: &Path) -> bool {
            self.inner.can_compress_from(path)
        }

        fn can_compress_as_destination(&self, path: &Path) -> bool {
            self.inner.can_compress_as_destination(path)
        }

        fn extractable_extensions(&self) -> &'static [&'static str] {
            self.inner.extractable_extensions()
        }

        fn compressible_extensions(&self) -> &'static [&'static str] {
            self.inner.compressible_extensions()
        }

        fn compressible_source_extensions(&self) -> SourceSpec {
            self.inner.compressible_source_extensions()
        }

        fn supports_piped_conflict_detection(&self) -> bool {
            self.inner.supports_piped_conflict_detection()
        }

        fn scan_conflicts(
            &self,
            source: &Path,
            destination: &Path,
            cancel: &CancellationToken,
        ) -> Result<Vec<String>, StageError> {
            self.inner.scan_conflicts(source, destination, cancel)
        }

        fn extract(
            &self,
            source: &Path,
            destination: &Path,
            ctx: &StageContext<'_>,
        ) -> Result<(), StageError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.hook {
                Hook::CancelBeforeSecond(token) if call == 1 => token.cancel(),
                Hook::BlockUntilCancelled(started) => {
                    let _ = started.send(());
                    while !ctx.cancel.is_cancelled() {
                        thread::sleep(Duration::from_millis(5));
                    }
                    return Err(StageError::Cancelled);
                }
                _ => {}
            }

            self.inner.extract(source, destination, ctx)?;

            match &self.hook {
                Hook::CancelAfterFirst(token) if call == 0 => token.cancel(),
                Hook::DeleteSecondSource if call == 1 => {
                    fs::remove_file(source).map_err(|e| StageError::io(e, source))?
                }
                _ => {}
            }
            Ok(())
        }

        fn compress(
            &self,
            source: &Path,
            destination: &Path,
            ctx: &StageContext<'_>,
        ) -> Result<(), StageError> {
            self.inner.compress(source, destination, ctx)
        }
    }

    /// `notes.txt.gz.gz` holding `hello`
    fn double_gzip(dir: &Path) -> PathBuf {
        let inner = dir.join("notes.txt.gz");
        gzip(&inner, b"hello");
        let outer = dir.join("notes.txt.gz.gz");
        let token = CancellationToken::new();
        SingleFileProvider::new(Codec::Gzip)
            .compress(
                &inner,
                &outer,
                &StageContext {
                    cancel: &token,
                    log_files: false,
                },
            )
            .unwrap();
        fs::remove_file(inner).unwrap();
        outer
    }

    fn expanded_chain(registry: &ProviderRegistry, source: &Path, out: &Path) -> PipelineChain {
        let flags = BuildFlags {
            expand_compound: true,
            stop_at: None,
        };
        PipelineBuilder::new(registry)
            .build(source, out, Mode::Extract, &flags)
            .unwrap()
    }

    fn gzip(path: &Path, content: &[u8]) {
        let plain = path.with_extension("");
        fs::write(&plain, content).unwrap();
        let token = CancellationToken::new();
        SingleFileProvider::new(Codec::Gzip)
            .compress(
                &plain,
                path,
                &StageContext {
                    cancel: &token,
                    log_files: false,
                },
            )
            .unwrap();
        fs::remove_file(plain).unwrap();
    }

    fn job(chain: PipelineChain, override_requested: bool) -> Job {
        Job::new(chain, override_requested, "tester", false, ConflictScanner::default())
    }

    #[test]
    fn test_two_stage_extraction_removes_intermediate() {
        let temp_dir = TempDir::new().unwrap();
        let inner = temp_dir.path().join("notes.txt.gz");
        gzip(&inner, b"hello");
        // gzip the gzip
        let outer = temp_dir.path().join("notes.txt.gz.gz");
        let token = CancellationToken::new();
        SingleFileProvider::new(Codec::Gzip)
            .compress(
                &inner,
                &outer,
                &StageContext {
                    cancel: &token,
                    log_files: false,
                },
            )
            .unwrap();

        let out = temp_dir.path().join("out");
        let registry = ProviderRegistry::with_defaults();
        let flags = BuildFlags {
            expand_compound: true,
            stop_at: None,
        };
        let chain = PipelineBuilder::new(&registry)
            .build(&outer, &out, Mode::Extract, &flags)
            .unwrap();
        assert_eq!(chain.len(), 2);

        let outcome = job(chain, false).run(&token, &PendingWarnStore::new());
        assert!(outcome.is_success(), "{:?}", outcome.error());
        assert_eq!(outcome.completed_stages(), 2);
        assert_eq!(fs::read(out.join("notes.txt")).unwrap(), b"hello");
        assert!(!out.join("notes.txt.gz").exists());
        assert!(outer.exists());
    }

    #[test]
    fn test_conflict_at_run_time_records_warning() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("data.bin.gz");
        gzip(&archive, b"new");
        let out = temp_dir.path().join("out");
        fs::create_dir(&out).unwrap();
        fs::write(out.join("data.bin"), b"old").unwrap();

        let registry = ProviderRegistry::with_defaults();
        let chain = PipelineBuilder::new(&registry)
            .build(&archive, &out, Mode::Extract, &BuildFlags::default())
            .unwrap();
        let warnings = PendingWarnStore::new();

        let outcome = job(chain.clone(), false).run(&CancellationToken::new(), &warnings);
        assert!(matches!(
            outcome.error(),
            Some(StageError::ConflictDetected { count: 1 })
        ));
        assert_eq!(fs::read(out.join("data.bin")).unwrap(), b"old");
        assert!(warnings.get_conflict("tester").is_some());

        let outcome = job(chain, true).run(&CancellationToken::new(), &warnings);
        assert!(outcome.is_success());
        assert_eq!(fs::read(out.join("data.bin")).unwrap(), b"new");
    }

    #[test]
    fn test_cancelled_before_first_stage() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("x.gz");
        gzip(&archive, b"x");
        let registry = ProviderRegistry::with_defaults();
        let chain = PipelineBuilder::new(&registry)
            .build(
                &archive,
                &temp_dir.path().join("out"),
                Mode::Extract,
                &BuildFlags::default(),
            )
            .unwrap();

        let token = CancellationToken::new();
        token.cancel();
        let outcome = job(chain, true).run(&token, &PendingWarnStore::new());
        assert!(outcome.is_cancelled());
        assert_eq!(outcome.completed_stages(), 0);
    }

    #[test]
    fn test_failed_stage_stops_chain() {
        let temp_dir = TempDir::new().unwrap();
        let bogus = temp_dir.path().join("broken.tar.gz");
        fs::write(&bogus, b"not gzip").unwrap();
        let registry = ProviderRegistry::with_defaults();
        let flags = BuildFlags {
            expand_compound: true,
            stop_at: None,
        };
        let out = temp_dir.path().join("out");
        let chain = PipelineBuilder::new(&registry)
            .build(&bogus, &out, Mode::Extract, &flags)
            .unwrap();

        let outcome = job(chain, true).run(&CancellationToken::new(), &PendingWarnStore::new());
        assert!(matches!(
            outcome.error(),
            Some(StageError::FormatCorrupt { .. })
        ));
        assert_eq!(outcome.completed_stages(), 0);
        assert_eq!(outcome.total_stages(), 2);
        assert!(bogus.exists());
    }

    #[test]
    fn test_cancel_between_stages_keeps_intermediate() {
        let temp_dir = TempDir::new().unwrap();
        let outer = double_gzip(temp_dir.path());
        let out = temp_dir.path().join("out");
        let token = CancellationToken::new();
        let registry = HookedGzip::registry(Hook::CancelAfterFirst(token.clone()));
        let chain = expanded_chain(&registry, &outer, &out);

        let outcome = job(chain, true).run(&token, &PendingWarnStore::new());
        assert!(outcome.is_cancelled(), "{:?}", outcome.error());
        assert_eq!(outcome.completed_stages(), 1);
        assert_eq!(outcome.total_stages(), 2);
        assert!(out.join("notes.txt.gz").exists());
        assert!(!out.join("notes.txt").exists());
    }

    #[test]
    fn test_cancel_at_start_of_second_copy() {
        let temp_dir = TempDir::new().unwrap();
        let outer = double_gzip(temp_dir.path());
        let out = temp_dir.path().join("out");
        let token = CancellationToken::new();
        let registry = HookedGzip::registry(Hook::CancelBeforeSecond(token.clone()));
        let chain = expanded_chain(&registry, &outer, &out);

        let outcome = job(chain, true).run(&token, &PendingWarnStore::new());
        assert!(outcome.is_cancelled(), "{:?}", outcome.error());
        assert_eq!(outcome.completed_stages(), 1);
        assert!(out.join("notes.txt.gz").exists());
    }

    #[test]
    fn test_failed_intermediate_delete_still_succeeds() {
        let temp_dir = TempDir::new().unwrap();
        let outer = double_gzip(temp_dir.path());
        let out = temp_dir.path().join("out");
        let registry = HookedGzip::registry(Hook::DeleteSecondSource);
        let chain = expanded_chain(&registry, &outer, &out);

        let outcome = job(chain, true).run(&CancellationToken::new(), &PendingWarnStore::new());
        assert!(outcome.is_success(), "{:?}", outcome.error());
        assert_eq!(outcome.completed_stages(), 2);
        assert_eq!(fs::read(out.join("notes.txt")).unwrap(), b"hello");
    }

    #[test]
    fn test_forced_terminate_cancels_running_job() {
        let temp_dir = TempDir::new().unwrap();
        let outer = double_gzip(temp_dir.path());
        let out = temp_dir.path().join("out");
        let (started_tx, started_rx) = bounded(1);
        let registry = HookedGzip::registry(Hook::BlockUntilCancelled(started_tx));
        let job = job(expanded_chain(&registry, &outer, &out), true);

        let executor = TaskQueueExecutor::new(ExecutorSettings::default()).unwrap();
        let accepted = executor
            .submit(Box::new(move |cancel: &CancellationToken| {
                job.run(cancel, &PendingWarnStore::new())
            }))
            .unwrap();
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        executor.terminate(true, true);
        let status = accepted.handle().wait();
        let outcome = status.outcome().unwrap();
        assert!(outcome.is_cancelled(), "{:?}", outcome.error());
        assert_eq!(outcome.completed_stages(), 0);
        assert!(outer.exists());
    }
}
