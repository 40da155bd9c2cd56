//! Zext - queued extraction and compression of nested archives
//!
//! This library decomposes compound archive names such as `backup.tar.gz`
//! into chains of single-format stages, checks them for destination
//! conflicts before anything is written, and runs them on a bounded worker
//! pool with graceful or forced shutdown.

pub mod cancel;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod paging;
pub mod pipeline;
pub mod provider;
pub mod scan;
pub mod security;
pub mod warn;

pub use error::{BuildError, Error, Result, StageError, SubmitError};

// Re-export commonly used types
pub use cancel::CancellationToken;
pub use config::Config;
pub use engine::{Engine, EngineSettings, Prepared, Request, Submitted};
pub use executor::{
    ExecutorSettings, ExecutorStatus, Lifecycle, ShutdownObserver, TaskHandle, TaskQueueExecutor,
    TaskStatus, TerminateOutcome,
};
pub use paging::PagedList;
pub use pipeline::{BuildFlags, Job, Mode, PipelineBuilder, PipelineChain, Stage, TaskOutcome};
pub use provider::{FormatProvider, ProviderRegistry};
pub use scan::{ConflictReport, ConflictScanner, ScanOutcome};
pub use warn::PendingWarnStore;
