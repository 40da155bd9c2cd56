//! Multi-stage archive pipelines
//!
//! A compound file name such as `backup.tar.gz` is decomposed into one
//! [`Stage`] per format. Extraction chains peel the outermost format first;
//! compression chains build the innermost format first. Each stage reads the
//! previous stage's output, and intermediate files are removed as soon as
//! the next stage has consumed them.

mod builder;
pub mod names;
mod run;

pub use builder::{BuildFlags, Mode, PipelineBuilder, PipelineChain, Stage};
pub use run::{Job, TaskOutcome};
