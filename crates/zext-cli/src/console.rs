//! Operator commands and their dispatch onto the engine

use anyhow::{anyhow, bail, Result};
use clap::{Parser, Subcommand};
use std::cell::RefCell;
use std::env;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};
use zext_core::{
    BuildFlags, Config, ConflictReport, Engine, EngineSettings, ExecutorStatus, Mode, Prepared,
    Request, ShutdownObserver, Submitted, TaskStatus, TerminateOutcome,
};

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Extract the configured source into the destination directory
    #[command(args_conflicts_with_subcommands = true)]
    Extract {
        #[command(subcommand)]
        view: Option<ExtractCommand>,

        /// Overwrite existing files without asking first
        #[arg(long = "override")]
        force: bool,

        /// Process every extension of a compound name such as .tar.gz
        #[arg(long)]
        all: bool,

        /// Stop processing extensions when this one is reached (implies --all)
        #[arg(long, value_name = "EXT")]
        until: Option<String>,
    },

    /// Compress the configured source into the destination archive
    Compress {
        /// Replace existing archives
        #[arg(long = "override")]
        force: bool,
    },

    /// Show the configured source
    Src {
        #[arg(long)]
        absolute: bool,
    },

    /// Show the configured destination
    Dest {
        #[arg(long)]
        absolute: bool,
    },

    /// Set and save the source path
    Setsrc {
        #[arg(required = true, num_args = 1..)]
        path: Vec<String>,
    },

    /// Set and save the destination path
    Setdest {
        #[arg(required = true, num_args = 1..)]
        path: Vec<String>,
    },

    /// Show the task queue state
    Status,

    /// Stop accepting tasks and let queued ones finish
    Terminate,

    /// Stop accepting tasks, cancel running ones and drop the queue
    Forceterminate,

    /// Re-read the configuration file
    Reload,

    /// Shut down and leave the console
    Exit,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ExtractCommand {
    /// Show the files a pending extraction would overwrite
    View {
        /// Page number, starting at 1
        page: Option<usize>,
    },
}

/// One line typed at the console
#[derive(Parser, Debug)]
#[command(name = "zext", no_binary_name = true)]
struct Line {
    #[command(subcommand)]
    command: Command,
}

/// A task run by a one-shot command did not succeed
#[derive(Error, Debug)]
#[error("{summary}: {detail}")]
pub struct TaskFailed {
    summary: String,
    detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

/// Prints shutdown progress to the console
struct ConsoleObserver<'a> {
    out: RefCell<&'a mut dyn Write>,
}

impl ShutdownObserver for ConsoleObserver<'_> {
    fn report(&self, status: &ExecutorStatus) {
        let _ = writeln!(
            self.out.borrow_mut(),
            "Waiting for any outstanding tasks to finish | Active : {} | Queued : {}",
            status.active,
            status.queued
        );
    }

    fn finished(&self) {
        let _ = writeln!(self.out.borrow_mut(), "All tasks have been completed.");
    }
}

pub struct Console<W: Write> {
    engine: Engine,
    config: Config,
    config_path: PathBuf,
    requester: String,
    out: W,
    last_task: Option<Submitted>,
}

impl<W: Write> Console<W> {
    pub fn new(
        engine: Engine,
        config: Config,
        config_path: PathBuf,
        requester: String,
        out: W,
    ) -> Self {
        Self {
            engine,
            config,
            config_path,
            requester,
            out,
            last_task: None,
        }
    }

    /// Read commands until `exit` or end of input, then shut down
    pub fn run_interactive<R: BufRead>(&mut self, input: R) -> Result<()> {
        writeln!(self.out, "zext ready. Type 'help' for a list of commands.")?;
        for line in input.lines() {
            let line = line?;
            let words: Vec<&str> = line.split_whitespace().collect();
            if words.is_empty() {
                continue;
            }

            let command = match Line::try_parse_from(words) {
                Ok(line) => line.command,
                Err(e) => {
                    write!(self.out, "{}", e.render())?;
                    continue;
                }
            };

            match self.execute(command) {
                Ok(Flow::Exit) => return Ok(()),
                Ok(Flow::Continue) => {}
                Err(e) => writeln!(self.out, "Error: {:#}", e)?,
            }
            self.out.flush()?;
        }

        self.shutdown()
    }

    /// Run one command, wait for the task it queued, then shut down
    pub fn run_once(&mut self, command: Command) -> Result<()> {
        if self.execute(command)? == Flow::Exit {
            return Ok(());
        }

        let result = match self.last_task.take() {
            Some(task) => self.report_task(&task),
            None => Ok(()),
        };
        self.shutdown()?;
        result
    }

    pub fn execute(&mut self, command: Command) -> Result<Flow> {
        match command {
            Command::Extract {
                view: Some(ExtractCommand::View { page }),
                ..
            } => self.view(page)?,
            Command::Extract {
                view: None,
                force,
                all,
                until,
            } => self.extract(force, all, until)?,
            Command::Compress { force } => self.compress(force)?,
            Command::Src { absolute } => {
                let path = self.config.source_path();
                self.show_path("Source", path, absolute)?
            }
            Command::Dest { absolute } => {
                let path = self.config.destination_path();
                self.show_path("Destination", path, absolute)?
            }
            Command::Setsrc { path } => {
                self.config.set_source(&path.join(" "));
                self.config.save_to(&self.config_path)?;
                writeln!(self.out, "Source set to {}", self.config.paths.source)?;
            }
            Command::Setdest { path } => {
                self.config.set_destination(&path.join(" "));
                self.config.save_to(&self.config_path)?;
                writeln!(self.out, "Destination set to {}", self.config.paths.destination)?;
            }
            Command::Status => {
                let status = self.engine.status();
                writeln!(self.out, "{}", status)?;
                writeln!(
                    self.out,
                    "Workers : {} of {} | Queue limit : {}",
                    status.workers,
                    status.max_pool_size,
                    capacity_text(status.capacity)
                )?;
            }
            Command::Terminate => {
                let wait = self.config.executor.wait_on_shutdown;
                self.terminate(false, wait)?;
            }
            Command::Forceterminate => self.terminate(true, false)?,
            Command::Reload => self.reload()?,
            Command::Exit => {
                self.shutdown()?;
                return Ok(Flow::Exit);
            }
        }
        Ok(Flow::Continue)
    }

    fn source(&self) -> Result<PathBuf> {
        self.config
            .source_path()
            .ok_or_else(|| anyhow!("No source set, use 'setsrc <path>'"))
    }

    fn destination(&self) -> Result<PathBuf> {
        self.config
            .destination_path()
            .ok_or_else(|| anyhow!("No destination set, use 'setdest <path>'"))
    }

    fn extract(&mut self, force: bool, all: bool, until: Option<String>) -> Result<()> {
        let source = self.source()?;
        let destination = self.destination()?;
        // a bare repeat of the request that was just warned about confirms it
        let confirmed = force
            || self
                .engine
                .was_just_warned(&self.requester, &source, &destination);

        let request = Request::extract(source, destination)
            .with_flags(BuildFlags {
                expand_compound: all,
                stop_at: until,
            })
            .with_override(confirmed);
        self.dispatch(request)
    }

    fn compress(&mut self, force: bool) -> Result<()> {
        let request = Request::compress(self.source()?, self.destination()?).with_override(force);
        self.dispatch(request)
    }

    fn dispatch(&mut self, request: Request) -> Result<()> {
        let prepared = self
            .engine
            .build_and_scan(&request, &self.requester)
            .map_err(zext_core::Error::from)?;

        match prepared {
            Prepared::Ready(job) => {
                let submitted = self.engine.submit(job).map_err(zext_core::Error::from)?;
                writeln!(
                    self.out,
                    "Queued {} (position {})",
                    submitted.summary(),
                    submitted.position()
                )?;
                self.last_task = Some(submitted);
            }
            Prepared::Blocked(report) => {
                self.print_conflicts(&report, request.mode, 0)?;
            }
        }
        Ok(())
    }

    fn print_conflicts(&mut self, report: &ConflictReport, mode: Mode, page: usize) -> Result<()> {
        let pages = report.conflicts().page_count();
        match mode {
            Mode::Extract => writeln!(
                self.out,
                "{} file(s) in {} would be overwritten:",
                report.len(),
                report.destination().display()
            )?,
            Mode::Compress => writeln!(self.out, "{} output file(s) already exist:", report.len())?,
        }
        for entry in report.conflicts().page(page).unwrap_or_default() {
            writeln!(self.out, "  - {}", entry)?;
        }
        if pages > 1 {
            writeln!(
                self.out,
                "Page {}/{}. Use 'extract view <page>' to see more.",
                page + 1,
                pages
            )?;
        }
        match mode {
            Mode::Extract => writeln!(
                self.out,
                "Repeat the command or add --override to overwrite them."
            )?,
            Mode::Compress => writeln!(self.out, "Use 'compress --override' to replace them.")?,
        }
        Ok(())
    }

    fn view(&mut self, page: Option<usize>) -> Result<()> {
        let Some(report) = self.engine.warn_data(&self.requester) else {
            writeln!(self.out, "There are no pending conflicts.")?;
            return Ok(());
        };

        let page = page.unwrap_or(1);
        let pages = report.conflicts().page_count();
        if page == 0 || page > pages {
            bail!("Invalid page {}, there are {} page(s)", page, pages);
        }
        self.print_conflicts(&report, Mode::Extract, page - 1)
    }

    fn show_path(&mut self, label: &str, path: Option<PathBuf>, absolute: bool) -> Result<()> {
        match path {
            Some(path) => {
                let shown = if absolute { absolute_path(&path)? } else { path };
                writeln!(self.out, "{} : {}", label, shown.display())?;
            }
            None => writeln!(self.out, "{} is not set", label)?,
        }
        Ok(())
    }

    fn terminate(&mut self, force: bool, wait: bool) -> Result<()> {
        let outcome = {
            let observer = ConsoleObserver {
                out: RefCell::new(&mut self.out),
            };
            self.engine.terminate_with_observer(force, wait, &observer)
        };
        match outcome {
            TerminateOutcome::Initiated if force => {
                writeln!(self.out, "Executor terminated, queued tasks were discarded.")?
            }
            TerminateOutcome::Initiated => writeln!(self.out, "Executor is terminating.")?,
            TerminateOutcome::AlreadyTerminating => {
                writeln!(self.out, "Executor is already terminating.")?
            }
            TerminateOutcome::AlreadyTerminated => {
                writeln!(self.out, "Executor is already terminated.")?
            }
        }
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        let wait = self.config.executor.wait_on_shutdown;
        let observer = ConsoleObserver {
            out: RefCell::new(&mut self.out),
        };
        if self.engine.terminate_with_observer(false, wait, &observer) == TerminateOutcome::Initiated {
            info!("Console shut down");
        }
        Ok(())
    }

    fn reload(&mut self) -> Result<()> {
        let config = Config::load_or_create(&self.config_path)?;
        if config.queue_capacity() != self.engine.status().capacity {
            warn!("Queue size changes take effect after a restart");
        }
        self.engine.set_settings(EngineSettings::from_config(&config));
        self.engine.set_max_pool_size(config.max_pool_size());
        self.config = config;
        writeln!(self.out, "Configuration reloaded.")?;
        Ok(())
    }

    fn report_task(&mut self, task: &Submitted) -> Result<()> {
        match task.handle().wait() {
            TaskStatus::Finished(outcome) => match outcome.error() {
                None => {
                    writeln!(self.out, "Finished {}", task.summary())?;
                    Ok(())
                }
                Some(err) => Err(TaskFailed {
                    summary: task.summary().to_string(),
                    detail: format!(
                        "failed after {} of {} stage(s): {}",
                        outcome.completed_stages(),
                        outcome.total_stages(),
                        err
                    ),
                }
                .into()),
            },
            TaskStatus::Panicked(message) => Err(TaskFailed {
                summary: task.summary().to_string(),
                detail: format!("crashed: {}", message),
            }
            .into()),
            TaskStatus::Discarded => Err(TaskFailed {
                summary: task.summary().to_string(),
                detail: "discarded before it started".to_string(),
            }
            .into()),
        }
    }
}

fn capacity_text(capacity: usize) -> String {
    if capacity == usize::MAX {
        "unbounded".to_string()
    } else {
        capacity.to_string()
    }
}

fn absolute_path(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(env::current_dir()?.join(path))
    }
}
