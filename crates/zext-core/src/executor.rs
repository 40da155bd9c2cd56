//! Bounded task queue feeding a small worker pool
//!
//! One core worker runs for the whole life of the executor. Extra workers,
//! up to the configured pool size, are started when a task arrives and no
//! worker is idle; they retire after sitting idle for the keep-alive period.
//!
//! Shutdown is one-way. A graceful shutdown stops accepting work and lets
//! queued tasks finish; a forced one cancels running tasks and discards the
//! queue.

use crate::cancel::CancellationToken;
use crate::error::SubmitError;
use crate::pipeline::TaskOutcome;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::any::Any;
use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Unit of work run on a worker thread
pub type Task = Box<dyn FnOnce(&CancellationToken) -> TaskOutcome + Send + 'static>;

/// Executor sizing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorSettings {
    /// Maximum number of waiting tasks
    pub queue_capacity: usize,
    /// Upper bound of worker threads, at least 1
    pub max_pool_size: usize,
    /// Idle time after which an extra worker retires
    pub keep_alive: Duration,
    /// How often a blocking shutdown reports progress
    pub report_interval: Duration,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 3,
            max_pool_size: 1,
            keep_alive: Duration::from_secs(10),
            report_interval: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Running,
    ShuttingDownGracefully,
    ShutDown,
}

/// Final state of a task
#[derive(Debug, Clone)]
pub enum TaskStatus {
    /// The task returned, successfully or not
    Finished(Arc<TaskOutcome>),
    /// The task panicked; the worker survived
    Panicked(String),
    /// Dropped from the queue by a forced shutdown before it started
    Discarded,
}

impl TaskStatus {
    /// Finished without a stage error
    pub fn is_success(&self) -> bool {
        matches!(self, TaskStatus::Finished(outcome) if outcome.is_success())
    }

    pub fn outcome(&self) -> Option<&TaskOutcome> {
        match self {
            TaskStatus::Finished(outcome) => Some(outcome),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct HandleInner {
    id: u64,
    status: Mutex<Option<TaskStatus>>,
    done: Condvar,
}

/// Completion signal of one submitted task.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    inner: Arc<HandleInner>,
}

impl TaskHandle {
    fn new(id: u64) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                id,
                status: Mutex::new(None),
                done: Condvar::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<TaskStatus>> {
        self.inner
            .status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn complete(&self, status: TaskStatus) {
        let mut slot = self.lock();
        if slot.is_none() {
            *slot = Some(status);
            self.inner.done.notify_all();
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn is_done(&self) -> bool {
        self.lock().is_some()
    }

    pub fn status(&self) -> Option<TaskStatus> {
        self.lock().clone()
    }

    /// Block until the task has a final status
    pub fn wait(&self) -> TaskStatus {
        let mut slot = self.lock();
        loop {
            if let Some(status) = slot.as_ref() {
                return status.clone();
            }
            slot = self
                .inner
                .done
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`
    pub fn wait_timeout(&self, timeout: Duration) -> Option<TaskStatus> {
        let slot = self.lock();
        let (slot, _) = self
            .inner
            .done
            .wait_timeout_while(slot, timeout, |s| s.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        slot.clone()
    }
}

/// Result of a successful submit
#[derive(Debug, Clone)]
pub struct Accepted {
    handle: TaskHandle,
    position: usize,
}

impl Accepted {
    pub fn handle(&self) -> &TaskHandle {
        &self.handle
    }

    pub fn into_handle(self) -> TaskHandle {
        self.handle
    }

    /// Waiting tasks including this one; 1 means it runs next
    pub fn position(&self) -> usize {
        self.position
    }
}

/// Snapshot of the executor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorStatus {
    pub lifecycle: Lifecycle,
    pub active: usize,
    pub queued: usize,
    pub capacity: usize,
    pub max_pool_size: usize,
    pub workers: usize,
}

impl ExecutorStatus {
    pub fn is_queue_full(&self) -> bool {
        self.queued >= self.capacity
    }
}

impl fmt::Display for ExecutorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.lifecycle {
            Lifecycle::ShutDown => "TERMINATED",
            Lifecycle::ShuttingDownGracefully => "TERMINATING",
            Lifecycle::Running if self.is_queue_full() => "FULL",
            Lifecycle::Running => "READY",
        };
        write!(
            f,
            "{} | Active : {} | Queued : {}",
            state, self.active, self.queued
        )
    }
}

/// What a call to [`TaskQueueExecutor::terminate`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateOutcome {
    Initiated,
    AlreadyTerminating,
    AlreadyTerminated,
}

/// Receives progress while a blocking shutdown waits for outstanding work
pub trait ShutdownObserver {
    fn report(&self, status: &ExecutorStatus);

    fn finished(&self);
}

/// Observer that writes progress to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl ShutdownObserver for LogObserver {
    fn report(&self, status: &ExecutorStatus) {
        info!(
            active = status.active,
            queued = status.queued,
            "Waiting for any outstanding tasks to finish"
        );
    }

    fn finished(&self) {
        info!("All tasks have been completed");
    }
}

struct Envelope {
    task: Task,
    handle: TaskHandle,
}

struct State {
    lifecycle: Lifecycle,
    sender: Option<Sender<Envelope>>,
    max_pool_size: usize,
    workers: usize,
    idle: usize,
    spawned: usize,
    next_id: u64,
    threads: Vec<JoinHandle<()>>,
    handles: Vec<TaskHandle>,
}

struct Inner {
    settings: ExecutorSettings,
    state: Mutex<State>,
    receiver: Receiver<Envelope>,
    active: AtomicUsize,
    cancel: CancellationToken,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn status(&self) -> ExecutorStatus {
        let state = self.lock();
        ExecutorStatus {
            lifecycle: state.lifecycle,
            active: self.active.load(Ordering::SeqCst),
            queued: self.receiver.len(),
            capacity: self.settings.queue_capacity,
            max_pool_size: state.max_pool_size,
            workers: state.workers,
        }
    }
}

/// The bounded worker pool.
///
/// Dropping the executor starts a graceful shutdown without waiting.
pub struct TaskQueueExecutor {
    inner: Arc<Inner>,
}

impl fmt::Debug for TaskQueueExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueueExecutor")
            .field("status", &self.status())
            .finish()
    }
}

impl TaskQueueExecutor {
    /// Start the executor and its core worker
    pub fn new(settings: ExecutorSettings) -> io::Result<Self> {
        let settings = ExecutorSettings {
            max_pool_size: settings.max_pool_size.max(1),
            ..settings
        };
        let (sender, receiver) = unbounded();
        let inner = Arc::new(Inner {
            settings,
            state: Mutex::new(State {
                lifecycle: Lifecycle::Running,
                sender: Some(sender),
                max_pool_size: settings.max_pool_size,
                workers: 0,
                idle: 0,
                spawned: 0,
                next_id: 1,
                threads: Vec::new(),
                handles: Vec::new(),
            }),
            receiver,
            active: AtomicUsize::new(0),
            cancel: CancellationToken::new(),
        });

        {
            let mut state = inner.lock();
            spawn_worker(&inner, &mut state, true)?;
        }
        info!(
            queue_capacity = settings.queue_capacity,
            max_pool_size = settings.max_pool_size,
            "Task executor started"
        );

        Ok(Self { inner })
    }

    pub fn settings(&self) -> ExecutorSettings {
        self.inner.settings
    }

    /// Queue `task` without blocking
    pub fn submit(&self, task: Task) -> Result<Accepted, SubmitError> {
        let inner = &self.inner;
        let mut state = inner.lock();
        if state.lifecycle != Lifecycle::Running {
            return Err(SubmitError::ExecutorShutDown);
        }

        let queued = inner.receiver.len();
        let capacity = inner.settings.queue_capacity;
        if queued >= capacity {
            debug!(queued, capacity, "Rejecting task, queue is full");
            return Err(SubmitError::QueueFull { capacity });
        }

        let handle = TaskHandle::new(state.next_id);
        state.next_id += 1;
        let envelope = Envelope {
            task,
            handle: handle.clone(),
        };
        match state.sender.as_ref() {
            Some(sender) => {
                if sender.send(envelope).is_err() {
                    return Err(SubmitError::ExecutorShutDown);
                }
            }
            None => return Err(SubmitError::ExecutorShutDown),
        }

        if state.idle == 0 && state.workers < state.max_pool_size {
            if let Err(e) = spawn_worker(inner, &mut state, false) {
                warn!(error = %e, "Could not start an extra worker");
            }
        }

        state.handles.retain(|h| !h.is_done());
        state.handles.push(handle.clone());

        let position = queued + 1;
        debug!(task = handle.id(), position, "Task queued");
        Ok(Accepted { handle, position })
    }

    pub fn status(&self) -> ExecutorStatus {
        self.inner.status()
    }

    pub fn is_queue_full(&self) -> bool {
        self.status().is_queue_full()
    }

    /// Change the pool bound. Ignored once shutdown has begun.
    ///
    /// Returns whether the new size was applied.
    pub fn set_max_pool_size(&self, size: usize) -> bool {
        let mut state = self.inner.lock();
        if state.lifecycle != Lifecycle::Running {
            return false;
        }
        state.max_pool_size = size.max(1);
        info!(max_pool_size = state.max_pool_size, "Updated worker pool size");
        true
    }

    /// Begin shutdown, reporting progress through the log when waiting
    pub fn terminate(&self, force: bool, wait: bool) -> TerminateOutcome {
        self.terminate_with_observer(force, wait, &LogObserver)
    }

    /// Begin shutdown.
    ///
    /// With `wait`, blocks until every task submitted so far has a final
    /// status and all workers have exited, reporting to `observer` every
    /// report interval.
    pub fn terminate_with_observer(
        &self,
        force: bool,
        wait: bool,
        observer: &dyn ShutdownObserver,
    ) -> TerminateOutcome {
        let inner = &self.inner;
        let pending = {
            let mut state = inner.lock();
            match state.lifecycle {
                Lifecycle::ShuttingDownGracefully => return TerminateOutcome::AlreadyTerminating,
                Lifecycle::ShutDown => return TerminateOutcome::AlreadyTerminated,
                Lifecycle::Running => {}
            }

            state.lifecycle = if force {
                Lifecycle::ShutDown
            } else {
                Lifecycle::ShuttingDownGracefully
            };
            state.sender = None;
            state.handles.clone()
        };

        if force {
            warn!("Forcing executor shutdown, cancelling running tasks");
            inner.cancel.cancel();
            let mut discarded = 0;
            for envelope in inner.receiver.try_iter() {
                envelope.handle.complete(TaskStatus::Discarded);
                discarded += 1;
            }
            if discarded > 0 {
                info!(discarded, "Discarded queued tasks");
            }
        } else {
            info!("Executor is shutting down, queued tasks will finish");
        }

        if wait {
            self.await_termination(&pending, observer);
        }

        TerminateOutcome::Initiated
    }

    fn await_termination(&self, pending: &[TaskHandle], observer: &dyn ShutdownObserver) {
        let interval = self.inner.settings.report_interval;
        for handle in pending {
            while handle.wait_timeout(interval).is_none() {
                observer.report(&self.status());
            }
        }

        let threads = std::mem::take(&mut self.inner.lock().threads);
        for thread in threads {
            if thread.join().is_err() {
                error!("Worker thread exited abnormally");
            }
        }
        self.inner.lock().lifecycle = Lifecycle::ShutDown;
        observer.finished();
    }
}

impl Drop for TaskQueueExecutor {
    fn drop(&mut self) {
        let mut state = self.inner.lock();
        if state.lifecycle == Lifecycle::Running {
            state.lifecycle = Lifecycle::ShuttingDownGracefully;
            state.sender = None;
        }
    }
}

fn spawn_worker(inner: &Arc<Inner>, state: &mut State, core: bool) -> io::Result<()> {
    state.spawned += 1;
    let name = format!("zext-worker-{}", state.spawned);
    let worker_inner = Arc::clone(inner);
    let thread = thread::Builder::new()
        .name(name.clone())
        .spawn(move || worker_loop(worker_inner, core))?;
    state.workers += 1;
    state.threads.retain(|t| !t.is_finished());
    state.threads.push(thread);
    debug!(worker = %name, core, "Started worker");
    Ok(())
}

fn worker_loop(inner: Arc<Inner>, core: bool) {
    let receiver = inner.receiver.clone();
    loop {
        inner.lock().idle += 1;
        let next = if core {
            receiver.recv().ok()
        } else {
            match receiver.recv_timeout(inner.settings.keep_alive) {
                Ok(envelope) => Some(envelope),
                Err(RecvTimeoutError::Timeout) => {
                    inner.lock().idle -= 1;
                    debug!("Idle worker retiring");
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => None,
            }
        };

        let Some(envelope) = next else {
            inner.lock().idle -= 1;
            break;
        };
        inner.lock().idle -= 1;
        run_envelope(&inner, envelope);

        if !core {
            let state = inner.lock();
            if state.workers > state.max_pool_size {
                drop(state);
                debug!("Pool shrunk, worker retiring");
                break;
            }
        }
    }

    let mut state = inner.lock();
    state.workers -= 1;
    if state.workers == 0 && state.lifecycle != Lifecycle::Running {
        state.lifecycle = Lifecycle::ShutDown;
        info!("Executor has shut down");
    }
}

fn run_envelope(inner: &Inner, envelope: Envelope) {
    let Envelope { task, handle } = envelope;
    if inner.cancel.is_cancelled() {
        handle.complete(TaskStatus::Discarded);
        return;
    }

    inner.active.fetch_add(1, Ordering::SeqCst);
    debug!(task = handle.id(), "Task started");
    let cancel = inner.cancel.clone();
    let result = panic::catch_unwind(AssertUnwindSafe(move || task(&cancel)));
    inner.active.fetch_sub(1, Ordering::SeqCst);

    let status = match result {
        Ok(outcome) => TaskStatus::Finished(Arc::new(outcome)),
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(task = handle.id(), panic = %message, "Task panicked");
            TaskStatus::Panicked(message)
        }
    };
    handle.complete(status);
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn ok_task() -> Task {
        Box::new(|_: &CancellationToken| TaskOutcome::new("test", 1, 1, Ok(())))
    }

    fn settings(capacity: usize, pool: usize) -> ExecutorSettings {
        ExecutorSettings {
            queue_capacity: capacity,
            max_pool_size: pool,
            keep_alive: Duration::from_millis(50),
            report_interval: Duration::from_millis(10),
        }
    }

    fn wait_until<F: Fn() -> bool>(cond: F) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !cond() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_runs_tasks() {
        let executor = TaskQueueExecutor::new(settings(3, 1)).unwrap();
        let accepted = executor.submit(ok_task()).unwrap();
        assert!(accepted.handle().wait().is_success());
        assert_eq!(executor.status().lifecycle, Lifecycle::Running);
    }

    #[test]
    fn test_panic_does_not_kill_worker() {
        let executor = TaskQueueExecutor::new(settings(3, 1)).unwrap();
        let bad = executor
            .submit(Box::new(|_: &CancellationToken| -> TaskOutcome { panic!("boom") }))
            .unwrap()
            .into_handle();
        match bad.wait() {
            TaskStatus::Panicked(msg) => assert_eq!(msg, "boom"),
            other => panic!("unexpected {other:?}"),
        }

        let good = executor.submit(ok_task()).unwrap().into_handle();
        assert!(good.wait().is_success());
    }

    #[test]
    fn test_status_text() {
        let status = ExecutorStatus {
            lifecycle: Lifecycle::Running,
            active: 1,
            queued: 3,
            capacity: 3,
            max_pool_size: 1,
            workers: 1,
        };
        assert_eq!(status.to_string(), "FULL | Active : 1 | Queued : 3");
        let status = ExecutorStatus {
            lifecycle: Lifecycle::ShuttingDownGracefully,
            ..status
        };
        assert!(status.to_string().starts_with("TERMINATING"));
    }

    #[test]
    fn test_extra_worker_retires() {
        let executor = TaskQueueExecutor::new(settings(8, 2)).unwrap();
        let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(0);

        let rx = release_rx.clone();
        let first = executor
            .submit(Box::new(move |_: &CancellationToken| {
                let _ = rx.recv();
                TaskOutcome::new("blocked", 1, 1, Ok(()))
            }))
            .unwrap()
            .into_handle();
        wait_until(|| executor.status().active == 1);

        let second = executor
            .submit(Box::new(move |_: &CancellationToken| {
                let _ = release_rx.recv();
                TaskOutcome::new("blocked", 1, 1, Ok(()))
            }))
            .unwrap()
            .into_handle();
        wait_until(|| executor.status().active == 2);
        assert_eq!(executor.status().workers, 2);

        release_tx.send(()).unwrap();
        release_tx.send(()).unwrap();
        first.wait();
        second.wait();

        wait_until(|| executor.status().workers == 1);
    }

    #[test]
    fn test_set_max_pool_size_only_while_running() {
        let executor = TaskQueueExecutor::new(settings(3, 1)).unwrap();
        assert!(executor.set_max_pool_size(0));
        assert_eq!(executor.status().max_pool_size, 1);
        assert!(executor.set_max_pool_size(4));
        assert_eq!(executor.status().max_pool_size, 4);

        executor.terminate(false, true);
        assert!(!executor.set_max_pool_size(2));
        assert_eq!(executor.status().max_pool_size, 4);
    }

    #[test]
    fn test_terminate_is_idempotent() {
        let executor = TaskQueueExecutor::new(settings(3, 1)).unwrap();
        assert_eq!(executor.terminate(false, true), TerminateOutcome::Initiated);
        assert_eq!(
            executor.terminate(false, false),
            TerminateOutcome::AlreadyTerminated
        );
        assert_eq!(
            executor.terminate(true, false),
            TerminateOutcome::AlreadyTerminated
        );
        assert_eq!(executor.status().lifecycle, Lifecycle::ShutDown);
    }
}
