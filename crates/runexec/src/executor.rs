//! Sequential batch execution of test models on a background thread.
//! （在背景執行緒依序執行一批測試模型。）

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use modelbench_project::{LiveContent, SharedStore};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::runner::{TestCompletion, TestJob, TestOutcome, TestRunner};
use crate::summary::{BatchSummary, TestRecord};

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("a test run is already in progress")]
    AlreadyRunning,
    #[error("failed to start batch thread: {0}")]
    Thread(std::io::Error),
}

/// Caller side of a batch run: editor content, step confirmation and reporting.
/// （批次執行的呼叫端：提供編輯器內容、逐步確認與結果回報。）
///
/// Called from the batch thread; implementations must not lock the store.
pub trait BatchHost: Send + Sync {
    /// Unsaved editor content of the current model, flushed before each switch.
    fn live_content(&self) -> Option<LiveContent> {
        None
    }

    /// Asked between tests when step confirmation is on; `false` halts the run.
    fn confirm_continue(&self, _completed: &TestRecord, _remaining: usize) -> bool {
        true
    }

    fn test_finished(&self, _record: &TestRecord) {}

    fn report(&self, summary: &BatchSummary);

    /// A run was requested while another one is active.
    fn multiple_executions(&self) {}
}

#[derive(Debug, Default)]
struct ExecutorState {
    running: AtomicBool,
    stop: AtomicBool,
}

/// Clears the running flag however the batch thread exits.
struct IdleOnExit(Arc<ExecutorState>);

impl Drop for IdleOnExit {
    fn drop(&mut self) {
        self.0.running.store(false, Ordering::SeqCst);
    }
}

/// Handle to a started batch.
pub struct BatchHandle {
    thread: JoinHandle<BatchSummary>,
}

impl BatchHandle {
    /// Waits for the batch to finish and returns its summary.
    ///
    /// Host callbacks are contained on the batch thread, so a panic here comes
    /// from the executor itself and is re-raised on the caller.
    pub fn join(self) -> BatchSummary {
        match self.thread.join() {
            Ok(summary) => summary,
            Err(payload) => panic::resume_unwind(payload),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }
}

/// Runs lists of tests through a [`TestRunner`], one batch at a time.
/// （透過 [`TestRunner`] 執行測試清單，同一時間僅允許一個批次。）
pub struct BatchExecutor {
    store: SharedStore,
    runner: Arc<dyn TestRunner>,
    host: Arc<dyn BatchHost>,
    state: Arc<ExecutorState>,
}

impl BatchExecutor {
    pub fn new(store: SharedStore, runner: Arc<dyn TestRunner>, host: Arc<dyn BatchHost>) -> Self {
        Self {
            store,
            runner,
            host,
            state: Arc::default(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::SeqCst) || self.runner.is_running()
    }

    /// Starts executing `tests` in order on a background thread.
    /// （於背景執行緒依序執行測試。）
    pub fn start(
        &self,
        tests: Vec<String>,
        confirm_each_step: bool,
    ) -> Result<BatchHandle, BatchError> {
        if self.runner.is_running()
            || self
                .state
                .running
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
        {
            warn!("test run requested while another is in progress");
            self.host.multiple_executions();
            return Err(BatchError::AlreadyRunning);
        }
        self.state.stop.store(false, Ordering::SeqCst);

        let worker = BatchWorker {
            store: Arc::clone(&self.store),
            runner: Arc::clone(&self.runner),
            host: Arc::clone(&self.host),
            state: Arc::clone(&self.state),
        };
        let thread = thread::Builder::new()
            .name("modelbench-batch".into())
            .spawn(move || worker.run(tests, confirm_each_step))
            .map_err(|err| {
                self.state.running.store(false, Ordering::SeqCst);
                BatchError::Thread(err)
            })?;
        Ok(BatchHandle { thread })
    }

    /// Asks the runner to stop and skips the remaining tests.
    pub fn stop(&self) {
        if self.is_running() {
            info!("stop requested for test run");
            self.state.stop.store(true, Ordering::SeqCst);
            self.runner.stop();
        }
    }
}

struct BatchWorker {
    store: SharedStore,
    runner: Arc<dyn TestRunner>,
    host: Arc<dyn BatchHost>,
    state: Arc<ExecutorState>,
}

impl BatchWorker {
    fn run(self, tests: Vec<String>, confirm_each_step: bool) -> BatchSummary {
        let _idle = IdleOnExit(Arc::clone(&self.state));
        info!(tests = tests.len(), "test run started");

        let mut summary = BatchSummary::new(tests.len());
        for (index, name) in tests.iter().enumerate() {
            if self.state.stop.load(Ordering::SeqCst) {
                summary.mark_halted();
                break;
            }
            let outcome = self.run_one(name);
            info!(test = %name, passed = outcome.success, "test finished");
            let record = summary.record(name, &outcome).clone();
            host_call("test_finished", || self.host.test_finished(&record));

            let remaining = tests.len() - index - 1;
            if confirm_each_step && remaining > 0 {
                let proceed = host_call("confirm_continue", || {
                    self.host.confirm_continue(&record, remaining)
                })
                .unwrap_or(false);
                if !proceed {
                    info!(remaining, "test run halted by host");
                    summary.mark_halted();
                    break;
                }
            }
        }
        // a stop that lands during the last test still counts
        if self.state.stop.load(Ordering::SeqCst) {
            summary.mark_halted();
        }

        info!(
            executed = summary.executed(),
            failures = summary.failures(),
            "test run finished"
        );
        host_call("report", || self.host.report(&summary));
        summary
    }

    fn run_one(&self, name: &str) -> TestOutcome {
        let live = host_call("live_content", || self.host.live_content()).flatten();
        let (record, memo) = {
            let mut store = self.store.lock();
            match store.switch_current(name, live) {
                Ok(record) => (record, Arc::clone(store.memo())),
                Err(err) => {
                    warn!(test = %name, error = %err, "cannot load test model");
                    return TestOutcome::failed(err.to_string());
                }
            }
        };
        debug!(test = %name, path = %record.path().display(), "model loaded");

        let job = TestJob {
            name: record.name().to_string(),
            xml: record.content().to_string(),
            memo,
        };
        let runner = &self.runner;
        let attempt = panic::catch_unwind(AssertUnwindSafe(|| {
            runner.start(job).map(TestCompletion::wait)
        }));
        match attempt {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(err)) => {
                warn!(test = %name, error = %err, "test could not start");
                TestOutcome::failed(err.to_string())
            }
            Err(_) => {
                warn!(test = %name, "test runner panicked");
                TestOutcome::failed("test runner panicked")
            }
        }
    }
}

/// Runs a host callback, turning a panic into `None`.
fn host_call<T>(callback: &str, call: impl FnOnce() -> T) -> Option<T> {
    match panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(callback, "batch host panicked");
            None
        }
    }
}
