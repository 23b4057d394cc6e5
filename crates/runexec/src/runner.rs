use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;

use modelbench_memo::TestMemoCache;
use thiserror::Error;

/// Errors that may surface while starting a test.
/// （啟動測試時可能發生的錯誤。）
#[derive(Debug, Error)]
pub enum RunError {
    #[error("failed to spawn process: {0}")]
    Spawn(std::io::Error),
    #[error("process stdin not available")]
    StdinUnavailable,
    #[error("failed to write to stdin: {0}")]
    Stdin(std::io::Error),
    #[error("failed to read process output: {0}")]
    Output(std::io::Error),
    #[error("failed to poll process status: {0}")]
    Poll(std::io::Error),
    #[error("failed to terminate process: {0}")]
    Kill(std::io::Error),
    #[error("runner is already executing a test")]
    Busy,
}

/// One model handed to the interpreter.
#[derive(Debug, Clone)]
pub struct TestJob {
    pub name: String,
    pub xml: String,
    /// Shared across every run; never reset between tests.
    pub memo: Arc<TestMemoCache>,
}

/// Verdict and free-form report for one test.
/// （單一測試的結論與報告。）
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TestOutcome {
    pub success: bool,
    pub report: String,
}

impl TestOutcome {
    pub fn passed(report: impl Into<String>) -> Self {
        Self {
            success: true,
            report: report.into(),
        }
    }

    pub fn failed(report: impl Into<String>) -> Self {
        Self {
            success: false,
            report: report.into(),
        }
    }
}

/// Sending half of a [`TestCompletion`], consumed when the test ends.
#[derive(Debug)]
pub struct CompletionSender {
    tx: Sender<TestOutcome>,
}

impl CompletionSender {
    pub fn complete(self, outcome: TestOutcome) {
        // a dropped completion means nobody waits for the verdict any more
        let _ = self.tx.send(outcome);
    }
}

/// Done-channel resolved once the interpreter finishes a test.
/// （直譯器完成測試時觸發的完成通道。）
#[derive(Debug)]
pub struct TestCompletion {
    rx: Receiver<TestOutcome>,
}

impl TestCompletion {
    pub fn channel() -> (CompletionSender, TestCompletion) {
        let (tx, rx) = mpsc::channel();
        (CompletionSender { tx }, TestCompletion { rx })
    }

    /// Already resolved completion, for runners that finish synchronously.
    pub fn ready(outcome: TestOutcome) -> Self {
        let (sender, completion) = Self::channel();
        sender.complete(outcome);
        completion
    }

    /// Blocks until the outcome arrives. A runner that drops its sender
    /// without answering yields a failed outcome.
    /// （阻塞直到取得結果；若執行器未回報即結束，視為失敗。）
    pub fn wait(self) -> TestOutcome {
        self.rx
            .recv()
            .unwrap_or_else(|_| TestOutcome::failed("test runner ended without reporting an outcome"))
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Option<TestOutcome> {
        self.rx.recv_timeout(timeout).ok()
    }
}

/// External interpreter able to execute one test at a time.
/// （一次執行一個測試的外部直譯器。）
pub trait TestRunner: Send + Sync {
    fn start(&self, job: TestJob) -> Result<TestCompletion, RunError>;
    fn is_running(&self) -> bool;
    /// Advisory; the running test ends at the runner's next poll.
    fn stop(&self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn completion_delivers_outcome_from_another_thread() {
        let (sender, completion) = TestCompletion::channel();
        let worker = thread::spawn(move || sender.complete(TestOutcome::passed("ok")));
        assert_eq!(completion.wait(), TestOutcome::passed("ok"));
        worker.join().unwrap();
    }

    #[test]
    fn dropped_sender_counts_as_failure() {
        let (sender, completion) = TestCompletion::channel();
        drop(sender);
        let outcome = completion.wait();
        assert!(!outcome.success);
        assert!(outcome.report.contains("without reporting"));
    }

    #[test]
    fn pending_completion_times_out_without_outcome() {
        let (_sender, completion) = TestCompletion::channel();
        assert!(completion
            .wait_timeout(Duration::from_millis(10))
            .is_none());
    }
}
