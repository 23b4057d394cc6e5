//! Test execution for modelbench: the interpreter seam, an external-process
//! interpreter and the sequential batch executor.
//! （modelbench 的測試執行：直譯器介面、外部程序直譯器與依序批次執行器。）

pub mod executor;
pub mod process;
pub mod runner;
pub mod summary;

pub use executor::{BatchError, BatchExecutor, BatchHandle, BatchHost};
pub use process::{execute, ProcessRunner, RunResult, RunSpec, TEST_NAME_ENV};
pub use runner::{CompletionSender, RunError, TestCompletion, TestJob, TestOutcome, TestRunner};
pub use summary::{BatchSummary, TestRecord};
