//! External command runner for test models.
//! （以外部指令執行測試模型。）
//!
//! `RunSpec` describes the interpreter command; the model XML is piped to its
//! stdin and the exit code decides the verdict. Output is drained on reader
//! threads so chatty interpreters cannot stall on a full pipe.
//! `RunSpec` 描述直譯器指令；模型 XML 經由標準輸入送出，結束碼決定結果。

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::runner::{RunError, TestCompletion, TestJob, TestOutcome, TestRunner};

/// Environment variable carrying the test name to the interpreter.
pub const TEST_NAME_ENV: &str = "MODELBENCH_TEST";

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(15);

/// Serializable command specification.
/// （可序列化的指令設定資料結構。）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Text piped to the process; stdin is closed when absent.
    #[serde(default)]
    pub stdin: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl RunSpec {
    /// Creates a new command pointing at the given program.
    /// （以指定的程式建立指令設定。）
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            env: BTreeMap::new(),
            stdin: None,
            timeout_ms: None,
        }
    }

    /// Adds multiple arguments at once.
    /// （一次加入多個參數。）
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Registers an environment variable override.
    /// （設定環境變數覆寫值。）
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Sets the working directory.
    /// （設定指令執行的工作目錄。）
    pub fn with_working_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(path.into());
        self
    }

    pub fn with_stdin(mut self, payload: impl Into<String>) -> Self {
        self.stdin = Some(payload.into());
        self
    }

    /// Applies a timeout; the process is killed once it elapses.
    /// （設定逾時限制，逾時後強制終止進程。）
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        let millis = timeout.as_millis().clamp(1, u128::from(u64::MAX)) as u64;
        self.timeout_ms = Some(millis);
        self
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        if self.stdin.is_some() {
            command.stdin(Stdio::piped());
        } else {
            command.stdin(Stdio::null());
        }
        for (key, value) in &self.env {
            command.env(key, value);
        }
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }
        command
    }
}

/// Result information produced by a command execution.
/// （指令執行完成後的結果資訊。）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub duration_ms: u128,
    pub timed_out: bool,
    #[serde(default)]
    pub stopped: bool,
}

impl RunResult {
    /// Indicates whether the command exited with code `0` on its own.
    /// （判斷指令是否自行以 0 結束。）
    pub fn success(&self) -> bool {
        !self.timed_out && !self.stopped && matches!(self.exit_code, Some(0))
    }

    /// Converts the raw result into a test verdict; stdout then stderr form the report.
    /// （將執行結果轉為測試結論，報告由標準輸出與錯誤輸出組成。）
    pub fn into_outcome(self) -> TestOutcome {
        let mut report = String::from_utf8_lossy(&self.stdout).into_owned();
        report.push_str(&String::from_utf8_lossy(&self.stderr));
        if self.timed_out {
            push_line(&mut report, &format!("timed out after {} ms", self.duration_ms));
        }
        if self.stopped {
            push_line(&mut report, "stopped on request");
        }
        TestOutcome {
            success: self.success(),
            report,
        }
    }
}

fn push_line(report: &mut String, line: &str) {
    if !report.is_empty() && !report.ends_with('\n') {
        report.push('\n');
    }
    report.push_str(line);
}

/// Runs `spec` to completion, polling every `poll` and killing the child when
/// `stop` is raised or the timeout elapses.
/// （執行指令直到結束；收到停止旗標或逾時時終止子進程。）
pub fn execute(spec: &RunSpec, stop: &AtomicBool, poll: Duration) -> Result<RunResult, RunError> {
    let start = Instant::now();
    let mut child = spec.command().spawn().map_err(RunError::Spawn)?;
    let feeder = match feed(child.stdin.take(), spec.stdin.as_deref()) {
        Ok(feeder) => feeder,
        Err(err) => {
            reap(&mut child);
            return Err(err);
        }
    };
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let timeout = spec.timeout_ms.map(Duration::from_millis);
    let mut timed_out = false;
    let mut stopped = false;
    let status = loop {
        if let Some(status) = child.try_wait().map_err(RunError::Poll)? {
            break status;
        }
        if stop.load(Ordering::SeqCst) {
            child.kill().map_err(RunError::Kill)?;
            stopped = true;
            break child.wait().map_err(RunError::Poll)?;
        }
        if timeout.is_some_and(|timeout| start.elapsed() >= timeout) {
            child.kill().map_err(RunError::Kill)?;
            timed_out = true;
            break child.wait().map_err(RunError::Poll)?;
        }
        thread::sleep(poll);
    };

    if let Some(feeder) = feeder {
        match feeder.join() {
            Ok(result) => result.map_err(RunError::Stdin)?,
            Err(_) => return Err(RunError::Stdin(io::Error::other("stdin writer panicked"))),
        }
    }

    Ok(RunResult {
        exit_code: status.code(),
        stdout: collect(stdout)?,
        stderr: collect(stderr)?,
        duration_ms: start.elapsed().as_millis(),
        timed_out,
        stopped,
    })
}

/// Writes the payload on its own thread so a child that never reads its
/// input cannot hold up the timeout or stop checks.
fn feed(
    stdin: Option<ChildStdin>,
    payload: Option<&str>,
) -> Result<Option<JoinHandle<io::Result<()>>>, RunError> {
    let Some(payload) = payload else {
        return Ok(None);
    };
    let mut stdin = stdin.ok_or(RunError::StdinUnavailable)?;
    let bytes = payload.as_bytes().to_vec();
    Ok(Some(thread::spawn(move || {
        match stdin.write_all(&bytes).and_then(|()| stdin.flush()) {
            // the interpreter may exit, or be killed, without reading its input
            Err(err) if err.kind() == io::ErrorKind::BrokenPipe => Ok(()),
            other => other,
        }
    })))
}

fn reap(child: &mut Child) {
    if let Err(err) = child.kill() {
        debug!(error = %err, "child already gone");
    }
    if let Err(err) = child.wait() {
        warn!(error = %err, "failed to reap child process");
    }
}

fn drain<R>(pipe: Option<R>) -> Option<JoinHandle<io::Result<Vec<u8>>>>
where
    R: Read + Send + 'static,
{
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buffer = Vec::new();
            pipe.read_to_end(&mut buffer)?;
            Ok(buffer)
        })
    })
}

fn collect(reader: Option<JoinHandle<io::Result<Vec<u8>>>>) -> Result<Vec<u8>, RunError> {
    match reader {
        Some(handle) => match handle.join() {
            Ok(result) => result.map_err(RunError::Output),
            Err(_) => Err(RunError::Output(io::Error::other(
                "output reader panicked",
            ))),
        },
        None => Ok(Vec::new()),
    }
}

#[derive(Debug, Default)]
struct RunnerState {
    running: AtomicBool,
    stop: AtomicBool,
}

/// `TestRunner` that feeds each model to an external interpreter command.
/// （將每個模型交給外部直譯器指令執行的 `TestRunner`。）
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    spec: RunSpec,
    poll_interval: Duration,
    state: Arc<RunnerState>,
}

impl ProcessRunner {
    pub fn new(spec: RunSpec) -> Self {
        Self {
            spec,
            poll_interval: DEFAULT_POLL_INTERVAL,
            state: Arc::default(),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn spec(&self) -> &RunSpec {
        &self.spec
    }
}

impl TestRunner for ProcessRunner {
    fn start(&self, job: TestJob) -> Result<TestCompletion, RunError> {
        if self.state.running.swap(true, Ordering::SeqCst) {
            return Err(RunError::Busy);
        }
        self.state.stop.store(false, Ordering::SeqCst);

        let spec = self
            .spec
            .clone()
            .with_env(TEST_NAME_ENV, job.name.clone())
            .with_stdin(job.xml);
        let (sender, completion) = TestCompletion::channel();
        let state = Arc::clone(&self.state);
        let poll = self.poll_interval;
        let name = job.name;

        let spawned = thread::Builder::new()
            .name(format!("modelbench-test-{name}"))
            .spawn(move || {
                debug!(test = %name, program = %spec.program, "interpreter started");
                let outcome = match execute(&spec, &state.stop, poll) {
                    Ok(result) => result.into_outcome(),
                    Err(err) => {
                        warn!(test = %name, error = %err, "interpreter failed");
                        TestOutcome::failed(err.to_string())
                    }
                };
                state.running.store(false, Ordering::SeqCst);
                sender.complete(outcome);
            });
        if let Err(err) = spawned {
            self.state.running.store(false, Ordering::SeqCst);
            return Err(RunError::Spawn(err));
        }
        Ok(completion)
    }

    fn is_running(&self) -> bool {
        self.state.running.load(Ordering::SeqCst)
    }

    fn stop(&self) {
        if self.is_running() {
            self.state.stop.store(true, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modelbench_memo::TestMemoCache;
    use std::str;
    use tempfile::tempdir;

    fn require_utf8(bytes: &[u8]) -> &str {
        str::from_utf8(bytes).expect("output should be valid UTF-8 / 輸出需為有效 UTF-8")
    }

    fn run(spec: &RunSpec) -> RunResult {
        execute(spec, &AtomicBool::new(false), DEFAULT_POLL_INTERVAL)
            .expect("command should execute / 指令應成功執行")
    }

    fn job(name: &str, xml: &str) -> TestJob {
        TestJob {
            name: name.to_string(),
            xml: xml.to_string(),
            memo: Arc::new(TestMemoCache::default()),
        }
    }

    #[test]
    fn execute_command_with_environment() {
        let spec = RunSpec::new("bash")
            .with_args(["-c", "printf '%s' \"$RUN_TEST_MESSAGE\""])
            .with_env("RUN_TEST_MESSAGE", "hello-model");

        let result = run(&spec);
        assert!(result.success(), "exit code should be zero / 結束碼應為 0");
        assert_eq!(require_utf8(&result.stdout), "hello-model");
        assert!(require_utf8(&result.stderr).is_empty());
    }

    #[test]
    fn execute_with_custom_working_directory() {
        let temp = tempdir().expect("tempdir should work / 臨時目錄應可建立");
        let spec = RunSpec::new("bash")
            .with_args(["-c", "pwd"])
            .with_working_dir(temp.path());

        let result = run(&spec);
        assert!(result.success());
        let output = require_utf8(&result.stdout).trim_end();
        assert_eq!(
            PathBuf::from(output).canonicalize().unwrap(),
            temp.path().canonicalize().unwrap()
        );
    }

    #[test]
    fn timeout_fires_while_stdin_is_unread() {
        let spec = RunSpec::new("bash")
            .with_args(["-c", "sleep 30"])
            .with_stdin("x".repeat(1 << 20))
            .with_timeout(Duration::from_millis(200));

        let started = Instant::now();
        let result = run(&spec);
        assert!(result.timed_out);
        assert!(!result.success());
        assert!(
            started.elapsed() < Duration::from_secs(10),
            "timeout must not wait for the child to exit / 逾時不應等待子進程結束"
        );
    }

    #[test]
    fn stop_fires_while_stdin_is_unread() {
        let runner = ProcessRunner::new(RunSpec::new("bash").with_args(["-c", "sleep 30"]));
        let big = job("big.xml", &format!("<model>{}</model>", "x".repeat(1 << 20)));
        let started = Instant::now();
        let completion = runner.start(big).unwrap();
        thread::sleep(Duration::from_millis(100));
        runner.stop();

        let outcome = completion.wait();
        assert!(!outcome.success);
        assert!(outcome.report.contains("stopped"));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn enforce_timeout_and_kill() {
        let spec = RunSpec::new("bash")
            .with_args(["-c", "sleep 5 && echo done"])
            .with_timeout(Duration::from_millis(100));

        let result = run(&spec);
        assert!(result.timed_out, "result should indicate timeout / 結果需標示逾時");
        assert!(!result.success());
        let outcome = result.into_outcome();
        assert!(!outcome.success);
        assert!(outcome.report.contains("timed out"));
    }

    #[test]
    fn large_output_does_not_block() {
        let spec = RunSpec::new("bash")
            .with_args(["-c", "head -c 300000 /dev/zero | tr '\\0' 'x'"])
            .with_timeout(Duration::from_secs(10));

        let result = run(&spec);
        assert!(result.success());
        assert_eq!(result.stdout.len(), 300_000);
    }

    #[test]
    fn outcome_report_joins_stdout_and_stderr() {
        let result = RunResult {
            exit_code: Some(1),
            stdout: b"checking\n".to_vec(),
            stderr: b"state s2 unreachable".to_vec(),
            duration_ms: 3,
            timed_out: false,
            stopped: false,
        };
        let outcome = result.into_outcome();
        assert!(!outcome.success);
        assert_eq!(outcome.report, "checking\nstate s2 unreachable");
    }

    #[test]
    fn process_runner_pipes_model_and_name() {
        let runner = ProcessRunner::new(
            RunSpec::new("bash").with_args(["-c", "printf '%s:' \"$MODELBENCH_TEST\"; cat"]),
        );
        let outcome = runner
            .start(job("door.xml", "<model/>"))
            .expect("runner should start / 執行器應啟動")
            .wait();
        assert!(outcome.success);
        assert_eq!(outcome.report, "door.xml:<model/>");
        assert!(!runner.is_running());
    }

    #[test]
    fn process_runner_reports_nonzero_exit_as_failure() {
        let runner = ProcessRunner::new(
            RunSpec::new("bash").with_args(["-c", "echo 'assertion failed' >&2; exit 3"]),
        );
        let outcome = runner.start(job("a.xml", "<m/>")).unwrap().wait();
        assert!(!outcome.success);
        assert_eq!(outcome.report.trim_end(), "assertion failed");
    }

    #[test]
    fn process_runner_refuses_overlapping_jobs() {
        let runner = ProcessRunner::new(RunSpec::new("bash").with_args(["-c", "sleep 5"]));
        let first = runner.start(job("slow.xml", "<m/>")).unwrap();
        assert!(runner.is_running());
        assert!(matches!(
            runner.start(job("other.xml", "<m/>")),
            Err(RunError::Busy)
        ));
        runner.stop();
        let outcome = first.wait();
        assert!(!outcome.success);
        assert!(outcome.report.contains("stopped"));
        assert!(!runner.is_running());
    }

    #[test]
    fn missing_program_fails_the_test() {
        let runner = ProcessRunner::new(RunSpec::new("definitely-not-a-modelbench-interpreter"));
        let outcome = runner.start(job("a.xml", "<m/>")).unwrap().wait();
        assert!(!outcome.success);
        assert!(outcome.report.contains("failed to spawn process"));
        assert!(!runner.is_running());
    }
}
