// ============================================
// Talon - runner.rs
// ============================================
// Runs external programs (choco, powershell) and turns whatever
// happens into a ToolOutcome. Nothing in here returns Err or panics:
// a missing EXE, a hang, or a weird exit code all come back as data.
//
// Two ways of running:
//   - Quiet: output goes nowhere, we poll until exit or timeout.
//   - Monitored: stdout/stderr are read line by line on two helper
//     threads. If a sentinel string is set and shows up, the tool is
//     done (WinUtil prints "Tweaks are Finished" and then just sits
//     there), so we kill it and report success.
//
// Timeouts always kill the whole process tree.
// ============================================

use std::fmt;
use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::error::TalonError;

#[cfg(windows)]
use std::os::windows::process::CommandExt;
#[cfg(unix)]
use std::os::unix::process::CommandExt as _;

/// Don't pop up a console window for every child (Windows only)
#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// How often the wait loop wakes up
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long to keep collecting output after the process exited.
/// A grandchild can hold the pipe open forever, so this is bounded.
const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

// ============================================
// EXIT CODES
// ============================================

/// MSI/Chocolatey: success, but a reboot is needed
pub const EXIT_REBOOT_REQUIRED: i32 = 3010;
/// MSI: fatal error during installation
pub const EXIT_INSTALL_FAILURE: i32 = 1603;
/// MSI: another installation is already in progress
pub const EXIT_INSTALL_IN_PROGRESS: i32 = 1618;
/// MSI: product is not installed
pub const EXIT_UNKNOWN_PRODUCT: i32 = 1605;

/// Fixed explanation for the installer codes we recognise.
pub fn known_failure_hint(code: i32) -> Option<&'static str> {
    match code {
        EXIT_INSTALL_FAILURE => Some(
            "Fatal error during installation. The installer gave up; check the package log for details.",
        ),
        EXIT_INSTALL_IN_PROGRESS => Some(
            "Another installation is already in progress. Wait for it to finish and try again.",
        ),
        EXIT_UNKNOWN_PRODUCT => Some(
            "This action is only valid for products that are currently installed.",
        ),
        _ => None,
    }
}

// ============================================
// DATA STRUCTURES
// ============================================

/// Everything needed to run one external tool.
#[derive(Debug, Clone)]
pub struct ToolInvocationSpec {
    /// Short human name used in logs and popups, e.g. "Chocolatey"
    pub label: String,
    /// Executable (full path or something on PATH)
    pub program: String,
    pub args: Vec<String>,
    /// Hard limit. On expiry the process tree is killed.
    pub timeout: Duration,
    /// Extra exit codes that count as success. 0 always does.
    pub success_codes: Vec<i32>,
    /// If set, output is watched and this substring means "done".
    pub sentinel: Option<String>,
}

impl ToolInvocationSpec {
    pub fn new(label: impl Into<String>, program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            label: label.into(),
            program: program.into(),
            args: Vec::new(),
            timeout,
            success_codes: Vec::new(),
            sentinel: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn success_codes(mut self, codes: &[i32]) -> Self {
        self.success_codes.extend_from_slice(codes);
        self
    }

    pub fn sentinel(mut self, sentinel: impl Into<String>) -> Self {
        self.sentinel = Some(sentinel.into());
        self
    }

    /// Command line as it would appear in a log
    pub fn display_command(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// What happened when we ran a tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutcome {
    Success,
    SuccessRebootRequired,
    /// One of the installer codes we have an explanation for
    KnownFailure { code: i32, hint: String },
    UnknownFailure(i32),
    Timeout,
    /// The process never started (missing EXE, access denied, ...)
    LaunchError(String),
}

impl ToolOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ToolOutcome::Success | ToolOutcome::SuccessRebootRequired)
    }

    /// Map an in-process error onto the same shape a tool run produces,
    /// so pipeline tasks and tool steps are handled identically.
    pub fn from_error(err: &TalonError) -> Self {
        match err {
            TalonError::ToolTimedOut { .. } => ToolOutcome::Timeout,
            TalonError::ToolKnownFailure { code, hint, .. } => ToolOutcome::KnownFailure {
                code: *code,
                hint: hint.clone(),
            },
            TalonError::ToolUnknownFailure { code, .. } => ToolOutcome::UnknownFailure(*code),
            TalonError::PipelineHalted { outcome, .. } => outcome.clone(),
            other => ToolOutcome::LaunchError(other.to_string()),
        }
    }

    /// Turn a failed outcome into an error naming the tool.
    /// Returns None for the two success variants.
    pub fn into_error(self, spec: &ToolInvocationSpec) -> Option<TalonError> {
        let tool = spec.label.clone();
        match self {
            ToolOutcome::Success | ToolOutcome::SuccessRebootRequired => None,
            ToolOutcome::KnownFailure { code, hint } => {
                Some(TalonError::ToolKnownFailure { tool, code, hint })
            }
            ToolOutcome::UnknownFailure(code) => Some(TalonError::ToolUnknownFailure { tool, code }),
            ToolOutcome::Timeout => Some(TalonError::ToolTimedOut {
                tool,
                seconds: spec.timeout.as_secs(),
            }),
            ToolOutcome::LaunchError(reason) => Some(TalonError::ToolLaunchFailed { tool, reason }),
        }
    }
}

impl fmt::Display for ToolOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolOutcome::Success => write!(f, "completed successfully"),
            ToolOutcome::SuccessRebootRequired => write!(f, "completed successfully (reboot required)"),
            ToolOutcome::KnownFailure { code, hint } => write!(f, "exit code {}: {}", code, hint),
            ToolOutcome::UnknownFailure(code) => write!(f, "exit code {}", code),
            ToolOutcome::Timeout => write!(f, "timed out and was terminated"),
            ToolOutcome::LaunchError(msg) => write!(f, "could not be started: {}", msg),
        }
    }
}

/// A tool run plus everything it printed (only filled when captured).
#[derive(Debug, Clone)]
pub struct ToolRun {
    pub outcome: ToolOutcome,
    pub output: String,
}

// ============================================
// CLASSIFICATION
// ============================================

/// Sort an exit code into the outcome taxonomy.
///
/// 3010 wins over the success list so a reboot is never hidden.
pub fn classify_exit_code(code: i32, success_codes: &[i32]) -> ToolOutcome {
    if code == EXIT_REBOOT_REQUIRED {
        return ToolOutcome::SuccessRebootRequired;
    }
    if code == 0 || success_codes.contains(&code) {
        return ToolOutcome::Success;
    }
    match known_failure_hint(code) {
        Some(hint) => ToolOutcome::KnownFailure {
            code,
            hint: hint.to_string(),
        },
        None => ToolOutcome::UnknownFailure(code),
    }
}

fn classify_status(status: ExitStatus, success_codes: &[i32]) -> ToolOutcome {
    // No code means the process was killed by a signal (Unix only)
    classify_exit_code(status.code().unwrap_or(-1), success_codes)
}

// ============================================
// RUNNER
// ============================================

/// Something that can run a tool. The pipeline only talks to this trait,
/// so tests can swap in a scripted fake.
pub trait ToolRunner {
    fn run(&self, spec: &ToolInvocationSpec) -> ToolOutcome;

    /// Run and keep the output. Used when the tool's output *is* the answer
    /// (e.g. a PowerShell query that prints a number).
    fn run_captured(&self, spec: &ToolInvocationSpec) -> ToolRun;
}

/// The real thing: spawns OS processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

impl ToolRunner for ProcessRunner {
    fn run(&self, spec: &ToolInvocationSpec) -> ToolOutcome {
        execute(spec, false).outcome
    }

    fn run_captured(&self, spec: &ToolInvocationSpec) -> ToolRun {
        execute(spec, true)
    }
}

/// Spawn, watch, classify.
fn execute(spec: &ToolInvocationSpec, capture: bool) -> ToolRun {
    info!("Running {}: {}", spec.label, spec.display_command());

    let watch_output = capture || spec.sentinel.is_some();

    let mut command = Command::new(&spec.program);
    command.args(&spec.args).stdin(Stdio::null());
    if watch_output {
        command.stdout(Stdio::piped()).stderr(Stdio::piped());
    } else {
        command.stdout(Stdio::null()).stderr(Stdio::null());
    }

    #[cfg(windows)]
    command.creation_flags(CREATE_NO_WINDOW);

    // Own process group, so terminate_tree can take the children too
    #[cfg(unix)]
    command.process_group(0);

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            error!("Failed to launch {} ({}): {}", spec.label, spec.program, e);
            return ToolRun {
                outcome: ToolOutcome::LaunchError(format!("{}: {}", spec.program, e)),
                output: String::new(),
            };
        }
    };

    let lines = if watch_output {
        Some(spawn_output_readers(&mut child))
    } else {
        None
    };

    // A timeout too large to represent means no deadline at all
    let deadline = Instant::now().checked_add(spec.timeout);
    let mut output = String::new();

    loop {
        // 1. Did it exit?
        match child.try_wait() {
            Ok(Some(status)) => {
                let saw_sentinel = lines
                    .as_ref()
                    .is_some_and(|rx| drain_output(rx, spec, capture, &mut output));
                // The sentinel was printed before the exit, so it decides
                if saw_sentinel {
                    info!("{} reported completion", spec.label);
                    return ToolRun {
                        outcome: ToolOutcome::Success,
                        output,
                    };
                }
                let outcome = classify_status(status, &spec.success_codes);
                log_outcome(spec, &outcome);
                return ToolRun { outcome, output };
            }
            Ok(None) => {}
            Err(e) => {
                error!("Lost track of {}: {}", spec.label, e);
                terminate_tree(&mut child);
                return ToolRun {
                    outcome: ToolOutcome::LaunchError(format!("failed to wait for process: {}", e)),
                    output,
                };
            }
        }

        // 2. Any output? (this also serves as the sleep between polls)
        match &lines {
            Some(rx) => match rx.recv_timeout(POLL_INTERVAL) {
                Ok(line) => {
                    debug!("[{}] {}", spec.label, line);
                    let finished = is_sentinel(spec, &line);
                    if capture {
                        output.push_str(&line);
                        output.push('\n');
                    }
                    if finished {
                        info!("{} reported completion, stopping it", spec.label);
                        terminate_tree(&mut child);
                        return ToolRun {
                            outcome: ToolOutcome::Success,
                            output,
                        };
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                // Both pipes closed but the process is still alive
                Err(RecvTimeoutError::Disconnected) => thread::sleep(POLL_INTERVAL),
            },
            None => thread::sleep(POLL_INTERVAL),
        }

        // 3. Out of time?
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            warn!(
                "{} did not finish within {}s, terminating",
                spec.label,
                spec.timeout.as_secs()
            );
            terminate_tree(&mut child);
            return ToolRun {
                outcome: ToolOutcome::Timeout,
                output,
            };
        }
    }
}

/// Start one reader thread per pipe. Both feed the same channel;
/// the channel disconnects once both pipes hit EOF.
fn spawn_output_readers(child: &mut Child) -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    if let Some(stdout) = child.stdout.take() {
        spawn_line_reader(stdout, tx.clone());
    }
    if let Some(stderr) = child.stderr.take() {
        spawn_line_reader(stderr, tx.clone());
    }
    rx
}

fn spawn_line_reader<R: Read + Send + 'static>(stream: R, tx: Sender<String>) {
    thread::spawn(move || {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    // Console output is not always UTF-8 on Windows
                    let line = String::from_utf8_lossy(&buf)
                        .trim_end_matches(['\r', '\n'])
                        .to_string();
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            }
        }
    });
}

fn is_sentinel(spec: &ToolInvocationSpec, line: &str) -> bool {
    spec.sentinel.as_deref().is_some_and(|s| line.contains(s))
}

/// Collect whatever is still buffered after the process exited.
/// Returns true if the sentinel was among it.
fn drain_output(rx: &Receiver<String>, spec: &ToolInvocationSpec, capture: bool, output: &mut String) -> bool {
    let deadline = Instant::now() + DRAIN_TIMEOUT;
    let mut saw_sentinel = false;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match rx.recv_timeout(remaining) {
            Ok(line) => {
                debug!("[{}] {}", spec.label, line);
                saw_sentinel |= is_sentinel(spec, &line);
                if capture {
                    output.push_str(&line);
                    output.push('\n');
                }
            }
            Err(_) => break,
        }
    }
    saw_sentinel
}

/// Kill the process and everything it started, then reap it.
fn terminate_tree(child: &mut Child) {
    #[cfg(windows)]
    {
        // taskkill /T takes the children with it (powershell -> script -> ...)
        let _ = Command::new("taskkill")
            .args(["/PID", &child.id().to_string(), "/T", "/F"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .creation_flags(CREATE_NO_WINDOW)
            .status();
    }

    #[cfg(unix)]
    {
        // The child leads its own group (see execute), so -PID is all of it
        let _ = Command::new("kill")
            .args(["-KILL", "--", &format!("-{}", child.id())])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
    }

    let _ = child.kill();
    let _ = child.wait();
}

fn log_outcome(spec: &ToolInvocationSpec, outcome: &ToolOutcome) {
    match outcome {
        ToolOutcome::Success => info!("{} {}", spec.label, outcome),
        ToolOutcome::SuccessRebootRequired => info!("{} {}", spec.label, outcome),
        _ => error!("{} {}", spec.label, outcome),
    }
}

// ============================================
// TESTS
// ============================================
