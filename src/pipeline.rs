// ============================================
// Talon - pipeline.rs
// ============================================
// Runs a list of steps in order, one at a time.
//
// Each step either runs an external tool (Tool) or some Rust code that
// may run tools itself (Task). Both end up as a ToolOutcome, so they
// are judged the same way:
//
//   Success / SuccessRebootRequired -> next step
//   anything else, step is Halt     -> stop right here, completed = false
//   anything else, WarnAndContinue  -> log it, tell the user, next step
//
// The warning popup for WarnAndContinue has an Exit button. If the user
// presses it we stop (aborted_by_user), because that's what they asked.
//
// The two real pipelines (dependencies, maintenance) are built at the
// bottom of this file.
// ============================================

use std::path::PathBuf;

use tracing::{debug, error, info, warn};

use crate::download::download;
use crate::error::{TalonError, TalonResult};
use crate::packages;
use crate::popup::{Choice, Presenter};
use crate::runner::{ToolInvocationSpec, ToolOutcome, ToolRunner};
use crate::scripts;
use crate::settings::Settings;

// ============================================
// DATA STRUCTURES
// ============================================

/// What to do when a step fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    Halt,
    WarnAndContinue,
}

/// Rust code run as a step. Gets the runner so it can launch tools.
pub type TaskFn<'a> = Box<dyn FnMut(&dyn ToolRunner) -> TalonResult<ToolOutcome> + 'a>;

pub enum StepAction<'a> {
    Tool(ToolInvocationSpec),
    Task(TaskFn<'a>),
}

pub struct PipelineStep<'a> {
    pub name: String,
    pub action: StepAction<'a>,
    pub on_failure: FailurePolicy,
}

impl<'a> PipelineStep<'a> {
    pub fn tool(name: impl Into<String>, spec: ToolInvocationSpec, on_failure: FailurePolicy) -> Self {
        Self {
            name: name.into(),
            action: StepAction::Tool(spec),
            on_failure,
        }
    }

    pub fn task<F>(name: impl Into<String>, on_failure: FailurePolicy, task: F) -> Self
    where
        F: FnMut(&dyn ToolRunner) -> TalonResult<ToolOutcome> + 'a,
    {
        Self {
            name: name.into(),
            action: StepAction::Task(Box::new(task)),
            on_failure,
        }
    }

    fn execute(&mut self, runner: &dyn ToolRunner) -> ToolOutcome {
        match &mut self.action {
            StepAction::Tool(spec) => runner.run(spec),
            StepAction::Task(task) => match task(runner) {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("{}: {}", self.name, e);
                    ToolOutcome::from_error(&e)
                }
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepFailure {
    pub step_name: String,
    pub outcome: ToolOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineResult {
    /// Every step ran and none halted
    pub completed: bool,
    /// In the order they happened
    pub failures: Vec<StepFailure>,
    /// Some step asked for a reboot (exit code 3010)
    pub reboot_required: bool,
    /// The user pressed Exit on a warning
    pub aborted_by_user: bool,
    /// How many steps were started
    pub steps_run: usize,
}

impl PipelineResult {
    /// Ok when completed, otherwise the error that should end the program.
    pub fn into_result(self) -> TalonResult<PipelineResult> {
        if self.completed {
            return Ok(self);
        }
        if self.aborted_by_user {
            return Err(TalonError::UserAborted);
        }
        match self.failures.last() {
            Some(failure) => Err(TalonError::PipelineHalted {
                step: failure.step_name.clone(),
                outcome: failure.outcome.clone(),
            }),
            // Not completed without a failure can't happen, but don't panic
            None => Err(TalonError::PipelineHalted {
                step: "pipeline".to_string(),
                outcome: ToolOutcome::LaunchError("stopped without a recorded failure".to_string()),
            }),
        }
    }
}

pub struct Pipeline<'a> {
    pub name: String,
    pub steps: Vec<PipelineStep<'a>>,
}

// ============================================
// EXECUTION
// ============================================

impl<'a> Pipeline<'a> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    pub fn step(mut self, step: PipelineStep<'a>) -> Self {
        self.steps.push(step);
        self
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name.as_str()).collect()
    }

    /// Run every step in order (see the top of this file for the rules).
    pub fn run(mut self, runner: &dyn ToolRunner, presenter: &dyn Presenter) -> PipelineResult {
        info!("=== {} ({} steps) ===", self.name, self.steps.len());
        debug!("Steps: {}", self.step_names().join(" -> "));
        let total = self.steps.len();
        let mut result = PipelineResult::default();

        for (index, step) in self.steps.iter_mut().enumerate() {
            info!("[{}/{}] {}", index + 1, total, step.name);
            result.steps_run += 1;

            let outcome = step.execute(runner);
            match outcome {
                ToolOutcome::Success => continue,
                ToolOutcome::SuccessRebootRequired => {
                    info!("{} needs a reboot to finish", step.name);
                    result.reboot_required = true;
                    continue;
                }
                _ => {}
            }

            result.failures.push(StepFailure {
                step_name: step.name.clone(),
                outcome: outcome.clone(),
            });

            match step.on_failure {
                FailurePolicy::Halt => {
                    error!("{} failed ({}), stopping {}", step.name, outcome, self.name);
                    return result;
                }
                FailurePolicy::WarnAndContinue => {
                    warn!("{} failed ({}), continuing", step.name, outcome);
                    let message = format!(
                        "A problem occurred during '{}'.\n{} {}.",
                        step.name, step.name, outcome
                    );
                    if presenter.show(&message, true) == Choice::Exit {
                        warn!("User chose to exit after {} failed", step.name);
                        result.aborted_by_user = true;
                        return result;
                    }
                }
            }
        }

        result.completed = true;
        info!(
            "=== {} finished ({} warning(s)) ===",
            self.name,
            result.failures.len()
        );
        result
    }
}

// ============================================
// NAMED PIPELINES
// ============================================

const VC_REDIST_NAME: &str = "Microsoft Visual C++ 2015-2022 Redistributable";

/// choco -> VC++ runtime -> browser.
///
/// The browser id comes from the state file; read it first (load_choice)
/// so a missing choice stops us before anything is installed.
pub fn dependency_pipeline<'a>(settings: &'a Settings, browser: &str) -> Pipeline<'a> {
    let packages = &settings.packages;
    let browser = browser.to_string();

    Pipeline::new("Dependency installation")
        .step(PipelineStep::task(
            "Ensure Chocolatey",
            FailurePolicy::Halt,
            move |runner| packages::ensure_chocolatey(runner, packages),
        ))
        .step(PipelineStep::task(
            "Install Visual C++ Redistributable",
            FailurePolicy::Halt,
            move |runner| {
                // Resolved at run time: choco may have been installed a step ago
                let spec = packages::install_spec(
                    packages,
                    &packages::find_choco_exe(),
                    &packages.runtime_package,
                    VC_REDIST_NAME,
                );
                info!("Installing via Chocolatey: {} ({})", VC_REDIST_NAME, packages.runtime_package);
                Ok(runner.run(&spec))
            },
        ))
        .step(PipelineStep::task(
            format!("Install browser '{}'", browser),
            FailurePolicy::WarnAndContinue,
            move |runner| {
                let spec = packages::install_spec(
                    packages,
                    &packages::find_choco_exe(),
                    &browser,
                    &format!("browser '{}'", browser),
                );
                info!("Installing via Chocolatey: browser ({})", browser);
                Ok(runner.run(&spec))
            },
        ))
}

/// WinUtil tweaks -> Win11Debloat.
///
/// Fails with ConfigMissing before building anything if the WinUtil
/// config isn't there.
pub fn maintenance_pipeline<'a>(settings: &'a Settings, temp_dir: PathBuf) -> TalonResult<Pipeline<'a>> {
    let config_path = scripts::check_config(&settings.winutil_config_path())?;
    info!("Using WinUtil config: {}", config_path.display());

    Ok(Pipeline::new("External debloat scripts")
        .step(PipelineStep::task(
            "ChrisTitusTech WinUtil",
            FailurePolicy::Halt,
            move |runner| scripts::run_winutil(runner, &settings.winutil, &config_path, &temp_dir, &download),
        ))
        .step(PipelineStep::tool(
            "Raphire Win11Debloat",
            scripts::debloat_spec(&settings.debloat),
            FailurePolicy::Halt,
        )))
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::popup::RecordingPresenter;
    use crate::runner::{ProcessRunner, ToolRun};
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::time::Duration;

    /// Hands out scripted outcomes and remembers what it was asked to run.
    struct ScriptedRunner {
        outcomes: RefCell<VecDeque<ToolOutcome>>,
        ran: RefCell<Vec<String>>,
    }

    impl ScriptedRunner {
        fn new(outcomes: Vec<ToolOutcome>) -> Self {
            Self {
                outcomes: RefCell::new(outcomes.into()),
                ran: RefCell::new(Vec::new()),
            }
        }

        fn ran(&self) -> Vec<String> {
            self.ran.borrow().clone()
        }
    }

    impl ToolRunner for ScriptedRunner {
        fn run(&self, spec: &ToolInvocationSpec) -> ToolOutcome {
            self.ran.borrow_mut().push(spec.label.clone());
            self.outcomes.borrow_mut().pop_front().unwrap_or(ToolOutcome::Success)
        }

        fn run_captured(&self, spec: &ToolInvocationSpec) -> ToolRun {
            ToolRun {
                outcome: self.run(spec),
                output: String::new(),
            }
        }
    }

    fn spec(label: &str) -> ToolInvocationSpec {
        ToolInvocationSpec::new(label, label, Duration::from_secs(5))
    }

    #[test]
    fn test_all_steps_succeed() {
        let runner = ScriptedRunner::new(vec![ToolOutcome::Success, ToolOutcome::Success]);
        let presenter = RecordingPresenter::answering(Choice::Continue);

        let result = Pipeline::new("test")
            .step(PipelineStep::tool("one", spec("one"), FailurePolicy::Halt))
            .step(PipelineStep::tool("two", spec("two"), FailurePolicy::Halt))
            .run(&runner, &presenter);

        assert!(result.completed);
        assert!(result.failures.is_empty());
        assert_eq!(result.steps_run, 2);
        assert_eq!(runner.ran(), vec!["one", "two"]);
        assert_eq!(presenter.count(), 0);
    }

    #[test]
    fn test_halt_stops_everything_after() {
        let runner = ScriptedRunner::new(vec![
            ToolOutcome::Success,
            ToolOutcome::UnknownFailure(1),
        ]);
        let presenter = RecordingPresenter::answering(Choice::Continue);

        let result = Pipeline::new("test")
            .step(PipelineStep::tool("one", spec("one"), FailurePolicy::Halt))
            .step(PipelineStep::tool("two", spec("two"), FailurePolicy::Halt))
            .step(PipelineStep::tool("three", spec("three"), FailurePolicy::WarnAndContinue))
            .run(&runner, &presenter);

        assert!(!result.completed);
        assert_eq!(runner.ran(), vec!["one", "two"]);
        assert_eq!(
            result.failures,
            vec![StepFailure {
                step_name: "two".into(),
                outcome: ToolOutcome::UnknownFailure(1)
            }]
        );
        // Halt doesn't pop anything up; main() reports it once
        assert_eq!(presenter.count(), 0);
    }

    #[test]
    fn test_warn_and_continue_reaches_next_step() {
        let runner = ScriptedRunner::new(vec![
            ToolOutcome::KnownFailure { code: 1603, hint: "fatal".into() },
            ToolOutcome::Success,
        ]);
        let presenter = RecordingPresenter::answering(Choice::Continue);

        let result = Pipeline::new("test")
            .step(PipelineStep::tool("browser", spec("browser"), FailurePolicy::WarnAndContinue))
            .step(PipelineStep::tool("after", spec("after"), FailurePolicy::Halt))
            .run(&runner, &presenter);

        assert!(result.completed);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(runner.ran(), vec!["browser", "after"]);
        assert_eq!(presenter.count(), 1);
        let (message, allow_continue) = presenter.shown.borrow()[0].clone();
        assert!(allow_continue);
        assert!(message.contains("browser"));
        assert!(message.contains("1603"));
    }

    #[test]
    fn test_user_can_exit_from_a_warning() {
        let runner = ScriptedRunner::new(vec![ToolOutcome::Timeout]);
        let presenter = RecordingPresenter::answering(Choice::Exit);

        let result = Pipeline::new("test")
            .step(PipelineStep::tool("browser", spec("browser"), FailurePolicy::WarnAndContinue))
            .step(PipelineStep::tool("after", spec("after"), FailurePolicy::Halt))
            .run(&runner, &presenter);

        assert!(!result.completed);
        assert!(result.aborted_by_user);
        assert_eq!(runner.ran(), vec!["browser"]);
        assert!(matches!(result.into_result(), Err(TalonError::UserAborted)));
    }

    #[test]
    fn test_reboot_required_is_success() {
        let runner = ScriptedRunner::new(vec![ToolOutcome::SuccessRebootRequired]);
        let presenter = RecordingPresenter::answering(Choice::Continue);

        let result = Pipeline::new("test")
            .step(PipelineStep::tool("vcredist", spec("vcredist"), FailurePolicy::Halt))
            .run(&runner, &presenter);

        assert!(result.completed);
        assert!(result.reboot_required);
        assert!(result.failures.is_empty());
    }

    #[test]
    fn test_task_errors_use_outcome_shape() {
        let runner = ScriptedRunner::new(vec![]);
        let presenter = RecordingPresenter::answering(Choice::Continue);

        let result = Pipeline::new("test")
            .step(PipelineStep::task("download", FailurePolicy::Halt, |_runner| {
                Err(TalonError::DownloadFailed {
                    what: "WinUtil".into(),
                    url: "https://example.invalid".into(),
                })
            }))
            .step(PipelineStep::tool("never", spec("never"), FailurePolicy::Halt))
            .run(&runner, &presenter);

        assert!(!result.completed);
        assert!(matches!(result.failures[0].outcome, ToolOutcome::LaunchError(_)));
        assert!(runner.ran().is_empty());

        match result.into_result() {
            Err(TalonError::PipelineHalted { step, .. }) => assert_eq!(step, "download"),
            other => panic!("expected PipelineHalted, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_executable_halts() {
        let presenter = RecordingPresenter::answering(Choice::Continue);
        let missing = ToolInvocationSpec::new("Missing", "no-such-tool-talon-test", Duration::from_secs(5));

        let result = Pipeline::new("test")
            .step(PipelineStep::tool("missing", missing, FailurePolicy::Halt))
            .step(PipelineStep::task("never", FailurePolicy::Halt, |_runner| {
                panic!("step after a halted step must not run")
            }))
            .run(&ProcessRunner, &presenter);

        assert!(!result.completed);
        assert_eq!(result.steps_run, 1);
        assert!(matches!(result.failures[0].outcome, ToolOutcome::LaunchError(_)));
    }

    #[test]
    fn test_dependency_pipeline_shape() {
        let settings = Settings::default();
        let pipeline = dependency_pipeline(&settings, "firefox");
        assert_eq!(
            pipeline.step_names(),
            vec![
                "Ensure Chocolatey",
                "Install Visual C++ Redistributable",
                "Install browser 'firefox'"
            ]
        );
        let policies: Vec<FailurePolicy> = pipeline.steps.iter().map(|s| s.on_failure).collect();
        assert_eq!(
            policies,
            vec![FailurePolicy::Halt, FailurePolicy::Halt, FailurePolicy::WarnAndContinue]
        );
    }

    #[test]
    fn test_install_is_logged_only_when_it_runs() {
        let settings = Settings::default();

        let built = crate::logging::capture_logs(|| {
            let _ = dependency_pipeline(&settings, "firefox");
        });
        assert!(!built.contains("Installing via Chocolatey"));

        let ran = crate::logging::capture_logs(|| {
            let runner = ScriptedRunner::new(vec![]);
            let presenter = RecordingPresenter::answering(Choice::Continue);
            dependency_pipeline(&settings, "firefox").run(&runner, &presenter);
        });
        assert!(ran.contains("Installing via Chocolatey: browser (firefox)"));
        assert!(ran.contains("Installing via Chocolatey: Microsoft Visual C++"));
    }

    #[test]
    fn test_dependency_pipeline_browser_failure_only_warns() {
        let settings = Settings::default();
        // choco -v ok, vcredist ok, browser 1603
        let runner = ScriptedRunner::new(vec![
            ToolOutcome::Success,
            ToolOutcome::Success,
            ToolOutcome::KnownFailure { code: 1603, hint: "fatal".into() },
        ]);
        let presenter = RecordingPresenter::answering(Choice::Continue);

        let result = dependency_pipeline(&settings, "firefox").run(&runner, &presenter);

        assert!(result.completed);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].step_name, "Install browser 'firefox'");
        assert_eq!(runner.ran().len(), 3);
    }

    #[test]
    fn test_maintenance_pipeline_needs_config() {
        let mut settings = Settings::default();
        let dir = tempfile::tempdir().unwrap();
        settings.winutil.config_path = dir.path().join("configs").join("default.json");

        match maintenance_pipeline(&settings, dir.path().to_path_buf()) {
            Err(TalonError::ConfigMissing(path)) => assert_eq!(path, settings.winutil.config_path),
            Err(other) => panic!("expected ConfigMissing, got {:?}", other),
            Ok(_) => panic!("expected ConfigMissing, got a pipeline"),
        }

        std::fs::create_dir_all(dir.path().join("configs")).unwrap();
        std::fs::write(&settings.winutil.config_path, "{}").unwrap();
        let pipeline = maintenance_pipeline(&settings, dir.path().to_path_buf()).unwrap();
        assert_eq!(
            pipeline.step_names(),
            vec!["ChrisTitusTech WinUtil", "Raphire Win11Debloat"]
        );
        assert!(pipeline.steps.iter().all(|s| s.on_failure == FailurePolicy::Halt));
    }
}
