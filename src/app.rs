// ============================================
// Talon - app.rs
// ============================================
// The startup sequence, in order:
//
//   1. Windows 11 Home/Pro?              fatal if not
//   2. %TEMP%\talon writable?            warn, user may continue
//   3. PowerShell works?                 warn, skipped if 2 failed
//   4. Internet?                         fatal if require_internet
//   5. Fresh install?                    warn, user may continue
//   6. Dependency pipeline               (choco, VC++, browser)
//   7. Maintenance pipeline              (WinUtil, Win11Debloat)
//
// Everything returns TalonResult. dispatch() at the bottom is the one
// place that turns an error into a popup and an exit code.
// ============================================

use std::path::PathBuf;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::cli::Command;
use crate::error::{TalonError, TalonResult};
use crate::freshness::{assess_freshness, FreshnessProbe, FreshnessThresholds, FreshnessVerdict, SystemFreshnessProbe};
use crate::pipeline::{self, PipelineResult};
use crate::platform::{self, OsIdentity, VersionSource};
use crate::popup::{Choice, Presenter};
use crate::prechecks;
use crate::runner::ToolRunner;
use crate::settings::{secs, Settings};
use crate::state;

pub const NOT_FRESH_WARNING: &str = "This is not a fresh Windows installation. \
     Continuing may cause irreversible system corruption or data loss.";

/// Pause between internet check attempts
const INTERNET_RETRY_PAUSE: Duration = Duration::from_secs(1);

/// Everything one run needs. Built once in main().
pub struct App<'a> {
    pub settings: &'a Settings,
    pub runner: &'a dyn ToolRunner,
    pub presenter: &'a dyn Presenter,
    pub version_source: &'a dyn VersionSource,
    /// %TEMP%\talon
    pub temp_dir: PathBuf,
    /// browser_choice.json
    pub choice_path: PathBuf,
    /// From --browser: written to choice_path before the dependency stage
    pub browser_override: Option<String>,
    pub skip_freshness: bool,
}

impl<'a> App<'a> {
    // ============================================
    // ENTRY POINT
    // ============================================

    pub fn run(&self, command: Command) -> TalonResult<()> {
        if self.skip_freshness {
            return self.run_with(command, None);
        }
        let probe = SystemFreshnessProbe::new(self.runner, &self.settings.freshness);
        self.run_with(command, Some(&probe))
    }

    /// Same as run() with the freshness probe passed in (None skips it).
    pub fn run_with(&self, command: Command, probe: Option<&dyn FreshnessProbe>) -> TalonResult<()> {
        info!("Talon starting: {:?}", command);
        let identity = self.startup_checks()?;

        let verdict = match probe {
            Some(probe) => Some(self.check_freshness(probe, command != Command::Check)?),
            None => {
                info!("Freshness check skipped");
                None
            }
        };

        let mut reboot_required = false;
        match command {
            Command::Check => {
                report(&identity, verdict.as_ref());
                return Ok(());
            }
            Command::Run => {
                reboot_required |= self.run_dependencies()?.reboot_required;
                reboot_required |= self.run_maintenance()?.reboot_required;
            }
            Command::Deps => reboot_required |= self.run_dependencies()?.reboot_required,
            Command::Tweaks => reboot_required |= self.run_maintenance()?.reboot_required,
        }

        if reboot_required {
            warn!("Some changes need a reboot to finish");
        }
        info!("Talon finished");
        Ok(())
    }

    // ============================================
    // CHECKS
    // ============================================

    /// Steps 1-4 from the top of this file.
    pub fn startup_checks(&self) -> TalonResult<OsIdentity> {
        let identity = platform::identify(self.version_source)?;
        let checks = &self.settings.checks;

        let temp_writable = match prechecks::check_temp_writable(&self.temp_dir) {
            Ok(()) => true,
            Err(e) => {
                self.advise(&e.to_string())?;
                false
            }
        };

        // The PowerShell test script lives in the temp dir. If we can't write
        // there it would fail for the wrong reason, and the user was already told.
        if !temp_writable {
            warn!("PowerShell test skipped, {} is not writable", self.temp_dir.display());
        } else if let Err(e) = prechecks::check_powershell(self.runner, &self.temp_dir, secs(checks.powershell_test_timeout_secs)) {
            self.advise(&e.to_string())?;
        }

        if let Err(e) = prechecks::check_internet(
            &checks.internet_url,
            checks.internet_attempts,
            secs(checks.internet_timeout_secs),
            INTERNET_RETRY_PAUSE,
        ) {
            if checks.require_internet {
                return Err(e);
            }
            warn!("{} (continuing, require_internet is off)", e);
        }

        Ok(identity)
    }

    /// Step 5. With `warn_user` false (the check command) the verdict is
    /// only logged.
    pub fn check_freshness(&self, probe: &dyn FreshnessProbe, warn_user: bool) -> TalonResult<FreshnessVerdict> {
        let freshness = &self.settings.freshness;
        let verdict = assess_freshness(probe, FreshnessThresholds::from(freshness), freshness.unknown_policy);
        if !verdict.looks_fresh && warn_user {
            self.advise(NOT_FRESH_WARNING)?;
        }
        Ok(verdict)
    }

    /// Warning popup with Continue/Exit. Exit becomes UserAborted.
    pub fn advise(&self, message: &str) -> TalonResult<()> {
        warn!("{}", message);
        match self.presenter.show(message, true) {
            Choice::Continue => {
                info!("User chose to continue");
                Ok(())
            }
            Choice::Exit => {
                info!("User chose to exit");
                Err(TalonError::UserAborted)
            }
        }
    }

    // ============================================
    // STAGES
    // ============================================

    /// Step 6. The browser choice is read first so a missing choice stops
    /// us before anything gets installed.
    pub fn run_dependencies(&self) -> TalonResult<PipelineResult> {
        if let Some(browser) = &self.browser_override {
            state::save_choice(&self.choice_path, browser)?;
        }
        let browser = state::load_choice(&self.choice_path)?;
        info!("Browser choice: {}", browser);

        pipeline::dependency_pipeline(self.settings, &browser)
            .run(self.runner, self.presenter)
            .into_result()
    }

    /// Step 7.
    pub fn run_maintenance(&self) -> TalonResult<PipelineResult> {
        pipeline::maintenance_pipeline(self.settings, self.temp_dir.clone())?
            .run(self.runner, self.presenter)
            .into_result()
    }
}

fn report(identity: &OsIdentity, verdict: Option<&FreshnessVerdict>) {
    info!("OS: {} (build {}), {}", identity.product_name, identity.build_number, identity.edition);
    if let Some(verdict) = verdict {
        let signals = &verdict.signals;
        info!("Profile age (days): {}", signals.profile_age_days);
        info!("Boot events: {}", signals.boot_event_count);
        info!("Installed updates: {}", signals.installed_update_count);
        info!("Looks fresh: {}", if verdict.looks_fresh { "yes" } else { "no" });
    }
}

// ============================================
// TOP-LEVEL ERROR HANDLING
// ============================================

/// Turn the run's result into an exit code.
///
/// Ok and UserAborted are 0. Anything else is logged, shown once in a
/// popup without a Continue option, and is 1.
pub fn dispatch(result: TalonResult<()>, presenter: &dyn Presenter) -> u8 {
    match result {
        Ok(()) => 0,
        Err(TalonError::UserAborted) => {
            info!("Exiting at the user's request");
            0
        }
        Err(e) => {
            error!("{}", e);
            if e.is_platform_incompatible() {
                error!("Unsupported system, nothing was changed");
            }
            presenter.show(&e.to_string(), false);
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{FailurePolicy, Pipeline, PipelineStep};
    use crate::popup::RecordingPresenter;
    use crate::runner::{ProcessRunner, ToolInvocationSpec, ToolOutcome, ToolRun};
    use std::cell::RefCell;

    struct Windows11Pro;

    impl VersionSource for Windows11Pro {
        fn is_windows(&self) -> bool {
            true
        }

        fn read_value(&self, name: &str) -> Result<String, String> {
            match name {
                "ProductName" => Ok("Windows 11 Pro".to_string()),
                "CurrentBuildNumber" => Ok("22631".to_string()),
                other => Err(format!("no value {}", other)),
            }
        }
    }

    struct NotWindows;

    impl VersionSource for NotWindows {
        fn is_windows(&self) -> bool {
            false
        }

        fn read_value(&self, name: &str) -> Result<String, String> {
            Err(format!("no value {}", name))
        }
    }

    /// Pretends PowerShell works, records everything else
    struct FakeRunner {
        ran: RefCell<Vec<String>>,
    }

    impl FakeRunner {
        fn new() -> Self {
            Self { ran: RefCell::new(Vec::new()) }
        }
    }

    impl ToolRunner for FakeRunner {
        fn run(&self, spec: &ToolInvocationSpec) -> ToolOutcome {
            self.ran.borrow_mut().push(spec.label.clone());
            ToolOutcome::Success
        }

        fn run_captured(&self, spec: &ToolInvocationSpec) -> ToolRun {
            ToolRun {
                outcome: self.run(spec),
                output: "Hello, World!".to_string(),
            }
        }
    }

    struct StaleProbe;

    impl FreshnessProbe for StaleProbe {
        fn profile_age_days(&self) -> Result<u64, String> {
            Ok(10)
        }
        fn boot_event_count(&self) -> Result<u64, String> {
            Ok(1)
        }
        fn installed_update_count(&self) -> Result<u64, String> {
            Ok(0)
        }
    }

    /// Offline but not required, so the checks don't need a network
    fn offline_settings() -> Settings {
        let mut settings = Settings::default();
        settings.checks.require_internet = false;
        settings.checks.internet_url = "http://127.0.0.1:1/".to_string();
        settings.checks.internet_attempts = 1;
        settings.checks.internet_timeout_secs = 1;
        settings
    }

    fn app<'a>(
        settings: &'a Settings,
        runner: &'a dyn ToolRunner,
        presenter: &'a dyn Presenter,
        dir: &std::path::Path,
    ) -> App<'a> {
        App {
            settings,
            runner,
            presenter,
            version_source: &Windows11Pro,
            temp_dir: dir.join("talon"),
            choice_path: dir.join("talon").join(state::BROWSER_CHOICE_FILE),
            browser_override: None,
            skip_freshness: true,
        }
    }

    #[test]
    fn test_missing_choice_installs_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let settings = offline_settings();
        let runner = FakeRunner::new();
        let presenter = RecordingPresenter::answering(Choice::Continue);
        let app = app(&settings, &runner, &presenter, dir.path());

        assert!(matches!(app.run_dependencies(), Err(TalonError::StateMissing { .. })));
        assert!(runner.ran.borrow().is_empty());
    }

    #[test]
    fn test_browser_override_is_saved_and_used() {
        let dir = tempfile::tempdir().unwrap();
        let settings = offline_settings();
        let runner = FakeRunner::new();
        let presenter = RecordingPresenter::answering(Choice::Continue);
        let mut app = app(&settings, &runner, &presenter, dir.path());
        app.browser_override = Some("librewolf".to_string());

        let result = app.run_dependencies().unwrap();
        assert!(result.completed);
        assert_eq!(state::load_choice(&app.choice_path).unwrap(), "librewolf");
        assert!(runner.ran.borrow().iter().any(|label| label.contains("librewolf")));
    }

    #[test]
    fn test_stale_install_warns_once() {
        let dir = tempfile::tempdir().unwrap();
        let settings = offline_settings();
        let runner = FakeRunner::new();

        let presenter = RecordingPresenter::answering(Choice::Continue);
        let verdict = app(&settings, &runner, &presenter, dir.path())
            .check_freshness(&StaleProbe, true)
            .unwrap();
        assert!(!verdict.looks_fresh);
        assert_eq!(presenter.count(), 1);
        assert_eq!(presenter.shown.borrow()[0].0, NOT_FRESH_WARNING);

        let presenter = RecordingPresenter::answering(Choice::Exit);
        let result = app(&settings, &runner, &presenter, dir.path()).check_freshness(&StaleProbe, true);
        assert!(matches!(result, Err(TalonError::UserAborted)));
    }

    #[test]
    fn test_check_command_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let settings = offline_settings();
        let runner = FakeRunner::new();
        let presenter = RecordingPresenter::answering(Choice::Exit);
        let app = app(&settings, &runner, &presenter, dir.path());

        app.run_with(Command::Check, Some(&StaleProbe)).unwrap();
        // Only the PowerShell smoke test ran, and nobody was asked anything
        assert_eq!(*runner.ran.borrow(), vec!["PowerShell test"]);
        assert_eq!(presenter.count(), 0);
    }

    #[test]
    fn test_unsupported_platform_stops_before_checks() {
        let dir = tempfile::tempdir().unwrap();
        let settings = offline_settings();
        let runner = FakeRunner::new();
        let presenter = RecordingPresenter::answering(Choice::Continue);
        let mut app = app(&settings, &runner, &presenter, dir.path());
        app.version_source = &NotWindows;

        let err = app.run_with(Command::Run, None).unwrap_err();
        assert!(err.is_platform_incompatible());
        assert!(runner.ran.borrow().is_empty());
    }

    #[test]
    fn test_unwritable_temp_gives_one_warning() {
        let dir = tempfile::tempdir().unwrap();
        let settings = offline_settings();
        let runner = FakeRunner::new();
        let presenter = RecordingPresenter::answering(Choice::Continue);
        let app = app(&settings, &runner, &presenter, dir.path());
        // A file where %TEMP%\talon should be
        std::fs::write(&app.temp_dir, "not a directory").unwrap();

        app.startup_checks().unwrap();

        assert_eq!(presenter.count(), 1);
        assert!(presenter.shown.borrow()[0].0.contains("could not write files"));
        assert!(runner.ran.borrow().is_empty(), "PowerShell test should be skipped");
    }

    #[test]
    fn test_required_internet_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = offline_settings();
        settings.checks.require_internet = true;
        let runner = FakeRunner::new();
        let presenter = RecordingPresenter::answering(Choice::Continue);
        let app = app(&settings, &runner, &presenter, dir.path());

        assert!(matches!(app.startup_checks(), Err(TalonError::NoInternet)));
        // Fatal errors are not advisory popups
        assert_eq!(presenter.count(), 0);
    }

    #[test]
    fn test_missing_tool_gives_exactly_one_popup() {
        let presenter = RecordingPresenter::answering(Choice::Continue);
        let missing = ToolInvocationSpec::new("Missing tool", "no-such-tool-talon-test", Duration::from_secs(5));

        let result = Pipeline::new("test")
            .step(PipelineStep::tool("Missing tool", missing, FailurePolicy::Halt))
            .step(PipelineStep::task("after", FailurePolicy::Halt, |_runner| {
                panic!("step after a halted step must not run")
            }))
            .run(&ProcessRunner, &presenter);

        assert!(!result.completed);
        assert!(matches!(result.failures[0].outcome, ToolOutcome::LaunchError(_)));

        let code = dispatch(result.into_result().map(|_| ()), &presenter);
        assert_eq!(code, 1);
        assert_eq!(presenter.count(), 1);
        let (message, allow_continue) = presenter.shown.borrow()[0].clone();
        assert!(!allow_continue);
        assert!(message.contains("Missing tool"));
    }

    #[test]
    fn test_dispatch_exit_codes() {
        let presenter = RecordingPresenter::answering(Choice::Continue);
        assert_eq!(dispatch(Ok(()), &presenter), 0);
        assert_eq!(dispatch(Err(TalonError::UserAborted), &presenter), 0);
        assert_eq!(presenter.count(), 0);
        assert_eq!(dispatch(Err(TalonError::NoInternet), &presenter), 1);
        assert_eq!(presenter.count(), 1);
    }
}
