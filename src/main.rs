// ============================================
// Talon - main.rs
// ============================================
// This is the entry point of the application.
//
// The program flow is:
// 1. Parse the command line
// 2. Start logging (console + %TEMP%\talon\talon.log)
// 3. Pick how to talk to the user (message boxes or console)
// 4. Load talon.toml
// 5. Run the requested stages (see app.rs)
// 6. Turn the result into one popup (if it failed) and an exit code
// ============================================

use std::process::ExitCode;

use clap::Parser;
use tracing::info;

// Our modules
mod app;         // Startup sequence + top-level error handling
mod cli;         // Command line flags
mod download;    // HTTP downloads
mod error;       // TalonError
mod freshness;   // "Is this a fresh install?" heuristic
mod logging;     // tracing setup
mod packages;    // Chocolatey
mod pipeline;    // Step runner + the two pipelines
mod platform;    // Windows 11 Home/Pro detection
mod popup;       // Message boxes / console prompts
mod powershell;  // PowerShell invocations
mod prechecks;   // Temp dir, PowerShell, internet
mod runner;      // Running external tools safely
mod scripts;     // WinUtil + Win11Debloat
mod settings;    // talon.toml + paths
mod state;       // browser_choice.json

use app::App;
use cli::Cli;
use platform::RegistryVersionSource;
use runner::ProcessRunner;
use settings::Settings;

// ============================================
// MAIN FUNCTION
// ============================================

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Must stay alive until we return, it flushes the log file on drop
    let temp_dir = settings::talon_temp_dir();
    let log_sink = logging::init(&temp_dir, cli.verbose);

    info!("============================================");
    info!("Talon v{}", env!("CARGO_PKG_VERSION"));
    info!("============================================");
    info!("App directory: {}", settings::get_app_directory().display());
    if let Some(log_file) = log_sink.log_file() {
        info!("Log file: {}", log_file.display());
    }

    let presenter = popup::default_presenter(cli.headless, cli.assume_yes);

    let settings = match Settings::load(cli.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => return ExitCode::from(app::dispatch(Err(e), presenter.as_ref())),
    };

    let runner = ProcessRunner;
    let app = App {
        settings: &settings,
        runner: &runner,
        presenter: presenter.as_ref(),
        version_source: &RegistryVersionSource,
        choice_path: state::browser_choice_path(),
        temp_dir,
        browser_override: cli.browser.clone(),
        skip_freshness: cli.skip_freshness,
    };

    let result = app.run(cli.selected_command());
    ExitCode::from(app::dispatch(result, presenter.as_ref()))
}
