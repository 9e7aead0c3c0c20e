// ============================================
// Talon - prechecks.rs
// ============================================
// Quick environment checks before we change anything:
//
//   1. Can we write to %TEMP%\talon?        (advisory)
//   2. Does PowerShell run at all?          (advisory)
//   3. Is there an internet connection?     (fatal if require_internet)
//
// "Advisory" means the caller shows a warning with Continue/Exit.
// These functions only report; they never show popups themselves.
// ============================================

use std::fs;
use std::path::Path;
use std::time::Duration;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{TalonError, TalonResult};
use crate::powershell;
use crate::runner::{ToolOutcome, ToolRunner};

/// What the PowerShell test script must print
pub const POWERSHELL_TEST_OUTPUT: &str = "Hello, World!";

const USER_AGENT: &str = "Talon/1.0";

// ============================================
// TEMP DIRECTORY
// ============================================

/// Create the directory, write a probe file into it, delete it again.
pub fn check_temp_writable(dir: &Path) -> TalonResult<()> {
    let failed = |reason: String| {
        error!("Temp dir check failed for {}: {}", dir.display(), reason);
        TalonError::FilesystemUnwritable {
            path: dir.to_path_buf(),
            reason,
        }
    };

    fs::create_dir_all(dir).map_err(|e| failed(e.to_string()))?;

    // Unique name so two runs never fight over the same file
    let probe = dir.join(format!("_write_test_{}", Uuid::new_v4()));
    fs::write(&probe, "test").map_err(|e| failed(e.to_string()))?;
    fs::remove_file(&probe).map_err(|e| failed(e.to_string()))?;

    debug!("Temp dir is writable: {}", dir.display());
    Ok(())
}

// ============================================
// POWERSHELL
// ============================================

/// Write a tiny .ps1 into `dir`, run it with -File and check it printed
/// the greeting. Catches both "powershell.exe missing" and script
/// execution being blocked.
pub fn check_powershell(runner: &dyn ToolRunner, dir: &Path, timeout: Duration) -> TalonResult<()> {
    let script = dir.join(format!("_powershell_test_{}.ps1", Uuid::new_v4()));
    let unavailable = |reason: &str| {
        error!("PowerShell test failed: {}", reason);
        TalonError::PowerShellUnavailable
    };

    fs::create_dir_all(dir)
        .and_then(|_| fs::write(&script, format!("Write-Output '{}'", POWERSHELL_TEST_OUTPUT)))
        .map_err(|e| unavailable(&format!("could not write test script: {}", e)))?;

    let run = runner.run_captured(&powershell::file("PowerShell test", &script, timeout));

    if let Err(e) = fs::remove_file(&script) {
        warn!("Failed to remove {}: {}", script.display(), e);
    }

    debug!("PowerShell test output: {}", run.output.trim());
    if run.outcome != ToolOutcome::Success {
        return Err(unavailable(&run.outcome.to_string()));
    }
    if !run.output.contains(POWERSHELL_TEST_OUTPUT) {
        return Err(unavailable("unexpected output"));
    }

    info!("PowerShell test passed");
    Ok(())
}

// ============================================
// INTERNET
// ============================================

/// Try `url` up to `attempts` times, waiting `pause` between tries.
///
/// Any answer below 500 counts: a 404 still proves we reached the
/// internet. Only connection errors, timeouts and 5xx are failures.
pub fn check_internet(url: &str, attempts: u32, timeout: Duration, pause: Duration) -> TalonResult<()> {
    let client = reqwest::blocking::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
        .map_err(|e| {
            error!("Failed to create HTTP client: {}", e);
            TalonError::NoInternet
        })?;

    let attempts = attempts.max(1);
    for attempt in 1..=attempts {
        info!("Checking internet connectivity (attempt {}/{})...", attempt, attempts);
        match client.get(url).send() {
            Ok(response) => {
                let status = response.status();
                debug!("Internet check HTTP status: {}", status);
                if status.as_u16() < 500 {
                    info!("Internet connectivity confirmed.");
                    return Ok(());
                }
                warn!("Internet check failed: server answered {}", status);
            }
            Err(e) => warn!("Internet check failed: {}", e),
        }

        if attempt < attempts {
            std::thread::sleep(pause);
        }
    }

    error!("No internet connection after {} attempt(s)", attempts);
    Err(TalonError::NoInternet)
}
