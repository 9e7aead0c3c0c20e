// ============================================
// Talon - packages.rs
// ============================================
// Chocolatey: find it, install it if missing, install packages with it.
//
// Why Chocolatey and not winget: winget isn't guaranteed to be usable on
// a brand-new install until the Store has updated App Installer.
//
// Right after installing Chocolatey, PATH in *our* process is stale,
// so we locate choco.exe by its install folder instead of trusting PATH.
// ============================================

use std::path::PathBuf;
use std::time::Duration;

use tracing::{error, info};

use crate::error::TalonResult;
use crate::powershell;
use crate::runner::{ToolInvocationSpec, ToolOutcome, ToolRunner};
use crate::settings::{secs, PackageSettings};

/// Official bootstrap one-liner from community.chocolatey.org
pub const CHOCO_INSTALL_SCRIPT: &str = "Set-ExecutionPolicy Bypass -Scope Process -Force; \
     [System.Net.ServicePointManager]::SecurityProtocol = \
     [System.Net.ServicePointManager]::SecurityProtocol -bor 3072; \
     iex ((New-Object System.Net.WebClient).DownloadString('https://community.chocolatey.org/install.ps1'))";

/// Exit code Chocolatey uses for "installed, reboot initiated"
pub const EXIT_REBOOT_INITIATED: i32 = 1641;

const VERSION_CHECK_TIMEOUT: Duration = Duration::from_secs(60);

// ============================================
// LOCATING CHOCO
// ============================================

/// Path to choco.exe, best guess first:
/// %ChocolateyInstall%\bin, %ProgramData%\chocolatey\bin, then PATH.
pub fn find_choco_exe() -> String {
    find_choco_exe_in(
        std::env::var_os("ChocolateyInstall").map(PathBuf::from),
        std::env::var_os("ProgramData").map(PathBuf::from),
    )
}

fn find_choco_exe_in(chocolatey_install: Option<PathBuf>, program_data: Option<PathBuf>) -> String {
    let candidates = [
        chocolatey_install.map(|root| root.join("bin").join("choco.exe")),
        Some(
            program_data
                .unwrap_or_else(|| PathBuf::from(r"C:\ProgramData"))
                .join("chocolatey")
                .join("bin")
                .join("choco.exe"),
        ),
    ];

    candidates
        .into_iter()
        .flatten()
        .find(|path| path.exists())
        .map(|path| path.to_string_lossy().to_string())
        .unwrap_or_else(|| "choco".to_string())
}

// ============================================
// INVOCATIONS
// ============================================

/// `choco -v`: exits 0 when Chocolatey works
pub fn version_check_spec(choco_exe: &str) -> ToolInvocationSpec {
    ToolInvocationSpec::new("Chocolatey version check", choco_exe, VERSION_CHECK_TIMEOUT).arg("-v")
}

/// PowerShell running the official install script
pub fn bootstrap_spec(settings: &PackageSettings) -> ToolInvocationSpec {
    powershell::command(
        "Chocolatey install",
        CHOCO_INSTALL_SCRIPT,
        secs(settings.bootstrap_timeout_secs),
    )
}

/// `choco install <id> -y <extra flags>`
pub fn install_spec(settings: &PackageSettings, choco_exe: &str, package_id: &str, display_name: &str) -> ToolInvocationSpec {
    ToolInvocationSpec::new(
        format!("Chocolatey install of {}", display_name),
        choco_exe,
        secs(settings.install_timeout_secs),
    )
    .args(["install", package_id, "-y"])
    .args(settings.extra_flags.iter().cloned())
    .success_codes(&[EXIT_REBOOT_INITIATED])
}

/// Make sure Chocolatey is usable, installing it if needed.
///
/// Returns the outcome of the last thing we ran: the first version check
/// if Chocolatey was already there, otherwise the re-check after install
/// (or the failed install itself).
pub fn ensure_chocolatey(runner: &dyn ToolRunner, settings: &PackageSettings) -> TalonResult<ToolOutcome> {
    let choco = find_choco_exe();
    if runner.run(&version_check_spec(&choco)).is_success() {
        info!("Chocolatey already installed ({})", choco);
        return Ok(ToolOutcome::Success);
    }

    info!("Chocolatey not found. Installing now...");
    let install = runner.run(&bootstrap_spec(settings));
    if !install.is_success() {
        error!("Chocolatey install script failed: {}", install);
        return Ok(install);
    }
    info!("Chocolatey install script executed.");

    let choco = find_choco_exe();
    let verify = runner.run(&version_check_spec(&choco));
    if verify.is_success() {
        info!("Chocolatey installed and verified ({})", choco);
    } else {
        error!("Chocolatey installed but {} does not work: {}", choco, verify);
    }
    Ok(verify)
}
