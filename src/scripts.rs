// ============================================
// Talon - scripts.rs
// ============================================
// The two third-party PowerShell scripts that do the real work:
//
//   1. ChrisTitusTech WinUtil - tweaks, driven by configs/default.json
//        & '<winutil.ps1>' -Config '<default.json>' -Run -NoUI
//      It prints "Tweaks are Finished" when done but never exits on its
//      own, so it runs with a sentinel.
//
//   2. Raphire Win11Debloat - app removal + privacy/UI switches
//        & ([scriptblock]::Create((irm "https://debloat.raphi.re/"))) <flags>
//      or, with a local copy:
//        & '<Win11Debloat.ps1>' <flags>
//
// Both scripts are run exactly as published. We never edit their text.
// ============================================

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::{TalonError, TalonResult};
use crate::powershell;
use crate::runner::{ToolInvocationSpec, ToolOutcome, ToolRunner};
use crate::settings::{secs, DebloatSettings, WinUtilSettings};

/// File name of the downloaded WinUtil script in %TEMP%\talon
pub const WINUTIL_TEMP_NAME: &str = "winutil.ps1";

/// Downloader signature: (url, destination) -> success
pub type Downloader = dyn Fn(&str, &Path) -> bool;

// ============================================
// CONFIG
// ============================================

/// The WinUtil config must exist before we start anything.
pub fn check_config(config_path: &Path) -> TalonResult<PathBuf> {
    if config_path.is_file() {
        Ok(config_path.to_path_buf())
    } else {
        Err(TalonError::ConfigMissing(config_path.to_path_buf()))
    }
}

// ============================================
// WINUTIL
// ============================================

/// A WinUtil script on disk. Downloaded copies delete themselves on drop,
/// so the temp file goes away whether the run worked or not.
pub struct WinUtilScript {
    path: PathBuf,
    /// We downloaded it, so we clean it up
    temporary: bool,
}

impl WinUtilScript {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WinUtilScript {
    fn drop(&mut self) {
        if !self.temporary || !self.path.exists() {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => info!("Removed temporary file: {}", self.path.display()),
            Err(e) => warn!("Failed to remove temporary file {}: {}", self.path.display(), e),
        }
    }
}

/// Use the bundled script if there is one, otherwise download it.
pub fn prepare_winutil(settings: &WinUtilSettings, temp_dir: &Path, downloader: &Downloader) -> TalonResult<WinUtilScript> {
    if let Some(bundled) = &settings.bundled_script {
        if bundled.is_file() {
            info!("Using bundled WinUtil: {}", bundled.display());
            return Ok(WinUtilScript {
                path: bundled.clone(),
                temporary: false,
            });
        }
        warn!("Bundled WinUtil {} not found, downloading instead", bundled.display());
    }

    let dest = temp_dir.join(WINUTIL_TEMP_NAME);
    info!("Downloading ChrisTitusTech WinUtil to {}", dest.display());
    if !downloader(&settings.url, &dest) {
        return Err(TalonError::DownloadFailed {
            what: "ChrisTitusTech WinUtil".to_string(),
            url: settings.url.clone(),
        });
    }

    Ok(WinUtilScript {
        path: dest,
        temporary: true,
    })
}

/// `& '<script>' -Config '<config>' -Run -NoUI`
pub fn winutil_command(script: &Path, config: &Path) -> String {
    format!(
        "& {} -Config {} -Run -NoUI",
        powershell::quote(script),
        powershell::quote(config)
    )
}

pub fn winutil_spec(settings: &WinUtilSettings, script: &Path, config: &Path) -> ToolInvocationSpec {
    powershell::command(
        "ChrisTitusTech WinUtil",
        &winutil_command(script, config),
        secs(settings.timeout_secs),
    )
    .sentinel(settings.sentinel.clone())
}

/// Get the script, run it, clean up.
pub fn run_winutil(
    runner: &dyn ToolRunner,
    settings: &WinUtilSettings,
    config: &Path,
    temp_dir: &Path,
    downloader: &Downloader,
) -> TalonResult<ToolOutcome> {
    let script = prepare_winutil(settings, temp_dir, downloader)?;
    info!("Executing ChrisTitusTech WinUtil");
    let outcome = runner.run(&winutil_spec(settings, script.path(), config));
    if outcome.is_success() {
        info!("Successfully executed ChrisTitusTech WinUtil");
    }
    Ok(outcome)
}

// ============================================
// WIN11DEBLOAT
// ============================================

pub fn debloat_command(settings: &DebloatSettings) -> String {
    let flags = settings.flags.join(" ");
    match &settings.local_script {
        Some(script) => format!("& {} {}", powershell::quote(script), flags),
        None => format!(
            "& ([scriptblock]::Create((irm \"{}\"))) {}",
            settings.url, flags
        ),
    }
}

pub fn debloat_spec(settings: &DebloatSettings) -> ToolInvocationSpec {
    let source = match &settings.local_script {
        Some(path) => format!("local script {}", path.display()),
        None => "remote command".to_string(),
    };
    info!("Raphire Win11Debloat will run via {}", source);
    powershell::command(
        "Raphire Win11Debloat",
        &debloat_command(settings),
        secs(settings.timeout_secs),
    )
}
