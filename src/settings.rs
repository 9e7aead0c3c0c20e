// ============================================
// Talon - settings.rs
// ============================================
// Knobs that used to be hard-coded: freshness thresholds, timeouts,
// script URLs, Chocolatey flags.
//
// Settings live in talon.toml NEXT TO talon.exe (same portable layout
// as configs/). Every field has a default, so the file is optional and
// may contain only the keys you want to change:
//
//   [freshness]
//   max_days = 14
//
//   [debloat]
//   local_script = 'C:\Talon\Win11Debloat.ps1'
//
// Also home of the path helpers (install root, %TEMP%\talon).
// ============================================

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{TalonError, TalonResult};

/// Settings file name, looked up next to the EXE
pub const SETTINGS_FILE_NAME: &str = "talon.toml";

/// Our scratch folder under %TEMP%
pub const TEMP_SUBDIR: &str = "talon";

// ============================================
// DATA STRUCTURES
// ============================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub freshness: FreshnessSettings,
    pub checks: CheckSettings,
    pub packages: PackageSettings,
    pub winutil: WinUtilSettings,
    pub debloat: DebloatSettings,
}

/// What counts as a measurement we could not take
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownPolicy {
    /// Can't tell -> assume the install is NOT fresh (safe default)
    #[default]
    TreatAsStale,
    /// Can't tell -> give it the benefit of the doubt
    TreatAsFresh,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FreshnessSettings {
    /// Max age of the user profile, in days
    pub max_days: u64,
    /// Max number of Kernel-Boot events in the System log
    pub max_boots: u64,
    /// Max number of installed Windows updates
    pub max_updates: u64,
    pub unknown_policy: UnknownPolicy,
    /// Stop counting boot events after this many (old machines have a lot)
    pub boot_scan_limit: u64,
    /// Timeout for each PowerShell query
    pub query_timeout_secs: u64,
}

impl Default for FreshnessSettings {
    fn default() -> Self {
        Self {
            max_days: 7,
            max_boots: 5,
            max_updates: 5,
            unknown_policy: UnknownPolicy::TreatAsStale,
            boot_scan_limit: 500,
            query_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckSettings {
    /// Stop with an error when there's no internet (everything downloads)
    pub require_internet: bool,
    pub internet_url: String,
    pub internet_attempts: u32,
    pub internet_timeout_secs: u64,
    pub powershell_test_timeout_secs: u64,
}

impl Default for CheckSettings {
    fn default() -> Self {
        Self {
            require_internet: true,
            internet_url: "https://ravendevteam.org".to_string(),
            internet_attempts: 3,
            internet_timeout_secs: 5,
            powershell_test_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackageSettings {
    /// Appended to every `choco install <id> -y`
    pub extra_flags: Vec<String>,
    /// Prerequisite runtime installed before the browser
    pub runtime_package: String,
    pub install_timeout_secs: u64,
    pub bootstrap_timeout_secs: u64,
}

impl Default for PackageSettings {
    fn default() -> Self {
        Self {
            extra_flags: vec![
                "--ignore-checksums".to_string(),
                "--no-progress".to_string(),
                "--use-package-exit-codes".to_string(),
            ],
            runtime_package: "vcredist140".to_string(),
            install_timeout_secs: 1800,
            bootstrap_timeout_secs: 600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WinUtilSettings {
    pub url: String,
    /// Use this script instead of downloading one
    pub bundled_script: Option<PathBuf>,
    /// Config passed with -Config, relative to the install root
    pub config_path: PathBuf,
    /// WinUtil prints this when done, but does not exit
    pub sentinel: String,
    pub timeout_secs: u64,
}

impl Default for WinUtilSettings {
    fn default() -> Self {
        Self {
            url: "https://christitus.com/win".to_string(),
            bundled_script: None,
            config_path: PathBuf::from("configs").join("default.json"),
            sentinel: "Tweaks are Finished".to_string(),
            timeout_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebloatSettings {
    pub url: String,
    /// Run a local Win11Debloat.ps1 instead of the remote one-liner
    pub local_script: Option<PathBuf>,
    pub flags: Vec<String>,
    pub timeout_secs: u64,
}

/// Win11Debloat switches, pinned to the version we test against
pub const DEFAULT_DEBLOAT_FLAGS: &[&str] = &[
    "-Silent",
    "-RemoveApps",
    "-RemoveGamingApps",
    "-DisableTelemetry",
    "-DisableBing",
    "-DisableSuggestions",
    "-DisableLockscreenTips",
    "-RevertContextMenu",
    "-TaskbarAlignLeft",
    "-HideSearchTb",
    "-DisableWidgets",
    "-DisableCopilot",
    "-ClearStartAllUsers",
    "-DisableDVR",
    "-DisableStartRecommended",
    "-ExplorerToThisPC",
    "-DisableMouseAcceleration",
];

impl Default for DebloatSettings {
    fn default() -> Self {
        Self {
            url: "https://debloat.raphi.re/".to_string(),
            local_script: None,
            flags: DEFAULT_DEBLOAT_FLAGS.iter().map(|f| f.to_string()).collect(),
            timeout_secs: 3600,
        }
    }
}

// ============================================
// LOADING
// ============================================

impl Settings {
    /// Load settings.
    ///
    /// - explicit path given: the file must exist and parse
    /// - no path: use talon.toml next to the EXE if it's there,
    ///   defaults otherwise
    pub fn load(explicit: Option<&Path>) -> TalonResult<Settings> {
        match explicit {
            Some(path) => Self::from_file(path),
            None => {
                let path = get_app_directory().join(SETTINGS_FILE_NAME);
                if path.exists() {
                    Self::from_file(&path)
                } else {
                    Ok(Settings::default())
                }
            }
        }
    }

    pub fn from_file(path: &Path) -> TalonResult<Settings> {
        let content = std::fs::read_to_string(path).map_err(|e| TalonError::Settings {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_toml(&content).map_err(|reason| TalonError::Settings {
            path: path.to_path_buf(),
            reason,
        })
    }

    pub fn from_toml(content: &str) -> Result<Settings, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }

    /// Absolute path of the WinUtil config
    pub fn winutil_config_path(&self) -> PathBuf {
        resolve_against(&get_app_directory(), &self.winutil.config_path)
    }
}

fn resolve_against(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

pub fn secs(value: u64) -> Duration {
    Duration::from_secs(value)
}

// ============================================
// PATH HELPERS
// ============================================

/// Get the directory where talon.exe is located (the install root).
///
/// configs/ and talon.toml live here, so we resolve the EXE's real
/// location instead of trusting the working directory.
pub fn get_app_directory() -> PathBuf {
    if let Ok(exe_path) = std::env::current_exe() {
        // Canonicalize to resolve any symlinks/junctions, then get parent
        let resolved = exe_path.canonicalize().unwrap_or(exe_path);
        if let Some(parent) = resolved.parent() {
            // Strip \\?\ prefix that canonicalize adds on Windows
            let parent_str = parent.to_string_lossy();
            if let Some(stripped) = parent_str.strip_prefix(r"\\?\") {
                return PathBuf::from(stripped);
            }
            return parent.to_path_buf();
        }
    }
    tracing::warn!("Could not determine EXE directory, using current directory");
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

/// %TEMP%\talon (not created here)
pub fn talon_temp_dir() -> PathBuf {
    let temp_root = std::env::var_os("TEMP")
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir);
    temp_root.join(TEMP_SUBDIR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.freshness.max_days, 7);
        assert_eq!(settings.freshness.max_boots, 5);
        assert_eq!(settings.freshness.max_updates, 5);
        assert_eq!(settings.freshness.unknown_policy, UnknownPolicy::TreatAsStale);
        assert_eq!(settings.winutil.sentinel, "Tweaks are Finished");
        assert_eq!(settings.debloat.flags.len(), DEFAULT_DEBLOAT_FLAGS.len());
        assert_eq!(settings.packages.runtime_package, "vcredist140");
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let settings = Settings::from_toml(
            r#"
            [freshness]
            max_days = 14
            unknown_policy = "treat_as_fresh"

            [checks]
            require_internet = false
            "#,
        )
        .unwrap();

        assert_eq!(settings.freshness.max_days, 14);
        assert_eq!(settings.freshness.max_boots, 5);
        assert_eq!(settings.freshness.unknown_policy, UnknownPolicy::TreatAsFresh);
        assert!(!settings.checks.require_internet);
        assert_eq!(settings.winutil, WinUtilSettings::default());
    }

    #[test]
    fn test_empty_file_is_defaults() {
        assert_eq!(Settings::from_toml("").unwrap(), Settings::default());
    }

    #[test]
    fn test_bad_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("talon.toml");
        std::fs::write(&path, "[freshness]\nmax_days = \"soon\"\n").unwrap();

        match Settings::load(Some(&path)) {
            Err(TalonError::Settings { path: p, .. }) => assert_eq!(p, path),
            other => panic!("expected settings error, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(matches!(
            Settings::load(Some(&missing)),
            Err(TalonError::Settings { .. })
        ));
    }

    #[test]
    fn test_resolve_against_root() {
        let root = Path::new("/opt/talon");
        assert_eq!(
            resolve_against(root, Path::new("configs/default.json")),
            root.join("configs/default.json")
        );
        let absolute = std::env::temp_dir().join("default.json");
        assert_eq!(resolve_against(root, &absolute), absolute);
    }
}
