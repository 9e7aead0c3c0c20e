// ============================================
// Talon - state.rs
// ============================================
// The browser choice, handed from the picker screen to the installer
// through a small JSON file:
//
//   %TEMP%\talon\browser_choice.json
//   {"browser": "firefox"}
//
// The value is a Chocolatey package id.
// ============================================

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{TalonError, TalonResult};
use crate::settings::talon_temp_dir;

pub const BROWSER_CHOICE_FILE: &str = "browser_choice.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BrowserChoice {
    #[serde(default)]
    pub browser: Option<String>,
}

/// Default location of the choice file
pub fn browser_choice_path() -> PathBuf {
    talon_temp_dir().join(BROWSER_CHOICE_FILE)
}

/// Read the chosen package id. Missing file, bad JSON, or an empty
/// "browser" key are all StateMissing.
pub fn load_choice(path: &Path) -> TalonResult<String> {
    let missing = |reason: String| TalonError::StateMissing {
        path: path.to_path_buf(),
        reason,
    };

    if !path.exists() {
        return Err(missing("Browser choice file not found".to_string()));
    }

    let content = std::fs::read_to_string(path).map_err(|e| missing(e.to_string()))?;
    let choice: BrowserChoice =
        serde_json::from_str(&content).map_err(|e| missing(format!("invalid JSON: {}", e)))?;

    match choice.browser.map(|b| b.trim().to_string()) {
        Some(browser) if !browser.is_empty() => Ok(browser),
        _ => Err(missing("No 'browser' key in choice file".to_string())),
    }
}

/// Write the choice file (used by --browser).
pub fn save_choice(path: &Path, browser: &str) -> TalonResult<()> {
    let failed = |reason: String| TalonError::FilesystemUnwritable {
        path: path.to_path_buf(),
        reason,
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| failed(e.to_string()))?;
    }
    let choice = BrowserChoice {
        browser: Some(browser.to_string()),
    };
    let json = serde_json::to_string_pretty(&choice).map_err(|e| failed(e.to_string()))?;
    std::fs::write(path, json).map_err(|e| failed(e.to_string()))
}
