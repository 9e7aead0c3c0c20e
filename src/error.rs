// ============================================
// Talon - error.rs
// ============================================
// Every way Talon can fail, in one enum.
//
// Nothing below main() exits the process. Functions return
// Result<_, TalonError> and main() decides what to do:
//   - fatal errors: one blocking popup, then exit
//   - UserAborted: the user pressed "Exit" on a warning, exit quietly
// ============================================

use std::path::PathBuf;
use thiserror::Error;

use crate::runner::ToolOutcome;

/// Everything that can go wrong while provisioning.
#[derive(Debug, Error)]
pub enum TalonError {
    // ----- Platform incompatible (probe failures) -----
    /// Not running on Windows at all.
    #[error("Unsupported OS detected.\nThis tool requires Windows 11 Home or Professional.")]
    UnsupportedPlatform,

    /// The CurrentVersion registry values could not be read or parsed.
    #[error("Failed to determine Windows version ({value}: {reason}).\nThis tool requires Windows 11 Home or Professional.")]
    RegistryRead { value: String, reason: String },

    /// Windows, but not Windows 11.
    #[error("Incompatible Windows version detected:\n  {product_name} (build {build_number})\nThis tool requires Windows 11 Home or Professional.")]
    UnsupportedVersion { product_name: String, build_number: u32 },

    /// Windows 11, but not Home or Professional.
    #[error("Unsupported Windows 11 edition detected:\n  {product_name}\nOnly Home or Professional editions are supported.")]
    UnsupportedEdition { product_name: String },

    // ----- Missing inputs -----
    /// The WinUtil configuration file is not where it should be.
    #[error("WinUtil config not found:\n{}", .0.display())]
    ConfigMissing(PathBuf),

    /// The browser choice state file is missing or has no usable "browser" key.
    #[error("Internal error reading browser choice from {}:\n{reason}", path.display())]
    StateMissing { path: PathBuf, reason: String },

    /// talon.toml exists but could not be read or parsed.
    #[error("Failed to load settings from {}:\n{reason}", path.display())]
    Settings { path: PathBuf, reason: String },

    // ----- External tools -----
    #[error("Failed to launch {tool}: {reason}")]
    ToolLaunchFailed { tool: String, reason: String },

    #[error("{tool} did not finish within {seconds} seconds and was terminated")]
    ToolTimedOut { tool: String, seconds: u64 },

    #[error("{tool} failed with exit code {code}: {hint}")]
    ToolKnownFailure { tool: String, code: i32, hint: String },

    #[error("{tool} failed with exit code {code}")]
    ToolUnknownFailure { tool: String, code: i32 },

    /// A script could not be fetched.
    #[error("Failed to download {what} from {url}")]
    DownloadFailed { what: String, url: String },

    /// A pipeline stopped on a Halt step.
    #[error("{step} failed: {outcome}")]
    PipelineHalted { step: String, outcome: ToolOutcome },

    // ----- Environment (advisory unless noted) -----
    #[error("Talon could not write files to {}.\nPlease free up disk space or check permissions.\n({reason})", path.display())]
    FilesystemUnwritable { path: PathBuf, reason: String },

    #[error("Failed to run test PowerShell script. PowerShell may be disabled.")]
    PowerShellUnavailable,

    /// Fatal when settings require internet.
    #[error("No internet connection detected.\nAn active internet connection is required to run Talon.")]
    NoInternet,

    /// The user chose "Exit" on an advisory popup.
    #[error("Aborted by user")]
    UserAborted,
}

impl TalonError {
    /// True for the four probe failures. These always end the program.
    pub fn is_platform_incompatible(&self) -> bool {
        matches!(
            self,
            TalonError::UnsupportedPlatform
                | TalonError::RegistryRead { .. }
                | TalonError::UnsupportedVersion { .. }
                | TalonError::UnsupportedEdition { .. }
        )
    }
}

pub type TalonResult<T> = Result<T, TalonError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_errors_are_grouped() {
        assert!(TalonError::UnsupportedPlatform.is_platform_incompatible());
        assert!(TalonError::UnsupportedEdition {
            product_name: "Windows 11 Education".into()
        }
        .is_platform_incompatible());
        assert!(!TalonError::NoInternet.is_platform_incompatible());
        assert!(!TalonError::UserAborted.is_platform_incompatible());
    }

    #[test]
    fn test_messages_name_the_problem() {
        let err = TalonError::UnsupportedVersion {
            product_name: "Windows 10 Pro".into(),
            build_number: 19045,
        };
        let msg = err.to_string();
        assert!(msg.contains("Windows 10 Pro"));
        assert!(msg.contains("19045"));

        let err = TalonError::ConfigMissing(PathBuf::from("configs/default.json"));
        assert!(err.to_string().contains("default.json"));
    }
}
