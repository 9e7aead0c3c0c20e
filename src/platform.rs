// ============================================
// Talon - platform.rs
// ============================================
// Works out which Windows we're on and whether Talon supports it.
//
// Supported: Windows 11 Home and Professional.
//
// Gotcha: Windows 11 still says "Windows 10 ..." in the ProductName
// registry value. The build number is what tells them apart:
// 22000 and up is Windows 11.
//
// Enterprise is run through the Professional path (same tweaks apply).
// ============================================

use std::fmt;

use tracing::info;

use crate::error::{TalonError, TalonResult};

/// First Windows 11 build
pub const WINDOWS_11_MIN_BUILD: u32 = 22000;

/// Where ProductName / CurrentBuildNumber live (under HKLM)
pub const CURRENT_VERSION_KEY: &str = r"SOFTWARE\Microsoft\Windows NT\CurrentVersion";

// ============================================
// DATA STRUCTURES
// ============================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edition {
    Home,
    Professional,
    Unsupported,
}

impl fmt::Display for Edition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Edition::Home => "Home",
            Edition::Professional => "Professional",
            Edition::Unsupported => "Unsupported",
        };
        f.write_str(name)
    }
}

/// What we detected. Read once at startup, never changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsIdentity {
    pub product_name: String,
    pub build_number: u32,
    pub edition: Edition,
}

/// Source of the two registry values. A trait so tests don't need Windows.
pub trait VersionSource {
    /// False on anything that isn't Windows
    fn is_windows(&self) -> bool;
    /// Read a string value from the CurrentVersion key
    fn read_value(&self, name: &str) -> Result<String, String>;
}

/// The real registry (64-bit view, so a 32-bit build sees the same thing)
#[derive(Debug, Default)]
pub struct RegistryVersionSource;

impl VersionSource for RegistryVersionSource {
    fn is_windows(&self) -> bool {
        cfg!(windows)
    }

    #[cfg(windows)]
    fn read_value(&self, name: &str) -> Result<String, String> {
        use winreg::enums::{HKEY_LOCAL_MACHINE, KEY_READ, KEY_WOW64_64KEY};
        use winreg::RegKey;

        let hklm = RegKey::predef(HKEY_LOCAL_MACHINE);
        let key = hklm
            .open_subkey_with_flags(CURRENT_VERSION_KEY, KEY_READ | KEY_WOW64_64KEY)
            .map_err(|e| format!("cannot open {}: {}", CURRENT_VERSION_KEY, e))?;
        key.get_value::<String, _>(name)
            .map_err(|e| format!("cannot read {}: {}", name, e))
    }

    #[cfg(not(windows))]
    fn read_value(&self, name: &str) -> Result<String, String> {
        Err(format!("no registry on this platform (wanted {})", name))
    }
}

// ============================================
// DETECTION
// ============================================

/// Detect the OS and check it's one we support.
///
/// Any error here is final: the caller reports it and exits.
pub fn identify(source: &dyn VersionSource) -> TalonResult<OsIdentity> {
    if !source.is_windows() {
        return Err(TalonError::UnsupportedPlatform);
    }

    let product_name = source
        .read_value("ProductName")
        .map_err(|reason| TalonError::RegistryRead {
            value: "ProductName".to_string(),
            reason,
        })?;

    let build_str = source
        .read_value("CurrentBuildNumber")
        .map_err(|reason| TalonError::RegistryRead {
            value: "CurrentBuildNumber".to_string(),
            reason,
        })?;

    let build_number = build_str
        .trim()
        .parse::<u32>()
        .map_err(|e| TalonError::RegistryRead {
            value: "CurrentBuildNumber".to_string(),
            reason: format!("'{}' is not a build number: {}", build_str.trim(), e),
        })?;

    let identity = classify(&product_name, build_number)?;
    info!(
        "Detected OS: {} (build {}); edition: {}",
        identity.product_name, identity.build_number, identity.edition
    );
    Ok(identity)
}

/// Version + edition rules, without any registry access.
pub fn classify(product_name: &str, build_number: u32) -> TalonResult<OsIdentity> {
    if !is_windows_11(product_name, build_number) {
        return Err(TalonError::UnsupportedVersion {
            product_name: product_name.to_string(),
            build_number,
        });
    }

    match detect_edition(product_name) {
        Edition::Unsupported => Err(TalonError::UnsupportedEdition {
            product_name: product_name.to_string(),
        }),
        edition => Ok(OsIdentity {
            product_name: product_name.to_string(),
            build_number,
            edition,
        }),
    }
}

fn is_windows_11(product_name: &str, build_number: u32) -> bool {
    product_name.starts_with("Windows 11")
        || (product_name.starts_with("Windows 10") && build_number >= WINDOWS_11_MIN_BUILD)
}

fn detect_edition(product_name: &str) -> Edition {
    if product_name.contains("Home") {
        Edition::Home
    } else if product_name.contains("Pro") || product_name.contains("Enterprise") {
        // "Pro" also covers "Professional" and "Pro for Workstations"
        Edition::Professional
    } else {
        Edition::Unsupported
    }
}
