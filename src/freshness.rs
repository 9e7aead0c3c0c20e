// ============================================
// Talon - freshness.rs
// ============================================
// "Is this a fresh Windows install?"
//
// Talon makes big, hard-to-undo changes, so we want to run it on a
// new machine, not on someone's daily driver. There's no flag for
// "fresh", so we look at three signals:
//
//   1. How old the user profile folder is (days)
//   2. How many times the machine booted (Kernel-Boot events)
//   3. How many Windows updates are installed
//
// Each one is compared to a threshold. All three must pass.
//
// A signal we couldn't measure is Unknown, which is NOT the same as
// "over the limit". The settings decide which way Unknown counts
// (default: not fresh).
//
// This never stops the program by itself. The caller shows a warning
// and the user decides.
// ============================================

use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use tracing::{info, warn};

use crate::powershell;
use crate::runner::ToolRunner;
use crate::settings::{FreshnessSettings, UnknownPolicy};

/// Event source we count as "a boot"
pub const KERNEL_BOOT_PROVIDER: &str = "Microsoft-Windows-Kernel-Boot";

const SECONDS_PER_DAY: u64 = 86_400;

// ============================================
// DATA STRUCTURES
// ============================================

/// One measurement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Measurement {
    Known(u64),
    /// Measuring failed; the reason is kept for the log
    Unknown(String),
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Measurement::Known(v) => write!(f, "{}", v),
            Measurement::Unknown(reason) => write!(f, "unknown ({})", reason),
        }
    }
}

impl Measurement {
    fn from_result(result: Result<u64, String>) -> Self {
        match result {
            Ok(v) => Measurement::Known(v),
            Err(reason) => Measurement::Unknown(reason),
        }
    }

    /// Does this signal pass its threshold?
    pub fn passes(&self, max: u64, policy: UnknownPolicy) -> bool {
        match self {
            Measurement::Known(v) => *v <= max,
            Measurement::Unknown(_) => policy == UnknownPolicy::TreatAsFresh,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessThresholds {
    pub max_days: u64,
    pub max_boots: u64,
    pub max_updates: u64,
}

impl Default for FreshnessThresholds {
    fn default() -> Self {
        Self {
            max_days: 7,
            max_boots: 5,
            max_updates: 5,
        }
    }
}

impl From<&FreshnessSettings> for FreshnessThresholds {
    fn from(s: &FreshnessSettings) -> Self {
        Self {
            max_days: s.max_days,
            max_boots: s.max_boots,
            max_updates: s.max_updates,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreshnessSignals {
    pub profile_age_days: Measurement,
    pub boot_event_count: Measurement,
    pub installed_update_count: Measurement,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreshnessVerdict {
    pub looks_fresh: bool,
    pub signals: FreshnessSignals,
}

/// Where the three numbers come from. Real system or a test fake.
pub trait FreshnessProbe {
    fn profile_age_days(&self) -> Result<u64, String>;
    fn boot_event_count(&self) -> Result<u64, String>;
    fn installed_update_count(&self) -> Result<u64, String>;
}

// ============================================
// ASSESSMENT
// ============================================

/// Take all three measurements and decide.
pub fn assess_freshness(
    probe: &dyn FreshnessProbe,
    thresholds: FreshnessThresholds,
    policy: UnknownPolicy,
) -> FreshnessVerdict {
    let signals = FreshnessSignals {
        profile_age_days: Measurement::from_result(probe.profile_age_days()),
        boot_event_count: Measurement::from_result(probe.boot_event_count()),
        installed_update_count: Measurement::from_result(probe.installed_update_count()),
    };

    let checks = [
        ("Profile age (days)", &signals.profile_age_days, thresholds.max_days),
        ("Boot events", &signals.boot_event_count, thresholds.max_boots),
        ("Installed updates", &signals.installed_update_count, thresholds.max_updates),
    ];

    let mut looks_fresh = true;
    for (name, measurement, max) in checks {
        let passes = measurement.passes(max, policy);
        match measurement {
            Measurement::Known(v) => {
                info!("{}: {} (limit {}) -> {}", name, v, max, if passes { "ok" } else { "too high" })
            }
            Measurement::Unknown(reason) => warn!(
                "{}: could not be measured ({}) -> counted as {}",
                name,
                reason,
                if passes { "fresh" } else { "not fresh" }
            ),
        }
        looks_fresh &= passes;
    }

    info!("Fresh install check: {}", if looks_fresh { "looks fresh" } else { "NOT fresh" });
    FreshnessVerdict { looks_fresh, signals }
}

// ============================================
// REAL PROBE
// ============================================

/// Measures the running system.
/// Boot events and updates come from PowerShell (event log / COM).
pub struct SystemFreshnessProbe<'a> {
    runner: &'a dyn ToolRunner,
    boot_scan_limit: u64,
    query_timeout: Duration,
}

impl<'a> SystemFreshnessProbe<'a> {
    pub fn new(runner: &'a dyn ToolRunner, settings: &FreshnessSettings) -> Self {
        Self {
            runner,
            boot_scan_limit: settings.boot_scan_limit,
            query_timeout: Duration::from_secs(settings.query_timeout_secs),
        }
    }
}

impl FreshnessProbe for SystemFreshnessProbe<'_> {
    fn profile_age_days(&self) -> Result<u64, String> {
        let profile = user_profile_dir().ok_or_else(|| "cannot locate user profile".to_string())?;
        let created = std::fs::metadata(&profile)
            .and_then(|m| m.created())
            .map_err(|e| format!("{}: {}", profile.display(), e))?;
        Ok(days_since(created, SystemTime::now()))
    }

    fn boot_event_count(&self) -> Result<u64, String> {
        powershell::query_number(self.runner, "Boot event count", &boot_count_script(self.boot_scan_limit), self.query_timeout)
    }

    fn installed_update_count(&self) -> Result<u64, String> {
        powershell::query_number(self.runner, "Installed update count", UPDATE_COUNT_SCRIPT, self.query_timeout)
    }
}

/// Newest first, stops after `limit` events so old machines don't take
/// minutes. Any limit above the threshold gives the same verdict.
fn boot_count_script(limit: u64) -> String {
    format!(
        "$ErrorActionPreference = 'Stop'; \
         try {{ @(Get-WinEvent -FilterHashtable @{{LogName='System'; ProviderName='{}'}} -MaxEvents {}).Count }} \
         catch [Exception] {{ if ($_.Exception.Message -match 'No events were found') {{ 0 }} else {{ throw }} }}",
        KERNEL_BOOT_PROVIDER, limit
    )
}

/// Windows Update Agent: how many updates are installed
const UPDATE_COUNT_SCRIPT: &str = "$ErrorActionPreference = 'Stop'; \
     $session = New-Object -ComObject Microsoft.Update.Session; \
     $searcher = $session.CreateUpdateSearcher(); \
     $searcher.Search('IsInstalled=1').Updates.Count";

/// %USERPROFILE%, or C:\Users\<USERNAME>
fn user_profile_dir() -> Option<PathBuf> {
    if let Some(profile) = std::env::var_os("USERPROFILE") {
        return Some(PathBuf::from(profile));
    }
    std::env::var_os("USERNAME").map(|user| PathBuf::from(r"C:\Users").join(user))
}

/// Whole days between two instants (0 if `then` is in the future)
fn days_since(then: SystemTime, now: SystemTime) -> u64 {
    now.duration_since(then)
        .map(|d| d.as_secs() / SECONDS_PER_DAY)
        .unwrap_or(0)
}
