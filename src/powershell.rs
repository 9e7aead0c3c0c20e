// ============================================
// Talon - powershell.rs
// ============================================
// Builds PowerShell invocations for the runner.
//
// Everything goes through
//   powershell.exe -NoProfile -ExecutionPolicy Bypass -Command <script>
// Execution policy doesn't apply to inline -Command scripts, and
// -NoProfile keeps the user's profile from printing junk into output
// we need to parse.
// ============================================

use std::path::Path;
use std::time::Duration;

use crate::runner::{ToolInvocationSpec, ToolRunner};

pub const POWERSHELL_EXE: &str = "powershell.exe";

/// Spec for running an inline script
pub fn command(label: &str, script: &str, timeout: Duration) -> ToolInvocationSpec {
    ToolInvocationSpec::new(label, POWERSHELL_EXE, timeout).args([
        "-NoProfile",
        "-ExecutionPolicy",
        "Bypass",
        "-Command",
        script,
    ])
}

/// Spec for running a .ps1 file
pub fn file(label: &str, script_path: &Path, timeout: Duration) -> ToolInvocationSpec {
    ToolInvocationSpec::new(label, POWERSHELL_EXE, timeout).args([
        "-NoProfile".to_string(),
        "-ExecutionPolicy".to_string(),
        "Bypass".to_string(),
        "-File".to_string(),
        script_path.to_string_lossy().to_string(),
    ])
}

/// Wrap a path in single quotes for a PowerShell script.
/// Single quotes inside are doubled ('' is a literal ').
pub fn quote(path: &Path) -> String {
    format!("'{}'", path.to_string_lossy().replace('\'', "''"))
}

/// Run a script that prints one number and return it.
pub fn query_number(runner: &dyn ToolRunner, label: &str, script: &str, timeout: Duration) -> Result<u64, String> {
    let spec = command(label, script, timeout);
    let run = runner.run_captured(&spec);
    if let Some(err) = run.outcome.into_error(&spec) {
        return Err(err.to_string());
    }
    parse_number(&run.output)
}

/// Last non-empty line as an integer (warnings may come first)
fn parse_number(output: &str) -> Result<u64, String> {
    let line = output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .last()
        .ok_or_else(|| "no output".to_string())?;
    line.parse::<u64>()
        .map_err(|e| format!("unexpected output '{}': {}", line, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::{ToolOutcome, ToolRun};
    use std::path::PathBuf;

    struct Printing(&'static str, ToolOutcome);

    impl ToolRunner for Printing {
        fn run(&self, _spec: &ToolInvocationSpec) -> ToolOutcome {
            self.1.clone()
        }

        fn run_captured(&self, _spec: &ToolInvocationSpec) -> ToolRun {
            ToolRun {
                outcome: self.1.clone(),
                output: self.0.to_string(),
            }
        }
    }

    #[test]
    fn test_command_args() {
        let spec = command("Test", "Write-Output 1", Duration::from_secs(5));
        assert_eq!(spec.program, POWERSHELL_EXE);
        assert_eq!(
            spec.args,
            vec!["-NoProfile", "-ExecutionPolicy", "Bypass", "-Command", "Write-Output 1"]
        );
    }

    #[test]
    fn test_quote_doubles_single_quotes() {
        assert_eq!(quote(&PathBuf::from(r"C:\Users\bob\x.ps1")), r"'C:\Users\bob\x.ps1'");
        assert_eq!(quote(&PathBuf::from(r"C:\Users\o'neil\x.ps1")), r"'C:\Users\o''neil\x.ps1'");
    }

    #[test]
    fn test_query_number() {
        let runner = Printing("WARNING: slow\r\n  12  \r\n\r\n", ToolOutcome::Success);
        assert_eq!(query_number(&runner, "Updates", "x", Duration::from_secs(1)), Ok(12));

        let runner = Printing("not a number", ToolOutcome::Success);
        assert!(query_number(&runner, "Updates", "x", Duration::from_secs(1)).is_err());

        let runner = Printing("", ToolOutcome::Success);
        assert!(query_number(&runner, "Updates", "x", Duration::from_secs(1)).is_err());

        let runner = Printing("5", ToolOutcome::UnknownFailure(1));
        let err = query_number(&runner, "Updates", "x", Duration::from_secs(1)).unwrap_err();
        assert!(err.contains("exit code 1"));
    }
}
