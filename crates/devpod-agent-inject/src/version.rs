//! Builds the existence-check expression embedded in the rendered script
//! and validates the remote's reported version after install (spec.md §4.6).

use crate::exec::{Exec, ExecError};

/// Builds the existence test injected into the script. Per the Open
/// Question resolution recorded in DESIGN.md, the convention is
/// standardized so that the expression's *complement* (what the script
/// actually evaluates) exits zero exactly when install is needed:
///
/// - Version checking off: `! [ -x "$PATH" ]` (install iff absent).
/// - Version checking on: `! { [ -x "$PATH" ] && [ "$("$PATH" version
///   2>/dev/null)" = "<expected>" ]; }` (install iff absent or mismatched).
pub fn existence_check(expected_version: Option<&str>) -> String {
    match expected_version {
        None => "! [ -x \"$__devpod_path\" ]".to_string(),
        Some(expected) => format!(
            "! {{ [ -x \"$__devpod_path\" ] && [ \"$(\"$__devpod_path\" version 2>/dev/null)\" = \"{}\" ]; }}",
            expected.replace('"', "\\\"")
        ),
    }
}

/// Execs `<install_path> version`, trims whitespace, and compares against
/// `expected`. Returns `(actual, Ok(()))` on a match, `(actual, Err(..))` on
/// mismatch — "the actual version is recorded even on failure" (spec.md
/// §4.6).
pub async fn validate_remote_agent(
    exec: &dyn Exec,
    install_path: &str,
    expected: &str,
) -> (Option<String>, Result<(), String>) {
    let command = format!("{install_path} version");
    let session = match exec.spawn(&command).await {
        Ok(session) => session,
        Err(ExecError::Spawn(msg)) | Err(ExecError::Wait(msg)) => {
            return (None, Err(format!("version probe failed to run: {msg}")));
        }
    };

    let mut stdout = session.stdout;
    let mut buf = Vec::new();
    use tokio::io::AsyncReadExt;
    if let Err(e) = stdout.read_to_end(&mut buf).await {
        return (None, Err(format!("failed reading version probe output: {e}")));
    }

    match session.wait.await {
        Ok(outcome) if !outcome.is_success() => {
            return (
                None,
                Err(format!("version probe exited with status {}", outcome.code)),
            );
        }
        Err(e) => return (None, Err(format!("version probe wait failed: {e}"))),
        Ok(_) => {}
    }

    let actual = String::from_utf8_lossy(&buf).trim().to_string();
    if actual == expected {
        (Some(actual), Ok(()))
    } else {
        (Some(actual), Err("version mismatch".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_version_check_uses_executable_bit_only() {
        let check = existence_check(None);
        assert_eq!(check, "! [ -x \"$__devpod_path\" ]");
    }

    #[test]
    fn version_check_requires_both_executable_and_matching_version() {
        let check = existence_check(Some("v1.0.0"));
        assert!(check.starts_with("! { "));
        assert!(check.contains("-x \"$__devpod_path\""));
        assert!(check.contains("\"v1.0.0\""));
    }
}
