//! Renders the POSIX shell script sent to the remote during bootstrap.
//!
//! The script's externally-observable behavior is fixed: any change here
//! must still produce the exact `ping`/`pong`/`ARM-*`/`done` conversation
//! described in the wire protocol. The existence-check sign convention is
//! standardized as "zero exit status means install needed" (see
//! DESIGN.md); [`crate::version::existence_check`] (built downstream in
//! `devpod-agent-inject`) must honor that convention.

use std::fmt::Write as _;

/// Parameters substituted into the rendered script.
#[derive(Clone, Debug)]
pub struct ScriptParams {
    /// Directory the agent binary is installed into.
    pub install_dir: String,
    /// File name of the installed binary, e.g. `devpod`.
    pub install_filename: String,
    /// When true, prefer streaming the binary over stdin; when false, prefer
    /// `curl`/`wget` against `base_url`. Either path falls back to the other
    /// on failure.
    pub prefer_download: bool,
    /// Whether to `chmod +x` the installed binary after placing it.
    pub chmod_exec: bool,
    /// Download URL used when the remote reports an amd64 architecture.
    pub amd64_url: String,
    /// Download URL used when the remote reports an arm64 architecture.
    pub arm64_url: String,
    /// Base URL exported as `DEVPOD_AGENT_URL` for the follow-up command.
    pub base_url: String,
    /// Shell expression whose exit status decides whether install is
    /// needed; zero means "install needed" (see module docs).
    pub existence_check: String,
    /// Command `eval`'d once installation (or the no-op path) completes.
    /// An empty string means "terminate after `done`".
    pub follow_up_command: String,
}

impl ScriptParams {
    fn install_path(&self) -> String {
        format!("{}/{}", self.install_dir.trim_end_matches('/'), self.install_filename)
    }
}

/// Renders the inject script described in spec.md §4.2, steps 1–7.
///
/// The `eval` in step 7 deliberately runs caller-controlled text (the
/// follow-up command); spec.md §9 calls this out as intentional. Callers
/// must treat [`ScriptParams::follow_up_command`] as a trusted string —
/// this function does not escape it beyond the shell quoting already
/// applied to the other substitutions, since the follow-up command is meant
/// to be interpreted by the remote shell, not treated as inert data.
pub fn render(params: &ScriptParams) -> String {
    let install_path = params.install_path();
    let mut script = String::new();

    // Step 1: handshake.
    writeln!(script, "set -u").unwrap();
    writeln!(script, "printf 'ping\\n'").unwrap();
    writeln!(script, "IFS= read -r __devpod_pong || exit 1").unwrap();
    writeln!(script, "__devpod_pong=${{__devpod_pong%$'\\r'}}").unwrap();
    writeln!(script, "[ \"$__devpod_pong\" = \"pong\" ] || exit 1").unwrap();
    writeln!(script).unwrap();

    // Step 2: existence check. Zero exit means install needed (see module docs).
    writeln!(script, "__devpod_path=\"{install_path}\"").unwrap();
    writeln!(script, "if {}; then", params.existence_check).unwrap();
    writeln!(script, "  __devpod_needs_install=1").unwrap();
    writeln!(script, "else").unwrap();
    writeln!(script, "  __devpod_needs_install=0").unwrap();
    writeln!(script, "fi").unwrap();
    writeln!(script).unwrap();
    writeln!(script, "if [ \"$__devpod_needs_install\" = 1 ]; then").unwrap();

    // Step 3: privilege escalation only if the install directory is unwritable.
    writeln!(script, "  __devpod_install_dir=\"{}\"", params.install_dir).unwrap();
    writeln!(script, "  __devpod_sudo=\"\"").unwrap();
    writeln!(script, "  if [ -w \"$__devpod_install_dir\" ] || [ -w \"$(dirname \"$__devpod_install_dir\")\" ]; then").unwrap();
    writeln!(script, "    :").unwrap();
    writeln!(script, "  elif command -v sudo >/dev/null 2>&1 && sudo -nE true 2>/dev/null; then").unwrap();
    writeln!(script, "    __devpod_sudo=\"sudo -nE\"").unwrap();
    writeln!(script, "  elif command -v su >/dev/null 2>&1; then").unwrap();
    writeln!(script, "    __devpod_sudo=\"su -c\"").unwrap();
    writeln!(script, "  else").unwrap();
    writeln!(script, "    echo 'devpod: cannot write install dir and no usable sudo/su' >&2").unwrap();
    writeln!(script, "    exit 1").unwrap();
    writeln!(script, "  fi").unwrap();
    writeln!(script).unwrap();

    // Step 4: create the install directory and reject noexec mounts.
    writeln!(script, "  mkdir -p \"$__devpod_install_dir\" || exit 1").unwrap();
    writeln!(
        script,
        "  if (mount 2>/dev/null || cat /proc/mounts 2>/dev/null) | grep -F \"$(df -P \"$__devpod_install_dir\" 2>/dev/null | awk 'NR==2{{print $NF}}')\" | grep -q noexec; then"
    )
    .unwrap();
    writeln!(script, "    echo 'devpod: install dir is mounted noexec' >&2").unwrap();
    writeln!(script, "    exit 1").unwrap();
    writeln!(script, "  fi").unwrap();
    writeln!(script).unwrap();

    // Step 5: classify architecture (always, regardless of retrieval
    // strategy — the host needs it to pick the right binary on the stdin
    // path just as much as the remote needs it to pick a download URL),
    // then stream-from-stdin or download, with the stdin path as fallback.
    writeln!(script, "  __devpod_tmp=\"$__devpod_install_dir/devpod-$$.tmp\"").unwrap();
    writeln!(script, "  __devpod_arm=false").unwrap();
    writeln!(script, "  case \"$(uname -m)\" in aarch64|arm64) __devpod_arm=true ;; esac").unwrap();
    writeln!(script, "  printf 'ARM-%s\\n' \"$__devpod_arm\"").unwrap();
    writeln!(script, "  __devpod_fetched=0").unwrap();
    if params.prefer_download {
        writeln!(script, "  if [ \"$__devpod_arm\" = true ]; then __devpod_url=\"{}\"; else __devpod_url=\"{}\"; fi", params.arm64_url, params.amd64_url).unwrap();
        writeln!(script, "  __devpod_attempt=0").unwrap();
        writeln!(script, "  while [ \"$__devpod_attempt\" -lt 3 ]; do").unwrap();
        writeln!(script, "    if command -v curl >/dev/null 2>&1 && curl -fsSL -o \"$__devpod_tmp\" \"$__devpod_url\"; then __devpod_fetched=1; break; fi").unwrap();
        writeln!(script, "    if command -v wget >/dev/null 2>&1 && wget -q -O \"$__devpod_tmp\" \"$__devpod_url\"; then __devpod_fetched=1; break; fi").unwrap();
        writeln!(script, "    __devpod_attempt=$((__devpod_attempt + 1))").unwrap();
        writeln!(script, "    sleep 10").unwrap();
        writeln!(script, "  done").unwrap();
    }
    // Stdin path: primary when not preferring download, fallback otherwise.
    // The host streams the binary then writes a literal `done` sentinel
    // line onto the same stdin before closing it, so the remote's
    // line-oriented read confirms full delivery without depending on how
    // promptly a given exec transport propagates EOF.
    writeln!(script, "  if [ \"$__devpod_fetched\" != 1 ]; then").unwrap();
    writeln!(script, "    cat > \"$__devpod_tmp\" || exit 1").unwrap();
    writeln!(script, "    IFS= read -r __devpod_sentinel || exit 1").unwrap();
    writeln!(script, "    [ \"$__devpod_sentinel\" = \"done\" ] || exit 1").unwrap();
    writeln!(script, "  fi").unwrap();
    writeln!(script, "  mv -f \"$__devpod_tmp\" \"$__devpod_path\" || exit 1").unwrap();
    if params.chmod_exec {
        writeln!(script, "  chmod +x \"$__devpod_path\" || exit 1").unwrap();
    }
    writeln!(script).unwrap();

    // Step 6: re-check existence after install.
    writeln!(script, "  if {}; then", params.existence_check).unwrap();
    writeln!(script, "    echo 'devpod: agent still missing/mismatched after install' >&2").unwrap();
    writeln!(script, "    exit 1").unwrap();
    writeln!(script, "  fi").unwrap();
    writeln!(script, "fi").unwrap();
    writeln!(script).unwrap();

    // Step 7: completion sentinel and optional follow-up.
    writeln!(script, "printf 'done\\n'").unwrap();
    writeln!(script, "export DEVPOD_AGENT_URL=\"{}\"", params.base_url).unwrap();
    if params.follow_up_command.is_empty() {
        writeln!(script, "exit 0").unwrap();
    } else {
        writeln!(script, "eval \"{}\"", params.follow_up_command.replace('"', "\\\"")).unwrap();
    }

    script
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ScriptParams {
        ScriptParams {
            install_dir: "/tmp/devpod".into(),
            install_filename: "devpod".into(),
            prefer_download: false,
            chmod_exec: true,
            amd64_url: "https://example.com/devpod-linux-amd64".into(),
            arm64_url: "https://example.com/devpod-linux-arm64".into(),
            base_url: "https://example.com".into(),
            existence_check: "! [ -x \"$__devpod_path\" ]".into(),
            follow_up_command: String::new(),
        }
    }

    #[test]
    fn emits_handshake_lines() {
        let script = render(&params());
        assert!(script.contains("printf 'ping\\n'"));
        assert!(script.contains("[ \"$__devpod_pong\" = \"pong\" ]"));
        assert!(script.contains("printf 'done\\n'"));
    }

    #[test]
    fn stdin_path_still_classifies_architecture() {
        let script = render(&params());
        assert!(script.contains("uname -m"));
        assert!(script.contains("printf 'ARM-%s\\n' \"$__devpod_arm\""));
        assert!(!script.contains("__devpod_attempt\" -lt 3"));
        assert!(script.contains("cat > \"$__devpod_tmp\""));
    }

    #[test]
    fn download_path_emits_classification_and_retries() {
        let mut p = params();
        p.prefer_download = true;
        let script = render(&p);
        assert!(script.contains("uname -m"));
        assert!(script.contains("__devpod_attempt\" -lt 3"));
        assert!(script.contains("sleep 10"));
        // Falls back to the stdin path when every download attempt fails.
        assert!(script.contains("if [ \"$__devpod_fetched\" != 1 ]; then"));
    }

    #[test]
    fn exports_agent_url_and_runs_follow_up() {
        let mut p = params();
        p.follow_up_command = "/tmp/devpod/devpod agent daemon".into();
        let script = render(&p);
        assert!(script.contains("export DEVPOD_AGENT_URL=\"https://example.com\""));
        assert!(script.contains("eval \"/tmp/devpod/devpod agent daemon\""));
    }

    #[test]
    fn empty_follow_up_terminates_after_done() {
        let script = render(&params());
        assert!(script.contains("exit 0"));
        assert!(!script.contains("eval \"\""));
    }
}
