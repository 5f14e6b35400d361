use std::path::{Path, PathBuf};

/// Overrides the port the relay binds instead of scanning
/// [`crate::server::DEFAULT_PORT_RANGE`].
pub const ENV_CREDENTIALS_SERVER_PORT: &str = "DEVPOD_CREDENTIALS_SERVER_PORT";

/// Overrides the port the git credential helper talks to, independent of
/// whatever port the relay itself bound.
pub const ENV_GIT_HELPER_PORT: &str = "DEVPOD_GIT_HELPER_PORT";

pub fn credentials_server_port_override() -> Option<u16> {
    parse_port_env(ENV_CREDENTIALS_SERVER_PORT)
}

pub fn git_helper_port_override() -> Option<u16> {
    parse_port_env(ENV_GIT_HELPER_PORT)
}

fn parse_port_env(name: &str) -> Option<u16> {
    std::env::var(name).ok().and_then(|value| value.parse().ok())
}

/// Where relay errors are logged: `<root>/docker-credentials-error.log` when
/// a workspace root is known, otherwise `<tempdir>/credential-helper.log`.
pub fn default_log_path(root: Option<&Path>) -> PathBuf {
    match root {
        Some(root) => root.join("docker-credentials-error.log"),
        None => std::env::temp_dir().join("credential-helper.log"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_tempdir_log_when_no_root_given() {
        let path = default_log_path(None);
        assert_eq!(path.file_name().unwrap(), "credential-helper.log");
        assert_eq!(path.parent().unwrap(), std::env::temp_dir());
    }

    #[test]
    fn uses_workspace_root_log_when_given() {
        let root = Path::new("/home/user/workspace");
        let path = default_log_path(Some(root));
        assert_eq!(path, root.join("docker-credentials-error.log"));
    }

    #[test]
    fn port_override_parses_from_env() {
        std::env::set_var(ENV_CREDENTIALS_SERVER_PORT, "15010");
        assert_eq!(credentials_server_port_override(), Some(15010));
        std::env::remove_var(ENV_CREDENTIALS_SERVER_PORT);
        assert_eq!(credentials_server_port_override(), None);
    }
}
