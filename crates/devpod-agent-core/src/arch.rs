use std::fmt;
use std::str::FromStr;

/// CPU architecture of a remote target, as reported by the inject script's
/// `ARM-<true|false>` classification line.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Arch {
    Amd64,
    Arm64,
}

impl Arch {
    /// The architecture of the host this process is currently running on,
    /// using the same two-way split the inject script uses.
    pub fn host() -> Option<Self> {
        match std::env::consts::ARCH {
            "x86_64" => Some(Arch::Amd64),
            "aarch64" => Some(Arch::Arm64),
            _ => None,
        }
    }

    /// Parses the script's `ARM-true` / `ARM-false` classification line.
    pub fn from_classification_line(line: &str) -> Option<Self> {
        match line.trim() {
            "ARM-true" => Some(Arch::Arm64),
            "ARM-false" => Some(Arch::Amd64),
            _ => None,
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Arch::Amd64 => "amd64",
            Arch::Arm64 => "arm64",
        })
    }
}

impl FromStr for Arch {
    type Err = ArchParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "amd64" => Ok(Arch::Amd64),
            "arm64" => Ok(Arch::Arm64),
            other => Err(ArchParseError(other.to_string())),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("unrecognized architecture `{0}`, expected `amd64` or `arm64`")]
pub struct ArchParseError(String);

/// Cache/HTTP file-name convention named in the wire protocol: `devpod-linux-<arch>`.
pub fn binary_file_name(arch: Arch) -> String {
    format!("devpod-linux-{arch}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_line_round_trips() {
        assert_eq!(Arch::from_classification_line("ARM-true\n"), Some(Arch::Arm64));
        assert_eq!(Arch::from_classification_line("ARM-false"), Some(Arch::Amd64));
        assert_eq!(Arch::from_classification_line("done"), None);
    }

    #[test]
    fn file_name_convention() {
        assert_eq!(binary_file_name(Arch::Amd64), "devpod-linux-amd64");
        assert_eq!(binary_file_name(Arch::Arm64), "devpod-linux-arm64");
    }

    #[test]
    fn from_str_rejects_unknown() {
        assert!("riscv64".parse::<Arch>().is_err());
    }
}
