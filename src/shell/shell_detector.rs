/// Shell detection logic
///
/// Works out which shell a session belongs to. Unknown shells are still
/// recorded, just without a name.

use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::env;
use std::str::FromStr;

/// Shell kinds a session can report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Unknown,
}

impl Shell {
    /// Get the shell name as a string
    pub fn name(&self) -> &'static str {
        match self {
            Shell::Bash => "bash",
            Shell::Zsh => "zsh",
            Shell::Fish => "fish",
            Shell::PowerShell => "powershell",
            Shell::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for Shell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

// Accepts a bare name or a full path like /usr/local/bin/zsh
impl FromStr for Shell {
    type Err = Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let name = s
            .trim()
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or("")
            .trim_end_matches(".exe")
            .to_lowercase();

        Ok(match name.as_str() {
            "bash" => Shell::Bash,
            "zsh" => Shell::Zsh,
            "fish" => Shell::Fish,
            "pwsh" | "powershell" => Shell::PowerShell,
            _ => Shell::Unknown,
        })
    }
}

impl From<&str> for Shell {
    fn from(s: &str) -> Self {
        s.parse().unwrap_or(Shell::Unknown)
    }
}

impl From<String> for Shell {
    fn from(s: String) -> Self {
        Shell::from(s.as_str())
    }
}

/// Shell detector
pub struct ShellDetector;

impl ShellDetector {
    /// Detect the current shell from the environment
    ///
    /// Checks `$SHELL` first, then the PowerShell module path. Anything else
    /// is `Shell::Unknown`.
    pub fn detect() -> Shell {
        if let Ok(shell_path) = env::var("SHELL") {
            let shell: Shell = shell_path.as_str().into();
            if shell != Shell::Unknown {
                return shell;
            }
        }

        if env::var("PSModulePath").is_ok() {
            return Shell::PowerShell;
        }

        Shell::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_name() {
        assert_eq!(Shell::Bash.name(), "bash");
        assert_eq!(Shell::Zsh.name(), "zsh");
        assert_eq!(Shell::Fish.name(), "fish");
        assert_eq!(Shell::PowerShell.name(), "powershell");
        assert_eq!(Shell::Unknown.to_string(), "unknown");
    }

    #[test]
    fn test_parse_from_path() {
        assert_eq!(Shell::from("/bin/bash"), Shell::Bash);
        assert_eq!(Shell::from("/usr/local/bin/zsh"), Shell::Zsh);
        assert_eq!(Shell::from("fish"), Shell::Fish);
        assert_eq!(Shell::from(r"C:\Program Files\PowerShell\7\pwsh.exe"), Shell::PowerShell);
        assert_eq!(Shell::from("/bin/tcsh"), Shell::Unknown);
        assert_eq!(Shell::from(""), Shell::Unknown);
    }

    #[test]
    fn test_names_round_trip() {
        for shell in [Shell::Bash, Shell::Zsh, Shell::Fish, Shell::PowerShell, Shell::Unknown] {
            assert_eq!(Shell::from(shell.name()), shell);
        }
    }

    #[test]
    fn test_detect_never_fails() {
        // whatever the environment, detection yields a value
        let _ = ShellDetector::detect();
    }
}
