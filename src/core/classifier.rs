// Command classifier
//
// Three pure functions over command text: what kind of command is it, does it
// carry credentials, and how gnarly is it. Rules are an ordered table and the
// first hit wins, so more specific rules have to sit above generic ones.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What sensitive commands are stored as instead of their text
pub const REDACTED: &str = "[REDACTED]";

const MAX_COMPLEXITY: u8 = 5;

/// Coarse category of a shell command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticType {
    VersionControl,
    PackageManagement,
    Testing,
    Building,
    Container,
    FileOperation,
    Navigation,
    ProcessManagement,
    Network,
    SystemAdmin,
    Database,
    Monitoring,
    Searching,
    General,
}

impl SemanticType {
    pub const ALL: [SemanticType; 14] = [
        SemanticType::VersionControl,
        SemanticType::PackageManagement,
        SemanticType::Testing,
        SemanticType::Building,
        SemanticType::Container,
        SemanticType::FileOperation,
        SemanticType::Navigation,
        SemanticType::ProcessManagement,
        SemanticType::Network,
        SemanticType::SystemAdmin,
        SemanticType::Database,
        SemanticType::Monitoring,
        SemanticType::Searching,
        SemanticType::General,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SemanticType::VersionControl => "version_control",
            SemanticType::PackageManagement => "package_management",
            SemanticType::Testing => "testing",
            SemanticType::Building => "building",
            SemanticType::Container => "container",
            SemanticType::FileOperation => "file_operation",
            SemanticType::Navigation => "navigation",
            SemanticType::ProcessManagement => "process_management",
            SemanticType::Network => "network",
            SemanticType::SystemAdmin => "system_admin",
            SemanticType::Database => "database",
            SemanticType::Monitoring => "monitoring",
            SemanticType::Searching => "searching",
            SemanticType::General => "general",
        }
    }
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for SemanticType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        SemanticType::ALL
            .iter()
            .find(|t| t.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown semantic type: {}", s))
    }
}

// Rows written by older builds may hold labels we no longer know about.
impl From<String> for SemanticType {
    fn from(s: String) -> Self {
        s.parse().unwrap_or(SemanticType::General)
    }
}

/// How a rule looks at the (lowercased, trimmed) command text
#[derive(Debug, Clone, Copy)]
enum Matcher {
    /// Text starts with these words, followed by the end or a separator
    Prefix(&'static str),
    /// Text contains this fragment anywhere
    Contains(&'static str),
}

impl Matcher {
    fn matches(&self, text: &str) -> bool {
        match self {
            Matcher::Prefix(p) => match text.strip_prefix(p) {
                Some(rest) => rest
                    .chars()
                    .next()
                    .map_or(true, |c| c.is_whitespace() || c == ':' || c == ';'),
                None => false,
            },
            Matcher::Contains(fragment) => text.contains(fragment),
        }
    }
}

use Matcher::{Contains, Prefix};
use SemanticType as T;

// Order is load-bearing: test runners before build tools before package managers,
// so "npm test" lands on testing and "npm install" on package management.
static RULES: &[(Matcher, SemanticType)] = &[
    (Prefix("npm test"), T::Testing),
    (Prefix("npm run test"), T::Testing),
    (Prefix("yarn test"), T::Testing),
    (Prefix("yarn run test"), T::Testing),
    (Prefix("pnpm test"), T::Testing),
    (Prefix("pnpm run test"), T::Testing),
    (Prefix("cargo test"), T::Testing),
    (Prefix("cargo nextest"), T::Testing),
    (Prefix("go test"), T::Testing),
    (Prefix("make test"), T::Testing),
    (Prefix("make check"), T::Testing),
    (Prefix("mvn test"), T::Testing),
    (Prefix("gradle test"), T::Testing),
    (Prefix("./gradlew test"), T::Testing),
    (Prefix("dotnet test"), T::Testing),
    (Prefix("bundle exec rspec"), T::Testing),
    (Prefix("python -m pytest"), T::Testing),
    (Prefix("python3 -m pytest"), T::Testing),
    (Prefix("python -m unittest"), T::Testing),
    (Prefix("pytest"), T::Testing),
    (Prefix("jest"), T::Testing),
    (Prefix("vitest"), T::Testing),
    (Prefix("mocha"), T::Testing),
    (Prefix("rspec"), T::Testing),
    (Prefix("tox"), T::Testing),
    (Prefix("phpunit"), T::Testing),
    (Prefix("npx jest"), T::Testing),
    (Prefix("cargo build"), T::Building),
    (Prefix("cargo check"), T::Building),
    (Prefix("npm run build"), T::Building),
    (Prefix("yarn build"), T::Building),
    (Prefix("pnpm build"), T::Building),
    (Prefix("go build"), T::Building),
    (Prefix("mvn package"), T::Building),
    (Prefix("mvn compile"), T::Building),
    (Prefix("gradle build"), T::Building),
    (Prefix("./gradlew build"), T::Building),
    (Prefix("dotnet build"), T::Building),
    (Prefix("make"), T::Building),
    (Prefix("cmake"), T::Building),
    (Prefix("ninja"), T::Building),
    (Prefix("tsc"), T::Building),
    (Prefix("webpack"), T::Building),
    (Prefix("rustc"), T::Building),
    (Prefix("gcc"), T::Building),
    (Prefix("g++"), T::Building),
    (Prefix("clang"), T::Building),
    (Prefix("git"), T::VersionControl),
    (Prefix("gh"), T::VersionControl),
    (Prefix("svn"), T::VersionControl),
    (Prefix("hg"), T::VersionControl),
    (Prefix("npm"), T::PackageManagement),
    (Prefix("npx"), T::PackageManagement),
    (Prefix("yarn"), T::PackageManagement),
    (Prefix("pnpm"), T::PackageManagement),
    (Prefix("cargo"), T::PackageManagement),
    (Prefix("pip"), T::PackageManagement),
    (Prefix("pip3"), T::PackageManagement),
    (Prefix("poetry"), T::PackageManagement),
    (Prefix("conda"), T::PackageManagement),
    (Prefix("gem"), T::PackageManagement),
    (Prefix("bundle"), T::PackageManagement),
    (Prefix("composer"), T::PackageManagement),
    (Prefix("go get"), T::PackageManagement),
    (Prefix("go mod"), T::PackageManagement),
    (Prefix("brew"), T::PackageManagement),
    (Prefix("apt"), T::PackageManagement),
    (Prefix("apt-get"), T::PackageManagement),
    (Prefix("sudo apt"), T::PackageManagement),
    (Prefix("sudo apt-get"), T::PackageManagement),
    (Prefix("dnf"), T::PackageManagement),
    (Prefix("yum"), T::PackageManagement),
    (Prefix("pacman"), T::PackageManagement),
    (Prefix("docker"), T::Container),
    (Prefix("docker-compose"), T::Container),
    (Prefix("podman"), T::Container),
    (Prefix("kubectl"), T::Container),
    (Prefix("helm"), T::Container),
    (Prefix("minikube"), T::Container),
    (Prefix("psql"), T::Database),
    (Prefix("mysql"), T::Database),
    (Prefix("sqlite3"), T::Database),
    (Prefix("mongo"), T::Database),
    (Prefix("mongosh"), T::Database),
    (Prefix("redis-cli"), T::Database),
    (Prefix("pg_dump"), T::Database),
    (Prefix("curl"), T::Network),
    (Prefix("wget"), T::Network),
    (Prefix("ssh"), T::Network),
    (Prefix("scp"), T::Network),
    (Prefix("rsync"), T::Network),
    (Prefix("ping"), T::Network),
    (Prefix("dig"), T::Network),
    (Prefix("nslookup"), T::Network),
    (Prefix("nc"), T::Network),
    (Prefix("telnet"), T::Network),
    (Prefix("netstat"), T::Network),
    (Prefix("top"), T::Monitoring),
    (Prefix("htop"), T::Monitoring),
    (Prefix("btop"), T::Monitoring),
    (Prefix("ps"), T::Monitoring),
    (Prefix("df"), T::Monitoring),
    (Prefix("du"), T::Monitoring),
    (Prefix("free"), T::Monitoring),
    (Prefix("watch"), T::Monitoring),
    (Prefix("journalctl"), T::Monitoring),
    (Prefix("tail -f"), T::Monitoring),
    (Prefix("kill"), T::ProcessManagement),
    (Prefix("killall"), T::ProcessManagement),
    (Prefix("pkill"), T::ProcessManagement),
    (Prefix("nohup"), T::ProcessManagement),
    (Prefix("bg"), T::ProcessManagement),
    (Prefix("fg"), T::ProcessManagement),
    (Prefix("jobs"), T::ProcessManagement),
    (Prefix("grep"), T::Searching),
    (Prefix("rg"), T::Searching),
    (Prefix("ag"), T::Searching),
    (Prefix("find"), T::Searching),
    (Prefix("fd"), T::Searching),
    (Prefix("locate"), T::Searching),
    (Prefix("which"), T::Searching),
    (Prefix("cp"), T::FileOperation),
    (Prefix("mv"), T::FileOperation),
    (Prefix("rm"), T::FileOperation),
    (Prefix("mkdir"), T::FileOperation),
    (Prefix("rmdir"), T::FileOperation),
    (Prefix("touch"), T::FileOperation),
    (Prefix("chmod"), T::FileOperation),
    (Prefix("chown"), T::FileOperation),
    (Prefix("ln"), T::FileOperation),
    (Prefix("cat"), T::FileOperation),
    (Prefix("less"), T::FileOperation),
    (Prefix("head"), T::FileOperation),
    (Prefix("tail"), T::FileOperation),
    (Prefix("tar"), T::FileOperation),
    (Prefix("zip"), T::FileOperation),
    (Prefix("unzip"), T::FileOperation),
    (Prefix("vim"), T::FileOperation),
    (Prefix("nvim"), T::FileOperation),
    (Prefix("nano"), T::FileOperation),
    (Prefix("sudo"), T::SystemAdmin),
    (Prefix("systemctl"), T::SystemAdmin),
    (Prefix("service"), T::SystemAdmin),
    (Prefix("mount"), T::SystemAdmin),
    (Prefix("umount"), T::SystemAdmin),
    (Prefix("useradd"), T::SystemAdmin),
    (Prefix("crontab"), T::SystemAdmin),
    (Prefix("cd"), T::Navigation),
    (Prefix("ls"), T::Navigation),
    (Prefix("ll"), T::Navigation),
    (Prefix("pwd"), T::Navigation),
    (Prefix("pushd"), T::Navigation),
    (Prefix("popd"), T::Navigation),
    (Prefix("tree"), T::Navigation),
    (Prefix("z"), T::Navigation),
    // Catch-alls for wrapper scripts, evaluated after every tool rule
    (Contains("pytest"), T::Testing),
    (Contains("run_tests"), T::Testing),
    (Contains("build.sh"), T::Building),
];

// Credential-looking fragments, matched against lowercased text
const SENSITIVE_PATTERNS: &[&str] = &[
    r"password\s*[=:]",
    r"passwd\s*[=:]",
    r"pwd\s*=",
    r"token\s*[=:]",
    r"secret\s*[=:]",
    r"api[_-]?key\s*[=:]",
    r"access[_-]?key",
    r"private[_-]?key",
    r"auth\s*=",
    r"bearer\s+\S+",
    r"authorization:",
    r"--password",
    r"--token",
    r"--api-key",
    r"--secret",
    r"export\s+\w*(key|token|secret|password|passwd|credential)\w*\s*=",
    r"\b(mysql|mysqldump|mongo|mongosh)\b.*\s-p\S*",
    r"://[^/\s:@]+:[^/\s@]+@",
];

static SENSITIVE_REGEX: Lazy<Vec<Regex>> = Lazy::new(|| {
    SENSITIVE_PATTERNS
        .iter()
        .filter_map(|pattern| Regex::new(pattern).ok())
        .collect()
});

static FAN_OUT_REGEX: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(^|[\s|;&])(xargs|parallel)(\s|$)|\s-exec(dir)?\s").ok());

/// Map command text to its semantic type
///
/// Total and deterministic; anything no rule claims is `General`.
pub fn classify(text: &str) -> SemanticType {
    let normalized = text.trim().to_lowercase();

    RULES
        .iter()
        .find(|(matcher, _)| matcher.matches(&normalized))
        .map(|(_, semantic_type)| *semantic_type)
        .unwrap_or(SemanticType::General)
}

/// Does the command look like it carries a credential
pub fn is_sensitive(text: &str) -> bool {
    let lowercase = text.to_lowercase();

    SENSITIVE_REGEX.iter().any(|regex| regex.is_match(&lowercase))
}

/// The text to persist for a command: the literal, or the sentinel
pub fn redact(text: &str) -> String {
    if is_sensitive(text) {
        REDACTED.to_string()
    } else {
        text.to_string()
    }
}

/// Complexity score between 1 and 5
///
/// Base 1, +1 per pipe, +1 for any redirection, +1 when there are more than two
/// subshells/substitutions, +1 for fan-out (xargs, parallel, find -exec).
pub fn complexity(text: &str) -> u8 {
    let mut score: usize = 1;

    score += count_pipes(text);

    if text.contains('>') || text.contains('<') {
        score += 1;
    }

    if count_substitutions(text) > 2 {
        score += 1;
    }

    let has_fan_out = FAN_OUT_REGEX
        .as_ref()
        .map(|re| re.is_match(text))
        .unwrap_or(false);
    if has_fan_out {
        score += 1;
    }

    score.min(MAX_COMPLEXITY as usize) as u8
}

// Single `|`, not the `||` operator
fn count_pipes(text: &str) -> usize {
    let chars: Vec<char> = text.chars().collect();
    let mut count = 0;

    for (i, c) in chars.iter().enumerate() {
        if *c != '|' {
            continue;
        }
        let prev_pipe = i > 0 && chars[i - 1] == '|';
        let next_pipe = chars.get(i + 1) == Some(&'|');
        if !prev_pipe && !next_pipe {
            count += 1;
        }
    }

    count
}

// `$(..)`, `<(..)`, `>(..)`, bare `( .. )` subshells and backtick pairs
fn count_substitutions(text: &str) -> usize {
    let chars: Vec<char> = text.chars().collect();
    let mut count = 0;

    for (i, c) in chars.iter().enumerate() {
        if *c != '(' {
            continue;
        }
        match i.checked_sub(1).map(|p| chars[p]) {
            Some('$') | Some('<') | Some('>') => count += 1,
            None => count += 1,
            Some(prev) if prev.is_whitespace() || matches!(prev, ';' | '&' | '|' | '(') => {
                count += 1
            }
            _ => {}
        }
    }

    count + chars.iter().filter(|c| **c == '`').count() / 2
}
