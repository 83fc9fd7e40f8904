//! Package-manager sanity check.
//!
//! Advisory only. A failing check is shown to the user, who still decides
//! whether to run the command.

use crate::distro::{DistroFamily, FamilyKind};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Binaries recognized as package-manager invocations, whatever the table says.
const KNOWN_MANAGERS: &[&str] = &[
    "apt", "apt-get", "apt-cache", "aptitude", "dpkg", "pacman", "yay", "paru", "dnf", "yum", "rpm",
    "zypper",
];

/// Characters that separate commands in a shell line.
const SHELL_SEPARATORS: &[char] = &[';', '&', '|', '(', ')', '`'];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerEntry {
    pub family: FamilyKind,
    pub managers: Vec<String>,
}

/// Family → expected package managers.
#[derive(Debug, Clone)]
pub struct PackageManagerTable {
    entries: Vec<ManagerEntry>,
}

impl PackageManagerTable {
    pub fn new(entries: Vec<ManagerEntry>) -> Self {
        Self { entries }
    }

    pub fn expected(&self, family: FamilyKind) -> Option<&[String]> {
        self.entries
            .iter()
            .find(|entry| entry.family == family)
            .map(|entry| entry.managers.as_slice())
    }

    fn is_known(&self, binary: &str) -> bool {
        KNOWN_MANAGERS.contains(&binary)
            || self
                .entries
                .iter()
                .any(|entry| entry.managers.iter().any(|m| m == binary))
    }
}

impl Default for PackageManagerTable {
    fn default() -> Self {
        let row = |family, managers: &[&str]| ManagerEntry {
            family,
            managers: managers.iter().map(|s| s.to_string()).collect(),
        };
        Self::new(vec![
            row(FamilyKind::Debian, &["apt", "apt-get", "apt-cache", "aptitude", "dpkg"]),
            row(FamilyKind::Arch, &["pacman", "yay", "paru"]),
            row(FamilyKind::RedHat, &["dnf", "yum", "rpm"]),
            row(FamilyKind::Suse, &["zypper", "rpm"]),
        ])
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationOutcome {
    pub passed: bool,
    pub advisory: Option<String>,
}

impl ValidationOutcome {
    fn pass() -> Self {
        Self {
            passed: true,
            advisory: None,
        }
    }
}

pub struct PackageManagerValidator {
    table: PackageManagerTable,
}

impl PackageManagerValidator {
    pub fn new(table: PackageManagerTable) -> Self {
        Self { table }
    }

    pub fn validate(&self, command: &str, family: &DistroFamily) -> ValidationOutcome {
        let found = self.package_managers_in(command);
        if found.is_empty() {
            return ValidationOutcome::pass();
        }

        let Some(expected) = self.table.expected(family.kind) else {
            info!(
                "Command uses {:?} but no package manager is known for {}",
                found, family
            );
            return ValidationOutcome::pass();
        };

        let unexpected: Vec<&String> = found
            .iter()
            .filter(|binary| !expected.contains(*binary))
            .collect();

        if unexpected.is_empty() {
            debug!("Package managers {:?} match {:?}", found, family.kind);
            return ValidationOutcome::pass();
        }

        let unexpected: Vec<&str> = unexpected.iter().map(|s| s.as_str()).collect();
        ValidationOutcome {
            passed: false,
            advisory: Some(format!(
                "This command uses {} but {} systems use {}.",
                unexpected.join(", "),
                family.kind.label(),
                expected.join("/")
            )),
        }
    }

    /// Package-manager binaries named in the command, in order, deduplicated.
    fn package_managers_in(&self, command: &str) -> Vec<String> {
        let mut found: Vec<String> = Vec::new();
        for token in command.split(|c: char| c.is_whitespace() || SHELL_SEPARATORS.contains(&c)) {
            let binary = token.rsplit('/').next().unwrap_or(token);
            if self.table.is_known(binary) && !found.iter().any(|f| f == binary) {
                found.push(binary.to_string());
            }
        }
        found
    }
}
