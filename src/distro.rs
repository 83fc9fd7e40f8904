//! Distribution detection.
//!
//! Reads the os-release descriptor and maps it onto a broad [`FamilyKind`].
//! Detection never fails: anything unreadable or unmapped becomes
//! [`FamilyKind::Unknown`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const DEFAULT_OS_RELEASE: &str = "/etc/os-release";
const FALLBACK_OS_RELEASE: &str = "/usr/lib/os-release";

/// Broad family a distribution belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FamilyKind {
    Debian,
    Arch,
    RedHat,
    Suse,
    Unknown,
}

impl FamilyKind {
    pub const ALL: [FamilyKind; 5] = [
        FamilyKind::Debian,
        FamilyKind::Arch,
        FamilyKind::RedHat,
        FamilyKind::Suse,
        FamilyKind::Unknown,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            FamilyKind::Debian => "Ubuntu/Debian-based",
            FamilyKind::Arch => "Arch-based",
            FamilyKind::RedHat => "Fedora/RHEL-based",
            FamilyKind::Suse => "openSUSE/SLES-based",
            FamilyKind::Unknown => "Unknown",
        }
    }
}

/// The detected family together with the raw `ID` it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistroFamily {
    pub kind: FamilyKind,
    pub distro_id: String,
}

impl DistroFamily {
    pub fn unknown(distro_id: impl Into<String>) -> Self {
        Self {
            kind: FamilyKind::Unknown,
            distro_id: distro_id.into(),
        }
    }
}

impl fmt::Display for DistroFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            FamilyKind::Unknown => write!(f, "{} (unrecognized family)", self.distro_id),
            kind => write!(f, "{} ({})", self.distro_id, kind.label()),
        }
    }
}

/// One row of the id → family mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FamilyEntry {
    pub family: FamilyKind,
    pub ids: Vec<String>,
}

/// Static mapping from distribution ids to families.
#[derive(Debug, Clone)]
pub struct FamilyTable {
    entries: Vec<FamilyEntry>,
}

impl FamilyTable {
    pub fn new(entries: Vec<FamilyEntry>) -> Self {
        Self { entries }
    }

    pub fn lookup(&self, id: &str) -> Option<FamilyKind> {
        let id = id.to_ascii_lowercase();
        self.entries
            .iter()
            .find(|entry| entry.ids.iter().any(|known| known.eq_ignore_ascii_case(&id)))
            .map(|entry| entry.family)
    }
}

impl Default for FamilyTable {
    fn default() -> Self {
        let row = |family, ids: &[&str]| FamilyEntry {
            family,
            ids: ids.iter().map(|s| s.to_string()).collect(),
        };
        Self::new(vec![
            row(
                FamilyKind::Debian,
                &["debian", "ubuntu", "linuxmint", "mint", "pop", "elementary", "kali", "raspbian", "zorin"],
            ),
            row(
                FamilyKind::Arch,
                &["arch", "archlinux", "manjaro", "endeavouros", "garuda", "artix"],
            ),
            row(
                FamilyKind::RedHat,
                &["fedora", "rhel", "centos", "rocky", "almalinux", "alma", "ol", "amzn"],
            ),
            row(
                FamilyKind::Suse,
                &["opensuse", "opensuse-leap", "opensuse-tumbleweed", "sles", "suse"],
            ),
        ])
    }
}

/// Reads the descriptor and classifies it.
pub struct DistroProfiler {
    path: PathBuf,
    table: FamilyTable,
}

impl DistroProfiler {
    pub fn new(path: impl Into<PathBuf>, table: FamilyTable) -> Self {
        Self {
            path: path.into(),
            table,
        }
    }

    /// Detects the family of the running system.
    ///
    /// Falls back to `/usr/lib/os-release` when the default path is missing.
    pub fn detect(&self) -> DistroFamily {
        match self.read_descriptor() {
            Some(content) => self.classify(&content),
            None => {
                warn!("Couldn't read distribution descriptor at {}", self.path.display());
                DistroFamily::unknown("unknown")
            }
        }
    }

    fn read_descriptor(&self) -> Option<String> {
        if let Ok(content) = fs::read_to_string(&self.path) {
            return Some(content);
        }
        if self.path == Path::new(DEFAULT_OS_RELEASE) {
            return fs::read_to_string(FALLBACK_OS_RELEASE).ok();
        }
        None
    }

    /// Classifies descriptor text. Pure, so it can be tested without files.
    pub fn classify(&self, content: &str) -> DistroFamily {
        let vars = parse_os_release(content);
        let distro_id = vars
            .get("ID")
            .map(|id| id.to_ascii_lowercase())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| "unknown".to_string());

        if let Some(kind) = self.table.lookup(&distro_id) {
            debug!("Distro '{}' mapped by ID to {:?}", distro_id, kind);
            return DistroFamily { kind, distro_id };
        }

        // ID_LIKE is a space separated list, most similar first
        if let Some(id_like) = vars.get("ID_LIKE") {
            for hint in id_like.split_whitespace() {
                if let Some(kind) = self.table.lookup(hint) {
                    debug!("Distro '{}' mapped by ID_LIKE '{}' to {:?}", distro_id, hint, kind);
                    return DistroFamily { kind, distro_id };
                }
            }
        }

        warn!("Unknown distribution '{}'", distro_id);
        DistroFamily::unknown(distro_id)
    }
}

/// Parses os-release content into a key-value map.
pub fn parse_os_release(content: &str) -> HashMap<String, String> {
    let mut vars = HashMap::new();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some((key, value)) = line.split_once('=') {
            let value = value.trim().trim_matches('"').trim_matches('\'');
            vars.insert(key.trim().to_string(), value.to_string());
        }
    }

    vars
}
