use crate::distro::{DEFAULT_OS_RELEASE, FamilyEntry, FamilyTable};
use crate::recovery::{RecoveryRule, RecoveryRuleSet};
use crate::validator::{ManagerEntry, PackageManagerTable};
use anyhow::{Context, Result, anyhow};
use dirs::home_dir;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub shell: String,
    pub stderr_tail_bytes: usize,
    pub cancel_keywords: Vec<String>,
    pub os_release_path: PathBuf,
    pub use_mock: bool,
    /// Replaces the built-in distro id table when set.
    pub families: Option<Vec<FamilyEntry>>,
    /// Replaces the built-in family → package manager table when set.
    pub package_managers: Option<Vec<ManagerEntry>>,
    /// Replaces the built-in recovery rules when set. Order is priority.
    pub recovery_rules: Option<Vec<RecoveryRule>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "10.0.0.100".to_string(),
            port: 11434,
            model: "llama3.2".to_string(),
            temperature: 0.7,
            max_tokens: 150,
            shell: "sh".to_string(),
            stderr_tail_bytes: 4096,
            cancel_keywords: vec!["cancel".to_string(), "exit".to_string(), "quit".to_string()],
            os_release_path: PathBuf::from(DEFAULT_OS_RELEASE),
            use_mock: false,
            families: None,
            package_managers: None,
            recovery_rules: None,
        }
    }
}

impl Config {
    /// Load configuration from file, environment variables, or create default.
    ///
    /// A missing file means defaults; a file that can't be read or parsed is
    /// an error.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from_path(&Self::get_config_path()?)?.unwrap_or_else(|| {
            info!("No config file, using defaults");
            Self::default()
        });

        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Reads `path`, or returns `None` when it doesn't exist.
    pub fn load_from_path(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = Self::from_toml(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        info!("Loaded config from: {}", path.display());
        Ok(Some(config))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Environment variables override the config file.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("LLAMA_TERM_HOST") {
            self.host = host;
        }

        if let Some(port) = lookup("LLAMA_TERM_PORT") {
            match port.parse() {
                Ok(port) => self.port = port,
                Err(_) => warn!("Ignoring invalid LLAMA_TERM_PORT '{}'", port),
            }
        }

        if let Some(model) = lookup("LLAMA_TERM_MODEL") {
            self.model = model;
        }

        if let Some(path) = lookup("LLAMA_TERM_OS_RELEASE") {
            self.os_release_path = PathBuf::from(path);
        }

        if lookup("LLAMA_TERM_USE_MOCK").is_some() {
            self.use_mock = true;
        }
    }

    fn get_config_path() -> Result<PathBuf> {
        Ok(Self::get_config_dir()?.join("config.toml"))
    }

    pub fn get_config_dir() -> Result<PathBuf> {
        let home = home_dir().ok_or_else(|| anyhow!("Could not find home directory"))?;
        Ok(home.join(".llama-term"))
    }

    pub fn endpoint(&self) -> String {
        format!("http://{}:{}/api/generate", self.host, self.port)
    }

    pub fn family_table(&self) -> FamilyTable {
        match &self.families {
            Some(entries) => FamilyTable::new(entries.clone()),
            None => FamilyTable::default(),
        }
    }

    pub fn package_manager_table(&self) -> PackageManagerTable {
        match &self.package_managers {
            Some(entries) => PackageManagerTable::new(entries.clone()),
            None => PackageManagerTable::default(),
        }
    }

    /// Compiles the configured (or built-in) recovery rules.
    pub fn recovery_rules(&self) -> Result<RecoveryRuleSet> {
        let rules = match &self.recovery_rules {
            Some(rules) => rules.clone(),
            None => RecoveryRule::defaults(),
        };
        Ok(RecoveryRuleSet::compile(rules)?)
    }

    pub fn show_config_info(&self) -> Result<()> {
        let config_path = Self::get_config_path()?;
        println!("Configuration file: {}", config_path.display());
        println!(
            "Status: {}",
            if config_path.exists() { "Found" } else { "Not found (using defaults)" }
        );
        println!("Backend: {} (model {})", self.endpoint(), self.model);
        println!("Distribution descriptor: {}", self.os_release_path.display());
        println!("Shell: {}", self.shell);
        println!("Mock mode: {}", self.use_mock);
        println!(
            "Recovery rules: {}",
            if self.recovery_rules.is_some() { "custom" } else { "built-in" }
        );

        println!("\nTo point at another backend:");
        println!("  export LLAMA_TERM_HOST=<host> LLAMA_TERM_PORT=<port>");
        Ok(())
    }
}
