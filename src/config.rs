use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub root: Root,
    #[serde(default)]
    pub server: Server,
    #[serde(default)]
    pub cors: Cors,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub logging: Logging,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Root {
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,
}
fn default_root_dir() -> PathBuf { PathBuf::from("StorageRoot") }

impl Default for Root {
    fn default() -> Self { Self { root_dir: default_root_dir() } }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Server {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_base_path")]
    pub base_path: String,
}
fn default_bind_addr() -> String { "127.0.0.1".to_string() }
fn default_port() -> u16 { 52610 }
fn default_base_path() -> String { "/api/dataservice".to_string() }

impl Default for Server {
    fn default() -> Self {
        Self { bind_addr: default_bind_addr(), port: default_port(), base_path: default_base_path() }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Cors {
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
}
fn default_allowed_origins() -> Vec<String> { vec!["http://localhost:4200".to_string()] }

impl Default for Cors {
    fn default() -> Self { Self { allowed_origins: default_allowed_origins() } }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Limits {
    #[serde(default = "default_max_request_kb")]
    pub max_request_kb: usize,
    #[serde(default = "default_max_upload_mb")]
    pub max_upload_mb: usize,
}
fn default_max_request_kb() -> usize { 64 }
fn default_max_upload_mb() -> usize { 256 }

impl Default for Limits {
    fn default() -> Self {
        Self { max_request_kb: default_max_request_kb(), max_upload_mb: default_max_upload_mb() }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Logging {
    #[serde(default)]
    pub format: LogFormat,
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)?;
        Self::parse(&raw, path.extension().map(|e| e == "json").unwrap_or(false))
    }

    pub fn parse(raw: &str, json: bool) -> anyhow::Result<Self> {
        if json {
            Ok(serde_json::from_str(raw)?)
        } else {
            Ok(toml::from_str(raw)?)
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.root.root_dir.as_os_str().is_empty() { anyhow::bail!("root_dir must not be empty"); }
        let base = &self.server.base_path;
        if !base.starts_with('/') || base.len() < 2 { anyhow::bail!("base_path must start with '/' and name a prefix: {base}"); }
        if base.ends_with('/') { anyhow::bail!("base_path must not end with '/': {base}"); }
        if self.cors.allowed_origins.iter().any(|o| o.trim().is_empty()) { anyhow::bail!("allowed_origins must not contain empty entries"); }
        if self.limits.max_request_kb == 0 { anyhow::bail!("max_request_kb must be > 0"); }
        if self.limits.max_upload_mb == 0 { anyhow::bail!("max_upload_mb must be > 0"); }
        Ok(())
    }
}

/// Creates the storage root when absent and returns its canonical form.
pub fn prepare_root(root: &Path) -> anyhow::Result<PathBuf> {
    fs::create_dir_all(root)?;
    let c = dunce::canonicalize(root)?;
    if !c.is_dir() {
        anyhow::bail!("root_dir is not a directory: {}", c.display());
    }
    Ok(c)
}
