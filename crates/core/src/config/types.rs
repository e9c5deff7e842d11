use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::path::PathBuf;

use crate::executor::{AllowList, ProgramDefinition, DEFAULT_BATCH_SIZE};
use crate::rules::Rule;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub programs: ProgramsConfig,
    #[serde(default)]
    pub instances: Vec<InstanceConfig>,
}

impl Config {
    pub fn instance(&self, name: &str) -> Option<&InstanceConfig> {
        self.instances.iter().find(|i| i.name == name)
    }

    /// Ids of every configured program.
    pub fn program_ids(&self) -> HashSet<String> {
        self.programs.definitions.iter().map(|d| d.id.clone()).collect()
    }
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    8080
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("seedwarden.db")
}

/// Engine timing and resource limits, shared by every instance
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Seconds between scheduler ticks (default: 20)
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,
    /// Seconds a (torrent, rule) pair stays debounced (default: 120)
    #[serde(default = "default_debounce")]
    pub debounce_secs: u64,
    /// Concurrent stat calls and file-list fetches (default: 8)
    #[serde(default = "default_stat_workers")]
    pub stat_workers: usize,
    /// Maximum hashes per client call (default: 50)
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Time limit for one external program run (default: 60)
    #[serde(default = "default_program_timeout")]
    pub program_timeout_secs: u64,
    /// Capacity of the activity channel (default: 1000)
    #[serde(default = "default_activity_buffer")]
    pub activity_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval(),
            debounce_secs: default_debounce(),
            stat_workers: default_stat_workers(),
            batch_size: default_batch_size(),
            program_timeout_secs: default_program_timeout(),
            activity_buffer: default_activity_buffer(),
        }
    }
}

fn default_tick_interval() -> u64 {
    20
}

fn default_debounce() -> u64 {
    120
}

fn default_stat_workers() -> usize {
    8
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_program_timeout() -> u64 {
    60
}

fn default_activity_buffer() -> usize {
    1000
}

/// External programs rules may invoke
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProgramsConfig {
    /// Absolute executable paths or directories programs may run from
    #[serde(default)]
    pub allow_list: Vec<PathBuf>,
    #[serde(default)]
    pub definitions: Vec<ProgramDefinition>,
}

impl ProgramsConfig {
    pub fn allow_list(&self) -> AllowList {
        AllowList::new(self.allow_list.iter().cloned())
    }
}

/// qBittorrent Web API connection
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QBittorrentConfig {
    /// Web UI URL (e.g., "http://localhost:8080")
    pub url: String,
    pub username: String,
    pub password: String,
    /// Request timeout in seconds (default: 30)
    #[serde(default = "default_timeout")]
    pub timeout_secs: u32,
}

fn default_timeout() -> u32 {
    30
}

/// One managed client instance and its rules
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InstanceConfig {
    pub name: String,
    pub qbittorrent: QBittorrentConfig,
    /// Whether torrent files are reachable on this host for hardlink checks
    #[serde(default)]
    pub local_filesystem_access: bool,
    /// Path whose disk is measured for free-space rules
    #[serde(default)]
    pub free_space_path: Option<String>,
    /// Tracker domain to display alias
    #[serde(default)]
    pub tracker_aliases: HashMap<String, String>,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

/// Sanitized config for API responses (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub engine: EngineConfig,
    pub programs: SanitizedProgramsConfig,
    pub instances: Vec<SanitizedInstanceConfig>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedProgramsConfig {
    pub allow_list: Vec<PathBuf>,
    pub program_ids: Vec<String>,
}

/// Sanitized instance config (password hidden)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedInstanceConfig {
    pub name: String,
    pub url: String,
    pub username: String,
    pub password_configured: bool,
    pub timeout_secs: u32,
    pub local_filesystem_access: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub free_space_path: Option<String>,
    pub tracker_aliases: HashMap<String, String>,
    pub rule_count: usize,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            server: config.server.clone(),
            database: config.database.clone(),
            engine: config.engine.clone(),
            programs: SanitizedProgramsConfig {
                allow_list: config.programs.allow_list.clone(),
                program_ids: config
                    .programs
                    .definitions
                    .iter()
                    .map(|d| d.id.clone())
                    .collect(),
            },
            instances: config
                .instances
                .iter()
                .map(|i| SanitizedInstanceConfig {
                    name: i.name.clone(),
                    url: i.qbittorrent.url.clone(),
                    username: i.qbittorrent.username.clone(),
                    password_configured: !i.qbittorrent.password.is_empty(),
                    timeout_secs: i.qbittorrent.timeout_secs,
                    local_filesystem_access: i.local_filesystem_access,
                    free_space_path: i.free_space_path.clone(),
                    tracker_aliases: i.tracker_aliases.clone(),
                    rule_count: i.rules.len(),
                })
                .collect(),
        }
    }
}
