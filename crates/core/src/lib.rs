pub mod activity;
pub mod config;
pub mod evaluator;
pub mod executor;
pub mod free_space;
pub mod identity;
pub mod metrics;
pub mod rules;
pub mod scheduler;
pub mod testing;
pub mod torrent_client;

pub use activity::{
    create_activity_system, ActivityError, ActivityEvent, ActivityFilter, ActivityHandle,
    ActivityOutcome, ActivityRecord, ActivityStore, SqliteActivityStore,
};
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, EngineConfig,
    InstanceConfig, SanitizedConfig,
};
pub use executor::{ProcessProgramRunner, ProgramRunner};
pub use identity::{FileStat, LocalFileStat};
pub use rules::{Rule, RuleError, RuleId, RuleSet};
pub use scheduler::{
    AutomationEngine, CycleReport, EngineError, EngineSettings, EngineStatus, RuleResult,
    RuleRunStatus,
};
pub use torrent_client::{ActionSink, QBittorrentClient, TorrentClientError, TorrentSource};
