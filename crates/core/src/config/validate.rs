use std::collections::HashSet;
use std::path::Path;

use tracing::warn;

use super::{types::Config, ConfigError};
use crate::executor::{Template, PROGRAM_FIELDS};
use crate::rules::RuleSet;

/// Validate configuration
///
/// Covers:
/// - Server port is not 0
/// - Engine limits are in range (batch size 1-50, non-zero tick, workers and
///   activity buffer)
/// - Program definitions: unique ids, absolute paths, valid argument templates
/// - Instances: unique non-empty names, a client URL, every rule compiles
///
/// A program outside the allow-list is only warned about here; running it
/// is refused at run time.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    let engine = &config.engine;
    if engine.tick_interval_secs == 0 {
        return Err(ConfigError::ValidationError(
            "engine.tick_interval_secs cannot be 0".to_string(),
        ));
    }
    if !(1..=50).contains(&engine.batch_size) {
        return Err(ConfigError::ValidationError(format!(
            "engine.batch_size must be between 1 and 50, got {}",
            engine.batch_size
        )));
    }
    if engine.stat_workers == 0 {
        return Err(ConfigError::ValidationError(
            "engine.stat_workers cannot be 0".to_string(),
        ));
    }
    if engine.activity_buffer == 0 {
        return Err(ConfigError::ValidationError(
            "engine.activity_buffer cannot be 0".to_string(),
        ));
    }
    if engine.program_timeout_secs == 0 {
        return Err(ConfigError::ValidationError(
            "engine.program_timeout_secs cannot be 0".to_string(),
        ));
    }

    let allow_list = config.programs.allow_list();
    let mut program_ids = HashSet::new();
    for program in &config.programs.definitions {
        if !program_ids.insert(program.id.clone()) {
            return Err(ConfigError::ValidationError(format!(
                "duplicate program id {:?}",
                program.id
            )));
        }
        let path = Path::new(&program.path);
        if !path.is_absolute() {
            return Err(ConfigError::ValidationError(format!(
                "program {:?} path must be absolute",
                program.id
            )));
        }
        for arg in &program.args {
            Template::parse(arg, PROGRAM_FIELDS).map_err(|e| {
                ConfigError::ValidationError(format!(
                    "program {:?} argument {:?}: {}",
                    program.id, arg, e
                ))
            })?;
        }
        if !allow_list.permits(path) {
            warn!(program = %program.id, path = %program.path, "Program is not on the allow-list and will be rejected");
        }
    }

    let mut names = HashSet::new();
    for instance in &config.instances {
        if instance.name.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "instance name cannot be empty".to_string(),
            ));
        }
        if !names.insert(instance.name.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "duplicate instance name {:?}",
                instance.name
            )));
        }
        if instance.qbittorrent.url.trim().is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "instance {:?} has no qbittorrent.url",
                instance.name
            )));
        }
        RuleSet::compile(0, instance.rules.clone(), &program_ids).map_err(|source| {
            ConfigError::InvalidRule {
                instance: instance.name.clone(),
                source,
            }
        })?;
    }

    Ok(())
}
