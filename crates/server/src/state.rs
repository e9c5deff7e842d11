use std::collections::BTreeMap;
use std::sync::Arc;

use seedwarden_core::{ActivityStore, AutomationEngine, Config, SanitizedConfig};

/// Shared application state
pub struct AppState {
    config: Config,
    config_hash: String,
    engines: BTreeMap<String, Arc<AutomationEngine>>,
    activity_store: Arc<dyn ActivityStore>,
}

impl AppState {
    pub fn new(
        config: Config,
        config_hash: impl Into<String>,
        engines: impl IntoIterator<Item = Arc<AutomationEngine>>,
        activity_store: Arc<dyn ActivityStore>,
    ) -> Self {
        Self {
            config,
            config_hash: config_hash.into(),
            engines: engines
                .into_iter()
                .map(|engine| (engine.instance().to_string(), engine))
                .collect(),
            activity_store,
        }
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn config_hash(&self) -> &str {
        &self.config_hash
    }

    pub fn engine(&self, instance: &str) -> Option<&Arc<AutomationEngine>> {
        self.engines.get(instance)
    }

    /// Engines by instance name.
    pub fn engines(&self) -> impl Iterator<Item = &Arc<AutomationEngine>> {
        self.engines.values()
    }

    pub fn activity_store(&self) -> &dyn ActivityStore {
        self.activity_store.as_ref()
    }
}
