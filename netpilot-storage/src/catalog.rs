use netpilot_models::{
    domain::prelude::CommandIntent,
    settings::{CatalogConfig, PlatformCommands},
    CommandCatalog,
};
use std::collections::HashMap;

/// Command catalog backed by the `[catalog.platforms.*]` settings tables.
#[derive(Debug, Clone, Default)]
pub struct StaticCommandCatalog {
    platforms: HashMap<String, PlatformCommands>,
}

impl StaticCommandCatalog {
    pub fn new(platforms: HashMap<String, PlatformCommands>) -> Self {
        Self { platforms }
    }

    pub fn from_config(config: &CatalogConfig) -> Self {
        Self::new(config.platforms.clone())
    }

    pub fn insert(&mut self, platform: impl Into<String>, commands: PlatformCommands) {
        self.platforms.insert(platform.into(), commands);
    }
}

impl CommandCatalog for StaticCommandCatalog {
    fn commands_for(&self, platform: &str, intent: CommandIntent) -> Option<Vec<String>> {
        let commands = self.platforms.get(platform)?;
        let list = match intent {
            CommandIntent::CollectConfig => &commands.collect_config,
            CommandIntent::SaveConfig => &commands.save_config,
            CommandIntent::Discover => &commands.discover,
            CommandIntent::Probe => &commands.probe,
        };
        if list.is_empty() {
            None
        } else {
            Some(list.clone())
        }
    }
}
