//! Adapter lookup by platform

use crate::community::Platform;
use crate::integrations::{
    DiscordAdapter, DiscourseAdapter, GithubAdapter, IntegrationError, LoomioAdapter, OpencollectiveAdapter,
    PlatformAdapter, RedditAdapter, SlackAdapter, SourcecredAdapter,
};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<Platform, Arc<dyn PlatformAdapter>>,
}

impl AdapterRegistry {
    /// Registry with every built-in platform
    pub fn with_defaults() -> Self {
        let mut registry = Self::default();
        registry.register(Arc::new(SlackAdapter));
        registry.register(Arc::new(DiscordAdapter));
        registry.register(Arc::new(DiscourseAdapter));
        registry.register(Arc::new(RedditAdapter));
        registry.register(Arc::new(GithubAdapter));
        registry.register(Arc::new(OpencollectiveAdapter));
        registry.register(Arc::new(SourcecredAdapter));
        registry.register(Arc::new(LoomioAdapter));
        registry
    }

    pub fn register(&mut self, adapter: Arc<dyn PlatformAdapter>) {
        self.adapters.insert(adapter.platform(), adapter);
    }

    pub fn get(&self, platform: Platform) -> Result<Arc<dyn PlatformAdapter>, IntegrationError> {
        self.adapters
            .get(&platform)
            .cloned()
            .ok_or_else(|| IntegrationError::UnknownPlatform(platform.to_string()))
    }

    pub fn platforms(&self) -> Vec<Platform> {
        let mut platforms: Vec<_> = self.adapters.keys().copied().collect();
        platforms.sort_by_key(|p| p.as_str());
        platforms
    }
}
