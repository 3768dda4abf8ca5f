use crate::plugin::StageContract;
use std::collections::HashMap;
use std::sync::Arc;

/// Registry of named, ready-to-instantiate stages. `PipelineBuilder` looks
/// up each step of the fixed order by name here when assembling
/// a pipeline; it is built once at startup and is immutable thereafter.
pub struct StageRegistry {
    stages: HashMap<String, Arc<dyn StageContract>>,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self { stages: HashMap::new() }
    }

    pub fn register(&mut self, stage: Arc<dyn StageContract>) {
        let name = stage.name().to_string();
        tracing::info!(stage = %name, "registered stage");
        self.stages.insert(name, stage);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn StageContract>> {
        self.stages.get(name).cloned()
    }

    pub fn list(&self) -> Vec<&str> {
        self.stages.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

impl Default for StageRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::{StageContext, StageOutcome};
    use ando_core::spec::ApiSpec;
    use async_trait::async_trait;
    use serde_json::Value;

    struct Named(&'static str);

    #[async_trait]
    impl StageContract for Named {
        fn name(&self) -> &str {
            self.0
        }
        fn enabled_for(&self, _spec: &ApiSpec) -> bool {
            true
        }
        async fn process(&self, _ctx: &mut StageContext, _config: &Value) -> StageOutcome {
            StageOutcome::Continue
        }
    }

    #[test]
    fn empty_registry_has_no_stages() {
        let reg = StageRegistry::new();
        assert!(reg.is_empty());
        assert!(reg.get("cors").is_none());
    }

    #[test]
    fn register_and_get_round_trips() {
        let mut reg = StageRegistry::new();
        reg.register(Arc::new(Named("cors")));
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.get("cors").unwrap().name(), "cors");
    }

    #[test]
    fn re_registering_same_name_overwrites() {
        let mut reg = StageRegistry::new();
        reg.register(Arc::new(Named("cors")));
        reg.register(Arc::new(Named("cors")));
        assert_eq!(reg.len(), 1);
    }
}
