//! Payload handlers contributed by plugins, keyed by content type.

use std::collections::BTreeMap;
use std::sync::Arc;

use lanshare_core::{HandlerFactory, PayloadHandler, PluginHandle};
use tracing::{debug, info, warn};

use super::CollaboratorError;

struct Entry {
    owner: PluginHandle,
    factory: Arc<dyn HandlerFactory>,
}

/// Maps content types to the handler factory of the plugin that provides them.
///
/// The first plugin to register a content type owns it until that plugin is
/// unloaded.
pub struct HandlerRegistry {
    entries: BTreeMap<String, Entry>,
    accepting: bool,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
            accepting: true,
        }
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `factory` on behalf of `owner`.  Returns `false` if another
    /// plugin already handles the content type.
    ///
    /// # Errors
    ///
    /// Returns [`CollaboratorError::Stopped`] after shutdown began.
    pub fn register(
        &mut self,
        owner: PluginHandle,
        factory: Arc<dyn HandlerFactory>,
    ) -> Result<bool, CollaboratorError> {
        if !self.accepting {
            return Err(CollaboratorError::Stopped("handler registry"));
        }
        let content_type = factory.content_type().to_string();
        if let Some(existing) = self.entries.get(&content_type) {
            warn!(
                "content type {content_type} from {owner} ignored: already handled by {}",
                existing.owner
            );
            return Ok(false);
        }
        info!("registered handler for {content_type} from {owner}");
        self.entries.insert(content_type, Entry { owner, factory });
        Ok(true)
    }

    /// Drops every handler `owner` registered.  Returns how many were removed.
    pub fn remove_plugin(&mut self, owner: PluginHandle) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| e.owner != owner);
        let removed = before - self.entries.len();
        if removed > 0 {
            debug!("removed {removed} handler(s) of {owner}");
        }
        removed
    }

    /// A fresh handler for `content_type`, or `None` if nobody handles it or
    /// shutdown began.
    pub fn create(&self, content_type: &str) -> Option<Box<dyn PayloadHandler>> {
        if !self.accepting {
            return None;
        }
        self.entries.get(content_type).map(|e| e.factory.create())
    }

    pub fn content_types(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    pub fn stop_accepting(&mut self) {
        self.accepting = false;
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("content_types", &self.content_types())
            .field("accepting", &self.accepting)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lanshare_core::{Capability, Plugin, PluginContext, PluginMetadata, PluginRegistry, LoadError};

    struct Sink;
    impl PayloadHandler for Sink {
        fn receive(&mut self, _chunk: &[u8]) {}
        fn finish(&mut self) {}
    }

    struct Factory(&'static str);
    impl HandlerFactory for Factory {
        fn content_type(&self) -> &str {
            self.0
        }
        fn create(&self) -> Box<dyn PayloadHandler> {
            Box::new(Sink)
        }
    }

    struct Named(&'static str);
    impl Plugin for Named {
        fn source(&self) -> &str {
            self.0
        }
        fn metadata(&self) -> PluginMetadata {
            PluginMetadata::new(self.0, "1")
        }
        fn capabilities(&self, _ctx: &PluginContext) -> Result<Vec<(String, Capability)>, LoadError> {
            Ok(Vec::new())
        }
    }

    /// Real handles come from a registry.
    fn handles() -> (PluginHandle, PluginHandle) {
        let mut registry = PluginRegistry::new();
        let ctx = PluginContext::default();
        let a = registry.load(Arc::new(Named("a")), &ctx).unwrap();
        let b = registry.load(Arc::new(Named("b")), &ctx).unwrap();
        (a, b)
    }

    #[test]
    fn test_first_registration_wins() {
        let (a, b) = handles();
        let mut registry = HandlerRegistry::new();

        assert!(registry.register(a, Arc::new(Factory("file"))).unwrap());
        assert!(!registry.register(b, Arc::new(Factory("file"))).unwrap());

        assert_eq!(registry.content_types(), vec!["file"]);
        assert!(registry.create("file").is_some());
        assert!(registry.create("url").is_none());
    }

    #[test]
    fn test_remove_plugin_drops_only_its_handlers() {
        let (a, b) = handles();
        let mut registry = HandlerRegistry::new();
        registry.register(a, Arc::new(Factory("file"))).unwrap();
        registry.register(a, Arc::new(Factory("text"))).unwrap();
        registry.register(b, Arc::new(Factory("url"))).unwrap();

        assert_eq!(registry.remove_plugin(a), 2);

        assert_eq!(registry.content_types(), vec!["url"]);
    }

    #[test]
    fn test_stop_accepting_refuses_work() {
        let (a, _) = handles();
        let mut registry = HandlerRegistry::new();
        registry.register(a, Arc::new(Factory("file"))).unwrap();

        registry.stop_accepting();

        assert!(registry.create("file").is_none());
        assert!(registry.register(a, Arc::new(Factory("url"))).is_err());
    }
}
