//! PluginRegistry: loads plugins and routes their capabilities by name.
//!
//! A plugin declares a list of `(capability name, Capability)` pairs when it
//! is loaded.  The registry stores them and answers "which plugins provide
//! `transport/lan`?" without ever looking inside a capability.
//!
//! # Load rules
//!
//! - Loading is idempotent per source: loading a plugin whose
//!   [`Plugin::source`] is already loaded returns the existing handle.
//! - Loading is all-or-nothing: every capability is built and validated
//!   before anything is registered, so a failed load leaves no trace.
//! - Unloading revokes every capability the plugin contributed in one step
//!   and hands them back to the caller, which retires whatever it built from
//!   them (enumerator sources, handlers).
//!
//! # Threading
//!
//! Load and unload take `&mut self` and are expected to run on the task that
//! owns the application.  Lookups take `&self`.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::enumerator::DeviceEnumerator;
use super::handler::HandlerFactory;
use crate::transport::TransportFactory;

/// Capability name under which device enumerators are registered.
pub const CAPABILITY_ENUMERATOR: &str = "enumerator";
/// Prefix of transport capability names, e.g. `transport/lan`.
pub const CAPABILITY_TRANSPORT_PREFIX: &str = "transport/";
/// Prefix of handler capability names, e.g. `handler/file`.
pub const CAPABILITY_HANDLER_PREFIX: &str = "handler/";

/// Errors returned synchronously by [`PluginRegistry::load`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LoadError {
    /// The plugin reported an empty source identity.
    #[error("plugin source identity must not be empty")]
    InvalidSource,

    /// The plugin failed to build its capabilities.
    #[error("plugin {plugin} failed to build its capabilities: {reason}")]
    Capability { plugin: String, reason: String },

    /// A capability name was empty.
    #[error("plugin {plugin} declared an empty capability name")]
    EmptyCapabilityName { plugin: String },

    /// The same capability name was declared twice by one plugin.
    #[error("plugin {plugin} declared capability {name} more than once")]
    DuplicateCapability { plugin: String, name: String },

    /// A different source already provides a plugin with this name.
    #[error("plugin {name} from {source_id} conflicts with the copy loaded from {existing}")]
    Conflict {
        name: String,
        source_id: String,
        existing: String,
    },
}

/// Errors returned by operations on an already-loaded plugin.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("no plugin is loaded under {0}")]
    UnknownHandle(PluginHandle),
}

/// Opaque handle to a loaded plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PluginHandle(u64);

impl fmt::Display for PluginHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "plugin#{}", self.0)
    }
}

/// Diagnostic metadata a plugin declares about itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginMetadata {
    pub name: String,
    pub version: String,
}

impl PluginMetadata {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

/// What a plugin can see of the application while it loads.
#[derive(Debug, Clone, Default)]
pub struct PluginContext {
    /// Persisted identifier of this device.
    pub device_uuid: String,
    /// Persisted display name of this device.
    pub device_name: String,
}

/// Builds a fresh device enumerator each time one is activated.
pub type EnumeratorFactory = Arc<dyn Fn() -> Box<dyn DeviceEnumerator> + Send + Sync>;

/// A capability contributed by a plugin, tagged by kind.
#[derive(Clone)]
pub enum Capability {
    Enumerator(EnumeratorFactory),
    Transport(Arc<dyn TransportFactory>),
    Handler(Arc<dyn HandlerFactory>),
}

/// The kind of a [`Capability`], without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityKind {
    Enumerator,
    Transport,
    Handler,
}

impl Capability {
    pub fn kind(&self) -> CapabilityKind {
        match self {
            Capability::Enumerator(_) => CapabilityKind::Enumerator,
            Capability::Transport(_) => CapabilityKind::Transport,
            Capability::Handler(_) => CapabilityKind::Handler,
        }
    }
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Capability::{:?}", self.kind())
    }
}

/// A loadable unit of functionality.
pub trait Plugin: Send + Sync {
    /// Stable identity of where this plugin comes from, e.g. `builtin:lan`.
    fn source(&self) -> &str;

    fn metadata(&self) -> PluginMetadata;

    /// Builds the plugin's capabilities.  An error aborts the load.
    fn capabilities(&self, ctx: &PluginContext) -> Result<Vec<(String, Capability)>, LoadError>;
}

/// Notifications about registry membership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    Loaded {
        handle: PluginHandle,
        capabilities: Vec<String>,
    },
    Revoked {
        handle: PluginHandle,
        capabilities: Vec<String>,
    },
}

struct LoadedPlugin {
    source: String,
    metadata: PluginMetadata,
    capabilities: Vec<(String, Capability)>,
    _plugin: Arc<dyn Plugin>,
}

/// The plugin registry.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: BTreeMap<PluginHandle, LoadedPlugin>,
    by_source: HashMap<String, PluginHandle>,
    by_capability: HashMap<String, Vec<PluginHandle>>,
    next_handle: u64,
    observers: Vec<mpsc::UnboundedSender<RegistryEvent>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a receiver for subsequent load and revoke notifications.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<RegistryEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.observers.push(tx);
        rx
    }

    /// Loads `plugin`, or returns the existing handle if its source is already loaded.
    ///
    /// # Errors
    ///
    /// Returns a [`LoadError`] if the plugin's capabilities cannot be built or
    /// are invalid.  Nothing is registered in that case.
    pub fn load(
        &mut self,
        plugin: Arc<dyn Plugin>,
        ctx: &PluginContext,
    ) -> Result<PluginHandle, LoadError> {
        let source = plugin.source().to_string();
        if source.is_empty() {
            return Err(LoadError::InvalidSource);
        }
        if let Some(&handle) = self.by_source.get(&source) {
            debug!("plugin source {source} already loaded as {handle}");
            return Ok(handle);
        }

        let metadata = plugin.metadata();
        if let Some(existing) = self
            .plugins
            .values()
            .find(|p| p.metadata.name == metadata.name)
        {
            return Err(LoadError::Conflict {
                name: metadata.name,
                source_id: source,
                existing: existing.source.clone(),
            });
        }

        let capabilities = plugin.capabilities(ctx)?;
        validate(&metadata.name, &capabilities)?;

        let handle = PluginHandle(self.next_handle);
        self.next_handle += 1;

        let names: Vec<String> = capabilities.iter().map(|(n, _)| n.clone()).collect();
        for name in &names {
            self.by_capability
                .entry(name.clone())
                .or_default()
                .push(handle);
        }
        self.by_source.insert(source.clone(), handle);
        info!(
            "loaded plugin {} {} from {source} as {handle} (capabilities: {})",
            metadata.name,
            metadata.version,
            names.join(", ")
        );
        self.plugins.insert(
            handle,
            LoadedPlugin {
                source,
                metadata,
                capabilities,
                _plugin: plugin,
            },
        );
        self.emit(RegistryEvent::Loaded {
            handle,
            capabilities: names,
        });
        Ok(handle)
    }

    /// Unloads `handle`, revoking all of its capabilities at once.
    ///
    /// Returns the revoked capabilities so the caller can retire anything it
    /// built from them.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownHandle`] if `handle` is not loaded.
    pub fn unload(
        &mut self,
        handle: PluginHandle,
    ) -> Result<Vec<(String, Capability)>, RegistryError> {
        let loaded = self
            .plugins
            .remove(&handle)
            .ok_or(RegistryError::UnknownHandle(handle))?;

        self.by_source.remove(&loaded.source);
        for (name, _) in &loaded.capabilities {
            if let Some(handles) = self.by_capability.get_mut(name) {
                handles.retain(|h| *h != handle);
                if handles.is_empty() {
                    self.by_capability.remove(name);
                }
            }
        }

        let names: Vec<String> = loaded.capabilities.iter().map(|(n, _)| n.clone()).collect();
        info!("unloaded plugin {} ({handle})", loaded.metadata.name);
        self.emit(RegistryEvent::Revoked {
            handle,
            capabilities: names,
        });
        Ok(loaded.capabilities)
    }

    /// Handles of every plugin providing `capability`, in load order.
    pub fn find_by_capability(&self, capability: &str) -> Vec<PluginHandle> {
        self.by_capability
            .get(capability)
            .cloned()
            .unwrap_or_default()
    }

    /// The capability `name` contributed by `handle`.
    pub fn capability(&self, handle: PluginHandle, name: &str) -> Option<&Capability> {
        self.plugins
            .get(&handle)?
            .capabilities
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, c)| c)
    }

    /// Every capability contributed by `handle`.
    pub fn capabilities(&self, handle: PluginHandle) -> Vec<(&str, &Capability)> {
        self.plugins
            .get(&handle)
            .map(|p| {
                p.capabilities
                    .iter()
                    .map(|(n, c)| (n.as_str(), c))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn metadata(&self, handle: PluginHandle) -> Option<&PluginMetadata> {
        self.plugins.get(&handle).map(|p| &p.metadata)
    }

    pub fn is_loaded(&self, handle: PluginHandle) -> bool {
        self.plugins.contains_key(&handle)
    }

    /// Handles of all loaded plugins, in load order.
    pub fn handles(&self) -> Vec<PluginHandle> {
        self.plugins.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    fn emit(&mut self, event: RegistryEvent) {
        self.observers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.plugins.len())
            .field("capabilities", &self.by_capability.len())
            .finish()
    }
}

fn validate(plugin: &str, capabilities: &[(String, Capability)]) -> Result<(), LoadError> {
    let mut seen = HashSet::new();
    for (name, capability) in capabilities {
        if name.is_empty() {
            return Err(LoadError::EmptyCapabilityName {
                plugin: plugin.to_string(),
            });
        }
        if !seen.insert(name.as_str()) {
            return Err(LoadError::DuplicateCapability {
                plugin: plugin.to_string(),
                name: name.clone(),
            });
        }
        let expected = expected_kind(name);
        if expected.is_some_and(|kind| kind != capability.kind()) {
            warn!("capability {name} of plugin {plugin} is registered as {capability:?}");
        }
    }
    Ok(())
}

/// The kind conventionally registered under `name`, if the name follows a convention.
fn expected_kind(name: &str) -> Option<CapabilityKind> {
    if name == CAPABILITY_ENUMERATOR {
        Some(CapabilityKind::Enumerator)
    } else if name.starts_with(CAPABILITY_TRANSPORT_PREFIX) {
        Some(CapabilityKind::Transport)
    } else if name.starts_with(CAPABILITY_HANDLER_PREFIX) {
        Some(CapabilityKind::Handler)
    } else {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
