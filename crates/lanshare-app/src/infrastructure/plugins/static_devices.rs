//! Enumerator plugin announcing the peers listed under `[[devices]]`.
//!
//! Static peers are useful where discovery broadcasts do not cross network
//! boundaries.  They are announced once when the enumerator starts and are
//! removed from the roster when the plugin is unloaded.

use std::sync::Arc;

use lanshare_core::plugin::registry::CAPABILITY_ENUMERATOR;
use lanshare_core::{
    Capability, DeviceEnumerator, LoadError, Plugin, PluginContext, PluginMetadata,
    PresenceFields, PresenceSink,
};
use serde_json::Value;
use tracing::{debug, info};

use crate::application::context::FIELD_PORT;
use crate::infrastructure::storage::config::StaticDevice;

const SOURCE: &str = "builtin:static-devices";

pub struct StaticDevicesPlugin {
    devices: Arc<Vec<StaticDevice>>,
}

impl StaticDevicesPlugin {
    pub fn new(devices: Vec<StaticDevice>) -> Self {
        Self {
            devices: Arc::new(devices),
        }
    }
}

impl Plugin for StaticDevicesPlugin {
    fn source(&self) -> &str {
        SOURCE
    }

    fn metadata(&self) -> PluginMetadata {
        PluginMetadata::new("static-devices", env!("CARGO_PKG_VERSION"))
    }

    fn capabilities(&self, ctx: &PluginContext) -> Result<Vec<(String, Capability)>, LoadError> {
        if let Some(own) = self.devices.iter().find(|d| d.uuid == ctx.device_uuid) {
            debug!("static device {} is this device and will not be announced", own.name);
        }
        let devices = Arc::clone(&self.devices);
        let own_uuid = ctx.device_uuid.clone();
        let factory = move || -> Box<dyn DeviceEnumerator> {
            Box::new(StaticEnumerator {
                devices: Arc::clone(&devices),
                own_uuid: own_uuid.clone(),
                sink: None,
            })
        };
        Ok(vec![(
            CAPABILITY_ENUMERATOR.to_string(),
            Capability::Enumerator(Arc::new(factory)),
        )])
    }
}

struct StaticEnumerator {
    devices: Arc<Vec<StaticDevice>>,
    own_uuid: String,
    sink: Option<PresenceSink>,
}

fn presence_fields(device: &StaticDevice) -> PresenceFields {
    let mut fields = PresenceFields::new()
        .with_name(device.name.clone())
        .with_addresses(device.addresses.iter().cloned());
    if let Some(port) = device.port {
        fields = fields.with_extra(FIELD_PORT, Value::from(port));
    }
    fields
}

impl DeviceEnumerator for StaticEnumerator {
    fn start(&mut self, sink: PresenceSink) {
        let mut announced = 0;
        for device in self.devices.iter().filter(|d| d.uuid != self.own_uuid) {
            if sink.update(device.uuid.clone(), presence_fields(device)) {
                announced += 1;
            }
        }
        info!("announced {announced} static device(s)");
        self.sink = Some(sink);
    }

    fn stop(&mut self) {
        if let Some(sink) = self.sink.take() {
            debug!("static devices enumerator on {} stopped", sink.source());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lanshare_core::{DeviceModel, PluginRegistry, SourceEvent};
    use tokio::sync::mpsc;

    fn device(uuid: &str, name: &str, addresses: &[&str], port: Option<u16>) -> StaticDevice {
        StaticDevice {
            uuid: uuid.to_string(),
            name: name.to_string(),
            addresses: addresses.iter().map(|a| a.to_string()).collect(),
            port,
        }
    }

    fn enumerator_from(plugin: StaticDevicesPlugin, ctx: &PluginContext) -> Box<dyn DeviceEnumerator> {
        let mut registry = PluginRegistry::new();
        let handle = registry.load(Arc::new(plugin), ctx).unwrap();
        match registry.capability(handle, CAPABILITY_ENUMERATOR) {
            Some(Capability::Enumerator(factory)) => factory(),
            other => panic!("expected enumerator capability, got {other:?}"),
        }
    }

    #[test]
    fn test_start_announces_configured_devices() {
        // Arrange
        let plugin = StaticDevicesPlugin::new(vec![
            device("nas", "office-nas", &["192.168.1.20"], None),
            device("laptop", "laptop", &["10.0.0.5", "fe80::5"], Some(5000)),
        ]);
        let mut enumerator = enumerator_from(plugin, &PluginContext::default());
        let mut model = DeviceModel::new();
        let source = model.add_source("static");
        let (tx, mut rx) = mpsc::unbounded_channel::<SourceEvent>();

        // Act
        enumerator.start(PresenceSink::new(source, tx));
        while let Ok((src, event)) = rx.try_recv() {
            model.apply(src, event);
        }

        // Assert
        assert_eq!(model.len(), 2);
        assert_eq!(model.device("nas").unwrap().name, "office-nas");
        let laptop = model.device("laptop").unwrap();
        assert_eq!(laptop.addresses.len(), 2);
        assert_eq!(laptop.extra.get(FIELD_PORT), Some(&Value::from(5000u16)));
    }

    #[test]
    fn test_own_device_is_not_announced() {
        let plugin = StaticDevicesPlugin::new(vec![
            device("me", "this-pc", &["127.0.0.1"], None),
            device("peer", "peer", &["127.0.0.2"], None),
        ]);
        let ctx = PluginContext {
            device_uuid: "me".to_string(),
            device_name: "this-pc".to_string(),
        };
        let mut enumerator = enumerator_from(plugin, &ctx);
        let (tx, mut rx) = mpsc::unbounded_channel::<SourceEvent>();
        let mut model = DeviceModel::new();
        let source = model.add_source("static");

        enumerator.start(PresenceSink::new(source, tx));

        let (_, event) = rx.try_recv().unwrap();
        assert_eq!(event.device_id(), "peer");
        assert!(rx.try_recv().is_err());
    }
}
