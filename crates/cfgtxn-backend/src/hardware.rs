//! Hardware-abstraction API boundary.
//!
//! Objects are addressed by name (e.g. a line-side interface); every
//! attribute is a string on the wire. The API reports per-attribute
//! capabilities that handlers validate against.

use crate::error::{BackendError, BackendResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tokio::sync::mpsc;

/// Constraints the hardware reports for one attribute.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttrCapability {
    pub min: Option<f64>,
    pub max: Option<f64>,
    /// Enumerated values; empty means unrestricted.
    pub supported_values: Vec<String>,
    pub default_value: Option<String>,
}

impl AttrCapability {
    /// Capability restricted to an enumeration.
    pub fn enumerated<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            supported_values: values.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Capability restricted to a numeric range.
    pub fn range(min: f64, max: f64) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
            ..Default::default()
        }
    }

    pub fn with_default(mut self, value: impl Into<String>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    /// Checks `value` against the bounds and enumeration.
    pub fn check(&self, value: &str) -> Result<(), String> {
        if self.min.is_some() || self.max.is_some() {
            let v: f64 = value
                .parse()
                .map_err(|_| format!("'{}' is not numeric", value))?;
            if let Some(min) = self.min {
                if v < min {
                    return Err(format!("{} is below minimum {}", value, min));
                }
            }
            if let Some(max) = self.max {
                if v > max {
                    return Err(format!("{} is above maximum {}", value, max));
                }
            }
        }
        if !self.supported_values.is_empty() && !self.supported_values.iter().any(|s| s == value) {
            return Err(format!(
                "'{}' is not one of [{}]",
                value,
                self.supported_values.join(", ")
            ));
        }
        Ok(())
    }
}

/// Event delivered by an attribute monitor subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrEvent {
    Changed {
        object: String,
        attribute: String,
        value: String,
    },
    /// The object was removed; no further events follow.
    ObjectGone { object: String },
}

#[async_trait]
pub trait HardwareApi: Send + Sync {
    async fn list_objects(&self) -> BackendResult<Vec<String>>;

    async fn has_object(&self, object: &str) -> BackendResult<bool> {
        Ok(self.list_objects().await?.iter().any(|o| o == object))
    }

    /// Reads an attribute. `None` means the object no longer exists.
    async fn get(&self, object: &str, attribute: &str) -> BackendResult<Option<String>>;

    async fn set(&self, object: &str, attribute: &str, value: &str) -> BackendResult<()>;

    async fn capability(&self, object: &str, attribute: &str) -> BackendResult<AttrCapability>;

    /// Subscribes to changes of one attribute.
    async fn monitor(
        &self,
        object: &str,
        attribute: &str,
    ) -> BackendResult<mpsc::Receiver<AttrEvent>>;
}

/// File form of a [`MemoryHardware`]: objects with their attribute
/// values, and capabilities per attribute name.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct HardwareFile {
    objects: BTreeMap<String, BTreeMap<String, String>>,
    capabilities: BTreeMap<String, AttrCapability>,
}

struct Subscriber {
    object: String,
    attribute: String,
    tx: mpsc::Sender<AttrEvent>,
}

/// In-memory [`HardwareApi`].
#[derive(Default)]
pub struct MemoryHardware {
    objects: Mutex<BTreeMap<String, BTreeMap<String, String>>>,
    capabilities: Mutex<BTreeMap<String, AttrCapability>>,
    subscribers: Mutex<Vec<Subscriber>>,
    writes: Mutex<Vec<(String, String, String)>>,
    failing: Mutex<Vec<(String, String)>>,
}

impl MemoryHardware {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads objects and capabilities from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> BackendResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            BackendError::hardware(path.display().to_string(), format!("load: {}", e))
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> BackendResult<Self> {
        let file: HardwareFile = serde_json::from_str(raw)?;
        let hw = Self::new();
        *hw.objects.lock() = file.objects;
        *hw.capabilities.lock() = file.capabilities;
        Ok(hw)
    }

    pub fn add_object(&self, object: &str, attributes: &[(&str, &str)]) {
        let attrs = attributes
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.objects.lock().insert(object.to_string(), attrs);
    }

    /// Removes an object and tells its subscribers it is gone.
    pub fn remove_object(&self, object: &str) {
        self.objects.lock().remove(object);
        let mut subscribers = self.subscribers.lock();
        for sub in subscribers.iter().filter(|s| s.object == object) {
            let _ = sub.tx.try_send(AttrEvent::ObjectGone {
                object: object.to_string(),
            });
        }
        subscribers.retain(|s| s.object != object);
    }

    /// Sets the capability reported for `attribute` on every object.
    pub fn set_capability(&self, attribute: &str, capability: AttrCapability) {
        self.capabilities
            .lock()
            .insert(attribute.to_string(), capability);
    }

    pub fn fail_sets(&self, object: &str, attribute: &str) {
        self.failing
            .lock()
            .push((object.to_string(), attribute.to_string()));
    }

    /// `(object, attribute, value)` for every successful set.
    pub fn writes(&self) -> Vec<(String, String, String)> {
        self.writes.lock().clone()
    }

    pub fn value(&self, object: &str, attribute: &str) -> Option<String> {
        self.objects
            .lock()
            .get(object)
            .and_then(|attrs| attrs.get(attribute).cloned())
    }
}

#[async_trait]
impl HardwareApi for MemoryHardware {
    async fn list_objects(&self) -> BackendResult<Vec<String>> {
        Ok(self.objects.lock().keys().cloned().collect())
    }

    async fn get(&self, object: &str, attribute: &str) -> BackendResult<Option<String>> {
        let objects = self.objects.lock();
        match objects.get(object) {
            None => Ok(None),
            Some(attrs) => attrs.get(attribute).cloned().map(Some).ok_or_else(|| {
                BackendError::AttributeUnsupported {
                    object: object.to_string(),
                    attribute: attribute.to_string(),
                }
            }),
        }
    }

    async fn set(&self, object: &str, attribute: &str, value: &str) -> BackendResult<()> {
        if self
            .failing
            .lock()
            .iter()
            .any(|(o, a)| o == object && a == attribute)
        {
            return Err(BackendError::hardware(object, format!("set {} rejected", attribute)));
        }
        {
            let mut objects = self.objects.lock();
            let attrs = objects
                .get_mut(object)
                .ok_or_else(|| BackendError::ObjectNotFound(object.to_string()))?;
            attrs.insert(attribute.to_string(), value.to_string());
        }
        self.writes
            .lock()
            .push((object.to_string(), attribute.to_string(), value.to_string()));

        for sub in self
            .subscribers
            .lock()
            .iter()
            .filter(|s| s.object == object && s.attribute == attribute)
        {
            let _ = sub.tx.try_send(AttrEvent::Changed {
                object: object.to_string(),
                attribute: attribute.to_string(),
                value: value.to_string(),
            });
        }
        Ok(())
    }

    async fn capability(&self, object: &str, attribute: &str) -> BackendResult<AttrCapability> {
        if !self.objects.lock().contains_key(object) {
            return Err(BackendError::ObjectNotFound(object.to_string()));
        }
        Ok(self
            .capabilities
            .lock()
            .get(attribute)
            .cloned()
            .unwrap_or_default())
    }

    async fn monitor(
        &self,
        object: &str,
        attribute: &str,
    ) -> BackendResult<mpsc::Receiver<AttrEvent>> {
        if !self.objects.lock().contains_key(object) {
            return Err(BackendError::ObjectNotFound(object.to_string()));
        }
        let (tx, rx) = mpsc::channel(64);
        self.subscribers.lock().push(Subscriber {
            object: object.to_string(),
            attribute: attribute.to_string(),
            tx,
        });
        Ok(rx)
    }
}
