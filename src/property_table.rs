//! Properties declared in configuration instead of code.
//!
//! Each `[[properties]]` entry becomes a [`QueriedProperty`] or, with `channel = true`, a
//! [`ChannelQueriedProperty`]. Range and choice constraints turn into validators that run
//! before anything is written.
//!
//! ```toml
//! [[properties]]
//! name = "speed"
//! get = "SMS"
//! set = "SMS %d"
//! scalar_type = "int"
//! min = 1
//! max = 100
//!
//! [[properties]]
//! name = "gain"
//! channel = true
//! get = "G{0}?"
//! set = "G{0} {1}"
//! choices = [1, 2, 5, 10]
//! ```

use crate::bus::MessageBus;
use crate::error::{BusError, BusResult};
use crate::property::{
    BoundProperty, Channel, ChannelQueriedProperty, QueriedProperty, ScalarType,
};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// One declared property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertySpec {
    /// Lookup key
    pub name: String,
    /// Read command; absent for write-only properties
    #[serde(default)]
    pub get: Option<String>,
    /// Write template; absent for read-only properties
    #[serde(default)]
    pub set: Option<String>,
    /// Reply type
    #[serde(default)]
    pub scalar_type: ScalarType,
    /// Description shown by `msgbus list`
    #[serde(default)]
    pub doc: Option<String>,
    /// Substitute the owner's channel into both commands
    #[serde(default)]
    pub channel: bool,
    /// Smallest accepted numeric value
    #[serde(default)]
    pub min: Option<f64>,
    /// Largest accepted numeric value
    #[serde(default)]
    pub max: Option<f64>,
    /// Allowed values; empty means unrestricted
    #[serde(default)]
    pub choices: Vec<Value>,
}

impl PropertySpec {
    /// Read-only float property.
    pub fn new(name: impl Into<String>, get: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            get: Some(get.into()),
            set: None,
            scalar_type: ScalarType::default(),
            doc: None,
            channel: false,
            min: None,
            max: None,
            choices: Vec::new(),
        }
    }

    /// Check the declaration itself.
    pub fn validate(&self) -> BusResult<()> {
        if self.name.trim().is_empty() {
            return Err(BusError::Configuration(
                "property name must not be empty".to_string(),
            ));
        }
        if self.get.is_none() && self.set.is_none() {
            return Err(BusError::Configuration(format!(
                "property '{}' has neither get nor set",
                self.name
            )));
        }
        if let (Some(min), Some(max)) = (self.min, self.max) {
            if min > max {
                return Err(BusError::Configuration(format!(
                    "property '{}': min {min} is greater than max {max}",
                    self.name
                )));
            }
        }
        Ok(())
    }

    fn constraints(&self) -> Constraints {
        Constraints {
            min: self.min,
            max: self.max,
            choices: self.choices.clone(),
        }
    }
}

/// Range and choice limits from a [`PropertySpec`].
#[derive(Debug, Clone, Default)]
struct Constraints {
    min: Option<f64>,
    max: Option<f64>,
    choices: Vec<Value>,
}

impl Constraints {
    fn is_empty(&self) -> bool {
        self.min.is_none() && self.max.is_none() && self.choices.is_empty()
    }

    fn validate(&self, value: &Value) -> Result<(), String> {
        if self.min.is_some() || self.max.is_some() {
            let number = value
                .as_f64()
                .ok_or_else(|| format!("expected a number, got {}", value.kind()))?;
            if let Some(min) = self.min {
                if number < min {
                    return Err(format!("below minimum {min}"));
                }
            }
            if let Some(max) = self.max {
                if number > max {
                    return Err(format!("above maximum {max}"));
                }
            }
        }
        if !self.choices.is_empty() && !self.choices.iter().any(|c| same_value(c, value)) {
            let allowed: Vec<String> = self.choices.iter().map(Value::to_string).collect();
            return Err(format!("must be one of: {}", allowed.join(", ")));
        }
        Ok(())
    }
}

/// Numbers compare by value regardless of representation.
fn same_value(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// Instrument as seen by a property table: a shared bus and an optional channel.
#[derive(Debug, Clone)]
pub struct PropertyOwner {
    bus: Arc<MessageBus>,
    channel: Option<Value>,
}

impl PropertyOwner {
    /// Owner without a channel.
    pub fn new(bus: Arc<MessageBus>) -> Self {
        Self { bus, channel: None }
    }

    /// Channel substituted into channel properties.
    pub fn with_channel(mut self, channel: impl Into<Value>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    /// Underlying bus.
    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }
}

impl Channel for PropertyOwner {
    type Parent = MessageBus;

    fn channel(&self) -> Option<Value> {
        self.channel.clone()
    }

    fn parent(&self) -> Option<&MessageBus> {
        Some(&self.bus)
    }
}

#[derive(Debug, Clone)]
enum Accessor {
    Plain(QueriedProperty<MessageBus>),
    Channel(ChannelQueriedProperty<PropertyOwner>),
}

#[derive(Debug, Clone)]
struct Entry {
    spec: PropertySpec,
    accessor: Accessor,
}

/// Named accessors built at configuration-load time.
#[derive(Debug, Clone, Default)]
pub struct PropertyTable {
    entries: Vec<Entry>,
}

impl PropertyTable {
    /// Build accessors for every spec, in declaration order.
    pub fn from_specs(specs: &[PropertySpec]) -> BusResult<Self> {
        let mut seen = HashSet::new();
        let mut entries = Vec::with_capacity(specs.len());
        for spec in specs {
            spec.validate()?;
            if !seen.insert(spec.name.as_str()) {
                return Err(BusError::Configuration(format!(
                    "Duplicate property name: {}",
                    spec.name
                )));
            }
            entries.push(Entry {
                spec: spec.clone(),
                accessor: build(spec),
            });
        }
        Ok(Self { entries })
    }

    /// Property names in declaration order.
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.spec.name.as_str()).collect()
    }

    /// Definition of `name`.
    pub fn spec(&self, name: &str) -> Option<&PropertySpec> {
        self.entries.iter().find(|e| e.spec.name == name).map(|e| &e.spec)
    }

    /// Number of properties.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn accessor(&self, name: &str) -> BusResult<&Accessor> {
        self.entries
            .iter()
            .find(|e| e.spec.name == name)
            .map(|e| &e.accessor)
            .ok_or_else(|| BusError::UnknownProperty(name.to_string()))
    }

    /// Read a property.
    pub async fn get(&self, name: &str, owner: &PropertyOwner) -> BusResult<Value> {
        match self.accessor(name)? {
            Accessor::Plain(prop) => prop.get(owner.bus()).await,
            Accessor::Channel(prop) => prop.get(owner).await,
        }
    }

    /// Write a property.
    pub async fn set(&self, name: &str, owner: &PropertyOwner, value: Value) -> BusResult<()> {
        match self.accessor(name)? {
            Accessor::Plain(prop) => prop.set(owner.bus(), value).await,
            Accessor::Channel(prop) => prop.set(owner, value).await,
        }
    }
}

fn build(spec: &PropertySpec) -> Accessor {
    let constraints = spec.constraints();
    if spec.channel {
        let mut prop = ChannelQueriedProperty::<PropertyOwner>::new(&spec.name).with_scalar_type(spec.scalar_type);
        if let Some(get) = &spec.get {
            prop = prop.with_get(get);
        }
        if let Some(set) = &spec.set {
            prop = prop.with_set(set);
        }
        if let Some(doc) = &spec.doc {
            prop = prop.with_doc(doc);
        }
        if !constraints.is_empty() {
            prop = prop.with_validator(move |_: &PropertyOwner, value: &Value| {
                constraints.validate(value)
            });
        }
        Accessor::Channel(prop)
    } else {
        let mut prop = QueriedProperty::<MessageBus>::new(&spec.name).with_scalar_type(spec.scalar_type);
        if let Some(get) = &spec.get {
            prop = prop.with_get(get);
        }
        if let Some(set) = &spec.set {
            prop = prop.with_set(set);
        }
        if let Some(doc) = &spec.doc {
            prop = prop.with_doc(doc);
        }
        if !constraints.is_empty() {
            prop = prop.with_validator(move |_: &MessageBus, value: &Value| {
                constraints.validate(value)
            });
        }
        Accessor::Plain(prop)
    }
}
