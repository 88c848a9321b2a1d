//! Device-backed properties.
//!
//! A [`QueriedProperty`] is defined once per instrument type and shared by every instance. It
//! holds only templates and hooks; reading issues a query on the instance, writing formats a
//! command and sends it. No state is kept between accesses.
//!
//! [`ChannelQueriedProperty`] does the same for sub-devices (one channel of a multi-channel
//! controller): the owner supplies a channel identifier and the parent bus, and the channel
//! is substituted into the command before it is sent through the parent.
//!
//! ```rust
//! use daq_msgbus::bus::MessageBus;
//! use daq_msgbus::property::{BoundProperty, QueriedProperty, ScalarType};
//! use daq_msgbus::transport::MockTransport;
//!
//! # #[tokio::main]
//! # async fn main() -> daq_msgbus::error::BusResult<()> {
//! let speed = QueriedProperty::<MessageBus>::new("speed")
//!     .with_get("SMS")
//!     .with_set("SMS %d")
//!     .with_scalar_type(ScalarType::Int)
//!     .with_validator(|_, value| match value.as_i64() {
//!         Some(v) if (1..=100).contains(&v) => Ok(()),
//!         _ => Err("speed must be 1-100".to_string()),
//!     });
//!
//! let mock = MockTransport::new();
//! mock.on_command("SMS", ["50\n"]);
//! let stage = MessageBus::new(mock.clone());
//!
//! assert_eq!(speed.get(&stage).await?.as_i64(), Some(50));
//! speed.set(&stage, 75.into()).await?;
//! assert!(speed.set(&stage, 500.into()).await.is_err());
//! assert_eq!(mock.written(), vec!["SMS", "SMS 75"]);
//! # Ok(())
//! # }
//! ```

use crate::bus::BusInstrument;
use crate::error::{BusError, BusResult};
use crate::format::format_command;
use crate::value::Value;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Declared type of a property's reply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarType {
    /// Decimal or exponent notation, parsed with `%f`
    #[default]
    Float,
    /// Signed decimal integer, parsed with `%d`
    Int,
    /// Raw reply text
    String,
}

/// Checks a value before it is written. `Err` carries the rejection reason.
pub type Validator<I> = Arc<dyn Fn(&I, &Value) -> Result<(), String> + Send + Sync>;

/// Runs when a property is deleted.
pub type Deleter<I> = Arc<dyn Fn(&I) -> BusResult<()> + Send + Sync>;

/// Read/write/delete accessors bound to an owner type.
#[async_trait]
pub trait BoundProperty<I: ?Sized + Sync>: Send + Sync {
    /// Property name used in error messages.
    fn name(&self) -> &str;

    /// Human-readable description, if one was given.
    fn doc(&self) -> Option<&str>;

    /// Query the device.
    async fn get(&self, owner: &I) -> BusResult<Value>;

    /// Validate, format and send a value. No reply is read.
    async fn set(&self, owner: &I, value: Value) -> BusResult<()>;

    /// Run the deleter, or fail with [`BusError::NotDeletable`].
    fn delete(&self, owner: &I) -> BusResult<()>;
}

/// Owner of a [`ChannelQueriedProperty`].
pub trait Channel: Send + Sync {
    /// Instrument the channel belongs to.
    type Parent: BusInstrument + ?Sized;

    /// Channel identifier substituted into commands.
    fn channel(&self) -> Option<Value>;

    /// Object that talks to the bus.
    fn parent(&self) -> Option<&Self::Parent>;
}

/// Templates and type shared by both property kinds.
#[derive(Debug, Clone, Default)]
struct Commands {
    name: String,
    get_cmd: Option<String>,
    set_cmd: Option<String>,
    doc: Option<String>,
    scalar_type: ScalarType,
}

impl Commands {
    fn get_cmd(&self) -> BusResult<&str> {
        self.get_cmd
            .as_deref()
            .ok_or_else(|| BusError::NotReadable(self.name.clone()))
    }

    fn set_cmd(&self) -> BusResult<&str> {
        self.set_cmd
            .as_deref()
            .ok_or_else(|| BusError::NotWritable(self.name.clone()))
    }

    async fn read<B: BusInstrument + ?Sized>(&self, bus: &B, command: &str) -> BusResult<Value> {
        Ok(match self.scalar_type {
            ScalarType::Float => Value::Float(bus.float_query(command).await?),
            ScalarType::Int => Value::Int(bus.int_query(command).await?),
            ScalarType::String => Value::Text(bus.query(command).await?),
        })
    }

    fn rejected(&self, value: &Value, reason: String) -> BusError {
        BusError::Validation {
            property: self.name.clone(),
            value: value.to_string(),
            reason,
        }
    }
}

/// Property backed by a query (read) and a command (write).
pub struct QueriedProperty<I: ?Sized> {
    commands: Commands,
    validator: Option<Validator<I>>,
    deleter: Option<Deleter<I>>,
}

impl<I: ?Sized> Clone for QueriedProperty<I> {
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
            validator: self.validator.clone(),
            deleter: self.deleter.clone(),
        }
    }
}

impl<I: ?Sized> fmt::Debug for QueriedProperty<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueriedProperty")
            .field("name", &self.commands.name)
            .field("get_cmd", &self.commands.get_cmd)
            .field("set_cmd", &self.commands.set_cmd)
            .field("scalar_type", &self.commands.scalar_type)
            .field("has_validator", &self.validator.is_some())
            .finish()
    }
}

impl<I: ?Sized> QueriedProperty<I> {
    /// Neither readable nor writable until a command is added.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            commands: Commands {
                name: name.into(),
                ..Commands::default()
            },
            validator: None,
            deleter: None,
        }
    }

    /// Command sent to read the value.
    pub fn with_get(mut self, command: impl Into<String>) -> Self {
        self.commands.get_cmd = Some(command.into());
        self
    }

    /// Command template (`{0}` or `%`-style) used to write the value.
    pub fn with_set(mut self, template: impl Into<String>) -> Self {
        self.commands.set_cmd = Some(template.into());
        self
    }

    /// Attach a description.
    pub fn with_doc(mut self, doc: impl Into<String>) -> Self {
        self.commands.doc = Some(doc.into());
        self
    }

    /// Type used to parse replies.
    pub fn with_scalar_type(mut self, scalar_type: ScalarType) -> Self {
        self.commands.scalar_type = scalar_type;
        self
    }

    /// Check values before they are written.
    pub fn with_validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&I, &Value) -> Result<(), String> + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }

    /// Make the property deletable.
    pub fn with_deleter<F>(mut self, deleter: F) -> Self
    where
        F: Fn(&I) -> BusResult<()> + Send + Sync + 'static,
    {
        self.deleter = Some(Arc::new(deleter));
        self
    }

    /// Type used to parse replies.
    pub fn scalar_type(&self) -> ScalarType {
        self.commands.scalar_type
    }

    /// Whether a get command is set.
    pub fn is_readable(&self) -> bool {
        self.commands.get_cmd.is_some()
    }

    /// Whether a set command is set.
    pub fn is_writable(&self) -> bool {
        self.commands.set_cmd.is_some()
    }
}

#[async_trait]
impl<I> BoundProperty<I> for QueriedProperty<I>
where
    I: BusInstrument + ?Sized,
{
    fn name(&self) -> &str {
        &self.commands.name
    }

    fn doc(&self) -> Option<&str> {
        self.commands.doc.as_deref()
    }

    async fn get(&self, owner: &I) -> BusResult<Value> {
        let command = self.commands.get_cmd()?;
        self.commands.read(owner, command).await
    }

    async fn set(&self, owner: &I, value: Value) -> BusResult<()> {
        let template = self.commands.set_cmd()?;
        if let Some(validator) = &self.validator {
            validator(owner, &value).map_err(|reason| self.commands.rejected(&value, reason))?;
        }
        let command = format_command(template, std::slice::from_ref(&value))?;
        owner.write(&command).await
    }

    fn delete(&self, owner: &I) -> BusResult<()> {
        match &self.deleter {
            Some(deleter) => deleter(owner),
            None => Err(BusError::NotDeletable(self.commands.name.clone())),
        }
    }
}

/// Property of one channel, sent through the owner's parent.
///
/// The get command receives the channel as its only argument; the set command receives the
/// channel followed by the value.
pub struct ChannelQueriedProperty<C: ?Sized> {
    commands: Commands,
    validator: Option<Validator<C>>,
    deleter: Option<Deleter<C>>,
}

impl<C: ?Sized> Clone for ChannelQueriedProperty<C> {
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
            validator: self.validator.clone(),
            deleter: self.deleter.clone(),
        }
    }
}

impl<C: ?Sized> fmt::Debug for ChannelQueriedProperty<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelQueriedProperty")
            .field("name", &self.commands.name)
            .field("get_cmd", &self.commands.get_cmd)
            .field("set_cmd", &self.commands.set_cmd)
            .field("scalar_type", &self.commands.scalar_type)
            .field("has_validator", &self.validator.is_some())
            .finish()
    }
}

impl<C: ?Sized> ChannelQueriedProperty<C> {
    /// Property with no commands yet.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            commands: Commands {
                name: name.into(),
                ..Commands::default()
            },
            validator: None,
            deleter: None,
        }
    }

    /// Command template taking the channel, e.g. `"G{0}?"`.
    pub fn with_get(mut self, template: impl Into<String>) -> Self {
        self.commands.get_cmd = Some(template.into());
        self
    }

    /// Command template taking the channel then the value, e.g. `"S{0} {1}"`.
    pub fn with_set(mut self, template: impl Into<String>) -> Self {
        self.commands.set_cmd = Some(template.into());
        self
    }

    /// Attach a description.
    pub fn with_doc(mut self, doc: impl Into<String>) -> Self {
        self.commands.doc = Some(doc.into());
        self
    }

    /// Type used to parse replies.
    pub fn with_scalar_type(mut self, scalar_type: ScalarType) -> Self {
        self.commands.scalar_type = scalar_type;
        self
    }

    /// Check values before they are written.
    pub fn with_validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&C, &Value) -> Result<(), String> + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }

    /// Make the property deletable.
    pub fn with_deleter<F>(mut self, deleter: F) -> Self
    where
        F: Fn(&C) -> BusResult<()> + Send + Sync + 'static,
    {
        self.deleter = Some(Arc::new(deleter));
        self
    }

    /// Type used to parse replies.
    pub fn scalar_type(&self) -> ScalarType {
        self.commands.scalar_type
    }
}

impl<C: Channel + ?Sized> ChannelQueriedProperty<C> {
    fn resolve<'a>(&self, owner: &'a C) -> BusResult<(Value, &'a C::Parent)> {
        let channel = owner.channel().ok_or_else(|| {
            BusError::Precondition(format!(
                "property '{}' needs an owner with a channel",
                self.commands.name
            ))
        })?;
        let parent = owner.parent().ok_or_else(|| {
            BusError::Precondition(format!(
                "property '{}' needs an owner with a parent",
                self.commands.name
            ))
        })?;
        Ok((channel, parent))
    }
}

#[async_trait]
impl<C> BoundProperty<C> for ChannelQueriedProperty<C>
where
    C: Channel + ?Sized,
{
    fn name(&self) -> &str {
        &self.commands.name
    }

    fn doc(&self) -> Option<&str> {
        self.commands.doc.as_deref()
    }

    async fn get(&self, owner: &C) -> BusResult<Value> {
        let template = self.commands.get_cmd()?;
        let (channel, parent) = self.resolve(owner)?;
        let command = format_command(template, &[channel])?;
        self.commands.read(parent, &command).await
    }

    async fn set(&self, owner: &C, value: Value) -> BusResult<()> {
        let template = self.commands.set_cmd()?;
        let (channel, parent) = self.resolve(owner)?;
        if let Some(validator) = &self.validator {
            validator(owner, &value).map_err(|reason| self.commands.rejected(&value, reason))?;
        }
        let command = format_command(template, &[channel, value])?;
        parent.write(&command).await
    }

    fn delete(&self, owner: &C) -> BusResult<()> {
        match &self.deleter {
            Some(deleter) => deleter(owner),
            None => Err(BusError::NotDeletable(self.commands.name.clone())),
        }
    }
}
