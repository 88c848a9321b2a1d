//! # daq-msgbus
//!
//! Query/response protocol core for laboratory instruments on line-oriented buses (serial
//! ports, Ethernet-to-serial bridges, anything that can write a command and read a line).
//!
//! ## Crate Structure
//!
//! - **`transport`**: The [`Transport`](transport::Transport) contract plus stream, TCP, serial,
//!   mock and echo implementations.
//! - **`bus`**: [`MessageBus`](bus::MessageBus), the query engine. Flush, write, read one line or
//!   read until a termination line, all under one lock.
//! - **`template`**: Compiles printf-style reply templates (`"%d,%f"`) into a regex and an ordered
//!   list of parsers.
//! - **`format`**: Renders command templates in either `{0}` or `%d` style.
//! - **`value`**: [`Value`](value::Value) and [`Parsed`](value::Parsed), the typed results of a
//!   parsed reply.
//! - **`property`**: Device-backed properties, optionally addressed through a channel.
//! - **`property_table`**: Properties declared in configuration.
//! - **`registry`**: Weak, process-wide registry of live instruments.
//! - **`config`**: Figment-based configuration (TOML + `DAQ_MSGBUS_` environment).
//! - **`logging`**: `tracing-subscriber` setup.
//! - **`error`**: [`BusError`](error::BusError) and [`TransportError`](error::TransportError).

pub mod bus;
pub mod config;
pub mod error;
pub mod format;
pub mod logging;
pub mod property;
pub mod property_table;
pub mod registry;
pub mod template;
pub mod transport;
pub mod value;

pub use bus::{BusInstrument, MessageBus, ParseOptions, QueryOptions};
pub use error::{BusError, BusResult, ParseError, TransportError};
pub use property::{BoundProperty, Channel, ChannelQueriedProperty, QueriedProperty, ScalarType};
pub use template::{CompiledTemplate, Parser, ParserOverride, RegexFlags};
pub use value::{Parsed, Value};
