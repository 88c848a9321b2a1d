//! Error types for the message-bus protocol core.
//!
//! Every failure surfaced by this crate is a [`BusError`]. Using the `thiserror` crate, it
//! provides one consistent error type for the whole query path, from a dropped serial link
//! up to a reply that did not fit its template.
//!
//! ## Error Hierarchy
//!
//! - **`Transport`**: Wraps [`TransportError`], an I/O failure at the write/read boundary.
//!   These are never retried or swallowed by the bus.
//! - **`Template`**: A malformed template, e.g. both brace and `%` substitution styles in one
//!   command, or a parser list whose length disagrees with the number of capture groups.
//! - **`Parse`**: The reply did not match the compiled pattern, or a captured group could not
//!   be converted. Carries the command, raw reply, template and generated regex.
//! - **`NotReadable` / `NotWritable` / `NotDeletable`**: A bound property was accessed in a way
//!   it has no command for.
//! - **`Precondition`**: A channel property was used on an owner that has no channel or no
//!   parent, or a multiline read had no termination line.
//! - **`Validation`**: A property validator rejected a value before anything was written.
//! - **`Config`**: Wraps errors from `figment` while loading configuration files.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the bus error type.
pub type BusResult<T> = std::result::Result<T, BusError>;

/// I/O failure at the transport boundary.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Underlying stream failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No complete line before the deadline
    #[error("Timed out after {0:?} waiting for a line")]
    Timeout(Duration),

    /// Transport was closed locally
    #[error("Transport is closed")]
    Closed,

    /// Peer went away
    #[error("Transport disconnected: {0}")]
    Disconnected(String),

    /// Port or socket could not be opened
    #[error("Failed to open {resource}: {reason}")]
    Open {
        /// Port path or address
        resource: String,
        /// Why opening failed
        reason: String,
    },

    /// Reply bytes were not UTF-8
    #[error("Received non UTF-8 data: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
}

/// A captured group that one of the parsers could not convert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionFailure {
    /// Text of the offending capture group.
    pub group: String,
    /// Name of the parser that rejected it.
    pub parser: String,
    /// Underlying reason reported by the parser.
    pub reason: String,
}

/// A reply that could not be decoded with its template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    /// Command that produced the reply.
    pub command: String,
    /// Raw reply as read from the transport.
    pub reply: String,
    /// Template the reply was matched against.
    pub template: String,
    /// Regex generated from the template.
    pub pattern: String,
    /// Set when the pattern matched but a group failed to convert.
    pub conversion: Option<ConversionFailure>,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.conversion {
            None => write!(
                f,
                "response to '{}' ('{}') wasn't matched by /{}/ (generated regex /{}/)",
                self.command, self.reply, self.template, self.pattern
            ),
            Some(failure) => write!(
                f,
                "response to '{}' ('{}') couldn't be parsed: group '{}' rejected by {} parser ({}); template /{}/, generated regex /{}/",
                self.command,
                self.reply,
                failure.group,
                failure.parser,
                failure.reason,
                self.template,
                self.pattern
            ),
        }
    }
}

impl std::error::Error for ParseError {}

/// Errors surfaced by bus queries, properties and configuration.
#[derive(Error, Debug)]
pub enum BusError {
    /// Transport failure during a transaction
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Reply or command template could not be used
    #[error("Template error: {0}")]
    Template(String),

    /// Reply did not match its template
    #[error("Parse error: {0}")]
    Parse(Box<ParseError>),

    /// Property has no get command
    #[error("Property '{0}' is not readable")]
    NotReadable(String),

    /// Property has no set command
    #[error("Property '{0}' is not writable")]
    NotWritable(String),

    /// Property has no deleter
    #[error("Property '{0}' is not deletable")]
    NotDeletable(String),

    /// Missing channel, parent or termination line
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// Validator rejected a value before it was written
    #[error("Invalid value {value} for property '{property}': {reason}")]
    Validation {
        /// Property name
        property: String,
        /// Rejected value, as text
        value: String,
        /// Validator's message
        reason: String,
    },

    /// No property with this name in the table
    #[error("Unknown property '{0}'")]
    UnknownProperty(String),

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration loaded but is inconsistent
    #[error("Configuration validation error: {0}")]
    Configuration(String),
}

impl From<ParseError> for BusError {
    fn from(value: ParseError) -> Self {
        BusError::Parse(Box::new(value))
    }
}

impl From<figment::Error> for BusError {
    fn from(value: figment::Error) -> Self {
        BusError::Config(Box::new(value))
    }
}

impl From<std::io::Error> for BusError {
    fn from(value: std::io::Error) -> Self {
        BusError::Transport(TransportError::Io(value))
    }
}

impl BusError {
    /// The parse failure details, if this is a parse error.
    pub fn as_parse_error(&self) -> Option<&ParseError> {
        match self {
            BusError::Parse(err) => Some(err),
            _ => None,
        }
    }

    /// Whether the failure happened at the transport boundary.
    pub fn is_transport(&self) -> bool {
        matches!(self, BusError::Transport(_))
    }
}
