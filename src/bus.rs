//! Query engine: one instrument, one transport, one transaction at a time.
//!
//! A [`MessageBus`] owns its [`Transport`] behind an async mutex. Every query holds that lock
//! for the whole flush, write, read sequence, so replies can never be interleaved between
//! concurrent callers.
//!
//! ```rust
//! use daq_msgbus::bus::{BusInstrument, MessageBus};
//! use daq_msgbus::transport::MockTransport;
//!
//! # #[tokio::main]
//! # async fn main() -> daq_msgbus::error::BusResult<()> {
//! let mock = MockTransport::new();
//! mock.on_command("P", ["1.5,2.5,-3\n"]);
//! let bus = MessageBus::new(mock);
//!
//! let position = bus.parsed_query("P", "%f,%f,%f").await?;
//! assert_eq!(position.into_vec_f64(), Some(vec![1.5, 2.5, -3.0]));
//! # Ok(())
//! # }
//! ```

use crate::config::BusConfig;
use crate::error::{BusError, BusResult};
use crate::template::{CompiledTemplate, ParserOverride, RegexFlags};
use crate::transport::{self, DynTransport, Transport};
use crate::value::Parsed;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

/// Per-call read options for [`BusInstrument::query_with`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryOptions {
    /// Read until the termination line instead of a single line.
    pub multiline: bool,
    /// Termination line for this call. Setting it implies `multiline`.
    pub termination_line: Option<String>,
    /// Read timeout for this call; falls back to the bus default.
    pub timeout: Option<Duration>,
}

impl QueryOptions {
    /// Read until the bus or transport termination line.
    pub fn multiline() -> Self {
        Self {
            multiline: true,
            ..Self::default()
        }
    }

    /// Read lines until one contains `marker`.
    pub fn until(marker: impl Into<String>) -> Self {
        Self {
            termination_line: Some(marker.into()),
            ..Self::default()
        }
    }

    /// Override the read timeout for this call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn reads_multiline(&self) -> bool {
        self.multiline || self.termination_line.is_some()
    }
}

/// Options for [`BusInstrument::parsed_query_with`].
#[derive(Debug, Clone, Default)]
pub struct ParseOptions {
    /// Flags applied to the compiled reply regex.
    pub flags: RegexFlags,
    /// Replaces the parsers detected from the template.
    pub parser: Option<ParserOverride>,
    /// How the reply is read.
    pub query: QueryOptions,
}

impl ParseOptions {
    /// Set regex flags.
    pub fn with_flags(mut self, flags: RegexFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Replace the detected parsers.
    pub fn with_parser(mut self, parser: impl Into<ParserOverride>) -> Self {
        self.parser = Some(parser.into());
        self
    }

    /// Set read options.
    pub fn with_query(mut self, query: QueryOptions) -> Self {
        self.query = query;
        self
    }
}

/// Anything that can run request/response transactions on a message bus.
///
/// Implementors supply raw `query_with` and `write`; typed parsing comes for free.
#[async_trait]
pub trait BusInstrument: Send + Sync {
    /// Send `command` and return the raw reply.
    async fn query_with(&self, command: &str, options: QueryOptions) -> BusResult<String>;

    /// Send `command` without reading a reply.
    async fn write(&self, command: &str) -> BusResult<()>;

    /// Single-line query with default options.
    async fn query(&self, command: &str) -> BusResult<String> {
        self.query_with(command, QueryOptions::default()).await
    }

    /// Query and decode the reply with a printf-style template.
    async fn parsed_query(&self, command: &str, template: &str) -> BusResult<Parsed> {
        self.parsed_query_with(command, template, ParseOptions::default())
            .await
    }

    /// Query and decode with explicit regex flags, parser override and read options.
    async fn parsed_query_with(
        &self,
        command: &str,
        template: &str,
        options: ParseOptions,
    ) -> BusResult<Parsed> {
        let compiled = CompiledTemplate::compile_with(template, options.flags, options.parser)?;
        let reply = self.query_with(command, options.query).await?;
        Ok(compiled.parse(command, &reply)?)
    }

    /// First signed decimal integer in the reply.
    async fn int_query(&self, command: &str) -> BusResult<i64> {
        self.int_query_with(command, ParseOptions::default()).await
    }

    /// [`int_query`](Self::int_query) with flags and read options.
    async fn int_query_with(&self, command: &str, options: ParseOptions) -> BusResult<i64> {
        let parsed = self.parsed_query_with(command, "%d", options).await?;
        parsed
            .as_i64()
            .ok_or_else(|| BusError::Template(format!("'%d' did not yield an integer: {parsed:?}")))
    }

    /// First floating point number in the reply.
    async fn float_query(&self, command: &str) -> BusResult<f64> {
        self.float_query_with(command, ParseOptions::default()).await
    }

    /// [`float_query`](Self::float_query) with flags and read options.
    async fn float_query_with(&self, command: &str, options: ParseOptions) -> BusResult<f64> {
        let parsed = self.parsed_query_with(command, "%f", options).await?;
        parsed
            .as_f64()
            .ok_or_else(|| BusError::Template(format!("'%f' did not yield a number: {parsed:?}")))
    }
}

/// Instrument endpoint on a line-oriented bus.
pub struct MessageBus {
    transport: Mutex<DynTransport>,
    label: String,
    termination_character: String,
    termination_line: Option<String>,
    timeout: Option<Duration>,
    write_read_delay: Duration,
    flush_on_query: bool,
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBus")
            .field("label", &self.label)
            .field("termination_character", &self.termination_character)
            .field("termination_line", &self.termination_line)
            .field("timeout", &self.timeout)
            .field("write_read_delay", &self.write_read_delay)
            .field("flush_on_query", &self.flush_on_query)
            .finish()
    }
}

impl MessageBus {
    /// Wrap a transport. Terminators are taken from the transport; no timeout, flush on query.
    pub fn new<T: Transport + 'static>(transport: T) -> Self {
        Self::from_boxed(Box::new(transport))
    }

    /// Wrap an already boxed transport.
    pub fn from_boxed(transport: DynTransport) -> Self {
        Self {
            label: transport.describe(),
            termination_character: transport.termination_character().to_string(),
            termination_line: transport.termination_line().map(str::to_string),
            transport: Mutex::new(transport),
            timeout: None,
            write_read_delay: Duration::ZERO,
            flush_on_query: true,
        }
    }

    /// Open the configured transport and apply the `[bus]` section.
    pub async fn from_config(config: &BusConfig) -> BusResult<Self> {
        let transport_config = config.transport.as_ref().ok_or_else(|| {
            BusError::Configuration("no [transport] section configured".to_string())
        })?;
        let transport = transport::open(transport_config, config.bus.line_settings()).await?;
        Ok(Self::from_boxed(transport).with_settings(&config.bus))
    }

    /// Apply timeout, delay, flush and termination line from a `[bus]` section.
    pub fn with_settings(mut self, settings: &crate::config::BusSettings) -> Self {
        self.timeout = settings.timeout();
        self.write_read_delay = settings.write_read_delay();
        self.flush_on_query = settings.flush_on_query;
        if settings.termination_line.is_some() {
            self.termination_line = settings.termination_line.clone();
        }
        self
    }

    /// Default termination line for multiline reads.
    pub fn with_termination_line(mut self, marker: impl Into<String>) -> Self {
        self.termination_line = Some(marker.into());
        self
    }

    /// Default read timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Pause between writing a query and reading its reply.
    pub fn with_write_read_delay(mut self, delay: Duration) -> Self {
        self.write_read_delay = delay;
        self
    }

    /// Whether queries discard stale input first.
    pub fn with_flush_on_query(mut self, flush: bool) -> Self {
        self.flush_on_query = flush;
        self
    }

    /// Transport description used in logs.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Default multi-line end marker.
    pub fn termination_line(&self) -> Option<&str> {
        self.termination_line.as_deref()
    }

    /// Default read timeout.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Read one raw line (terminator included) outside of a query.
    pub async fn readline(&self, timeout: Option<Duration>) -> BusResult<String> {
        let mut transport = self.transport.lock().await;
        let line = transport.readline(timeout.or(self.timeout)).await?;
        debug!(bus = %self.label, line = %line.escape_debug(), "Read line");
        Ok(line)
    }

    /// Read lines until one contains `marker` (or the bus default) or the stream is exhausted.
    pub async fn read_multiline(
        &self,
        marker: Option<&str>,
        timeout: Option<Duration>,
    ) -> BusResult<String> {
        let marker = self.resolve_marker(marker)?;
        let mut transport = self.transport.lock().await;
        self.read_until(&mut transport, &marker, timeout.or(self.timeout))
            .await
    }

    fn resolve_marker(&self, marker: Option<&str>) -> BusResult<String> {
        marker
            .or(self.termination_line.as_deref())
            .map(str::to_string)
            .ok_or_else(|| {
                BusError::Precondition(format!(
                    "multiline read on {} needs a termination line",
                    self.label
                ))
            })
    }

    async fn read_until(
        &self,
        transport: &mut DynTransport,
        marker: &str,
        timeout: Option<Duration>,
    ) -> BusResult<String> {
        let mut reply = String::new();
        loop {
            let line = transport.readline(timeout).await?;
            if line.is_empty() {
                trace!(bus = %self.label, "Stream exhausted before termination line");
                break;
            }
            trace!(bus = %self.label, line = %line.escape_debug(), "Accumulated line");
            reply.push_str(&line);
            if line.contains(marker) {
                break;
            }
        }
        Ok(reply)
    }

    /// Drop one trailing terminator, plus a `\r` before a `\n` terminator.
    fn strip_terminator<'a>(&self, line: &'a str) -> &'a str {
        match line.strip_suffix(self.termination_character.as_str()) {
            Some(body) if self.termination_character == "\n" => {
                body.strip_suffix('\r').unwrap_or(body)
            }
            Some(body) => body,
            None => line,
        }
    }
}

#[async_trait]
impl BusInstrument for MessageBus {
    async fn query_with(&self, command: &str, options: QueryOptions) -> BusResult<String> {
        let marker = if options.reads_multiline() {
            Some(self.resolve_marker(options.termination_line.as_deref())?)
        } else {
            None
        };
        let timeout = options.timeout.or(self.timeout);

        let mut transport = self.transport.lock().await;
        if self.flush_on_query {
            if let Err(e) = transport.flush_input_buffer().await {
                warn!(bus = %self.label, error = %e, "Failed to flush input buffer");
            }
        }
        transport.write(command).await?;
        if !self.write_read_delay.is_zero() {
            tokio::time::sleep(self.write_read_delay).await;
        }

        let reply = match marker {
            Some(marker) => self.read_until(&mut transport, &marker, timeout).await?,
            None => {
                let line = transport.readline(timeout).await?;
                self.strip_terminator(&line).to_string()
            }
        };
        debug!(bus = %self.label, command, reply = %reply.escape_debug(), "Query complete");
        Ok(reply)
    }

    async fn write(&self, command: &str) -> BusResult<()> {
        let mut transport = self.transport.lock().await;
        transport.write(command).await?;
        debug!(bus = %self.label, command, "Wrote command");
        Ok(())
    }
}
