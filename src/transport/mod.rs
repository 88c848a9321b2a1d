//! Transport contract for line-oriented instrument buses.
//!
//! A [`Transport`] is the only thing the query engine talks to. It writes one command at a
//! time, reads one line at a time, and can optionally discard stale input. Concrete buses:
//!
//! - [`StreamTransport`]: any `AsyncRead + AsyncWrite` byte stream (TCP socket, serial port,
//!   in-memory duplex)
//! - [`serial::open_serial`]: a `tokio-serial` port wrapped in a `StreamTransport`
//!   (requires the `serial` feature)
//! - [`MockTransport`]: scripted replies for tests
//! - [`EchoTransport`]: replies with whatever was last written
//!
//! # Blocking
//!
//! `readline(None)` waits for a line with no deadline. On a silent device that is a hang.
//! Pass a timeout (or configure one on the bus) for any link that may go quiet.

use crate::config::TransportConfig;
use crate::error::TransportError;
use async_trait::async_trait;
use std::time::Duration;

pub mod mock;
#[cfg(feature = "serial")]
pub mod serial;
pub mod stream;

pub use mock::{EchoTransport, MockTransport};
pub use stream::{connect_tcp, LineSettings, StreamTransport};

/// Byte-stream bus beneath the query engine.
///
/// Implementations append their own line terminator on [`write`](Transport::write) and
/// return complete lines (terminator included) from [`readline`](Transport::readline).
/// An empty string from `readline` means the stream is exhausted.
#[async_trait]
pub trait Transport: Send {
    /// Send one command. The terminator is appended by the transport.
    async fn write(&mut self, command: &str) -> Result<(), TransportError>;

    /// Read one line, waiting at most `timeout` (forever if `None`).
    async fn readline(&mut self, timeout: Option<Duration>) -> Result<String, TransportError>;

    /// Discard anything waiting to be read. Best-effort; the default does nothing.
    async fn flush_input_buffer(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Character sequence ending every message to and from the device.
    fn termination_character(&self) -> &str {
        "\n"
    }

    /// Marker ending a multi-line reply, if the device uses one.
    fn termination_line(&self) -> Option<&str> {
        None
    }

    /// Human-readable description for logs.
    fn describe(&self) -> String {
        "transport".to_string()
    }
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Box<T> {
    async fn write(&mut self, command: &str) -> Result<(), TransportError> {
        (**self).write(command).await
    }

    async fn readline(&mut self, timeout: Option<Duration>) -> Result<String, TransportError> {
        (**self).readline(timeout).await
    }

    async fn flush_input_buffer(&mut self) -> Result<(), TransportError> {
        (**self).flush_input_buffer().await
    }

    fn termination_character(&self) -> &str {
        (**self).termination_character()
    }

    fn termination_line(&self) -> Option<&str> {
        (**self).termination_line()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Type-erased transport, as owned by a [`MessageBus`](crate::bus::MessageBus).
pub type DynTransport = Box<dyn Transport>;

/// Open the transport described by a configuration section.
pub async fn open(
    config: &TransportConfig,
    line: LineSettings,
) -> Result<DynTransport, TransportError> {
    match config {
        TransportConfig::Tcp { address } => Ok(Box::new(connect_tcp(address, line).await?)),
        #[cfg(feature = "serial")]
        TransportConfig::Serial(settings) => {
            Ok(Box::new(serial::open_serial(settings, line).await?))
        }
        #[cfg(not(feature = "serial"))]
        TransportConfig::Serial(settings) => Err(TransportError::Open {
            resource: settings.port.clone(),
            reason: "built without the `serial` feature".to_string(),
        }),
    }
}
