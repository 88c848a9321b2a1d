//! Line transport over any async byte stream.
//!
//! [`StreamTransport`] wraps anything implementing `AsyncRead + AsyncWrite + Unpin + Send`:
//! - `tokio_serial::SerialStream` (real hardware)
//! - `tokio::net::TcpStream` (Ethernet-to-serial bridges, LXI instruments)
//! - `tokio::io::DuplexStream` (testing)
//!
//! Reads go through a `BufReader` so that a line can be accumulated until the
//! termination character arrives.

use super::Transport;
use crate::error::TransportError;
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::net::TcpStream;
use tracing::debug;

/// Line framing shared by all stream transports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineSettings {
    /// Appended to every write and expected at the end of every read line.
    pub termination_character: String,
    /// Marker that ends a multi-line reply.
    pub termination_line: Option<String>,
    /// How long `flush_input_buffer` keeps discarding bytes once the buffer is empty.
    pub drain_window: Duration,
}

impl Default for LineSettings {
    fn default() -> Self {
        Self {
            termination_character: "\n".to_string(),
            termination_line: None,
            drain_window: Duration::from_millis(10),
        }
    }
}

impl LineSettings {
    /// Set the message terminator (e.g. `"\r"`, `"\r\n"`).
    pub fn with_termination_character(mut self, terminator: impl Into<String>) -> Self {
        self.termination_character = terminator.into();
        self
    }

    /// Set the multi-line reply marker (e.g. `"END"`).
    pub fn with_termination_line(mut self, marker: impl Into<String>) -> Self {
        self.termination_line = Some(marker.into());
        self
    }

    /// Set the flush drain window.
    pub fn with_drain_window(mut self, window: Duration) -> Self {
        self.drain_window = window;
        self
    }
}

/// Line-oriented transport over a byte stream.
pub struct StreamTransport<S> {
    stream: BufReader<S>,
    settings: LineSettings,
    label: String,
}

impl<S> StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap `stream` with the given framing.
    pub fn new(stream: S, settings: LineSettings) -> Self {
        Self {
            stream: BufReader::new(stream),
            settings,
            label: "stream".to_string(),
        }
    }

    /// Name used in logs (e.g. the port path).
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Framing in use.
    pub fn settings(&self) -> &LineSettings {
        &self.settings
    }

    /// Give back the underlying stream. Buffered, unread input is lost.
    pub fn into_inner(self) -> S {
        self.stream.into_inner()
    }

    /// Last byte of the terminator; newline if the terminator is empty.
    fn delimiter(&self) -> u8 {
        self.settings
            .termination_character
            .as_bytes()
            .last()
            .copied()
            .unwrap_or(b'\n')
    }

    async fn read_terminated(&mut self) -> Result<String, TransportError> {
        let delimiter = self.delimiter();
        let terminator = self.settings.termination_character.as_bytes().to_vec();
        let mut line = Vec::new();
        loop {
            let n = self.stream.read_until(delimiter, &mut line).await?;
            if n == 0 || terminator.is_empty() || line.ends_with(&terminator) {
                break;
            }
        }
        Ok(String::from_utf8(line)?)
    }
}

#[async_trait]
impl<S> Transport for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn write(&mut self, command: &str) -> Result<(), TransportError> {
        let framed = format!("{command}{}", self.settings.termination_character);
        let port = self.stream.get_mut();
        port.write_all(framed.as_bytes()).await?;
        port.flush().await?;
        Ok(())
    }

    async fn readline(&mut self, timeout: Option<Duration>) -> Result<String, TransportError> {
        match timeout {
            // A line cut off by the deadline is dropped, not carried into the next read.
            Some(limit) => tokio::time::timeout(limit, self.read_terminated())
                .await
                .map_err(|_| TransportError::Timeout(limit))?,
            None => self.read_terminated().await,
        }
    }

    async fn flush_input_buffer(&mut self) -> Result<(), TransportError> {
        let buffered = self.stream.buffer().len();
        self.stream.consume(buffered);

        let mut discard = [0u8; 256];
        let mut total = buffered;
        let window = self.settings.drain_window;
        if !window.is_zero() {
            let deadline = tokio::time::Instant::now() + window;
            loop {
                let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
                if remaining.is_zero() {
                    break;
                }
                match tokio::time::timeout(remaining, self.stream.get_mut().read(&mut discard))
                    .await
                {
                    Ok(Ok(0)) => break,
                    Ok(Ok(n)) => total += n,
                    Ok(Err(e)) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                    Ok(Err(e)) => return Err(e.into()),
                    Err(_) => break,
                }
            }
        }
        if total > 0 {
            debug!(transport = %self.label, discarded = total, "Discarded stale input");
        }
        Ok(())
    }

    fn termination_character(&self) -> &str {
        &self.settings.termination_character
    }

    fn termination_line(&self) -> Option<&str> {
        self.settings.termination_line.as_deref()
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}

/// Open a TCP connection (e.g. to a serial-over-Ethernet bridge).
pub async fn connect_tcp(
    address: &str,
    settings: LineSettings,
) -> Result<StreamTransport<TcpStream>, TransportError> {
    let stream = TcpStream::connect(address)
        .await
        .map_err(|e| TransportError::Open {
            resource: address.to_string(),
            reason: e.to_string(),
        })?;
    stream.set_nodelay(true)?;
    debug!(address, "TCP transport connected");
    Ok(StreamTransport::new(stream, settings).with_label(format!("tcp://{address}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_appends_terminator() {
        let (device, mut host) = tokio::io::duplex(64);
        let mut transport = StreamTransport::new(
            device,
            LineSettings::default().with_termination_character("\r"),
        );
        transport.write("*IDN?").await.unwrap();

        let mut buf = [0u8; 6];
        host.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"*IDN?\r");
    }

    #[tokio::test]
    async fn readline_keeps_terminator() {
        let (device, mut host) = tokio::io::duplex(64);
        let mut transport = StreamTransport::new(device, LineSettings::default());
        host.write_all(b"first\nsecond\n").await.unwrap();

        assert_eq!(transport.readline(None).await.unwrap(), "first\n");
        assert_eq!(transport.readline(None).await.unwrap(), "second\n");
    }

    #[tokio::test]
    async fn multi_byte_terminator() {
        let (device, mut host) = tokio::io::duplex(64);
        let mut transport = StreamTransport::new(
            device,
            LineSettings::default().with_termination_character("\r\n"),
        );
        host.write_all(b"a\nb\r\n").await.unwrap();

        assert_eq!(transport.readline(None).await.unwrap(), "a\nb\r\n");
    }

    #[tokio::test]
    async fn eof_returns_empty_line() {
        let (device, host) = tokio::io::duplex(64);
        let mut transport = StreamTransport::new(device, LineSettings::default());
        drop(host);

        assert_eq!(transport.readline(None).await.unwrap(), "");
    }

    #[tokio::test]
    async fn readline_times_out() {
        let (device, _host) = tokio::io::duplex(64);
        let mut transport = StreamTransport::new(device, LineSettings::default());

        let err = transport
            .readline(Some(Duration::from_millis(20)))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Timeout(_)));
    }

    #[tokio::test]
    async fn flush_discards_stale_input() {
        let (device, mut host) = tokio::io::duplex(64);
        let mut transport = StreamTransport::new(device, LineSettings::default());
        host.write_all(b"stale 1\nstale 2\n").await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        transport.flush_input_buffer().await.unwrap();
        host.write_all(b"fresh\n").await.unwrap();
        assert_eq!(transport.readline(None).await.unwrap(), "fresh\n");
    }

    #[tokio::test]
    async fn non_utf8_is_an_error() {
        let (device, mut host) = tokio::io::duplex(64);
        let mut transport = StreamTransport::new(device, LineSettings::default());
        host.write_all(&[0xff, 0xfe, b'\n']).await.unwrap();

        let err = transport.readline(None).await.unwrap_err();
        assert!(matches!(err, TransportError::InvalidUtf8(_)));
    }
}
