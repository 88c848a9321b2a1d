//! Serial ports via `tokio-serial`.

use super::{LineSettings, StreamTransport};
use crate::config::{FlowControl, Parity, SerialSettings};
use crate::error::TransportError;
use tokio::task::spawn_blocking;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::debug;

/// Open a serial port and wrap it in a line transport.
///
/// Opening runs in `spawn_blocking` so port initialization does not stall the runtime.
pub async fn open_serial(
    serial: &SerialSettings,
    line: LineSettings,
) -> Result<StreamTransport<SerialStream>, TransportError> {
    let data_bits = data_bits(serial.data_bits)?;
    let stop_bits = stop_bits(serial.stop_bits)?;
    let parity = match serial.parity {
        Parity::None => tokio_serial::Parity::None,
        Parity::Odd => tokio_serial::Parity::Odd,
        Parity::Even => tokio_serial::Parity::Even,
    };
    let flow_control = match serial.flow_control {
        FlowControl::None => tokio_serial::FlowControl::None,
        FlowControl::Software => tokio_serial::FlowControl::Software,
        FlowControl::Hardware => tokio_serial::FlowControl::Hardware,
    };

    let path = serial.port.clone();
    let baud_rate = serial.baud_rate;
    let port = spawn_blocking(move || {
        tokio_serial::new(&path, baud_rate)
            .data_bits(data_bits)
            .parity(parity)
            .stop_bits(stop_bits)
            .flow_control(flow_control)
            .open_native_async()
    })
    .await
    .map_err(|e| TransportError::Open {
        resource: serial.port.clone(),
        reason: format!("spawn_blocking for serial port opening failed: {e}"),
    })?
    .map_err(|e| TransportError::Open {
        resource: serial.port.clone(),
        reason: e.to_string(),
    })?;

    debug!(port = %serial.port, baud_rate, "Serial transport opened");
    Ok(StreamTransport::new(port, line).with_label(serial.port.clone()))
}

fn data_bits(bits: u8) -> Result<tokio_serial::DataBits, TransportError> {
    match bits {
        5 => Ok(tokio_serial::DataBits::Five),
        6 => Ok(tokio_serial::DataBits::Six),
        7 => Ok(tokio_serial::DataBits::Seven),
        8 => Ok(tokio_serial::DataBits::Eight),
        other => Err(TransportError::Open {
            resource: "serial".to_string(),
            reason: format!("unsupported data bits {other}"),
        }),
    }
}

fn stop_bits(bits: u8) -> Result<tokio_serial::StopBits, TransportError> {
    match bits {
        1 => Ok(tokio_serial::StopBits::One),
        2 => Ok(tokio_serial::StopBits::Two),
        other => Err(TransportError::Open {
            resource: "serial".to_string(),
            reason: format!("unsupported stop bits {other}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn framing_conversions() {
        assert!(matches!(data_bits(7), Ok(tokio_serial::DataBits::Seven)));
        assert!(data_bits(9).is_err());
        assert!(matches!(stop_bits(2), Ok(tokio_serial::StopBits::Two)));
        assert!(stop_bits(0).is_err());
    }

    #[tokio::test]
    async fn missing_port_fails_to_open() {
        let settings = SerialSettings::new("/dev/does-not-exist-msgbus", 9600);
        let err = open_serial(&settings, LineSettings::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, TransportError::Open { .. }));
    }
}
