//! Configuration files driving a bus over a real TCP socket.

use daq_msgbus::config::{BusConfig, TransportConfig};
use daq_msgbus::property_table::{PropertyOwner, PropertyTable};
use daq_msgbus::{BusInstrument, MessageBus, ScalarType, Value};
use serial_test::serial;
use std::io::Write;
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

/// Line server answering a small command set; returns its address.
async fn spawn_device() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let (read_half, mut write_half) = socket.into_split();
        let mut reader = BufReader::new(read_half);
        let mut speed = 10;
        loop {
            let mut raw = Vec::new();
            match reader.read_until(b'\r', &mut raw).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            let line = String::from_utf8_lossy(&raw).trim_end_matches('\r').to_string();
            let reply = if line == "SMS" {
                Some(format!("{speed}\r"))
            } else if let Some(value) = line.strip_prefix("SMS ") {
                speed = value.parse().unwrap_or(speed);
                None
            } else if line == "*IDN?" {
                Some("PRIOR,H31,1\r".to_string())
            } else {
                Some("E,1\r".to_string())
            };
            if let Some(reply) = reply {
                if write_half.write_all(reply.as_bytes()).await.is_err() {
                    break;
                }
            }
        }
    });
    address
}

#[test]
#[serial]
fn test_load_from_file() {
    let file = write_config(
        r#"
        [application]
        name = "prior"
        log_level = "debug"

        [transport]
        kind = "tcp"
        address = "127.0.0.1:4001"

        [bus]
        termination_character = "\r"
        termination_line = "END"
        write_read_delay_ms = 5

        [[properties]]
        name = "speed"
        get = "SMS"
        set = "SMS %d"
        scalar_type = "int"
        min = 1
        max = 100
        "#,
    );

    let config = BusConfig::load_from(file.path()).unwrap();
    config.validate().unwrap();
    assert_eq!(config.application.name, "prior");
    assert_eq!(config.bus.termination_character, "\r");
    assert_eq!(config.bus.termination_line.as_deref(), Some("END"));
    assert_eq!(config.properties[0].scalar_type, ScalarType::Int);
    assert_eq!(config.properties[0].max, Some(100.0));
}

#[test]
#[serial]
fn test_environment_overrides_file() {
    let file = write_config(
        r#"
        [bus]
        timeout_ms = 1000
        "#,
    );

    std::env::set_var("DAQ_MSGBUS_BUS__TIMEOUT_MS", "250");
    std::env::set_var("DAQ_MSGBUS_APPLICATION__LOG_LEVEL", "warn");
    let config = BusConfig::load_from(file.path());
    std::env::remove_var("DAQ_MSGBUS_BUS__TIMEOUT_MS");
    std::env::remove_var("DAQ_MSGBUS_APPLICATION__LOG_LEVEL");

    let config = config.unwrap();
    assert_eq!(config.bus.timeout_ms, Some(250));
    assert_eq!(config.application.log_level, "warn");
}

#[test]
#[serial]
fn test_malformed_file_is_a_config_error() {
    let file = write_config("[bus]\ntimeout_ms = \"soon\"\n");
    let err = BusConfig::load_from(file.path()).unwrap_err();
    assert!(matches!(err, daq_msgbus::BusError::Config(_)));
}

#[tokio::test]
#[serial]
async fn test_configured_bus_over_tcp() {
    let address = spawn_device().await;
    let config = BusConfig::from_toml_str(&format!(
        r#"
        [transport]
        kind = "tcp"
        address = "{address}"

        [bus]
        termination_character = "\r"
        timeout_ms = 2000

        [[properties]]
        name = "speed"
        get = "SMS"
        set = "SMS %d"
        scalar_type = "int"
        min = 1
        max = 100
        "#
    ))
    .unwrap();
    config.validate().unwrap();
    assert!(matches!(config.transport, Some(TransportConfig::Tcp { .. })));

    let bus = Arc::new(MessageBus::from_config(&config).await.unwrap());
    assert_eq!(bus.query("*IDN?").await.unwrap(), "PRIOR,H31,1");

    let table = PropertyTable::from_specs(&config.properties).unwrap();
    let owner = PropertyOwner::new(Arc::clone(&bus));
    assert_eq!(table.get("speed", &owner).await.unwrap(), Value::Int(10));
    table.set("speed", &owner, 55.into()).await.unwrap();
    assert_eq!(table.get("speed", &owner).await.unwrap(), Value::Int(55));
    assert!(table.set("speed", &owner, 0.into()).await.is_err());
}

#[tokio::test]
#[serial]
async fn test_missing_transport_section() {
    let config = BusConfig::from_toml_str("").unwrap();
    let err = MessageBus::from_config(&config).await.unwrap_err();
    assert!(matches!(err, daq_msgbus::BusError::Configuration(_)));
}
