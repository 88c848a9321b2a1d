//! End-to-end query tests through the public API.

use daq_msgbus::transport::{LineSettings, MockTransport, StreamTransport};
use daq_msgbus::{BusError, BusInstrument, MessageBus, Parsed, QueryOptions, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

#[tokio::test]
async fn test_placeholders_parse_in_template_order() {
    let mock = MockTransport::new().with_replies(["A12 B3.5C\n"]);
    let bus = MessageBus::new(mock);

    let parsed = bus.parsed_query("READ?", "A%d B%fC").await.unwrap();
    assert_eq!(
        parsed,
        Parsed::Tuple(vec![Value::Int(12), Value::Float(3.5)])
    );
}

#[tokio::test]
async fn test_single_placeholder_is_scalar() {
    let mock = MockTransport::new().with_replies(["T=21.75\n"]);
    let bus = MessageBus::new(mock);

    let parsed = bus.parsed_query("TEMP?", "T=%f").await.unwrap();
    assert_eq!(parsed, Parsed::Scalar(Value::Float(21.75)));
}

#[tokio::test]
async fn test_presence_check_template() {
    let mock = MockTransport::new().with_replies(["OK\n"]);
    let bus = MessageBus::new(mock);

    let parsed = bus.parsed_query("PING", "OK").await.unwrap();
    assert!(parsed.is_empty());
}

#[tokio::test]
async fn test_mismatch_reports_command_and_reply() {
    let mock = MockTransport::new().with_replies(["abc\n"]);
    let bus = MessageBus::new(mock);

    let err = bus.parsed_query("COUNT?", "%d").await.unwrap_err();
    assert!(matches!(err, BusError::Parse(_)));
    let msg = err.to_string();
    assert!(msg.contains("abc"));
    assert!(msg.contains("COUNT?"));
}

#[tokio::test]
async fn test_multiline_reads_exactly_until_marker() {
    let mock = MockTransport::new().with_replies(["foo\n", "bar\n", "END\n", "next\n"]);
    let bus = MessageBus::new(mock.clone());

    let reply = bus
        .query_with("STAGE", QueryOptions::until("END"))
        .await
        .unwrap();
    assert_eq!(reply, "foo\nbar\nEND\n");
    assert_eq!(mock.read_count(), 3);
}

#[tokio::test]
async fn test_auto_base_integers() {
    let mock = MockTransport::new().with_replies(["0x1F 017 19\n"]);
    let bus = MessageBus::new(mock);

    let values = bus
        .parsed_query("REGS?", "%i %i %i")
        .await
        .unwrap()
        .into_values();
    assert_eq!(values, vec![Value::Int(31), Value::Int(15), Value::Int(19)]);
}

/// Simulated instrument on the far end of a duplex pipe, answering `*IDN?` and `P`.
async fn run_device(stream: tokio::io::DuplexStream) {
    let (read_half, mut write_half) = tokio::io::split(stream);
    let mut lines = BufReader::new(read_half).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let reply: &[u8] = match line.trim_end_matches('\r') {
            "*IDN?" => b"ACME,Stage 3000,SN42,1.0\r\n",
            "P" => b"100,-250,3\r\n",
            "STAGE" => b"NAME = H101\r\nSTEPS = 25\r\nEND\r\n",
            _ => b"E,1\r\n",
        };
        if write_half.write_all(reply).await.is_err() {
            break;
        }
    }
}

fn duplex_bus() -> MessageBus {
    let (host, device) = tokio::io::duplex(1024);
    tokio::spawn(run_device(device));
    let transport = StreamTransport::new(
        host,
        LineSettings::default()
            .with_termination_character("\r\n")
            .with_drain_window(Duration::ZERO),
    );
    MessageBus::new(transport).with_timeout(Duration::from_secs(1))
}

#[tokio::test]
async fn test_stream_transport_round_trip() {
    let bus = duplex_bus();

    assert_eq!(bus.query("*IDN?").await.unwrap(), "ACME,Stage 3000,SN42,1.0");

    let position = bus
        .parsed_query("P", "%d,%d,%d")
        .await
        .unwrap()
        .into_values();
    assert_eq!(
        position,
        vec![Value::Int(100), Value::Int(-250), Value::Int(3)]
    );

    let block = bus
        .query_with("STAGE", QueryOptions::until("END"))
        .await
        .unwrap();
    assert_eq!(block, "NAME = H101\r\nSTEPS = 25\r\nEND\r\n");
}

#[tokio::test]
async fn test_concurrent_queries_do_not_interleave() {
    let bus = Arc::new(duplex_bus());

    let mut handles = Vec::new();
    for i in 0..10 {
        let bus = Arc::clone(&bus);
        handles.push(tokio::spawn(async move {
            if i % 2 == 0 {
                let reply = bus.query("*IDN?").await.unwrap();
                assert!(reply.starts_with("ACME"));
            } else {
                let reply = bus.query("P").await.unwrap();
                assert_eq!(reply, "100,-250,3");
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
}

#[tokio::test]
async fn test_silent_device_times_out() {
    let (host, _device) = tokio::io::duplex(64);
    let bus = MessageBus::new(StreamTransport::new(host, LineSettings::default()))
        .with_timeout(Duration::from_millis(20));

    let err = bus.query("*IDN?").await.unwrap_err();
    assert!(err.is_transport());
}
