//! Bound properties on a simulated two-axis controller.

use daq_msgbus::transport::MockTransport;
use daq_msgbus::{
    BoundProperty, BusError, Channel, ChannelQueriedProperty, MessageBus, QueriedProperty,
    ScalarType, Value,
};
use std::sync::{Arc, LazyLock};

/// Controller with properties defined once for the type.
struct Controller {
    bus: MessageBus,
    max_speed: i64,
}

static SPEED: LazyLock<QueriedProperty<MessageBus>> = LazyLock::new(|| {
    QueriedProperty::new("speed")
        .with_get("SMS")
        .with_set("SMS %d")
        .with_scalar_type(ScalarType::Int)
        .with_doc("Maximum speed, percent")
});

static MODE: LazyLock<QueriedProperty<MessageBus>> =
    LazyLock::new(|| QueriedProperty::new("mode").with_set("MODE {0}"));

/// One axis of the controller.
struct Axis {
    number: i64,
    controller: Arc<Controller>,
}

impl Channel for Axis {
    type Parent = MessageBus;

    fn channel(&self) -> Option<Value> {
        Some(Value::Int(self.number))
    }

    fn parent(&self) -> Option<&MessageBus> {
        Some(&self.controller.bus)
    }
}

fn position() -> ChannelQueriedProperty<Axis> {
    ChannelQueriedProperty::<Axis>::new("position")
        .with_get("G{0}?")
        .with_set("M{0} {1}")
        .with_validator(|axis: &Axis, value| match value.as_f64() {
            Some(v) if v.abs() <= axis.controller.max_speed as f64 * 100.0 => Ok(()),
            _ => Err("target out of travel".to_string()),
        })
}

fn controller(mock: &MockTransport) -> Arc<Controller> {
    Arc::new(Controller {
        bus: MessageBus::new(mock.clone()),
        max_speed: 100,
    })
}

#[tokio::test]
async fn test_shared_definition_serves_every_instance() {
    let first = MockTransport::new();
    first.on_command("SMS", ["40\n"]);
    let second = MockTransport::new();
    second.on_command("SMS", ["75\n"]);

    let a = controller(&first);
    let b = controller(&second);
    assert_eq!(SPEED.get(&a.bus).await.unwrap(), Value::Int(40));
    assert_eq!(SPEED.get(&b.bus).await.unwrap(), Value::Int(75));
    assert_eq!(SPEED.doc(), Some("Maximum speed, percent"));
}

#[tokio::test]
async fn test_set_formats_and_writes_without_reading() {
    let mock = MockTransport::new();
    let c = controller(&mock);

    SPEED.set(&c.bus, 60.into()).await.unwrap();
    MODE.set(&c.bus, "y".into()).await.unwrap();
    assert_eq!(mock.written(), vec!["SMS 60", "MODE y"]);
    assert_eq!(mock.read_count(), 0);
}

#[tokio::test]
async fn test_write_only_property_is_not_readable() {
    let c = controller(&MockTransport::new());
    assert!(matches!(
        MODE.get(&c.bus).await,
        Err(BusError::NotReadable(name)) if name == "mode"
    ));
}

#[tokio::test]
async fn test_channel_substituted_into_parent_query() {
    let mock = MockTransport::new();
    mock.on_command("G3?", ["1250.5\n"]);
    let axis = Axis {
        number: 3,
        controller: controller(&mock),
    };

    assert_eq!(position().get(&axis).await.unwrap(), Value::Float(1250.5));
    position().set(&axis, 500.into()).await.unwrap();
    assert_eq!(mock.written(), vec!["G3?", "M3 500"]);
}

#[tokio::test]
async fn test_validator_sees_owner_and_blocks_write() {
    let mock = MockTransport::new();
    let axis = Axis {
        number: 1,
        controller: controller(&mock),
    };

    let err = position().set(&axis, 20_000.into()).await.unwrap_err();
    match err {
        BusError::Validation {
            property,
            value,
            reason,
        } => {
            assert_eq!(property, "position");
            assert_eq!(value, "20000");
            assert_eq!(reason, "target out of travel");
        }
        other => panic!("expected validation error, got {other:?}"),
    }
    assert!(mock.written().is_empty());
}
