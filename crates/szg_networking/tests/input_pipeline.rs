//! Integration tests for configured filter chains feeding networked input.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use std::net::TcpListener;

use szg_core::{EventQueue, GeneratorSource, InputEvent, InputNode, QueueSink, Signature};
use szg_networking::protocol::input::{encode_queue, encode_signature};
use szg_networking::protocol::WireWriter;
use szg_networking::transport::{self, FrameKind};
use szg_networking::{NetInputSink, NetInputSource, SzgConfig};

fn wait_for(mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}

fn publisher(config: &SzgConfig) -> (InputNode, GeneratorSource, NetInputSink) {
    let node = InputNode::new("tracker");
    for filter in config.input.build_filters().unwrap() {
        node.add_filter(filter);
    }
    let wand = GeneratorSource::new(Signature::new(4, 2, 0));
    node.add_source(Box::new(wand.clone()), true);
    let sink = NetInputSink::new("tracker-out", "127.0.0.1:0".parse().unwrap());
    node.add_sink(Box::new(sink.clone()), true).unwrap();
    node.start().unwrap();
    (node, wand, sink)
}

fn subscriber(sink: &NetInputSink) -> (Arc<InputNode>, QueueSink) {
    let node = Arc::new(InputNode::new("display"));
    node.add_source(Box::new(NetInputSource::new("tracker-in", sink.local_addr(), Signature::default())), true);
    let collected = QueueSink::new();
    node.add_sink(Box::new(collected.clone()), true).unwrap();
    node.start().unwrap();
    (node, collected)
}

#[test]
fn test_configured_chain_applies_before_the_wire() {
    let config = SzgConfig::from_toml_str(
        r#"
        [[input.filters]]
        kind = "button_suppress"
        indices = [0]

        [[input.filters]]
        kind = "axis_scale"
        scale = 2.0
        "#,
    )
    .unwrap();
    let (upstream, wand, sink) = publisher(&config);
    let (downstream, collected) = subscriber(&sink);
    assert!(wait_for(|| sink.subscriber_count() == 1));

    wand.send_button(0, 1);
    wand.send_button(1, 1);
    wand.send_axis(0, 0.25);
    assert!(wait_for(|| downstream.button(1) == 1 && (downstream.axis(0) - 0.5).abs() < f32::EPSILON));
    assert_eq!(downstream.button(0), 0);
    assert_eq!(upstream.button(0), 0);
    assert!(collected.len() >= 3);

    downstream.stop();
    upstream.stop();
}

#[test]
fn test_late_subscriber_learns_signature_first() {
    let (upstream, wand, sink) = publisher(&SzgConfig::default());
    wand.send_button(3, 1);
    assert_eq!(sink.subscriber_count(), 0);

    let (downstream, collected) = subscriber(&sink);
    assert!(wait_for(|| downstream.signature() == Signature::new(4, 2, 0)));
    assert!(collected.is_empty());
    assert_eq!(downstream.button(3), 0);

    wand.send_button(3, 0);
    wand.send_button(3, 1);
    assert!(wait_for(|| downstream.button(3) == 1));

    downstream.stop();
    upstream.stop();
}

#[test]
fn test_unknown_filter_kind_is_a_config_error() {
    let config = SzgConfig::from_toml_str(
        r#"
        [[input.filters]]
        kind = "smoothing"
        "#,
    )
    .unwrap();
    assert!(config.input.build_filters().is_err());
}

#[test]
fn test_hostile_publisher_cannot_break_subscriber() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let node = InputNode::new("victim");
    node.add_source(Box::new(NetInputSource::new("hostile-in", listener.local_addr().unwrap(), Signature::default())), true);
    node.start().unwrap();
    let (stream, _) = listener.accept().unwrap();
    let (_reader, mut writer) = transport::split(stream).unwrap();

    let send_signature = |writer: &mut transport::FrameWriter, signature: Signature| {
        let mut w = WireWriter::new();
        encode_signature(signature, &mut w);
        writer.send(FrameKind::Signature, w.as_slice()).unwrap();
    };
    let send_events = |writer: &mut transport::FrameWriter, events: &[InputEvent]| {
        let queue: EventQueue = events.iter().copied().collect();
        let mut w = WireWriter::new();
        encode_queue(&queue, &mut w);
        writer.send(FrameKind::Input, w.as_slice()).unwrap();
    };

    send_signature(&mut writer, Signature::new(u32::MAX, u32::MAX, u32::MAX));
    send_signature(&mut writer, Signature::new(2, 0, 0));
    send_events(&mut writer, &[InputEvent::button(u32::MAX, 1), InputEvent::matrix(u32::MAX, szg_core::Matrix4::IDENTITY)]);
    let mut lying = WireWriter::new();
    encode_signature(Signature::default(), &mut lying);
    lying.write_u32(u32::MAX);
    writer.send(FrameKind::Input, lying.as_slice()).unwrap();
    send_events(&mut writer, &[InputEvent::button(1, 1)]);

    assert!(wait_for(|| node.button(1) == 1));
    assert_eq!(node.signature(), Signature::new(2, 0, 0));
    node.stop();
}
