//! Integration tests for the master/slave frame exchange.

use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use szg_core::{DataType, GeneratorSource, InputNode, Signature, TransferError};
use szg_networking::{ClusterApp, ClusterNode, FrameContext, MasterConfig, NetError, Role, SlaveSync};

const CONNECT: Duration = Duration::from_secs(5);
const FRAME: Option<Duration> = Some(Duration::from_secs(5));

fn any_port() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

fn master_config() -> MasterConfig {
    MasterConfig { ack_timeout: Duration::from_millis(500), max_misses: 2, ..MasterConfig::default() }
}

/// Sets `flag` to 7 on the master and records what every callback saw.
#[derive(Default)]
struct FlagApp {
    pre_calls: u32,
    seen: Vec<i32>,
    drawn: u32,
}

impl ClusterApp for FlagApp {
    fn pre_exchange(&mut self, ctx: &mut FrameContext<'_>) {
        assert_eq!(ctx.role, Role::Master);
        self.pre_calls += 1;
        ctx.fields.ints_mut("flag").unwrap()[0] = 7;
    }

    fn post_exchange(&mut self, ctx: &mut FrameContext<'_>) {
        self.seen.push(ctx.fields.ints("flag").unwrap()[0]);
    }

    fn draw(&mut self, _ctx: &FrameContext<'_>) {
        self.drawn += 1;
    }
}

fn flag_node() -> ClusterNode {
    let mut node = ClusterNode::new();
    node.fields_mut().add_field("flag", DataType::Int, 1).unwrap();
    node
}

/// Master loop on the current thread until `slaves` have joined, then `frames` more.
fn run_master<A: ClusterApp>(master: &mut ClusterNode, app: &mut A, slaves: usize, frames: u32) {
    for _ in 0..200 {
        master.frame(app).unwrap();
        if master.slave_count() == slaves {
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(master.slave_count(), slaves);
    for _ in 0..frames {
        master.frame(app).unwrap();
    }
}

#[test]
fn test_flag_reaches_slave() {
    let mut master = flag_node();
    let addr = master.start_master(any_port(), master_config()).unwrap();

    let slave_thread = thread::spawn(move || {
        let mut slave = flag_node();
        slave.start_slave(addr, "slave-0", CONNECT, FRAME).unwrap();
        let mut app = FlagApp::default();
        let report = slave.frame(&mut app).unwrap();
        assert!(report.exchange.is_none());
        let flag = slave.fields().ints("flag").unwrap()[0];
        slave.stop();
        (flag, app)
    });

    let mut app = FlagApp::default();
    run_master(&mut master, &mut app, 1, 0);
    let (flag, slave_app) = slave_thread.join().unwrap();

    assert_eq!(flag, 7);
    assert_eq!(slave_app.pre_calls, 0);
    assert_eq!(slave_app.seen, vec![7]);
    assert_eq!(slave_app.drawn, 1);
    assert!(app.seen.iter().all(|&v| v == 7));
    master.stop();
}

#[test]
fn test_schema_mismatch_is_fatal() {
    let mut master = flag_node();
    let addr = master.start_master(any_port(), master_config()).unwrap();

    let slave_thread = thread::spawn(move || {
        let mut slave = ClusterNode::new();
        slave.fields_mut().add_field("flag", DataType::Float, 1).unwrap();
        slave.start_slave(addr, "wrong", CONNECT, FRAME)
    });

    let mut app = FlagApp::default();
    let mut result = None;
    for _ in 0..200 {
        master.frame(&mut app).unwrap();
        if slave_thread.is_finished() {
            result = Some(slave_thread.join().unwrap());
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }
    let err = result.expect("slave finished").unwrap_err();
    assert!(matches!(err, NetError::Transfer(TransferError::SchemaMismatch(_))), "{err}");
    assert_eq!(master.slave_count(), 0);
    master.stop();
}

#[test]
fn test_fields_are_bit_identical_after_exchange() {
    struct Mixed;
    impl ClusterApp for Mixed {
        fn pre_exchange(&mut self, ctx: &mut FrameContext<'_>) {
            let n = ctx.frame as f64;
            ctx.fields.doubles_mut("pose").unwrap().copy_from_slice(&[n, -0.0, f64::MIN_POSITIVE]);
            ctx.fields.bytes_mut("mode").unwrap()[1] = 0xA5;
            ctx.fields.set_internal_field_size("points", 5).unwrap();
            ctx.fields.floats_mut("points").unwrap()[4] = f32::NAN;
        }
    }
    fn node() -> ClusterNode {
        let mut node = ClusterNode::new();
        let fields = node.fields_mut();
        fields.add_field("pose", DataType::Double, 3).unwrap();
        fields.add_field("mode", DataType::Char, 2).unwrap();
        fields.add_internal_field("points", DataType::Float, 1).unwrap();
        node
    }

    let mut master = node();
    let addr = master.start_master(any_port(), master_config()).unwrap();
    let slave_thread = thread::spawn(move || {
        let mut slave = node();
        slave.start_slave(addr, "bits", CONNECT, FRAME).unwrap();
        slave.frame(&mut Mixed).unwrap();
        let mut packed = Vec::new();
        slave.fields().pack(&mut packed);
        slave.stop();
        packed
    });

    run_master(&mut master, &mut Mixed, 1, 0);
    let slave_bytes = slave_thread.join().unwrap();
    let mut master_bytes = Vec::new();
    master.fields().pack(&mut master_bytes);
    assert_eq!(slave_bytes, master_bytes);
    master.stop();
}

#[test]
fn test_master_input_travels_with_frame() {
    let input = Arc::new(InputNode::new("wand"));
    let wand = GeneratorSource::new(Signature::new(4, 1, 0));
    input.add_source(Box::new(wand.clone()), true);
    input.start().unwrap();

    let mut master = flag_node();
    master.attach_input(Arc::clone(&input));
    let addr = master.start_master(any_port(), master_config()).unwrap();

    let slave_thread = thread::spawn(move || {
        let mut slave = flag_node();
        slave.start_slave(addr, "viewer", CONNECT, FRAME).unwrap();
        let mut app = FlagApp::default();
        // The join frame predates the button press.
        for _ in 0..50 {
            slave.frame(&mut app).unwrap();
            if slave.input_state().button(3) == 1 {
                break;
            }
        }
        let result = (slave.input_state().button(3), slave.input_state().axis(0), slave.input_events().len());
        slave.stop();
        result
    });

    let mut app = FlagApp::default();
    run_master(&mut master, &mut app, 1, 0);
    wand.send_button(3, 1);
    wand.send_axis(0, 0.25);
    while !slave_thread.is_finished() {
        master.frame(&mut app).unwrap();
    }
    let (button, axis, events) = slave_thread.join().unwrap();

    assert_eq!(button, 1);
    assert!((axis - 0.25).abs() < f32::EPSILON);
    assert_eq!(events, 2);
    assert_eq!(master.input_state().button(3), 1);
    master.stop();
}

#[test]
fn test_silent_slave_is_evicted() {
    let mut master = flag_node();
    let addr = master.start_master(any_port(), master_config()).unwrap();

    // Joins, then never acknowledges.
    let schema = flag_node().fields().schema();
    let silent = thread::spawn(move || {
        let mut slave = SlaveSync::connect(addr, "silent", schema, CONNECT).unwrap();
        let _ = slave.receive(Some(Duration::from_secs(3)));
        thread::sleep(Duration::from_secs(2));
        slave
    });

    let mut app = FlagApp::default();
    run_master(&mut master, &mut app, 1, 0);
    let mut evicted = false;
    for _ in 0..4 {
        let report = master.frame(&mut app).unwrap().exchange.unwrap();
        if !report.evicted.is_empty() {
            evicted = true;
            break;
        }
    }
    assert!(evicted);
    assert_eq!(master.slave_count(), 0);
    drop(silent.join().unwrap());
    master.stop();
}

#[test]
fn test_resize_is_master_only() {
    let mut master = ClusterNode::new();
    master.fields_mut().add_internal_field("extra", DataType::Int, 0).unwrap();
    let addr = master.start_master(any_port(), master_config()).unwrap();
    master.set_internal_field_size("extra", 3).unwrap();

    let slave_thread = thread::spawn(move || {
        let mut slave = ClusterNode::new();
        slave.fields_mut().add_internal_field("extra", DataType::Int, 0).unwrap();
        slave.start_slave(addr, "resizer", CONNECT, FRAME).unwrap();
        let refused = slave.set_internal_field_size("extra", 9);
        slave.frame(&mut FlaglessApp).unwrap();
        let len = slave.fields().ints("extra").unwrap().len();
        slave.stop();
        (refused.is_err(), len)
    });

    run_master(&mut master, &mut FlaglessApp, 1, 0);
    let (refused, len) = slave_thread.join().unwrap();
    assert!(refused);
    assert_eq!(len, 3);
    master.stop();
}

struct FlaglessApp;
impl ClusterApp for FlaglessApp {}
