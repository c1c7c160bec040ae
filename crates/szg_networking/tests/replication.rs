//! Integration tests for scene-graph replication over real sockets.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use szg_core::Matrix4;
use szg_networking::{
    GraphicsClient, GraphicsPeer, GraphicsServer, NodeLevel, PeerConfig, RecordKind, SerialOptions, SyncMode,
    SyncServerConfig, ROOT_ID,
};

const WAIT: Duration = Duration::from_secs(5);

fn any_port() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

fn server(mode: SyncMode) -> (GraphicsServer, SocketAddr) {
    let server = GraphicsServer::new(SyncServerConfig { mode, ..SyncServerConfig::default() }).unwrap();
    let addr = server.listen(any_port()).unwrap();
    (server, addr)
}

fn eventually(mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    done()
}

fn has(peer: &GraphicsPeer, name: &str) -> bool {
    peer.database().find_node(name).is_some()
}

fn peer(name: &str) -> (GraphicsPeer, SocketAddr) {
    let peer = GraphicsPeer::new(PeerConfig { name: name.into(), ..PeerConfig::default() });
    let addr = peer.listen(any_port()).unwrap();
    (peer, addr)
}

#[test]
fn test_client_mirrors_root_and_transform() {
    let (server, addr) = server(SyncMode::Automatic);
    let transform = server.new_node(ROOT_ID, "transform#1", "transform").unwrap();

    let client = GraphicsClient::new();
    client.connect(addr).unwrap();
    assert!(client.wait_until(WAIT, |c| c.database().node_count() == 2));

    let mirrored = client.database().get_node_ref(transform.id()).unwrap();
    assert_eq!(mirrored.name(), "transform#1");
    assert_eq!(mirrored.parent_id(), ROOT_ID);
    assert_eq!(mirrored.transform(), Some(Matrix4::IDENTITY));
    assert_eq!(client.database().print_structure(), server.database().print_structure());

    client.stop();
    server.stop();
}

#[test]
fn test_late_joiner_gets_current_tree_then_deltas() {
    let (server, addr) = server(SyncMode::Automatic);
    let world = server.new_node(ROOT_ID, "world", "transform").unwrap();
    let arm = server.new_node(world.id(), "arm", "transform").unwrap();
    server.new_node(arm.id(), "hand", "points").unwrap();
    let mut moved = server.language().transform(arm.id(), &Matrix4::translation(0.0, 1.5, 0.0));
    server.alter(&mut moved).unwrap();
    let mut erase = server.language().erase(world.id());
    let doomed = server.new_node(ROOT_ID, "doomed", "name").unwrap();
    server.alter(&mut server.language().erase(doomed.id())).unwrap();

    let client = GraphicsClient::new();
    client.connect(addr).unwrap();
    assert!(client.wait_until(WAIT, |c| c.database().node_count() == server.database().node_count()));
    assert_eq!(client.database().print_structure(), server.database().print_structure());
    let arm_copy = client.database().get_node_ref(arm.id()).unwrap();
    assert_eq!(arm_copy.transform(), Some(Matrix4::translation(0.0, 1.5, 0.0)));
    assert!(client.database().get_node_ref(doomed.id()).is_none());

    server.alter(&mut erase).unwrap();
    assert!(client.wait_until(WAIT, |c| c.database().node_count() == 1));

    client.stop();
    server.stop();
}

#[test]
fn test_snapshot_is_consistent_under_concurrent_alters() {
    let (server, addr) = server(SyncMode::Automatic);
    let server = Arc::new(server);
    let spinner = server.new_node(ROOT_ID, "spinner", "transform").unwrap();
    let writing = Arc::new(AtomicBool::new(true));

    let writer = {
        let server = Arc::clone(&server);
        let writing = Arc::clone(&writing);
        let id = spinner.id();
        thread::spawn(move || {
            let mut step = 0u32;
            while writing.load(Ordering::Acquire) {
                step += 1;
                let mut record = server.language().transform(id, &Matrix4::translation(step as f32, 0.0, 0.0));
                server.alter(&mut record).unwrap();
                if step % 16 == 0 {
                    server.new_node(id, &format!("child{step}"), "name").unwrap();
                }
            }
        })
    };

    let clients: Vec<_> = (0..3)
        .map(|_| {
            thread::sleep(Duration::from_millis(5));
            let client = GraphicsClient::new();
            client.connect(addr).unwrap();
            client
        })
        .collect();
    thread::sleep(Duration::from_millis(50));
    writing.store(false, Ordering::Release);
    writer.join().unwrap();

    let expected = server.database().print_structure();
    let final_matrix = server.database().get_node_ref(spinner.id()).unwrap().transform();
    for client in &clients {
        assert!(client.wait_until(WAIT, |c| c.database().print_structure() == expected));
        let copy = client.database().get_node_ref(spinner.id()).unwrap();
        assert!(client.wait_until(WAIT, |_| copy.transform() == final_matrix));
        client.stop();
    }
    server.stop();
}

#[test]
fn test_manual_mode_waits_for_swap_buffers() {
    let (server, addr) = server(SyncMode::Manual);
    let client = GraphicsClient::new();
    client.connect(addr).unwrap();
    assert!(client.wait_until(WAIT, |c| c.batches_received() >= 1));

    let node = server.new_node(ROOT_ID, "pending", "transform").unwrap();
    assert!(!client.wait_until(Duration::from_millis(100), |c| c.database().get_node_ref(node.id()).is_some()));
    server.swap_buffers();
    assert!(client.wait_until(WAIT, |c| c.database().get_node_ref(node.id()).is_some()));

    client.stop();
    server.stop();
}

#[test]
fn test_client_record_goes_through_server_alter() {
    let (server, addr) = server(SyncMode::Automatic);
    let node = server.new_node(ROOT_ID, "shared", "transform").unwrap();
    let client = GraphicsClient::new();
    client.connect(addr).unwrap();
    assert!(client.wait_until(WAIT, |c| c.database().node_count() == 2));

    let target = Matrix4::translation(3.0, 2.0, 1.0);
    client.send(&client.language().transform(node.id(), &target)).unwrap();
    assert!(client.wait_until(WAIT, |c| {
        c.database().get_node_ref(node.id()).and_then(|n| n.transform()) == Some(target)
    }));
    assert_eq!(node.transform(), Some(target));

    // A malformed alteration fails alone; the stream keeps flowing.
    client.send(&client.language().transform(999, &target)).unwrap();
    let after = server.new_node(ROOT_ID, "after", "name").unwrap();
    assert!(client.wait_until(WAIT, |c| c.database().get_node_ref(after.id()).is_some()));

    client.stop();
    server.stop();
}

#[test]
fn test_transform_dump_restores_identity() {
    let (server, _) = server(SyncMode::Manual);
    let a = server.new_node(ROOT_ID, "a", "transform").unwrap();
    let b = server.new_node(ROOT_ID, "b", "transform").unwrap();
    let mut shifted = server.language().transform(b.id(), &Matrix4::translation(4.0, 0.0, 0.0));
    server.alter(&mut shifted).unwrap();

    let record = a.dump_data(server.language()).unwrap();
    b.receive_data(&record).unwrap();
    assert_eq!(b.transform(), Some(Matrix4::IDENTITY));
    server.stop();
}

#[test]
fn test_peer_pull_copies_tree_and_keeps_following() {
    let (source, source_addr) = peer("source");
    let arm = source.new_node(ROOT_ID, "transform#1", "transform").unwrap();
    let (mirror, _) = peer("mirror");

    mirror.connect_to_peer("source", source_addr).unwrap();
    assert!(mirror.connect_to_peer("source", source_addr).is_err());
    mirror.pull_serial("source", ROOT_ID, ROOT_ID, SerialOptions::default()).unwrap();

    assert_eq!(mirror.database().node_count(), 2);
    let local_id = mirror.local_node_id("source", arm.id()).unwrap();
    let copy = mirror.database().get_node_ref(local_id).unwrap();
    assert_eq!(copy.name(), "transform#1");
    assert_eq!(copy.parent_id(), ROOT_ID);
    assert_eq!(copy.transform(), Some(Matrix4::IDENTITY));

    let target = Matrix4::translation(0.0, 0.0, -2.0);
    let mut record = source.language().transform(arm.id(), &target);
    source.alter(&mut record).unwrap();
    mirror.ping_peer("source").unwrap();
    let deadline = Instant::now() + WAIT;
    while copy.transform() != Some(target) && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(copy.transform(), Some(target));

    mirror.stop();
    source.stop();
}

#[test]
fn test_remote_lock_rejects_other_writers() {
    let (owner, owner_addr) = peer("owner");
    let node = owner.new_node(ROOT_ID, "door", "transform").unwrap();
    let (guest, _) = peer("guest");
    guest.connect_to_peer("owner", owner_addr).unwrap();

    guest.lock_remote_node("owner", node.id()).unwrap();
    assert!(matches!(owner.lock_holder(node.id()), Some(szg_networking::LockHolder::Remote(_))));
    let mut record = owner.language().transform(node.id(), &Matrix4::translation(1.0, 0.0, 0.0));
    assert!(owner.alter(&mut record).is_err());

    guest.unlock_remote_node("owner", node.id()).unwrap();
    assert_eq!(owner.lock_holder(node.id()), None);
    assert!(owner.alter(&mut record).is_ok());

    guest.stop();
    owner.stop();
}

#[test]
fn test_relay_carries_changes_two_hops() {
    let (a, a_addr) = peer("a");
    let (b, b_addr) = peer("b");
    let (c, _) = peer("c");
    b.connect_to_peer("a", a_addr).unwrap();
    b.pull_serial("a", ROOT_ID, ROOT_ID, SerialOptions::default()).unwrap();
    c.connect_to_peer("b", b_addr).unwrap();
    c.pull_serial("b", ROOT_ID, ROOT_ID, SerialOptions::default()).unwrap();

    a.new_node(ROOT_ID, "quiet", "transform").unwrap();
    assert!(eventually(|| has(&b, "quiet")));

    assert!(b.set_relay("a", true));
    let loud = a.new_node(ROOT_ID, "loud", "transform").unwrap();
    assert!(eventually(|| has(&c, "loud")));
    // B handles A's frames in order, so "quiet" would have arrived first.
    assert!(!has(&c, "quiet"));

    let target = Matrix4::translation(2.0, 0.0, 0.0);
    a.alter(&mut a.language().transform(loud.id(), &target)).unwrap();
    let copy = c.database().find_node("loud").unwrap();
    assert!(eventually(|| copy.transform() == Some(target)));
    assert!(b.print_connections().contains("relay true"));

    c.stop();
    b.stop();
    a.stop();
}

#[test]
fn test_relay_ring_drops_returning_records() {
    let (a, a_addr) = peer("a");
    let (b, b_addr) = peer("b");
    let (c, c_addr) = peer("c");
    b.connect_to_peer("a", a_addr).unwrap();
    b.pull_serial("a", ROOT_ID, ROOT_ID, SerialOptions::default()).unwrap();
    c.connect_to_peer("b", b_addr).unwrap();
    c.pull_serial("b", ROOT_ID, ROOT_ID, SerialOptions::default()).unwrap();
    a.connect_to_peer("c", c_addr).unwrap();
    a.pull_serial("c", ROOT_ID, ROOT_ID, SerialOptions::default()).unwrap();
    assert!(b.set_relay("a", true));
    assert!(c.set_relay("b", true));
    assert!(a.set_relay("c", true));

    a.queue_data(true);
    a.new_node(ROOT_ID, "ring", "transform").unwrap();
    assert!(eventually(|| has(&c, "ring")));
    a.ping_peer("c").unwrap();

    c.new_node(ROOT_ID, "from_c", "name").unwrap();
    let mut consumed = 0;
    assert!(eventually(|| {
        consumed += a.consume();
        has(&a, "from_c")
    }));
    thread::sleep(Duration::from_millis(100));
    consumed += a.consume();
    assert_eq!(consumed, 1);
    assert_eq!(a.database().node_count(), 3);

    a.stop();
    b.stop();
    c.stop();
}

#[test]
fn test_push_serial_copies_subtree_and_follows() {
    let (owner, _) = peer("owner");
    let kit = owner.new_node(ROOT_ID, "kit", "transform").unwrap();
    let tool = owner.new_node(kit.id(), "tool", "transform").unwrap();
    owner.new_node(tool.id(), "tip", "points").unwrap();
    let (target, target_addr) = peer("target");

    owner.connect_to_peer("target", target_addr).unwrap();
    let options = SerialOptions { local_send_on: true, ..SerialOptions::default() };
    owner.push_serial("target", kit.id(), ROOT_ID, options).unwrap();

    let copy = target.database().find_node("tool").unwrap();
    assert_eq!(copy.parent_id(), ROOT_ID);
    assert_eq!(copy.child_ids().len(), 1);
    assert!(!has(&target, "kit"));
    assert_eq!(owner.remote_node_id("target", tool.id()), Some(copy.id()));

    let moved = Matrix4::translation(0.0, 1.0, 0.0);
    owner.alter(&mut owner.language().transform(tool.id(), &moved)).unwrap();
    assert!(eventually(|| copy.transform() == Some(moved)));

    target.stop();
    owner.stop();
}

#[test]
fn test_send_level_and_filters_gate_outgoing_data() {
    let (source, source_addr) = peer("source");
    let open = source.new_node(ROOT_ID, "open", "transform").unwrap();
    let hidden = source.new_node(ROOT_ID, "hidden", "transform").unwrap();
    let (mirror, _) = peer("mirror");
    mirror.connect_to_peer("source", source_addr).unwrap();
    mirror.pull_serial("source", ROOT_ID, ROOT_ID, SerialOptions::default()).unwrap();
    let open_copy = mirror.database().find_node("open").unwrap();
    let hidden_copy = mirror.database().find_node("hidden").unwrap();

    assert!(source.filter_data_below("mirror", hidden.id(), None));
    let first = Matrix4::translation(1.0, 0.0, 0.0);
    source.alter(&mut source.language().transform(open.id(), &first)).unwrap();
    source.alter(&mut source.language().transform(hidden.id(), &first)).unwrap();
    source.new_node(hidden.id(), "secret", "name").unwrap();
    mirror.ping_peer("source").unwrap();
    assert_eq!(open_copy.transform(), Some(first));
    assert_eq!(hidden_copy.transform(), Some(Matrix4::IDENTITY));
    assert!(!has(&mirror, "secret"));

    assert!(source.set_send_level("mirror", Some(NodeLevel::Structure)));
    let second = Matrix4::translation(2.0, 0.0, 0.0);
    source.alter(&mut source.language().transform(open.id(), &second)).unwrap();
    source.new_node(open.id(), "visible", "name").unwrap();
    mirror.ping_peer("source").unwrap();
    assert_eq!(open_copy.transform(), Some(first));
    assert!(has(&mirror, "visible"));

    assert!(source.clear_filter("mirror", hidden.id()));
    assert!(source.set_send_level("mirror", Some(NodeLevel::Stable)));
    source.alter(&mut source.language().transform(hidden.id(), &second)).unwrap();
    mirror.ping_peer("source").unwrap();
    assert_eq!(hidden_copy.transform(), Some(second));

    mirror.stop();
    source.stop();
}

#[test]
fn test_hostile_records_do_not_stop_the_server() {
    let (server, addr) = server(SyncMode::Automatic);
    let dots = server.new_node(ROOT_ID, "dots", "points").unwrap();
    let client = GraphicsClient::new();
    client.connect(addr).unwrap();
    assert!(client.wait_until(WAIT, |c| c.database().node_count() == 2));

    client.send(&client.language().make_node(ROOT_ID, i32::MAX, "top", "name")).unwrap();
    let mut far = client.language().record(RecordKind::Points);
    far.set_int("ID", dots.id()).unwrap();
    far.set_ints("point_IDs", &[i32::MAX]).unwrap();
    far.set_floats("positions", &[1.0, 2.0, 3.0]).unwrap();
    client.send(&far).unwrap();

    let after = server.new_node(ROOT_ID, "after", "name").unwrap();
    assert!(client.wait_until(WAIT, |c| c.database().get_node_ref(after.id()).is_some()));
    assert_eq!(server.database().node_count(), 3);
    assert!(client.is_connected());

    client.stop();
    server.stop();
}
