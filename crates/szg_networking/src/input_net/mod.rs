//! # Networked Input
//!
//! Carries filtered input from one `InputNode` to another.
//!
//! ```text
//!  InputNode ──▶ NetInputSink ══Signature, Input frames══▶ NetInputSource ──▶ InputNode
//! ```
//!
//! A newly connected source receives the current signature before any queue,
//! and a queue that grows the signature is preceded by the new one.

mod sink;
mod source;

pub use sink::NetInputSink;
pub use source::NetInputSource;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::{Duration, Instant};
    use szg_core::{GeneratorSource, InputNode, QueueSink, Signature};

    fn wait_for(mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn test_button_crosses_the_network() {
        let upstream = InputNode::new("tracker");
        let wand = GeneratorSource::new(Signature::new(4, 0, 0));
        upstream.add_source(Box::new(wand.clone()), true);
        let sink = NetInputSink::new("tracker-out", "127.0.0.1:0".parse().unwrap());
        upstream.add_sink(Box::new(sink.clone()), true).unwrap();
        upstream.start().unwrap();

        let downstream = Arc::new(InputNode::new("display"));
        let source = NetInputSource::new("tracker-in", sink.local_addr(), Signature::default());
        downstream.add_source(Box::new(source), true);
        let collected = QueueSink::new();
        downstream.add_sink(Box::new(collected.clone()), true).unwrap();
        downstream.start().unwrap();

        assert!(wait_for(|| sink.subscriber_count() == 1));
        wand.send_button(2, 1);
        assert!(wait_for(|| downstream.button(2) == 1));
        assert!(wait_for(|| downstream.signature().buttons == 4));
        assert!(!collected.is_empty());

        downstream.stop();
        upstream.stop();
    }

    #[test]
    fn test_sink_restart_rebinds_same_port() {
        let mut sink = NetInputSink::new("restart", "127.0.0.1:0".parse().unwrap());
        assert!(szg_core::InputSink::start(&mut sink));
        let first = sink.local_addr();
        assert!(szg_core::InputSink::start(&mut sink));
        assert_eq!(sink.local_addr(), first);
        assert!(szg_core::InputSink::stop(&mut sink));
        assert!(szg_core::InputSink::start(&mut sink));
        assert_eq!(sink.local_addr().port(), first.port());
        assert!(szg_core::InputSink::stop(&mut sink));
    }
}
