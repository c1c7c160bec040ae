//! # IO Filters
//!
//! A filter is one stage of an input pipeline. It sees every event of a
//! queue in order, may rewrite or discard it, and may insert new events.
//!
//! ## Design
//!
//! ```text
//!  queue ──pop──► process_event ──valid──► output ──► state.update
//!                     │  │
//!                     │  └─trashed──► state.clear_slot (not forwarded)
//!                     └─inserted────► output ──► state.update
//! ```
//!
//! - The state passed to `process_event` reflects every earlier event,
//!   never the one in flight
//! - Inserted events follow their trigger directly
//! - A failing `process_event` is remembered but never drops an event

use std::collections::BTreeMap;

use crate::input::event::InputEvent;
use crate::input::queue::EventQueue;
use crate::input::state::InputState;
use crate::math::Matrix4;

/// Key/value parameters handed to `IoFilter::configure`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FilterSettings {
    values: BTreeMap<String, String>,
}

impl FilterSettings {
    /// Creates empty settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.set(key, value);
        self
    }

    /// Sets one parameter.
    pub fn set(&mut self, key: &str, value: &str) {
        self.values.insert(key.to_owned(), value.to_owned());
    }

    /// Raw value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Value parsed as `f32`.
    #[must_use]
    pub fn get_f32(&self, key: &str) -> Option<f32> {
        self.get(key).and_then(|v| v.trim().parse().ok())
    }

    /// Whitespace- or comma-separated list of floats.
    #[must_use]
    pub fn get_floats(&self, key: &str) -> Option<Vec<f32>> {
        self.get(key).and_then(|v| {
            v.split(|c: char| c == ',' || c.is_whitespace())
                .filter(|s| !s.is_empty())
                .map(|s| s.parse().ok())
                .collect()
        })
    }

    /// Whitespace- or comma-separated list of indices.
    #[must_use]
    pub fn get_indices(&self, key: &str) -> Option<Vec<u32>> {
        self.get(key).and_then(|v| {
            v.split(|c: char| c == ',' || c.is_whitespace())
                .filter(|s| !s.is_empty())
                .map(|s| s.parse().ok())
                .collect()
        })
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for FilterSettings {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            values: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

/// What a filter sees while processing one event.
pub struct FilterContext<'a> {
    state: &'a InputState,
    inserted: &'a mut Vec<InputEvent>,
}

impl<'a> FilterContext<'a> {
    /// Wraps a state and an insertion buffer.
    pub fn new(state: &'a InputState, inserted: &'a mut Vec<InputEvent>) -> Self {
        Self { state, inserted }
    }

    /// State as of the previous event.
    #[inline]
    #[must_use]
    pub fn state(&self) -> &InputState {
        self.state
    }

    /// Button value as of the previous event.
    #[inline]
    #[must_use]
    pub fn button(&self, index: u32) -> i32 {
        self.state.button(index)
    }

    /// Axis value as of the previous event.
    #[inline]
    #[must_use]
    pub fn axis(&self, index: u32) -> f32 {
        self.state.axis(index)
    }

    /// Matrix value as of the previous event.
    #[inline]
    #[must_use]
    pub fn matrix(&self, index: u32) -> Matrix4 {
        self.state.matrix(index)
    }

    /// Released-to-pressed edge as of the previous event.
    #[inline]
    #[must_use]
    pub fn on_button(&self, index: u32) -> bool {
        self.state.on_button(index)
    }

    /// Pressed-to-released edge as of the previous event.
    #[inline]
    #[must_use]
    pub fn off_button(&self, index: u32) -> bool {
        self.state.off_button(index)
    }

    /// Queues a new event right after the one being processed.
    pub fn insert_event(&mut self, event: InputEvent) {
        self.inserted.push(event);
    }
}

/// One stage of an input pipeline.
pub trait IoFilter: Send {
    /// Short name for logs.
    fn name(&self) -> &str {
        "filter"
    }

    /// Reads parameters. Returns false if they are unusable.
    fn configure(&mut self, _settings: &FilterSettings) -> bool {
        true
    }

    /// Inspects one event. It may mutate it, `trash()` it, or insert new
    /// events through `ctx`. Returns false on a processing error.
    fn process_event(&mut self, event: &mut InputEvent, ctx: &mut FilterContext<'_>) -> bool;

    /// Runs this filter over a whole queue, updating `state`.
    fn filter(&mut self, queue: &mut EventQueue, state: &mut InputState) -> bool {
        run_filter(self, queue, state)
    }
}

/// Drives one filter over `queue`, rewriting it in place and updating `state`.
///
/// Returns false if any event failed to process; no event is dropped
/// because of a failure.
pub fn run_filter<F: IoFilter + ?Sized>(
    filter: &mut F,
    queue: &mut EventQueue,
    state: &mut InputState,
) -> bool {
    if queue.is_empty() {
        return true;
    }
    let mut output = EventQueue::new();
    let mut inserted = Vec::new();
    let mut ok = true;

    while let Some(mut event) = queue.pop_next() {
        if event.is_garbage() {
            state.update(&event);
            output.append_event(event);
            continue;
        }

        {
            let mut ctx = FilterContext::new(state, &mut inserted);
            if !filter.process_event(&mut event, &mut ctx) {
                tracing::warn!(target: "szg::filter", "{} failed on {}", filter.name(), event);
                ok = false;
            }
        }

        if event.is_garbage() {
            state.clear_slot(event.kind(), event.index());
        } else {
            state.update(&event);
            output.append_event(event);
        }

        for extra in inserted.drain(..) {
            state.update(&extra);
            output.append_event(extra);
        }
    }

    queue.append_queue(&output);
    ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::event::EventKind;

    struct Identity;

    impl IoFilter for Identity {
        fn process_event(&mut self, _event: &mut InputEvent, _ctx: &mut FilterContext<'_>) -> bool {
            true
        }
    }

    struct DropButtons;

    impl IoFilter for DropButtons {
        fn process_event(&mut self, event: &mut InputEvent, _ctx: &mut FilterContext<'_>) -> bool {
            if event.kind() == EventKind::Button {
                event.trash();
            }
            true
        }
    }

    /// Doubles every axis and echoes it on the next channel.
    struct Echo {
        seen_before: Vec<f32>,
    }

    impl IoFilter for Echo {
        fn process_event(&mut self, event: &mut InputEvent, ctx: &mut FilterContext<'_>) -> bool {
            if let Some(v) = event.axis_value() {
                self.seen_before.push(ctx.axis(event.index()));
                event.set_axis(v * 2.0);
                ctx.insert_event(InputEvent::axis(event.index() + 1, v));
            }
            true
        }
    }

    struct Failing;

    impl IoFilter for Failing {
        fn process_event(&mut self, _event: &mut InputEvent, _ctx: &mut FilterContext<'_>) -> bool {
            false
        }
    }

    fn sample_queue() -> EventQueue {
        [
            InputEvent::button(0, 1),
            InputEvent::axis(0, 0.5),
            InputEvent::button(1, 1),
            InputEvent::matrix(0, Matrix4::translation(1.0, 0.0, 0.0)),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_identity_preserves_queue() {
        let mut queue = sample_queue();
        let expected = queue.clone();
        let mut state = InputState::new();
        assert!(Identity.filter(&mut queue, &mut state));
        assert_eq!(queue, expected);
        assert_eq!(state.button(1), 1);
    }

    #[test]
    fn test_empty_queue_is_noop() {
        let mut queue = EventQueue::new();
        let mut state = InputState::new();
        assert!(DropButtons.filter(&mut queue, &mut state));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_discard_clears_state() {
        let mut state = InputState::new();
        state.set_button(3, 1);
        let mut queue: EventQueue = [InputEvent::button(3, 1)].into_iter().collect();
        assert!(DropButtons.filter(&mut queue, &mut state));
        assert!(queue.is_empty());
        assert_eq!(state.button(3), 0);
    }

    #[test]
    fn test_inserted_follow_trigger() {
        let mut queue: EventQueue =
            [InputEvent::axis(0, 1.0), InputEvent::axis(0, 2.0)].into_iter().collect();
        let mut state = InputState::new();
        let mut echo = Echo { seen_before: Vec::new() };
        assert!(echo.filter(&mut queue, &mut state));
        let out: Vec<_> = queue.iter().copied().collect();
        assert_eq!(
            out,
            vec![
                InputEvent::axis(0, 2.0),
                InputEvent::axis(1, 1.0),
                InputEvent::axis(0, 4.0),
                InputEvent::axis(1, 2.0),
            ]
        );
        // The filter saw the state before each event, not during it.
        assert_eq!(echo.seen_before, vec![0.0, 2.0]);
        assert_eq!(state.axis(1), 2.0);
    }

    #[test]
    fn test_failure_keeps_events() {
        let mut queue = sample_queue();
        let mut state = InputState::new();
        assert!(!Failing.filter(&mut queue, &mut state));
        assert_eq!(queue.len(), 4);
    }

    #[test]
    fn test_garbage_passes_through_to_state() {
        let mut state = InputState::new();
        state.set_axis(2, 9.0);
        let mut queue: EventQueue = [InputEvent::garbage(EventKind::Axis, 2)].into_iter().collect();
        assert!(DropButtons.filter(&mut queue, &mut state));
        assert_eq!(queue.len(), 1);
        assert_eq!(state.axis(2), 0.0);
    }

    #[test]
    fn test_settings_parsing() {
        let settings = FilterSettings::new().with("scale", "2.5").with("indices", "1, 3 4");
        assert_eq!(settings.get_f32("scale"), Some(2.5));
        assert_eq!(settings.get_indices("indices"), Some(vec![1, 3, 4]));
        assert_eq!(settings.get_floats("missing"), None);
    }
}
