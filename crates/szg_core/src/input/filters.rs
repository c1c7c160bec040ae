//! Built-in filters.

use std::collections::BTreeSet;

use crate::input::event::{EventKind, InputEvent};
use crate::input::filter::{FilterContext, FilterSettings, IoFilter};
use crate::math::Matrix4;

/// Parses an optional `indices` parameter into a channel set.
fn parse_indices(settings: &FilterSettings) -> Option<Option<BTreeSet<u32>>> {
    match settings.get("indices") {
        None => Some(None),
        Some(_) => settings
            .get_indices("indices")
            .map(|v| Some(v.into_iter().collect())),
    }
}

fn selected(indices: Option<&BTreeSet<u32>>, index: u32) -> bool {
    indices.map_or(true, |set| set.contains(&index))
}

/// Leaves every event untouched.
#[derive(Clone, Copy, Debug, Default)]
pub struct PassThroughFilter;

impl IoFilter for PassThroughFilter {
    fn name(&self) -> &str {
        "pass-through"
    }

    fn process_event(&mut self, _event: &mut InputEvent, _ctx: &mut FilterContext<'_>) -> bool {
        true
    }
}

/// Discards button events, either all of them or a chosen set.
#[derive(Clone, Debug, Default)]
pub struct ButtonSuppressFilter {
    indices: Option<BTreeSet<u32>>,
}

impl ButtonSuppressFilter {
    /// Suppresses every button.
    #[must_use]
    pub fn all() -> Self {
        Self { indices: None }
    }

    /// Suppresses only the listed buttons.
    #[must_use]
    pub fn only(indices: impl IntoIterator<Item = u32>) -> Self {
        Self { indices: Some(indices.into_iter().collect()) }
    }
}

impl IoFilter for ButtonSuppressFilter {
    fn name(&self) -> &str {
        "button-suppress"
    }

    fn configure(&mut self, settings: &FilterSettings) -> bool {
        match parse_indices(settings) {
            Some(indices) => {
                self.indices = indices;
                true
            }
            None => false,
        }
    }

    fn process_event(&mut self, event: &mut InputEvent, _ctx: &mut FilterContext<'_>) -> bool {
        if event.kind() == EventKind::Button && selected(self.indices.as_ref(), event.index()) {
            event.trash();
        }
        true
    }
}

/// Applies `value * scale + offset` to axis events.
#[derive(Clone, Debug)]
pub struct AxisScaleFilter {
    scale: f32,
    offset: f32,
    indices: Option<BTreeSet<u32>>,
}

impl AxisScaleFilter {
    /// Scales every axis.
    #[must_use]
    pub fn new(scale: f32, offset: f32) -> Self {
        Self { scale, offset, indices: None }
    }
}

impl Default for AxisScaleFilter {
    fn default() -> Self {
        Self::new(1.0, 0.0)
    }
}

impl IoFilter for AxisScaleFilter {
    fn name(&self) -> &str {
        "axis-scale"
    }

    fn configure(&mut self, settings: &FilterSettings) -> bool {
        let Some(indices) = parse_indices(settings) else {
            return false;
        };
        if settings.get("scale").is_some() && settings.get_f32("scale").is_none() {
            return false;
        }
        if settings.get("offset").is_some() && settings.get_f32("offset").is_none() {
            return false;
        }
        self.scale = settings.get_f32("scale").unwrap_or(self.scale);
        self.offset = settings.get_f32("offset").unwrap_or(self.offset);
        self.indices = indices;
        true
    }

    fn process_event(&mut self, event: &mut InputEvent, _ctx: &mut FilterContext<'_>) -> bool {
        if let Some(v) = event.axis_value() {
            if selected(self.indices.as_ref(), event.index()) {
                event.set_axis(v * self.scale + self.offset);
            }
        }
        true
    }
}

/// Replaces matrix `M` with `pre * M * post`.
#[derive(Clone, Debug, Default)]
pub struct MatrixTransformFilter {
    pre: Matrix4,
    post: Matrix4,
    indices: Option<BTreeSet<u32>>,
}

impl MatrixTransformFilter {
    /// Transforms every matrix.
    #[must_use]
    pub fn new(pre: Matrix4, post: Matrix4) -> Self {
        Self { pre, post, indices: None }
    }
}

impl IoFilter for MatrixTransformFilter {
    fn name(&self) -> &str {
        "matrix-transform"
    }

    fn configure(&mut self, settings: &FilterSettings) -> bool {
        let Some(indices) = parse_indices(settings) else {
            return false;
        };
        for (key, slot) in [("pre", &mut self.pre), ("post", &mut self.post)] {
            if settings.get(key).is_some() {
                match settings.get_floats(key).as_deref().and_then(Matrix4::from_slice) {
                    Some(m) => *slot = m,
                    None => {
                        tracing::warn!(target: "szg::filter", "'{key}' needs 16 floats");
                        return false;
                    }
                }
            }
        }
        self.indices = indices;
        true
    }

    fn process_event(&mut self, event: &mut InputEvent, _ctx: &mut FilterContext<'_>) -> bool {
        if let Some(m) = event.matrix_value() {
            if selected(self.indices.as_ref(), event.index()) {
                event.set_matrix(self.pre * m * self.post);
            }
        }
        true
    }
}

/// Boxed per-event callback used by `CallbackFilter`.
pub type EventCallback = Box<dyn FnMut(&mut InputEvent, &mut FilterContext<'_>) -> bool + Send>;

/// Runs an application closure on every event.
pub struct CallbackFilter {
    callback: EventCallback,
}

impl CallbackFilter {
    /// Wraps a closure.
    pub fn new(
        callback: impl FnMut(&mut InputEvent, &mut FilterContext<'_>) -> bool + Send + 'static,
    ) -> Self {
        Self { callback: Box::new(callback) }
    }
}

impl IoFilter for CallbackFilter {
    fn name(&self) -> &str {
        "callback"
    }

    fn process_event(&mut self, event: &mut InputEvent, ctx: &mut FilterContext<'_>) -> bool {
        (self.callback)(event, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::queue::EventQueue;
    use crate::input::state::InputState;

    #[test]
    fn test_suppress_selected_buttons() {
        let mut filter = ButtonSuppressFilter::all();
        assert!(filter.configure(&FilterSettings::new().with("indices", "1")));
        let mut queue: EventQueue =
            [InputEvent::button(0, 1), InputEvent::button(1, 1)].into_iter().collect();
        let mut state = InputState::new();
        assert!(filter.filter(&mut queue, &mut state));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.peek(), Some(&InputEvent::button(0, 1)));
    }

    #[test]
    fn test_bad_indices_rejected() {
        let mut filter = ButtonSuppressFilter::only([2]);
        assert!(!filter.configure(&FilterSettings::new().with("indices", "x")));
    }

    #[test]
    fn test_axis_scale() {
        let mut filter = AxisScaleFilter::default();
        assert!(filter.configure(&FilterSettings::new().with("scale", "2").with("offset", "1")));
        let mut queue: EventQueue = [InputEvent::axis(0, 0.5)].into_iter().collect();
        let mut state = InputState::new();
        assert!(filter.filter(&mut queue, &mut state));
        assert_eq!(state.axis(0), 2.0);
        assert!(!filter.configure(&FilterSettings::new().with("scale", "big")));
    }

    #[test]
    fn test_matrix_transform() {
        let mut filter = MatrixTransformFilter::new(Matrix4::translation(0.0, 0.0, 5.0), Matrix4::IDENTITY);
        let mut queue: EventQueue =
            [InputEvent::matrix(0, Matrix4::translation(1.0, 0.0, 0.0))].into_iter().collect();
        let mut state = InputState::new();
        assert!(filter.filter(&mut queue, &mut state));
        assert_eq!(state.matrix(0).translation_part(), [1.0, 0.0, 5.0]);
        assert!(!filter.configure(&FilterSettings::new().with("pre", "1 2 3")));
    }

    #[test]
    fn test_callback_can_insert() {
        let mut filter = CallbackFilter::new(|event, ctx| {
            if ctx.button(0) == 0 && event.button_value() == Some(1) {
                ctx.insert_event(InputEvent::axis(0, 1.0));
            }
            true
        });
        let mut queue: EventQueue = [InputEvent::button(0, 1)].into_iter().collect();
        let mut state = InputState::new();
        assert!(filter.filter(&mut queue, &mut state));
        assert_eq!(queue.len(), 2);
        assert_eq!(state.axis(0), 1.0);
    }
}
