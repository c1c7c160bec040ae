//! # Input State
//!
//! Current value of every button, axis and matrix, kept in step with the
//! event stream.
//!
//! ## Design
//!
//! - Three arrays sized by a signature
//! - Reads past the end return defaults (0, 0.0, identity)
//! - Writes past the end grow the arrays
//! - Previous button values kept for edge detection
//! - Per-device offset tables so several sources share one index space

use crate::input::event::{EventKind, EventValue, InputEvent};
use crate::input::queue::{EventBuffers, EventQueue, Signature};
use crate::math::Matrix4;

/// Mirrored input state.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InputState {
    buttons: Vec<i32>,
    last_buttons: Vec<i32>,
    axes: Vec<f32>,
    matrices: Vec<Matrix4>,
    devices: Vec<Signature>,
}

impl InputState {
    /// Creates an empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a state sized by `signature`, all values at defaults.
    #[must_use]
    pub fn with_signature(signature: Signature) -> Self {
        let mut state = Self::new();
        state.set_signature(signature);
        state
    }

    /// Number of buttons.
    #[inline]
    #[must_use]
    pub fn button_count(&self) -> u32 {
        self.buttons.len() as u32
    }

    /// Number of axes.
    #[inline]
    #[must_use]
    pub fn axis_count(&self) -> u32 {
        self.axes.len() as u32
    }

    /// Number of matrices.
    #[inline]
    #[must_use]
    pub fn matrix_count(&self) -> u32 {
        self.matrices.len() as u32
    }

    /// Current signature.
    #[must_use]
    pub fn signature(&self) -> Signature {
        Signature::new(self.button_count(), self.axis_count(), self.matrix_count())
    }

    /// Button value, or 0 past the end.
    #[inline]
    #[must_use]
    pub fn button(&self, index: u32) -> i32 {
        self.buttons.get(index as usize).copied().unwrap_or(0)
    }

    /// Axis value, or 0.0 past the end.
    #[inline]
    #[must_use]
    pub fn axis(&self, index: u32) -> f32 {
        self.axes.get(index as usize).copied().unwrap_or(0.0)
    }

    /// Matrix value, or identity past the end.
    #[inline]
    #[must_use]
    pub fn matrix(&self, index: u32) -> Matrix4 {
        self.matrices.get(index as usize).copied().unwrap_or(Matrix4::IDENTITY)
    }

    /// Previous value of a button, or 0 past the end.
    #[inline]
    #[must_use]
    pub fn last_button(&self, index: u32) -> i32 {
        self.last_buttons.get(index as usize).copied().unwrap_or(0)
    }

    /// True if the button went from released to pressed on its last change.
    #[must_use]
    pub fn on_button(&self, index: u32) -> bool {
        self.button(index) != 0 && self.last_button(index) == 0
    }

    /// True if the button went from pressed to released on its last change.
    #[must_use]
    pub fn off_button(&self, index: u32) -> bool {
        self.button(index) == 0 && self.last_button(index) != 0
    }

    /// Sets a button, remembering its previous value.
    pub fn set_button(&mut self, index: u32, value: i32) {
        let i = index as usize;
        if i >= self.buttons.len() {
            self.buttons.resize(i + 1, 0);
            self.last_buttons.resize(i + 1, 0);
        }
        self.last_buttons[i] = self.buttons[i];
        self.buttons[i] = value;
    }

    /// Sets an axis.
    pub fn set_axis(&mut self, index: u32, value: f32) {
        let i = index as usize;
        if i >= self.axes.len() {
            self.axes.resize(i + 1, 0.0);
        }
        self.axes[i] = value;
    }

    /// Sets a matrix.
    pub fn set_matrix(&mut self, index: u32, value: Matrix4) {
        let i = index as usize;
        if i >= self.matrices.len() {
            self.matrices.resize(i + 1, Matrix4::IDENTITY);
        }
        self.matrices[i] = value;
    }

    /// Copies current button values into the previous-value array.
    pub fn update_last_buttons(&mut self) {
        self.last_buttons.clone_from(&self.buttons);
    }

    /// Resets one slot to its default value.
    pub fn clear_slot(&mut self, kind: EventKind, index: u32) {
        match kind {
            EventKind::Button => {
                if (index as usize) < self.buttons.len() {
                    self.set_button(index, 0);
                }
            }
            EventKind::Axis => {
                if (index as usize) < self.axes.len() {
                    self.set_axis(index, 0.0);
                }
            }
            EventKind::Matrix => {
                if (index as usize) < self.matrices.len() {
                    self.set_matrix(index, Matrix4::IDENTITY);
                }
            }
        }
    }

    /// Applies one event. Garbage events clear the slot they name.
    pub fn update(&mut self, event: &InputEvent) {
        if event.is_garbage() {
            tracing::debug!(target: "szg::input", "clearing slot for {}", event);
            self.clear_slot(event.kind(), event.index());
            return;
        }
        match event.value() {
            EventValue::Button(v) => self.set_button(event.index(), v),
            EventValue::Axis(v) => self.set_axis(event.index(), v),
            EventValue::Matrix(m) => self.set_matrix(event.index(), m),
        }
    }

    /// Applies every event of a queue in order.
    pub fn update_queue(&mut self, queue: &EventQueue) {
        for event in queue {
            self.update(event);
        }
    }

    /// Resizes all arrays and resets every value to its default.
    pub fn set_signature(&mut self, signature: Signature) {
        self.buttons = vec![0; signature.buttons as usize];
        self.last_buttons = vec![0; signature.buttons as usize];
        self.axes = vec![0.0; signature.axes as usize];
        self.matrices = vec![Matrix4::IDENTITY; signature.matrices as usize];
    }

    /// Number of registered devices.
    #[inline]
    #[must_use]
    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Registers a device after all existing ones and grows the arrays to fit.
    ///
    /// Returns the device number.
    pub fn add_input_device(&mut self, signature: Signature) -> usize {
        self.devices.push(signature);
        self.grow_to_devices();
        self.devices.len() - 1
    }

    /// Changes a device's signature, shifting the channels of later devices.
    ///
    /// Values of the remapped device are reset; later devices keep theirs.
    pub fn remap_input_device(&mut self, device: usize, signature: Signature) -> bool {
        let Some(old) = self.devices.get(device).copied() else {
            tracing::warn!(target: "szg::input", "no input device {device} to remap");
            return false;
        };
        let start = self.device_offset(device);
        remap_block(&mut self.buttons, start.buttons, old.buttons, signature.buttons, 0);
        remap_block(&mut self.last_buttons, start.buttons, old.buttons, signature.buttons, 0);
        remap_block(&mut self.axes, start.axes, old.axes, signature.axes, 0.0);
        remap_block(
            &mut self.matrices,
            start.matrices,
            old.matrices,
            signature.matrices,
            Matrix4::IDENTITY,
        );
        self.devices[device] = signature;
        true
    }

    /// Signature of one device.
    #[must_use]
    pub fn device_signature(&self, device: usize) -> Option<Signature> {
        self.devices.get(device).copied()
    }

    /// First channel of each kind owned by `device`.
    #[must_use]
    pub fn device_offset(&self, device: usize) -> Signature {
        self.devices
            .iter()
            .take(device)
            .fold(Signature::default(), |acc, s| acc.add(*s))
    }

    /// First button index of a device.
    #[must_use]
    pub fn button_offset(&self, device: usize) -> u32 {
        self.device_offset(device).buttons
    }

    /// First axis index of a device.
    #[must_use]
    pub fn axis_offset(&self, device: usize) -> u32 {
        self.device_offset(device).axes
    }

    /// First matrix index of a device.
    #[must_use]
    pub fn matrix_offset(&self, device: usize) -> u32 {
        self.device_offset(device).matrices
    }

    /// Snapshot as parallel arrays: one event per slot.
    #[must_use]
    pub fn to_buffers(&self) -> EventBuffers {
        let mut queue = EventQueue::new();
        for (i, v) in self.buttons.iter().enumerate() {
            queue.append_event(InputEvent::button(i as u32, *v));
        }
        for (i, v) in self.axes.iter().enumerate() {
            queue.append_event(InputEvent::axis(i as u32, *v));
        }
        for (i, m) in self.matrices.iter().enumerate() {
            queue.append_event(InputEvent::matrix(i as u32, *m));
        }
        queue.to_buffers()
    }

    /// Replaces every value from a snapshot made by `to_buffers`.
    pub fn from_buffers(&mut self, buffers: &EventBuffers) -> crate::error::InputResult<()> {
        let queue = EventQueue::from_buffers(buffers, Signature::default())?;
        self.set_signature(queue.signature());
        self.update_queue(&queue);
        self.update_last_buttons();
        Ok(())
    }

    fn grow_to_devices(&mut self) {
        let total = self.device_offset(self.devices.len());
        if self.buttons.len() < total.buttons as usize {
            self.buttons.resize(total.buttons as usize, 0);
            self.last_buttons.resize(total.buttons as usize, 0);
        }
        if self.axes.len() < total.axes as usize {
            self.axes.resize(total.axes as usize, 0.0);
        }
        if self.matrices.len() < total.matrices as usize {
            self.matrices.resize(total.matrices as usize, Matrix4::IDENTITY);
        }
    }
}

/// Replaces `old_len` elements at `start` with `new_len` defaults.
fn remap_block<T: Clone>(values: &mut Vec<T>, start: u32, old_len: u32, new_len: u32, fill: T) {
    let start = (start as usize).min(values.len());
    let end = (start + old_len as usize).min(values.len());
    values.splice(start..end, std::iter::repeat(fill).take(new_len as usize));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_past_end() {
        let state = InputState::new();
        assert_eq!(state.button(10), 0);
        assert_eq!(state.axis(10), 0.0);
        assert_eq!(state.matrix(10), Matrix4::IDENTITY);
    }

    #[test]
    fn test_button_edges() {
        let mut state = InputState::new();
        state.set_button(1, 1);
        assert!(state.on_button(1));
        state.set_button(1, 0);
        assert!(state.off_button(1));
        assert!(!state.on_button(1));
    }

    #[test]
    fn test_set_signature_resets() {
        let mut state = InputState::new();
        state.set_axis(0, 3.0);
        state.set_signature(Signature::new(2, 2, 1));
        assert_eq!(state.axis(0), 0.0);
        assert_eq!(state.signature(), Signature::new(2, 2, 1));
    }

    #[test]
    fn test_garbage_clears_slot() {
        let mut state = InputState::new();
        state.set_matrix(0, Matrix4::translation(1.0, 2.0, 3.0));
        state.update(&InputEvent::garbage(EventKind::Matrix, 0));
        assert_eq!(state.matrix(0), Matrix4::IDENTITY);
    }

    #[test]
    fn test_device_offsets() {
        let mut state = InputState::new();
        assert_eq!(state.add_input_device(Signature::new(2, 1, 1)), 0);
        assert_eq!(state.add_input_device(Signature::new(3, 0, 2)), 1);
        assert_eq!(state.button_offset(1), 2);
        assert_eq!(state.matrix_offset(1), 1);
        assert_eq!(state.signature(), Signature::new(5, 1, 3));
    }

    #[test]
    fn test_remap_shifts_later_devices() {
        let mut state = InputState::new();
        state.add_input_device(Signature::new(1, 0, 0));
        state.add_input_device(Signature::new(1, 0, 0));
        state.set_button(1, 7);
        assert!(state.remap_input_device(0, Signature::new(3, 0, 0)));
        assert_eq!(state.button_offset(1), 3);
        assert_eq!(state.button(3), 7);
        assert_eq!(state.button_count(), 4);
        assert!(!state.remap_input_device(5, Signature::default()));
    }

    #[test]
    fn test_buffers_snapshot() {
        let mut state = InputState::new();
        state.set_button(0, 1);
        state.set_axis(1, 0.5);
        state.set_matrix(0, Matrix4::scale(2.0));
        let mut copy = InputState::new();
        copy.from_buffers(&state.to_buffers()).unwrap();
        assert_eq!(copy.button(0), 1);
        assert_eq!(copy.axis(1), 0.5);
        assert_eq!(copy.matrix(0), Matrix4::scale(2.0));
        assert_eq!(copy.signature(), state.signature());
    }
}
