//! # Input Events
//!
//! A single change on one input channel.
//!
//! ## Design
//!
//! - Three channel kinds: button (`i32`), axis (`f32`), matrix (`Matrix4`)
//! - `index` is the channel number within its kind
//! - A garbage event keeps its kind and index so a mirrored state can clear
//!   the slot it refers to

use std::fmt;

use crate::math::Matrix4;

/// Kind of input channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EventKind {
    /// Digital button.
    Button = 0,
    /// Analog axis.
    Axis = 1,
    /// Tracker matrix.
    Matrix = 2,
}

impl EventKind {
    /// Decodes a wire tag.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Button),
            1 => Some(Self::Axis),
            2 => Some(Self::Matrix),
            _ => None,
        }
    }

    /// Lower-case name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Button => "button",
            Self::Axis => "axis",
            Self::Matrix => "matrix",
        }
    }
}

/// Payload of an event.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum EventValue {
    /// Button state.
    Button(i32),
    /// Axis value.
    Axis(f32),
    /// Matrix value.
    Matrix(Matrix4),
}

impl EventValue {
    /// Kind of channel this value belongs to.
    #[inline]
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Button(_) => EventKind::Button,
            Self::Axis(_) => EventKind::Axis,
            Self::Matrix(_) => EventKind::Matrix,
        }
    }

    /// The reset value for a kind: 0, 0.0 or identity.
    #[must_use]
    pub const fn zero(kind: EventKind) -> Self {
        match kind {
            EventKind::Button => Self::Button(0),
            EventKind::Axis => Self::Axis(0.0),
            EventKind::Matrix => Self::Matrix(Matrix4::IDENTITY),
        }
    }
}

/// One input event.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InputEvent {
    index: u32,
    value: EventValue,
    garbage: bool,
}

impl InputEvent {
    /// Button event.
    #[must_use]
    pub const fn button(index: u32, value: i32) -> Self {
        Self { index, value: EventValue::Button(value), garbage: false }
    }

    /// Axis event.
    #[must_use]
    pub const fn axis(index: u32, value: f32) -> Self {
        Self { index, value: EventValue::Axis(value), garbage: false }
    }

    /// Matrix event.
    #[must_use]
    pub const fn matrix(index: u32, value: Matrix4) -> Self {
        Self { index, value: EventValue::Matrix(value), garbage: false }
    }

    /// Event from a kind and value.
    #[must_use]
    pub const fn new(index: u32, value: EventValue) -> Self {
        Self { index, value, garbage: false }
    }

    /// Garbage event invalidating one channel.
    #[must_use]
    pub const fn garbage(kind: EventKind, index: u32) -> Self {
        Self { index, value: EventValue::zero(kind), garbage: true }
    }

    /// Channel number.
    #[inline]
    #[must_use]
    pub const fn index(&self) -> u32 {
        self.index
    }

    /// Moves the event to another channel number.
    #[inline]
    pub fn set_index(&mut self, index: u32) {
        self.index = index;
    }

    /// Channel kind.
    #[inline]
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        self.value.kind()
    }

    /// Payload.
    #[inline]
    #[must_use]
    pub const fn value(&self) -> EventValue {
        self.value
    }

    /// Returns true once trashed or created as garbage.
    #[inline]
    #[must_use]
    pub const fn is_garbage(&self) -> bool {
        self.garbage
    }

    /// Button value, or `None` for other kinds.
    #[must_use]
    pub const fn button_value(&self) -> Option<i32> {
        match self.value {
            EventValue::Button(v) => Some(v),
            _ => None,
        }
    }

    /// Axis value, or `None` for other kinds.
    #[must_use]
    pub const fn axis_value(&self) -> Option<f32> {
        match self.value {
            EventValue::Axis(v) => Some(v),
            _ => None,
        }
    }

    /// Matrix value, or `None` for other kinds.
    #[must_use]
    pub const fn matrix_value(&self) -> Option<Matrix4> {
        match self.value {
            EventValue::Matrix(v) => Some(v),
            _ => None,
        }
    }

    /// Replaces a button value. Ignored if the kind differs.
    pub fn set_button(&mut self, value: i32) -> bool {
        if let EventValue::Button(v) = &mut self.value {
            *v = value;
            return true;
        }
        false
    }

    /// Replaces an axis value. Ignored if the kind differs.
    pub fn set_axis(&mut self, value: f32) -> bool {
        if let EventValue::Axis(v) = &mut self.value {
            *v = value;
            return true;
        }
        false
    }

    /// Replaces a matrix value. Ignored if the kind differs.
    pub fn set_matrix(&mut self, value: Matrix4) -> bool {
        if let EventValue::Matrix(v) = &mut self.value {
            *v = value;
            return true;
        }
        false
    }

    /// Resets the payload to the zero value of its kind.
    pub fn zero(&mut self) {
        self.value = EventValue::zero(self.kind());
    }

    /// Discards the event. The kind and index survive so the slot can be cleared.
    pub fn trash(&mut self) {
        self.zero();
        self.garbage = true;
    }
}

impl fmt::Display for InputEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.garbage {
            return write!(f, "GARBAGE[{}]", self.index);
        }
        match self.value {
            EventValue::Button(v) => write!(f, "BUTTON[{}]: {}", self.index, v),
            EventValue::Axis(v) => write!(f, "AXIS[{}]: {}", self.index, v),
            EventValue::Matrix(m) => write!(f, "MATRIX[{}]:\n{}", self.index, m),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trash_keeps_kind_and_index() {
        let mut event = InputEvent::matrix(2, Matrix4::translation(1.0, 1.0, 1.0));
        event.trash();
        assert!(event.is_garbage());
        assert_eq!(event.kind(), EventKind::Matrix);
        assert_eq!(event.index(), 2);
        assert_eq!(event.matrix_value(), Some(Matrix4::IDENTITY));
    }

    #[test]
    fn test_setters_respect_kind() {
        let mut event = InputEvent::button(0, 1);
        assert!(!event.set_axis(0.5));
        assert!(event.set_button(0));
        assert_eq!(event.button_value(), Some(0));
    }

    #[test]
    fn test_display() {
        assert_eq!(InputEvent::button(3, 1).to_string(), "BUTTON[3]: 1");
        assert_eq!(InputEvent::axis(1, 0.5).to_string(), "AXIS[1]: 0.5");
        assert_eq!(InputEvent::garbage(EventKind::Axis, 4).to_string(), "GARBAGE[4]");
    }
}
