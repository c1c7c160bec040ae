//! Matrix type shared by input events, transfer fields and scene-graph nodes.
//!
//! Matrices are column-major, 16 contiguous `f32`s, translation in
//! elements 12..15. This is also their wire layout.

use bytemuck::{Pod, Zeroable};
use std::fmt;
use std::ops::Mul;

/// 4x4 column-major float matrix.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Matrix4 {
    /// Elements in column-major order.
    pub v: [f32; 16],
}

impl Matrix4 {
    /// The identity matrix.
    pub const IDENTITY: Self = Self {
        v: [
            1.0, 0.0, 0.0, 0.0, //
            0.0, 1.0, 0.0, 0.0, //
            0.0, 0.0, 1.0, 0.0, //
            0.0, 0.0, 0.0, 1.0,
        ],
    };

    /// Creates a matrix from column-major elements.
    #[inline]
    #[must_use]
    pub const fn from_array(v: [f32; 16]) -> Self {
        Self { v }
    }

    /// Builds a matrix from a slice, returning `None` unless it holds exactly 16 floats.
    #[must_use]
    pub fn from_slice(values: &[f32]) -> Option<Self> {
        let v: [f32; 16] = values.try_into().ok()?;
        Some(Self { v })
    }

    /// Translation matrix.
    #[must_use]
    pub fn translation(x: f32, y: f32, z: f32) -> Self {
        let mut m = Self::IDENTITY;
        m.v[12] = x;
        m.v[13] = y;
        m.v[14] = z;
        m
    }

    /// Uniform scale matrix.
    #[must_use]
    pub fn scale(s: f32) -> Self {
        let mut m = Self::IDENTITY;
        m.v[0] = s;
        m.v[5] = s;
        m.v[10] = s;
        m
    }

    /// Returns the translation column.
    #[inline]
    #[must_use]
    pub const fn translation_part(&self) -> [f32; 3] {
        [self.v[12], self.v[13], self.v[14]]
    }

    /// Returns true if this is exactly the identity.
    #[inline]
    #[must_use]
    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }

    /// Elements as a slice.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        &self.v
    }
}

impl Default for Matrix4 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Mul for Matrix4 {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        let mut out = [0.0f32; 16];
        for col in 0..4 {
            for row in 0..4 {
                let mut sum = 0.0;
                for k in 0..4 {
                    sum += self.v[k * 4 + row] * rhs.v[col * 4 + k];
                }
                out[col * 4 + row] = sum;
            }
        }
        Self { v: out }
    }
}

impl fmt::Debug for Matrix4 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.v.iter()).finish()
    }
}

impl fmt::Display for Matrix4 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in 0..4 {
            writeln!(
                f,
                "{} {} {} {}",
                self.v[row],
                self.v[4 + row],
                self.v[8 + row],
                self.v[12 + row]
            )?;
        }
        Ok(())
    }
}
