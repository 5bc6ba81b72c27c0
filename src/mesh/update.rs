//! Per-frame mesh updates and their fixed-point quantization.

use nalgebra::DMatrix;
use std::ops::{BitOr, BitOrAssign};
use tableau_geom::{codec, CodecError};

use super::{hstack, MeshError};
use crate::{
    command::{self, Command},
    quantize::{QuantizeError, BIN_COUNT},
};

/// Which vertex attributes a [MeshUpdate] replaces, in buffer column order.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UpdateFlags(u32);

impl UpdateFlags {
    /// No attribute.
    pub const NONE: UpdateFlags = UpdateFlags(0);
    /// Vertex (or instance) positions.
    pub const POSITIONS: UpdateFlags = UpdateFlags(1);
    /// Vertex normals.
    pub const NORMALS: UpdateFlags = UpdateFlags(2);
    /// Vertex (or instance) colors.
    pub const COLORS: UpdateFlags = UpdateFlags(4);
    /// Instance rotations, for instanced meshes.
    pub const ROTATIONS: UpdateFlags = UpdateFlags(8);

    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn contains(self, other: UpdateFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for UpdateFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        UpdateFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for UpdateFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// A fixed-point delta from a keyframe.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantizedState {
    /// Frame index of the keyframe this delta is relative to.
    pub keyframe_index: u32,
    /// Delta value represented by `0`.
    pub min: f32,
    /// Delta value represented by `u16::MAX`.
    pub max: f32,
    pub buffer: DMatrix<u16>,
}

/// One frame of a base mesh's animation.
///
/// Updates start out at full precision; [crate::quantize] may later replace the full-precision
/// buffer in the command stream with a [QuantizedState].
#[derive(Debug, Clone, PartialEq)]
pub struct MeshUpdate {
    base_mesh_id: String,
    mesh_id: String,
    frame_index: u32,
    flags: UpdateFlags,
    vertex_buffer: DMatrix<f32>,
    /// Set for keyframes once a group has been quantized.
    keyframe_index: Option<u32>,
    quantized: Option<QuantizedState>,
}

impl MeshUpdate {
    /// Concatenate the present buffers side by side; every present buffer must have `rows` rows.
    pub(crate) fn new(
        base_mesh_id: String,
        mesh_id: String,
        frame_index: u32,
        rows: usize,
        buffers: &[(Option<&DMatrix<f32>>, UpdateFlags)],
    ) -> Result<Self, MeshError> {
        let mut parts = Vec::with_capacity(buffers.len());
        let mut flags = UpdateFlags::NONE;
        for &(buffer, flag) in buffers {
            let Some(buffer) = buffer.filter(|b| !b.is_empty()) else {
                continue;
            };
            if buffer.nrows() != rows {
                return Err(MeshError::RowCount {
                    attribute: "update",
                    expected: rows,
                    found: buffer.nrows(),
                });
            }
            parts.push(buffer);
            flags |= flag;
        }
        Ok(Self {
            base_mesh_id,
            mesh_id,
            frame_index,
            flags,
            vertex_buffer: hstack(rows, &parts),
            keyframe_index: None,
            quantized: None,
        })
    }

    #[inline]
    pub fn base_mesh_id(&self) -> &str {
        &self.base_mesh_id
    }

    #[inline]
    pub fn mesh_id(&self) -> &str {
        &self.mesh_id
    }

    #[inline]
    pub fn frame_index(&self) -> u32 {
        self.frame_index
    }

    #[inline]
    pub fn flags(&self) -> UpdateFlags {
        self.flags
    }

    /// The full-precision buffer, kept even after quantization.
    #[inline]
    pub fn vertex_buffer(&self) -> &DMatrix<f32> {
        &self.vertex_buffer
    }

    #[inline]
    pub fn quantized(&self) -> Option<&QuantizedState> {
        self.quantized.as_ref()
    }

    #[inline]
    pub fn is_quantized(&self) -> bool {
        self.quantized.is_some()
    }

    /// Whether the last quantization pass chose this update as a keyframe.
    #[inline]
    pub fn is_keyframe(&self) -> bool {
        self.keyframe_index == Some(self.frame_index)
    }

    /// Frame index of the keyframe this update was assigned to, if it has been quantized or
    /// chosen as a keyframe.
    #[inline]
    pub fn keyframe_index(&self) -> Option<u32> {
        self.keyframe_index
    }

    pub(crate) fn reset_quantization(&mut self) {
        self.keyframe_index = None;
        self.quantized = None;
    }

    pub(crate) fn mark_keyframe(&mut self) {
        self.keyframe_index = Some(self.frame_index);
        self.quantized = None;
    }

    fn difference(&self, keyframe: &DMatrix<f32>) -> Result<DMatrix<f32>, QuantizeError> {
        if self.vertex_buffer.shape() != keyframe.shape() {
            return Err(QuantizeError::ShapeMismatch {
                frame_index: self.frame_index,
                expected: keyframe.shape(),
                found: self.vertex_buffer.shape(),
            });
        }
        let diff = &self.vertex_buffer - keyframe;
        if diff.iter().any(|d| !d.is_finite()) {
            return Err(QuantizeError::NonFinite(self.frame_index));
        }
        Ok(diff)
    }

    /// `max - min` of the elementwise difference from `keyframe`.
    pub fn difference_range(&self, keyframe: &DMatrix<f32>) -> Result<f32, QuantizeError> {
        let diff = self.difference(keyframe)?;
        Ok(super::value_range(diff.iter().copied()))
    }

    /// Encode this update as a fixed-point delta from `keyframe`, over a window of width `range`
    /// centered on the delta's midpoint.
    pub fn quantize(
        &mut self,
        keyframe_index: u32,
        range: f32,
        keyframe: &DMatrix<f32>,
    ) -> Result<(), QuantizeError> {
        let diff = self.difference(keyframe)?;
        let (min, max) = diff
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &d| (lo.min(d), hi.max(d)));
        let (min, max) = if min > max { (0.0, 0.0) } else { (min, max) };
        if max - min > range {
            return Err(QuantizeError::RangeExceeded {
                frame_index: self.frame_index,
                range: max - min,
                limit: range,
            });
        }

        let center = 0.5 * (min + max);
        let min = center - 0.5 * range;
        let max = center + 0.5 * range;
        let scale = if range > 0.0 { BIN_COUNT / range } else { 0.0 };
        let buffer = diff.map(|d| ((d - min) * scale).round().clamp(0.0, BIN_COUNT) as u16);

        self.keyframe_index = Some(keyframe_index);
        self.quantized = Some(QuantizedState {
            keyframe_index,
            min,
            max,
            buffer,
        });
        Ok(())
    }

    /// The delta from the keyframe, decoded from the fixed-point buffer.
    pub fn unquantize(&self) -> Option<DMatrix<f32>> {
        let state = self.quantized.as_ref()?;
        let scale = (state.max - state.min) / BIN_COUNT;
        Some(state.buffer.map(|q| q as f32 * scale + state.min))
    }

    /// The `UpdateMesh` command for this update.
    pub fn to_command(&self) -> Result<Command, CodecError> {
        let mut update = command::UpdateMesh {
            base_mesh_id: self.base_mesh_id.clone(),
            mesh_id: self.mesh_id.clone(),
            frame_index: self.frame_index,
            update_flags: self.flags.bits(),
            keyframe_index: None,
            min_value: None,
            max_value: None,
            quantized_buffer: None,
            vertex_buffer: None,
        };
        match &self.quantized {
            Some(state) => {
                update.keyframe_index = Some(state.keyframe_index);
                update.min_value = Some(state.min);
                update.max_value = Some(state.max);
                update.quantized_buffer = Some(codec::matrix_to_base64(&state.buffer)?);
            }
            None => update.vertex_buffer = Some(codec::matrix_to_base64(&self.vertex_buffer)?),
        }
        Ok(Command::UpdateMesh(update))
    }
}
