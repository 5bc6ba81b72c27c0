//! Keyframe selection and fixed-point delta compression of mesh animations.
//!
//! Every update of a base mesh is either a keyframe, stored at full precision, or a 16-bit delta
//! from a keyframe. Keyframes are chosen greedily: starting from the first frame, the frame worst
//! served by the current keyframes is promoted until every frame is within the representable
//! range of its nearest keyframe.

use nalgebra::DMatrix;
use std::{
    cmp::Ordering,
    collections::{BinaryHeap, HashMap},
    fmt,
};

use crate::mesh::MeshUpdate;

/// Number of fixed-point steps between the minimum and maximum of a quantized delta.
pub const BIN_COUNT: f32 = u16::MAX as f32;

#[derive(Debug, thiserror::Error)]
pub enum QuantizeError {
    #[error("at least one error threshold must be positive")]
    NoPositiveThreshold,
    #[error("representable range {0} must be finite and non-negative")]
    InvalidRange(f32),
    #[error("there are no updates to quantize")]
    NoUpdates,
    #[error("frame {frame_index} has shape {found:?}; its keyframe has shape {expected:?}")]
    ShapeMismatch {
        frame_index: u32,
        expected: (usize, usize),
        found: (usize, usize),
    },
    #[error("frame {0} differs from its keyframe by a non-finite value")]
    NonFinite(u32),
    #[error("frame {frame_index} spans {range}, which exceeds the quantization window {limit}")]
    RangeExceeded {
        frame_index: u32,
        range: f32,
        limit: f32,
    },
}

/// Options for [crate::Scene::quantize_updates].
#[derive(Debug, Clone, PartialEq)]
pub struct QuantizeOptions {
    /// Maximum error, relative to the value range of the base mesh. Non-positive to disable.
    pub relative_error_threshold: f32,
    /// Maximum absolute error. Non-positive to disable.
    pub absolute_error_threshold: f32,
    /// Only quantize updates of this mesh.
    pub base_mesh_id: Option<String>,
    /// Give each delta its own window instead of sharing the representable range.
    pub per_frame_range: bool,
}

impl Default for QuantizeOptions {
    fn default() -> Self {
        Self {
            relative_error_threshold: 1e-5,
            absolute_error_threshold: -1.0,
            base_mesh_id: None,
            per_frame_range: true,
        }
    }
}

/// Which keyframe a frame was assigned to, and how far it is from it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyframeAssignment {
    pub frame_index: u32,
    pub keyframe_index: u32,
    pub range: f32,
}

impl KeyframeAssignment {
    #[inline]
    pub fn is_keyframe(&self) -> bool {
        self.frame_index == self.keyframe_index
    }
}

/// Heap entry; the widest range is on top, ties broken by the earlier frame.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    position: usize,
    assignment: KeyframeAssignment,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.assignment
            .range
            .total_cmp(&other.assignment.range)
            .then_with(|| other.position.cmp(&self.position))
    }
}

/// Summary of one quantized group of updates.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantizationInfo {
    pub keyframe_count: u32,
    /// Estimated size of the quantized buffers relative to the full-precision ones.
    pub estimated_size_ratio: f32,
    pub mean_error: f32,
    pub max_error: f32,
    /// One entry per update, in frame order.
    pub assignments: Vec<KeyframeAssignment>,
}

impl fmt::Display for QuantizationInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "QuantizationInfo(keyframe_count={}, estimated_size_ratio={}, mean_error={}, max_error={})",
            self.keyframe_count, self.estimated_size_ratio, self.mean_error, self.max_error
        )
    }
}

/// The total value span a delta may cover while keeping each quantization step within the
/// thresholds. `mesh_range` is the value range of the base mesh.
pub fn compute_representable_range(
    relative_error_threshold: f32,
    absolute_error_threshold: f32,
    mesh_range: f32,
) -> Result<f32, QuantizeError> {
    let relative_range = BIN_COUNT * relative_error_threshold * mesh_range;
    let absolute_range = BIN_COUNT * absolute_error_threshold;
    match (relative_error_threshold > 0.0, absolute_error_threshold > 0.0) {
        (true, true) => Ok(relative_range.min(absolute_range)),
        (true, false) => Ok(relative_range),
        (false, true) => Ok(absolute_range),
        (false, false) => Err(QuantizeError::NoPositiveThreshold),
    }
}

/// Keyframes cost four bytes per value, deltas two; shared windows compress about a quarter
/// better.
pub fn estimate_size_ratio(keyframe_count: usize, update_count: usize, per_frame_range: bool) -> f32 {
    if update_count == 0 {
        return 1.0;
    }
    let keyframe_size = keyframe_count as f32 * 4.0;
    let mut delta_size = (update_count - keyframe_count) as f32 * 2.0;
    if !per_frame_range {
        delta_size *= 0.75;
    }
    (keyframe_size + delta_size) / (update_count as f32 * 4.0)
}

fn assignment(
    updates: &[&mut MeshUpdate],
    position: usize,
    keyframe: usize,
) -> Result<KeyframeAssignment, QuantizeError> {
    Ok(KeyframeAssignment {
        frame_index: updates[position].frame_index(),
        keyframe_index: updates[keyframe].frame_index(),
        range: updates[position].difference_range(updates[keyframe].vertex_buffer())?,
    })
}

/// Choose keyframes for `updates` (all of one base mesh, in frame order) and quantize every other
/// update against its keyframe.
///
/// Any previous quantization of these updates is discarded first.
#[tracing::instrument(skip(updates), fields(updates = updates.len()))]
pub fn quantize_updates_for_mesh(
    representable_range: f32,
    updates: &mut [&mut MeshUpdate],
    per_frame_range: bool,
) -> Result<QuantizationInfo, QuantizeError> {
    if !representable_range.is_finite() || representable_range < 0.0 {
        return Err(QuantizeError::InvalidRange(representable_range));
    }
    if updates.is_empty() {
        return Err(QuantizeError::NoUpdates);
    }
    for update in updates.iter_mut() {
        update.reset_quantization();
    }

    let mut assignments = (0..updates.len())
        .map(|position| assignment(updates, position, 0))
        .collect::<Result<Vec<_>, _>>()?;
    // position of each update's keyframe
    let mut keyframe_of = vec![0usize; updates.len()];

    loop {
        let worst = assignments
            .iter()
            .enumerate()
            .map(|(position, &assignment)| Candidate {
                position,
                assignment,
            })
            .collect::<BinaryHeap<_>>()
            .pop();
        let Some(worst) = worst.filter(|c| c.assignment.range > representable_range) else {
            break;
        };

        let keyframe = worst.position;
        tracing::debug!(
            frame = worst.assignment.frame_index,
            range = worst.assignment.range,
            "promoting keyframe"
        );
        for position in 0..updates.len() {
            let candidate = assignment(updates, position, keyframe)?;
            if candidate.range < assignments[position].range || position == keyframe {
                assignments[position] = candidate;
                keyframe_of[position] = keyframe;
            }
        }
    }

    let mut keyframe_buffers = HashMap::<usize, DMatrix<f32>>::new();
    let mut keyframe_count = 0;
    let mut error_sum = 0.0;
    let mut max_error = 0.0f32;
    for (position, assignment) in assignments.iter().enumerate() {
        let keyframe = keyframe_of[position];
        if keyframe == position {
            keyframe_count += 1;
            updates[position].mark_keyframe();
            continue;
        }

        let keyframe_buffer = keyframe_buffers
            .entry(keyframe)
            .or_insert_with(|| updates[keyframe].vertex_buffer().clone());
        let frame_range = if per_frame_range {
            assignment.range
        } else {
            representable_range
        };

        let error = frame_range / BIN_COUNT;
        error_sum += error;
        max_error = max_error.max(error);
        updates[position].quantize(assignment.keyframe_index, frame_range, keyframe_buffer)?;
    }

    let delta_count = updates.len() - keyframe_count as usize;
    let info = QuantizationInfo {
        keyframe_count,
        estimated_size_ratio: estimate_size_ratio(
            keyframe_count as usize,
            updates.len(),
            per_frame_range,
        ),
        mean_error: if delta_count == 0 {
            0.0
        } else {
            error_sum / delta_count as f32
        },
        max_error,
        assignments,
    };
    tracing::debug!(%info, "quantized mesh updates");
    Ok(info)
}
