// Cubic Bezier segments built from authored control points.
//
// Every control point stores a single tangent. Segment i runs from point i to
// point i+1; the start tangent of every segment after the first is mirrored so
// that one stored handle serves both sides of an interior point.

use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Tangent assigned by the "reset tangents" authoring helper.
pub const DEFAULT_TANGENT: Vec3 = Vec3::new(-1.0, 0.0, 1.0);

// ============================================================================
// CONTROL POINT
// ============================================================================

/// Authored anchor with a position and one tangent handle (local space).
///
/// `index` mirrors the point's slot in its path and is re-stamped on every
/// build; it is never a stable identifier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ControlPoint {
    pub index:    usize,
    pub position: Vec3,
    pub tangent:  Vec3,
}

impl ControlPoint {
    pub fn new(index: usize, position: Vec3, tangent: Vec3) -> Self {
        Self { index, position, tangent }
    }

    /// Control point with the default tangent handle.
    pub fn at(index: usize, position: Vec3) -> Self {
        Self::new(index, position, DEFAULT_TANGENT)
    }

    pub fn with_default_tangent(mut self) -> Self {
        self.tangent = DEFAULT_TANGENT;
        self
    }
}

// ============================================================================
// BEZIER SEGMENT
// ============================================================================

/// Cubic curve between two adjacent control points.
/// Handle offsets are relative to their endpoint, not absolute positions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BezierSegment {
    pub start:        Vec3,
    pub end:          Vec3,
    pub start_handle: Vec3,
    pub end_handle:   Vec3,
}

impl BezierSegment {
    pub fn new(start: Vec3, end: Vec3, start_handle: Vec3, end_handle: Vec3) -> Self {
        Self { start, end, start_handle, end_handle }
    }

    /// Evaluate the curve at `t` (clamped to [0, 1]).
    ///
    /// Standard cubic blend of the four control positions
    /// `start`, `start + start_handle`, `end + end_handle`, `end`.
    pub fn evaluate(&self, t: f32) -> Vec3 {
        let t = t.clamp(0.0, 1.0);
        let u = 1.0 - t;

        let p0 = self.start;
        let p1 = self.start + self.start_handle;
        let p2 = self.end + self.end_handle;
        let p3 = self.end;

        u * u * u * p0
            + 3.0 * u * u * t * p1
            + 3.0 * u * t * t * p2
            + t * t * t * p3
    }
}

// ============================================================================
// CURVE BUILDER
// ============================================================================

/// Build one segment per adjacent control point pair.
/// Fewer than two points yields no segments.
pub fn build_segments(points: &[ControlPoint]) -> Vec<BezierSegment> {
    if points.len() < 2 {
        return Vec::new();
    }

    points
        .windows(2)
        .enumerate()
        .map(|(i, pair)| {
            let (start, end) = (pair[0], pair[1]);
            // Interior points reuse their tangent mirrored as the outgoing handle.
            let start_handle = if i > 0 { -start.tangent } else { start.tangent };
            BezierSegment::new(start.position, end.position, start_handle, end.tangent)
        })
        .collect()
}

/// Rewrite every point's `index` to match its slot.
pub fn restamp_indices(points: &mut [ControlPoint]) {
    for (i, point) in points.iter_mut().enumerate() {
        point.index = i;
    }
}
