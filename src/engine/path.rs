// Path geometry: authored control points plus the derived segments, sample
// table and length, and the queries travelers and meshes run against them.
//
// All derived data lives in local space. `PathTransform` is the only place
// local <-> world conversion happens.

use glam::{Affine3A, Quat, Vec3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::curve::{build_segments, restamp_indices, BezierSegment, ControlPoint};
use super::junction::{NodeId, NodeLink};
use super::resample::{resample, SamplePoint, SamplingConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PathError {
    /// The sample table has fewer than two entries.
    #[error("path has fewer than two sample points")]
    EmptyPath,
    #[error("control point index {index} out of range ({count} points)")]
    ControlPointOutOfRange { index: usize, count: usize },
}

// ============================================================================
// TRANSFORM
// ============================================================================

/// Placement of a path in the world.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PathTransform {
    pub translation: Vec3,
    pub rotation:    Quat,
    pub scale:       Vec3,
}

impl Default for PathTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl PathTransform {
    pub const IDENTITY: Self = Self {
        translation: Vec3::ZERO,
        rotation:    Quat::IDENTITY,
        scale:       Vec3::ONE,
    };

    pub fn from_translation(translation: Vec3) -> Self {
        Self { translation, ..Self::IDENTITY }
    }

    pub fn with_rotation(mut self, rotation: Quat) -> Self {
        self.rotation = rotation;
        self
    }

    fn affine(&self) -> Affine3A {
        Affine3A::from_scale_rotation_translation(self.scale, self.rotation, self.translation)
    }

    pub fn to_world(&self, local: Vec3) -> Vec3 {
        self.affine().transform_point3(local)
    }

    pub fn to_local(&self, world: Vec3) -> Vec3 {
        self.affine().inverse().transform_point3(world)
    }

    /// Map a direction (no translation) into world space.
    pub fn vector_to_world(&self, local: Vec3) -> Vec3 {
        self.affine().transform_vector3(local)
    }

    pub fn vector_to_local(&self, world: Vec3) -> Vec3 {
        self.affine().inverse().transform_vector3(world)
    }
}

// ============================================================================
// PATH GEOMETRY
// ============================================================================

/// A single authored curve plus its derived sample table.
#[derive(Debug, Clone, Default)]
pub struct PathGeometry {
    control_points: Vec<ControlPoint>,
    config:         SamplingConfig,
    build_on_awake: bool,
    transform:      PathTransform,

    segments: Vec<BezierSegment>,
    samples:  Vec<SamplePoint>,
    length:   f32,

    /// This path's record of the junction nodes attached to its points.
    links: Vec<NodeLink>,
}

impl PathGeometry {
    pub fn new(control_points: Vec<ControlPoint>, config: SamplingConfig) -> Self {
        let mut path = Self { control_points, config, ..Self::default() };
        restamp_indices(&mut path.control_points);
        path
    }

    pub fn with_transform(mut self, transform: PathTransform) -> Self {
        self.transform = transform;
        self
    }

    /// Authoring entry point: replace config and points in one call.
    /// Builds immediately when `build_on_awake` is set.
    pub fn set(
        &mut self,
        build_on_awake: bool,
        spacing: f32,
        resolution: f32,
        control_points: Vec<ControlPoint>,
    ) {
        self.build_on_awake = build_on_awake;
        self.config = SamplingConfig::new(spacing, resolution);
        self.control_points = control_points;

        if build_on_awake {
            self.build();
        }
    }

    /// Recompute segments, samples, length and percentages.
    ///
    /// Everything is computed into locals and swapped in at the end, so the
    /// path is never observed half rebuilt. Returns the new sample table.
    pub fn build(&mut self) -> &[SamplePoint] {
        restamp_indices(&mut self.control_points);

        let segments = build_segments(&self.control_points);
        let first = self.control_points.first().map(|p| p.position).unwrap_or(Vec3::ZERO);
        let table = resample(first, &segments, self.config);

        self.segments = segments;
        self.samples = table.samples;
        self.length = table.length;

        log::debug!(
            "path rebuilt: {} points, {} segments, {} samples, length {:.3}",
            self.control_points.len(),
            self.segments.len(),
            self.samples.len(),
            self.length,
        );

        &self.samples
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub fn control_points(&self) -> &[ControlPoint] { &self.control_points }
    pub fn segments(&self) -> &[BezierSegment] { &self.segments }
    pub fn samples(&self) -> &[SamplePoint] { &self.samples }
    pub fn length(&self) -> f32 { self.length }
    pub fn config(&self) -> SamplingConfig { self.config }
    pub fn build_on_awake(&self) -> bool { self.build_on_awake }
    pub fn transform(&self) -> &PathTransform { &self.transform }
    pub fn links(&self) -> &[NodeLink] { &self.links }

    pub fn set_transform(&mut self, transform: PathTransform) {
        self.transform = transform;
    }

    pub fn set_config(&mut self, config: SamplingConfig) {
        self.config = config;
    }

    pub fn set_build_on_awake(&mut self, build_on_awake: bool) {
        self.build_on_awake = build_on_awake;
    }

    // ------------------------------------------------------------------------
    // Control point editing
    // ------------------------------------------------------------------------

    /// Apply `update` to the control point at `index` in place.
    /// Does not rebuild; the caller decides when to call `build()`.
    pub fn update_control_point(
        &mut self,
        index: usize,
        update: impl FnOnce(&mut ControlPoint),
    ) -> Result<(), PathError> {
        let count = self.control_points.len();
        let point = self
            .control_points
            .get_mut(index)
            .ok_or(PathError::ControlPointOutOfRange { index, count })?;
        update(point);
        point.index = index;
        Ok(())
    }

    pub fn push_control_point(&mut self, position: Vec3, tangent: Vec3) -> usize {
        let index = self.control_points.len();
        self.control_points.push(ControlPoint::new(index, position, tangent));
        index
    }

    /// Move a control point so it sits at `world` in world space.
    pub fn set_control_point_world_position(&mut self, index: usize, world: Vec3) -> Result<(), PathError> {
        let local = self.transform.to_local(world);
        self.update_control_point(index, |point| point.position = local)
    }

    /// Reset every tangent to the default handle.
    pub fn reset_tangents(&mut self) {
        for point in &mut self.control_points {
            *point = point.with_default_tangent();
        }
    }

    // ------------------------------------------------------------------------
    // Node links (mutated by the junction graph only)
    // ------------------------------------------------------------------------

    pub(crate) fn link_at_index(&self, control_point_index: usize) -> Option<&NodeLink> {
        self.links.iter().find(|l| l.control_point_index == control_point_index)
    }

    pub(crate) fn link_to_node(&self, node: NodeId) -> Option<&NodeLink> {
        self.links.iter().find(|l| l.node == node)
    }

    pub(crate) fn push_link(&mut self, link: NodeLink) {
        self.links.push(link);
    }

    /// Remove every link matching `predicate`; returns how many went.
    pub(crate) fn remove_links(&mut self, predicate: impl Fn(&NodeLink) -> bool) -> usize {
        let before = self.links.len();
        self.links.retain(|l| !predicate(l));
        before - self.links.len()
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    fn require_samples(&self) -> Result<&[SamplePoint], PathError> {
        if self.samples.len() < 2 {
            Err(PathError::EmptyPath)
        } else {
            Ok(&self.samples)
        }
    }

    /// Interpolated sample at `percentage` (clamped to [0, 1]).
    ///
    /// Treats the table as uniformly percentage-spaced, which holds up to the
    /// resampling spacing. `1.0` returns the last sample unchanged.
    pub fn sample_at_percentage(&self, percentage: f32) -> Result<SamplePoint, PathError> {
        let samples = self.require_samples()?;
        let percentage = percentage.clamp(0.0, 1.0);
        let last = samples.len() - 1;

        if percentage >= 1.0 {
            return Ok(samples[last]);
        }

        let position = percentage * last as f32;
        let lower = (position.floor() as usize).min(last);
        let upper = (lower + 1).min(last);
        let fraction = position - lower as f32;

        let a = samples[lower];
        let b = samples[upper];
        Ok(SamplePoint {
            local_position: a.local_position.lerp(b.local_position, fraction),
            forward:        a.forward.lerp(b.forward, fraction),
            percentage,
        })
    }

    /// World-space position at `percentage`.
    pub fn world_position_at_percentage(&self, percentage: f32) -> Result<Vec3, PathError> {
        let sample = self.sample_at_percentage(percentage)?;
        Ok(self.transform.to_world(sample.local_position))
    }

    /// Sample nearest to a world-space point. Ties go to the later sample.
    pub fn closest_sample(&self, world_point: Vec3) -> Result<SamplePoint, PathError> {
        let samples = self.require_samples()?;
        Ok(nearest_sample(samples, self.transform.to_local(world_point)))
    }

    /// `percentage * length` with the percentage clamped to [0, 1].
    pub fn distance_by_percentage(&self, percentage: f32) -> f32 {
        percentage.clamp(0.0, 1.0) * self.length
    }

    /// `distance / length` clamped to [0, 1]; a zero-length path yields 0.
    pub fn percentage_by_distance(&self, distance: f32) -> f32 {
        if self.length <= 0.0 {
            return 0.0;
        }
        (distance / self.length).clamp(0.0, 1.0)
    }

    // ------------------------------------------------------------------------
    // World-space views
    // ------------------------------------------------------------------------

    /// Control point in world space, with its tangent expressed as the
    /// absolute world position of the handle tip.
    pub fn world_control_point(&self, index: usize) -> Option<ControlPoint> {
        let point = self.control_points.get(index)?;
        let position = self.transform.to_world(point.position);
        let tangent = position + self.transform.vector_to_world(point.tangent);
        Some(ControlPoint::new(index, position, tangent))
    }

    /// Inverse of [`world_control_point`](Self::world_control_point).
    pub fn local_control_point(&self, world: ControlPoint) -> ControlPoint {
        ControlPoint::new(
            world.index,
            self.transform.to_local(world.position),
            self.transform.vector_to_local(world.tangent - world.position),
        )
    }

    /// Segment in world space; handles are absolute world positions.
    pub fn world_segment(&self, index: usize) -> Option<BezierSegment> {
        let segment = self.segments.get(index)?;
        let start = self.transform.to_world(segment.start);
        let end = self.transform.to_world(segment.end);
        Some(BezierSegment::new(
            start,
            end,
            start + self.transform.vector_to_world(segment.start_handle),
            end + self.transform.vector_to_world(segment.end_handle),
        ))
    }
}

/// Linear scan; `<=` so the later of two equidistant samples wins.
fn nearest_sample(samples: &[SamplePoint], local: Vec3) -> SamplePoint {
    let mut best = samples[0];
    let mut best_distance = f32::INFINITY;
    for sample in samples {
        let distance = sample.local_position.distance(local);
        if distance <= best_distance {
            best_distance = distance;
            best = *sample;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::curve::DEFAULT_TANGENT;
    use approx::assert_relative_eq;

    fn line(length: f32) -> PathGeometry {
        let mut path = PathGeometry::new(
            vec![
                ControlPoint::new(0, Vec3::ZERO, Vec3::ZERO),
                ControlPoint::new(1, Vec3::new(length, 0.0, 0.0), Vec3::ZERO),
            ],
            SamplingConfig::new(1.0, 1.0),
        );
        path.build();
        path
    }

    #[test]
    fn fewer_than_two_points_fail_with_empty_path() {
        let mut path = PathGeometry::new(vec![ControlPoint::at(0, Vec3::ONE)], SamplingConfig::default());
        path.build();
        assert!(path.samples().is_empty());
        assert_eq!(path.length(), 0.0);
        assert_eq!(path.sample_at_percentage(0.5), Err(PathError::EmptyPath));
        assert_eq!(path.closest_sample(Vec3::ZERO), Err(PathError::EmptyPath));
        assert_eq!(path.percentage_by_distance(3.0), 0.0);
    }

    #[test]
    fn endpoints_match_first_and_last_samples() {
        let path = line(10.0);
        assert_eq!(path.sample_at_percentage(0.0), Ok(path.samples()[0]));
        assert_eq!(path.sample_at_percentage(1.0), Ok(*path.samples().last().unwrap()));
        // Out-of-range input is clamped rather than rejected.
        assert_eq!(path.sample_at_percentage(4.0), Ok(*path.samples().last().unwrap()));
        assert_eq!(path.sample_at_percentage(-1.0).unwrap().local_position, Vec3::ZERO);
    }

    #[test]
    fn sample_at_percentage_interpolates() {
        let path = line(10.0);
        let sample = path.sample_at_percentage(0.25).unwrap();
        assert_relative_eq!(sample.local_position.x, 2.5, epsilon = 1e-4);
        assert_relative_eq!(sample.forward.x, 1.0, epsilon = 1e-5);
        assert_eq!(sample.percentage, 0.25);
    }

    #[test]
    fn distance_percentage_round_trip() {
        let path = line(10.0);
        for d in [-5.0_f32, 0.0, 2.5, 7.25, 10.0, 42.0] {
            let back = path.distance_by_percentage(path.percentage_by_distance(d));
            assert_relative_eq!(back, d.clamp(0.0, path.length()), epsilon = 1e-4);
        }
    }

    #[test]
    fn distance_by_percentage_clamps() {
        let path = line(10.0);
        assert_eq!(path.distance_by_percentage(2.0), path.length());
        assert_eq!(path.distance_by_percentage(-0.5), 0.0);
        assert_relative_eq!(path.distance_by_percentage(0.3), 3.0, epsilon = 1e-4);
    }

    #[test]
    fn nearest_sample_prefers_later_on_ties() {
        let samples = [
            SamplePoint::new(Vec3::ZERO, Vec3::X, 0.0),
            SamplePoint::new(Vec3::new(2.0, 0.0, 0.0), Vec3::X, 0.5),
            SamplePoint::new(Vec3::new(4.0, 0.0, 0.0), Vec3::X, 1.0),
        ];
        // Exactly between the first two samples.
        let sample = nearest_sample(&samples, Vec3::new(1.0, 3.0, 0.0));
        assert_eq!(sample.percentage, 0.5);
    }

    #[test]
    fn closest_sample_picks_nearest() {
        let path = line(10.0);
        let sample = path.closest_sample(Vec3::new(6.2, 1.0, 0.0)).unwrap();
        assert_relative_eq!(sample.local_position.x, 6.0, epsilon = 1e-4);
    }

    #[test]
    fn closest_sample_uses_local_space() {
        let mut path = line(10.0);
        path.set_transform(PathTransform::from_translation(Vec3::new(100.0, 0.0, 0.0)));
        let sample = path.closest_sample(Vec3::new(102.0, 0.0, 0.0)).unwrap();
        assert_relative_eq!(sample.local_position.x, 2.0, epsilon = 1e-4);
        assert_relative_eq!(sample.percentage, 0.2, epsilon = 1e-4);
    }

    #[test]
    fn set_builds_only_when_requested() {
        let points = vec![ControlPoint::at(0, Vec3::ZERO), ControlPoint::at(1, Vec3::new(5.0, 0.0, 0.0))];
        let mut path = PathGeometry::default();
        path.set(false, 0.5, 0.1, points.clone());
        assert!(path.samples().is_empty());

        path.set(true, 0.5, 0.1, points);
        assert!(path.samples().len() > 2);
        assert_eq!(path.config().spacing(), 0.5);
    }

    #[test]
    fn update_control_point_writes_in_place() {
        let mut path = line(10.0);
        path.update_control_point(1, |p| p.position.z = 3.0).unwrap();
        assert_eq!(path.control_points()[1].position, Vec3::new(10.0, 0.0, 3.0));
        assert_eq!(
            path.update_control_point(9, |_| {}),
            Err(PathError::ControlPointOutOfRange { index: 9, count: 2 })
        );
    }

    #[test]
    fn world_position_respects_transform() {
        let mut path = line(10.0);
        path.set_transform(
            PathTransform::from_translation(Vec3::new(0.0, 2.0, 0.0))
                .with_rotation(Quat::from_rotation_y(std::f32::consts::FRAC_PI_2)),
        );
        let world = path.world_position_at_percentage(1.0).unwrap();
        // +X rotated a quarter turn about Y points along -Z.
        assert_relative_eq!(world.x, 0.0, epsilon = 1e-4);
        assert_relative_eq!(world.y, 2.0, epsilon = 1e-4);
        assert_relative_eq!(world.z, -10.0, epsilon = 1e-4);
    }

    #[test]
    fn world_control_point_round_trips() {
        let mut path = line(10.0);
        path.set_transform(PathTransform::from_translation(Vec3::new(1.0, 2.0, 3.0)));
        path.update_control_point(0, |p| p.tangent = Vec3::new(0.0, 0.0, 2.0)).unwrap();

        let world = path.world_control_point(0).unwrap();
        assert_eq!(world.position, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(world.tangent, Vec3::new(1.0, 2.0, 5.0));

        let local = path.local_control_point(world);
        assert_relative_eq!(local.tangent.z, 2.0, epsilon = 1e-5);
        assert_relative_eq!(local.position.length(), 0.0, epsilon = 1e-5);
    }

    #[test]
    fn world_segment_uses_absolute_handles() {
        let mut path = line(10.0);
        path.set_transform(PathTransform::from_translation(Vec3::new(0.0, 1.0, 0.0)));
        path.update_control_point(1, |p| p.tangent = Vec3::new(-2.0, 0.0, 0.0)).unwrap();
        path.build();

        let segment = path.world_segment(0).unwrap();
        assert_eq!(segment.start, Vec3::new(0.0, 1.0, 0.0));
        assert_eq!(segment.end, Vec3::new(10.0, 1.0, 0.0));
        assert_eq!(segment.end_handle, Vec3::new(8.0, 1.0, 0.0));
        assert!(path.world_segment(1).is_none());
    }

    #[test]
    fn appended_points_extend_the_path() {
        let mut path = line(10.0);
        let index = path.push_control_point(Vec3::new(10.0, 0.0, 5.0), Vec3::ZERO);
        assert_eq!(index, 2);
        path.build();
        assert_eq!(path.segments().len(), 2);
        assert_relative_eq!(path.length(), 15.0, epsilon = 1e-4);

        path.reset_tangents();
        assert!(path.control_points().iter().all(|p| p.tangent == DEFAULT_TANGENT));
    }
}
