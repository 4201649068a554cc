// Ribbon extrusion: turns a sample table into a strip mesh lying along the path.
//
// Vertex layout is interleaved left/right per sample:
//   [L0, R0, L1, R1, ... L(n-1), R(n-1)]
// Solid ribbons append a bottom copy of that strip at offset b = 2n, pushed
// down by the thickness along -Y, and split their triangles into six
// submeshes so each face group carries its own normals.
//
// Everything is in the path's local space, like the samples it is built from.

use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};

use super::resample::SamplePoint;

// ============================================================================
// SETTINGS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RibbonSettings {
    /// Distance from the centre line to either edge.
    pub half_width: f32,
    /// Depth of the solid below the top face. Zero means a flat strip;
    /// the sign is ignored.
    pub thickness:  f32,
}

impl Default for RibbonSettings {
    fn default() -> Self {
        Self { half_width: 1.0, thickness: 0.0 }
    }
}

impl RibbonSettings {
    pub fn new(half_width: f32, thickness: f32) -> Self {
        Self { half_width, thickness }
    }

    pub fn flat(half_width: f32) -> Self {
        Self::new(half_width, 0.0)
    }

    pub fn depth(&self) -> f32 {
        self.thickness.abs()
    }

    pub fn is_flat(&self) -> bool {
        self.depth() == 0.0
    }
}

// ============================================================================
// MESH DATA
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubmeshKind {
    Top,
    Bottom,
    LeftWall,
    RightWall,
    RearCap,
    FrontCap,
}

/// One face group. `face_normals[k]` belongs to `triangles[k]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Submesh {
    pub kind:         SubmeshKind,
    pub triangles:    Vec<[u32; 3]>,
    pub face_normals: Vec<Vec3>,
}

impl Submesh {
    fn new(kind: SubmeshKind) -> Self {
        Self { kind, triangles: Vec::new(), face_normals: Vec::new() }
    }

    fn push(&mut self, vertices: &[Vec3], triangle: [u32; 3]) {
        let [a, b, c] = triangle.map(|i| vertices[i as usize]);
        self.face_normals.push((b - a).cross(c - a).normalize_or_zero());
        self.triangles.push(triangle);
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }
}

/// CPU-side ribbon mesh. Flat ribbons hold a single `Top` submesh.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RibbonMesh {
    pub vertices:  Vec<Vec3>,
    pub normals:   Vec<Vec3>,
    pub uvs:       Vec<Vec2>,
    pub submeshes: Vec<Submesh>,
}

impl RibbonMesh {
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.submeshes.iter().map(Submesh::triangle_count).sum()
    }

    pub fn submesh(&self, kind: SubmeshKind) -> Option<&Submesh> {
        self.submeshes.iter().find(|s| s.kind == kind)
    }
}

// ============================================================================
// EXTRUSION
// ============================================================================

/// Horizontal perpendicular of `forward`: a quarter turn about +Y, pointing
/// to the left of travel. Falls back to +X when `forward` is vertical or zero.
pub fn left_of(forward: Vec3) -> Vec3 {
    let perp = Vec3::new(-forward.z, 0.0, forward.x).normalize_or_zero();
    if perp == Vec3::ZERO { Vec3::X } else { perp }
}

/// Extrude `samples` into a ribbon. Fewer than two samples give an empty mesh.
pub fn extrude(samples: &[SamplePoint], settings: RibbonSettings) -> RibbonMesh {
    if samples.len() < 2 {
        return RibbonMesh::default();
    }

    let mut mesh = top_strip(samples, settings.half_width);
    if settings.is_flat() {
        let mut top = Submesh::new(SubmeshKind::Top);
        push_top(&mut top, &mesh.vertices, samples.len());
        mesh.submeshes.push(top);
    } else {
        add_solid(&mut mesh, samples.len(), settings.depth());
    }
    mesh
}

fn top_strip(samples: &[SamplePoint], half_width: f32) -> RibbonMesh {
    let vertex_count = samples.len() * 2;
    let mut mesh = RibbonMesh {
        vertices: Vec::with_capacity(vertex_count),
        normals:  Vec::with_capacity(vertex_count),
        uvs:      Vec::with_capacity(vertex_count),
        ..RibbonMesh::default()
    };

    for sample in samples {
        let offset = left_of(sample.forward) * half_width;
        mesh.vertices.push(sample.local_position + offset);
        mesh.vertices.push(sample.local_position - offset);
    }

    // v runs with the vertex index, not with distance along the path.
    for i in 0..vertex_count {
        mesh.normals.push(Vec3::Y);
        mesh.uvs.push(Vec2::new((i % 2) as f32, i as f32 / vertex_count as f32));
    }

    mesh
}

fn push_top(top: &mut Submesh, vertices: &[Vec3], sample_count: usize) {
    let strip = (sample_count * 2) as u32;
    for i in (0..strip - 2).step_by(2) {
        top.push(vertices, [i, i + 3, i + 1]);
        top.push(vertices, [i, i + 2, i + 3]);
    }
}

fn add_solid(mesh: &mut RibbonMesh, sample_count: usize, depth: f32) {
    let strip = (sample_count * 2) as u32;
    let b = strip;
    let last = strip - 2;

    let drop = Vec3::NEG_Y * depth;
    let bottom: Vec<Vec3> = mesh.vertices.iter().map(|v| *v + drop).collect();
    let bottom_uvs = mesh.uvs.clone();
    mesh.vertices.extend(bottom);
    mesh.normals.extend(std::iter::repeat(Vec3::NEG_Y).take(strip as usize));
    mesh.uvs.extend(bottom_uvs);

    let vertices = &mesh.vertices;
    let mut top = Submesh::new(SubmeshKind::Top);
    let mut under = Submesh::new(SubmeshKind::Bottom);
    let mut left = Submesh::new(SubmeshKind::LeftWall);
    let mut right = Submesh::new(SubmeshKind::RightWall);
    let mut rear = Submesh::new(SubmeshKind::RearCap);
    let mut front = Submesh::new(SubmeshKind::FrontCap);

    push_top(&mut top, vertices, sample_count);

    for i in (0..last).step_by(2) {
        under.push(vertices, [b + i, b + i + 1, b + i + 3]);
        under.push(vertices, [b + i, b + i + 3, b + i + 2]);

        left.push(vertices, [i, b + i, b + i + 2]);
        left.push(vertices, [i, b + i + 2, i + 2]);

        let r = i + 1;
        right.push(vertices, [r, b + r + 2, b + r]);
        right.push(vertices, [r, r + 2, b + r + 2]);
    }

    rear.push(vertices, [0, 1, b + 1]);
    rear.push(vertices, [0, b + 1, b]);

    front.push(vertices, [last, b + last + 1, last + 1]);
    front.push(vertices, [last, b + last, b + last + 1]);

    mesh.submeshes = vec![top, under, left, right, rear, front];
}

// ============================================================================
// EXTRUDER
// ============================================================================

/// Ribbon attached to one path. The route network calls `rebuild` with a
/// fresh sample snapshot after every path build.
#[derive(Debug, Clone, Default)]
pub struct RibbonExtruder {
    settings: RibbonSettings,
    mesh:     RibbonMesh,
    revision: u64,
}

impl RibbonExtruder {
    pub fn new(settings: RibbonSettings) -> Self {
        Self { settings, ..Self::default() }
    }

    pub fn settings(&self) -> RibbonSettings { self.settings }
    pub fn mesh(&self) -> &RibbonMesh { &self.mesh }

    /// Bumped on every rebuild so renderers know when to re-upload.
    pub fn revision(&self) -> u64 { self.revision }

    pub fn set_settings(&mut self, settings: RibbonSettings) {
        self.settings = settings;
    }

    pub fn rebuild(&mut self, samples: &[SamplePoint]) -> &RibbonMesh {
        self.mesh = extrude(samples, self.settings);
        self.revision += 1;
        log::trace!(
            "ribbon rebuilt: {} vertices, {} triangles",
            self.mesh.vertex_count(),
            self.mesh.triangle_count(),
        );
        &self.mesh
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::curve::ControlPoint;
    use crate::engine::path::PathGeometry;
    use crate::engine::resample::SamplingConfig;
    use approx::assert_relative_eq;

    fn straight(n: usize) -> Vec<SamplePoint> {
        (0..n)
            .map(|i| SamplePoint::new(Vec3::new(i as f32, 0.0, 0.0), Vec3::X, i as f32 / (n - 1) as f32))
            .collect()
    }

    fn bent_path() -> PathGeometry {
        let mut path = PathGeometry::new(
            vec![
                ControlPoint::new(0, Vec3::ZERO, Vec3::new(0.0, 0.0, 2.0)),
                ControlPoint::new(1, Vec3::new(5.0, 0.0, 3.0), Vec3::new(-2.0, 0.0, 0.0)),
                ControlPoint::new(2, Vec3::new(9.0, 0.0, -1.0), Vec3::new(0.0, 0.0, 1.0)),
            ],
            SamplingConfig::new(1.0, 0.05),
        );
        path.build();
        path
    }

    #[test]
    fn too_few_samples_give_empty_mesh() {
        assert!(extrude(&[], RibbonSettings::flat(1.0)).is_empty());
        assert!(extrude(&[SamplePoint::default()], RibbonSettings::new(1.0, 0.5)).is_empty());
    }

    #[test]
    fn flat_ribbon_has_two_vertices_per_sample() {
        let samples = straight(5);
        let mesh = extrude(&samples, RibbonSettings::flat(0.5));

        assert_eq!(mesh.vertex_count(), 10);
        assert_eq!(mesh.submeshes.len(), 1);
        assert_eq!(mesh.triangle_count(), 8);
        assert!(mesh.normals.iter().all(|n| *n == Vec3::Y));
        for normal in &mesh.submeshes[0].face_normals {
            assert_relative_eq!(normal.y, 1.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn flat_triangles_follow_the_strip_pattern() {
        let mesh = extrude(&straight(3), RibbonSettings::flat(1.0));
        assert_eq!(
            mesh.submeshes[0].triangles,
            vec![[0, 3, 1], [0, 2, 3], [2, 5, 3], [2, 4, 5]],
        );
    }

    #[test]
    fn uvs_are_index_proportional() {
        let mesh = extrude(&straight(2), RibbonSettings::flat(1.0));
        assert_eq!(
            mesh.uvs,
            vec![Vec2::new(0.0, 0.0), Vec2::new(1.0, 0.25), Vec2::new(0.0, 0.5), Vec2::new(1.0, 0.75)],
        );
    }

    #[test]
    fn edges_sit_exactly_half_width_from_the_centre() {
        let path = bent_path();
        let samples = path.samples();
        assert!(samples.len() > 5);

        let mesh = extrude(samples, RibbonSettings::flat(1.0));
        for (i, sample) in samples.iter().enumerate() {
            let left = mesh.vertices[2 * i] - sample.local_position;
            let right = mesh.vertices[2 * i + 1] - sample.local_position;
            assert_relative_eq!(left.length(), 1.0, epsilon = 1e-4);
            assert_relative_eq!(right.length(), 1.0, epsilon = 1e-4);
            assert_relative_eq!(left.dot(sample.forward), 0.0, epsilon = 1e-4);
            assert_relative_eq!((left + right).length(), 0.0, epsilon = 1e-4);
        }
    }

    #[test]
    fn solid_ribbon_has_four_vertices_per_sample() {
        let samples = straight(4);
        let mesh = extrude(&samples, RibbonSettings::new(1.0, -0.5));

        assert_eq!(mesh.vertex_count(), 16);
        assert_eq!(mesh.submeshes.len(), 6);
        assert_eq!(mesh.vertices[8], mesh.vertices[0] - Vec3::new(0.0, 0.5, 0.0));
        assert!(mesh.normals[..8].iter().all(|n| *n == Vec3::Y));
        assert!(mesh.normals[8..].iter().all(|n| *n == Vec3::NEG_Y));
        assert_eq!(mesh.uvs[..8], mesh.uvs[8..]);
    }

    #[test]
    fn solid_face_normals_point_outward() {
        // Travelling along +X: left is +Z, right is -Z.
        let mesh = extrude(&straight(3), RibbonSettings::new(1.0, 0.5));
        let expect = [
            (SubmeshKind::Top, Vec3::Y),
            (SubmeshKind::Bottom, Vec3::NEG_Y),
            (SubmeshKind::LeftWall, Vec3::Z),
            (SubmeshKind::RightWall, Vec3::NEG_Z),
            (SubmeshKind::RearCap, Vec3::NEG_X),
            (SubmeshKind::FrontCap, Vec3::X),
        ];
        for (kind, normal) in expect {
            let submesh = mesh.submesh(kind).unwrap();
            assert!(!submesh.triangles.is_empty());
            for face in &submesh.face_normals {
                assert_relative_eq!(face.dot(normal), 1.0, epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn vertical_forward_falls_back_to_x() {
        assert_eq!(left_of(Vec3::Y), Vec3::X);
        assert_eq!(left_of(Vec3::ZERO), Vec3::X);
        assert_relative_eq!(left_of(Vec3::X).z, 1.0);
    }

    #[test]
    fn extruder_tracks_revisions() {
        let mut extruder = RibbonExtruder::new(RibbonSettings::flat(1.0));
        assert_eq!(extruder.revision(), 0);
        extruder.rebuild(&straight(3));
        extruder.rebuild(&straight(4));
        assert_eq!(extruder.revision(), 2);
        assert_eq!(extruder.mesh().vertex_count(), 8);

        extruder.set_settings(RibbonSettings::new(1.0, 0.5));
        extruder.rebuild(&straight(4));
        assert_eq!(extruder.revision(), 3);
        assert_eq!(extruder.mesh().vertex_count(), 16);
    }
}
