// Chord-length resampling of Bezier segments into an evenly spaced point table.
//
// Two nested walks per segment:
//   coarse: curve parameter t advances by `resolution` (evaluation density)
//   fine:   a sample is emitted every `spacing` units of straight-line
//           distance from the previous sample (point density)
// Curve speed is non-uniform in t, so neither walk alone gives even spacing.
//
// Percentages are cumulative chord length / total chord length. This is a
// piecewise-linear approximation of arc length, not an analytic one.

use glam::Vec3;
use super::curve::BezierSegment;

/// Lower bound for both sampling parameters.
pub const MIN_SAMPLING: f32 = 0.005;
/// Upper bound for both sampling parameters.
pub const MAX_SAMPLING: f32 = 1.0;

// ============================================================================
// SAMPLING CONFIG
// ============================================================================

/// Resampling parameters. Both values are always within
/// [`MIN_SAMPLING`, `MAX_SAMPLING`]; construction clamps.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingConfig {
    spacing:    f32,
    resolution: f32,
}

impl SamplingConfig {
    pub fn new(spacing: f32, resolution: f32) -> Self {
        Self {
            spacing:    clamp_sampling(spacing),
            resolution: clamp_sampling(resolution),
        }
    }

    /// Straight-line distance between consecutive samples.
    pub fn spacing(&self) -> f32 { self.spacing }

    /// Curve-parameter step used while walking each segment.
    pub fn resolution(&self) -> f32 { self.resolution }
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self { spacing: MAX_SAMPLING, resolution: MAX_SAMPLING }
    }
}

fn clamp_sampling(value: f32) -> f32 {
    if value.is_finite() {
        value.clamp(MIN_SAMPLING, MAX_SAMPLING)
    } else {
        MAX_SAMPLING
    }
}

// ============================================================================
// SAMPLE POINT
// ============================================================================

/// One resampled point in the path's local space.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SamplePoint {
    pub local_position: Vec3,
    /// Unit direction toward the next sample. The last sample copies the
    /// forward of the one before it.
    pub forward:        Vec3,
    /// Cumulative chord length fraction in [0, 1].
    pub percentage:     f32,
}

impl SamplePoint {
    pub fn new(local_position: Vec3, forward: Vec3, percentage: f32) -> Self {
        Self { local_position, forward, percentage }
    }
}

/// Output of one resampling pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleTable {
    pub samples: Vec<SamplePoint>,
    /// Sum of chord lengths between consecutive samples.
    pub length:  f32,
}

// ============================================================================
// RESAMPLER
// ============================================================================

/// Resample `segments` starting at `first` (the first control point).
/// No segments means an empty table with zero length.
pub fn resample(first: Vec3, segments: &[BezierSegment], config: SamplingConfig) -> SampleTable {
    if segments.is_empty() {
        return SampleTable::default();
    }

    let positions = emit_positions(first, segments, config);
    let mut samples = assign_forwards(&positions);
    let length = chord_length(&positions);
    assign_percentages(&mut samples, length);

    SampleTable { samples, length }
}

/// Walk every segment and emit evenly spaced positions.
fn emit_positions(first: Vec3, segments: &[BezierSegment], config: SamplingConfig) -> Vec<Vec3> {
    let spacing = config.spacing();
    let step = config.resolution();

    let mut positions = vec![first];
    let mut last = first;

    for segment in segments {
        let mut t = 0.0_f32;
        loop {
            t = (t + step).min(1.0);
            let current = segment.evaluate(t);
            let mut remaining = last.distance(current);

            // Linear split toward the evaluated point, not a true arc split.
            while remaining >= spacing {
                let next = last + (current - last) * (spacing / remaining);
                positions.push(next);
                last = next;
                remaining -= spacing;
            }

            if t >= 1.0 {
                break;
            }
        }
    }

    positions
}

fn assign_forwards(positions: &[Vec3]) -> Vec<SamplePoint> {
    let count = positions.len();
    let mut samples: Vec<SamplePoint> = Vec::with_capacity(count);

    for i in 0..count {
        let forward = if i + 1 < count {
            (positions[i + 1] - positions[i]).normalize_or_zero()
        } else if i > 0 {
            // Last sample is never recomputed, it inherits its predecessor.
            samples[i - 1].forward
        } else {
            Vec3::ZERO
        };
        samples.push(SamplePoint::new(positions[i], forward, 0.0));
    }

    samples
}

/// Sum of distances between consecutive positions.
pub fn chord_length(positions: &[Vec3]) -> f32 {
    positions.windows(2).map(|pair| pair[0].distance(pair[1])).sum()
}

/// Fill cumulative percentages. A zero-length table keeps every percentage at 0.
fn assign_percentages(samples: &mut [SamplePoint], length: f32) {
    let Some(first) = samples.first_mut() else {
        return;
    };
    first.percentage = 0.0;

    if length <= 0.0 {
        for sample in samples.iter_mut() {
            sample.percentage = 0.0;
        }
        return;
    }

    for i in 1..samples.len() {
        let chord = samples[i - 1].local_position.distance(samples[i].local_position);
        samples[i].percentage = (samples[i - 1].percentage + chord / length).clamp(0.0, 1.0);
    }

    // Accumulated float error must not leave the end short of 1.
    if let Some(last) = samples.last_mut() {
        last.percentage = 1.0;
    }
}
