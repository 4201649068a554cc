// Traveler component: an entity moving along one path by distance.
//
// Each tick while following:
//   1. distance += speed * dt, signed by direction
//   2. percentage = distance / length (clamped), distance re-clamped to match
//   3. pose from the sample at that percentage, placed in world space
//   4. end check: clamp, stop following, report the end once
// Junction crossings and notifications are handled by the caller
// (`systems::advance_travelers`), which owns the network.

use bevy_ecs::prelude::*;
use glam::{Mat3, Quat, Vec3};

use super::components::TravelDirection;
use super::network::PathId;
use super::path::{PathError, PathGeometry};

/// World-space pose of a traveler, offset already applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TravelPose {
    pub position: Vec3,
    pub rotation: Quat,
}

/// Result of one `Traveler::advance`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TravelStep {
    pub previous_percentage: f32,
    pub percentage:          f32,
    pub pose:                TravelPose,
    /// True only on the tick that first hit the end.
    pub reached_end:         bool,
}

#[derive(Component, Debug, Clone, PartialEq)]
pub struct Traveler {
    path:              PathId,
    percentage:        f32,
    distance_traveled: f32,
    speed:             f32,
    direction:         TravelDirection,
    face_direction:    bool,
    local_offset:      Vec3,
    following:         bool,
    end_reported:      bool,
}

impl Traveler {
    pub fn new(path: PathId, speed: f32) -> Self {
        Self {
            path,
            percentage:        0.0,
            distance_traveled: 0.0,
            speed,
            direction:         TravelDirection::Forward,
            face_direction:    true,
            local_offset:      Vec3::ZERO,
            following:         true,
            end_reported:      false,
        }
    }

    pub fn with_direction(mut self, direction: TravelDirection) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_offset(mut self, offset: Vec3) -> Self {
        self.local_offset = offset;
        self
    }

    pub fn path(&self) -> PathId { self.path }
    pub fn percentage(&self) -> f32 { self.percentage }
    pub fn distance_traveled(&self) -> f32 { self.distance_traveled }
    pub fn speed(&self) -> f32 { self.speed }
    pub fn direction(&self) -> TravelDirection { self.direction }
    pub fn face_direction(&self) -> bool { self.face_direction }
    pub fn local_offset(&self) -> Vec3 { self.local_offset }
    pub fn is_following(&self) -> bool { self.following }

    // ------------------------------------------------------------------------
    // Setters
    // ------------------------------------------------------------------------

    pub fn set_speed(&mut self, speed: f32) {
        self.speed = speed;
    }

    pub fn set_face_direction(&mut self, face_direction: bool) {
        self.face_direction = face_direction;
    }

    /// Offset along the traveler's own right / up / forward axes.
    pub fn set_offset(&mut self, offset: Vec3) {
        self.local_offset = offset;
    }

    pub fn set_direction(&mut self, direction: TravelDirection) {
        self.direction = direction;
    }

    /// `false` cancels travel; the traveler keeps its place.
    pub fn set_following(&mut self, following: bool) {
        self.following = following;
    }

    /// Jump to `percentage` (clamped) on the current path and re-arm the
    /// end-of-path report.
    pub fn set_percentage(&mut self, path: &PathGeometry, percentage: f32) {
        self.percentage = percentage.clamp(0.0, 1.0);
        self.distance_traveled = path.distance_by_percentage(self.percentage);
        self.end_reported = false;
    }

    /// Move onto another path at `percentage` and resume following.
    pub fn set_path(&mut self, id: PathId, path: &PathGeometry, percentage: f32) {
        self.path = id;
        self.following = true;
        self.set_percentage(path, percentage);
    }

    // ------------------------------------------------------------------------
    // Tick
    // ------------------------------------------------------------------------

    /// Advance by `dt` seconds along `path`. `Ok(None)` when not following.
    pub fn advance(&mut self, path: &PathGeometry, dt: f32) -> Result<Option<TravelStep>, PathError> {
        if !self.following {
            return Ok(None);
        }

        let previous_percentage = self.percentage;
        let distance = self.distance_traveled + self.speed * dt * self.direction.sign();
        let percentage = path.percentage_by_distance(distance);
        let pose = self.pose_at(path, percentage)?;

        self.percentage = percentage;
        self.distance_traveled = path.distance_by_percentage(percentage);

        let at_end = match self.direction {
            TravelDirection::Forward => self.percentage >= 1.0,
            TravelDirection::Reversed => self.percentage <= 0.0,
        };

        let mut reached_end = false;
        if at_end {
            self.percentage = if self.direction == TravelDirection::Forward { 1.0 } else { 0.0 };
            self.distance_traveled = path.distance_by_percentage(self.percentage);
            self.following = false;
            reached_end = !self.end_reported;
            self.end_reported = true;
        }

        Ok(Some(TravelStep {
            previous_percentage,
            percentage: self.percentage,
            pose,
            reached_end,
        }))
    }

    /// Pose at the current percentage, without moving.
    pub fn pose(&self, path: &PathGeometry) -> Result<TravelPose, PathError> {
        self.pose_at(path, self.percentage)
    }

    fn pose_at(&self, path: &PathGeometry, percentage: f32) -> Result<TravelPose, PathError> {
        let sample = path.sample_at_percentage(percentage)?;
        let position = path.transform().to_world(sample.local_position);
        let forward = path.transform().vector_to_world(sample.forward) * self.direction.sign();
        let rotation = look_rotation(forward);

        let offset = rotation * self.local_offset;
        Ok(TravelPose { position: position + offset, rotation })
    }
}

/// Rotation taking +Z to `forward` with +Y kept as up.
/// Identity when `forward` is zero or vertical.
pub fn look_rotation(forward: Vec3) -> Quat {
    let f = forward.normalize_or_zero();
    let right = Vec3::Y.cross(f).normalize_or_zero();
    if right == Vec3::ZERO {
        return Quat::IDENTITY;
    }
    let up = f.cross(right);
    Quat::from_mat3(&Mat3::from_cols(right, up, f))
}
