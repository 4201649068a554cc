// ECS components shared by travelers and the systems that move them.
// The `Traveler` component itself lives in `follower.rs` next to its tick logic.

use bevy_ecs::prelude::*;
use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

/// World-space pose of an entity.
#[derive(Component, Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
        }
    }
}

impl Transform {
    pub fn from_position(position: Vec3) -> Self {
        Self { position, ..Self::default() }
    }

    pub fn right(&self) -> Vec3 { self.rotation * Vec3::X }
    pub fn up(&self) -> Vec3 { self.rotation * Vec3::Y }
    pub fn forward(&self) -> Vec3 { self.rotation * Vec3::Z }
}

/// Which way along the path a traveler moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TravelDirection {
    #[default]
    Forward,
    Reversed,
}

impl TravelDirection {
    /// +1 for forward, -1 for reversed.
    pub fn sign(self) -> f32 {
        match self {
            Self::Forward => 1.0,
            Self::Reversed => -1.0,
        }
    }

    pub fn flipped(self) -> Self {
        match self {
            Self::Forward => Self::Reversed,
            Self::Reversed => Self::Forward,
        }
    }
}

/// Travelers carrying this marker switch onto another path when they cross
/// a junction node that joins one.
#[derive(Component, Debug, Clone, Copy, Default)]
pub struct BranchAtJunctions;

/// RGB color for rendering
#[derive(Component, Debug, Clone, Copy)]
pub struct TravelerColor {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl TravelerColor {
    pub fn new(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }

    /// Bright random color, channels in [0.3, 1.0).
    pub fn random() -> Self {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        Self {
            r: rng.gen_range(0.3..1.0),
            g: rng.gen_range(0.3..1.0),
            b: rng.gen_range(0.3..1.0),
        }
    }

    pub fn to_array(self) -> [f32; 4] {
        [self.r, self.g, self.b, 1.0]
    }
}
