// Orbit camera for the route viewer
//
// Camera model:
//   - A target point the camera looks at (centre of the route network)
//   - Pitch (elevation) and yaw (horizontal rotation) around that target
//   - Zoom by adjusting distance along the look vector
//   - A/D or Left/Right orbit, mouse wheel zooms, Space toggles auto-orbit

use glam::{Mat4, Vec2, Vec3};
use winit::event::{ElementState, MouseScrollDelta, WindowEvent};
use winit::keyboard::{KeyCode, PhysicalKey};

pub struct OrbitCamera {
    pub target: Vec3,

    /// Private: always clamped to [min_distance, max_distance]. Use distance() to read.
    distance: f32,
    pub min_distance: f32,
    pub max_distance: f32,

    /// Elevation angle in radians (0 = horizontal, PI/2 = straight down)
    pub pitch: f32,
    /// Horizontal rotation in radians
    pub yaw: f32,

    pub fov:  f32,
    pub near: f32,
    pub far:  f32,

    /// Radians per second while an orbit key is held
    pub orbit_speed: f32,
    /// Distance change per scroll line
    pub zoom_speed:  f32,
    /// Slow rotation when no key is held
    pub auto_orbit:  bool,

    orbit_left:  bool,
    orbit_right: bool,
}

impl OrbitCamera {
    pub fn new(target: Vec3, distance: f32) -> Self {
        Self {
            target,
            distance,
            min_distance: 4.0,
            max_distance: 80.0,
            pitch: 40.0_f32.to_radians(),
            yaw: 0.0,
            fov: 45.0_f32.to_radians(),
            near: 0.1,
            far: 300.0,
            orbit_speed: 1.2,
            zoom_speed: 2.0,
            auto_orbit: true,
            orbit_left: false,
            orbit_right: false,
        }
    }

    /// Feed a winit WindowEvent. Returns true if the camera consumed it.
    pub fn handle_event(&mut self, event: &WindowEvent) -> bool {
        match event {
            WindowEvent::KeyboardInput { event, .. } => {
                let pressed = event.state == ElementState::Pressed;
                match event.physical_key {
                    PhysicalKey::Code(KeyCode::KeyA | KeyCode::ArrowLeft) => self.orbit_left = pressed,
                    PhysicalKey::Code(KeyCode::KeyD | KeyCode::ArrowRight) => self.orbit_right = pressed,
                    PhysicalKey::Code(KeyCode::Space) if pressed && !event.repeat => {
                        self.auto_orbit = !self.auto_orbit;
                    }
                    _ => return false,
                }
                true
            }
            WindowEvent::MouseWheel { delta, .. } => {
                let lines = match delta {
                    MouseScrollDelta::LineDelta(_, y) => *y,
                    MouseScrollDelta::PixelDelta(pos) => pos.y as f32 / 100.0,
                };
                self.zoom(lines);
                true
            }
            _ => false,
        }
    }

    /// Scroll up (positive) zooms in.
    pub fn zoom(&mut self, lines: f32) {
        self.distance = (self.distance - lines * self.zoom_speed).clamp(self.min_distance, self.max_distance);
    }

    pub fn update(&mut self, dt: f32) {
        let mut direction = 0.0;
        if self.orbit_left { direction -= 1.0; }
        if self.orbit_right { direction += 1.0; }

        if direction != 0.0 {
            self.yaw += direction * self.orbit_speed * dt;
        } else if self.auto_orbit {
            self.yaw += 0.15 * dt;
        }
    }

    pub fn distance(&self) -> f32 { self.distance }

    /// World-space position of the camera eye.
    pub fn eye(&self) -> Vec3 {
        self.target
            + Vec3::new(
                self.yaw.sin() * self.pitch.cos(),
                self.pitch.sin(),
                self.yaw.cos() * self.pitch.cos(),
            ) * self.distance
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.eye(), self.target, Vec3::Y)
    }

    pub fn projection_matrix(&self, aspect: f32) -> Mat4 {
        Mat4::perspective_rh(self.fov, aspect, self.near, self.far)
    }

    /// Combined view-projection matrix ready to upload to the GPU.
    pub fn view_projection(&self, aspect: f32) -> Mat4 {
        self.projection_matrix(aspect) * self.view_matrix()
    }

    /// Project a world point to screen points (origin top-left).
    /// `None` when the point is behind the camera.
    pub fn project(&self, world: Vec3, screen: Vec2) -> Option<Vec2> {
        let aspect = if screen.y > 0.0 { screen.x / screen.y } else { 1.0 };
        let clip = self.view_projection(aspect) * world.extend(1.0);
        if clip.w <= 0.0 {
            return None;
        }
        let ndc = clip.truncate() / clip.w;
        Some(Vec2::new((ndc.x * 0.5 + 0.5) * screen.x, (0.5 - ndc.y * 0.5) * screen.y))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn zoom_is_clamped() {
        let mut camera = OrbitCamera::new(Vec3::ZERO, 20.0);
        camera.zoom(1000.0);
        assert_eq!(camera.distance(), camera.min_distance);
        camera.zoom(-1000.0);
        assert_eq!(camera.distance(), camera.max_distance);
    }

    #[test]
    fn target_projects_to_screen_centre() {
        let camera = OrbitCamera::new(Vec3::new(3.0, 0.0, -2.0), 20.0);
        let screen = Vec2::new(800.0, 600.0);
        let centre = camera.project(camera.target, screen).unwrap();
        assert_relative_eq!(centre.x, 400.0, epsilon = 1e-2);
        assert_relative_eq!(centre.y, 300.0, epsilon = 1e-2);
    }

    #[test]
    fn points_behind_the_eye_are_not_projected() {
        let camera = OrbitCamera::new(Vec3::ZERO, 20.0);
        let behind = camera.eye() * 2.0;
        assert!(camera.project(behind, Vec2::new(800.0, 600.0)).is_none());
    }
}
