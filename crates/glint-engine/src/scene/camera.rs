use glam::{Mat4, Vec3};

/// Look-at camera shared by every member of a [`SceneRegistry`](super::SceneRegistry).
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct SceneCamera {
    pub eye: Vec3,
    pub target: Vec3,
    pub up: Vec3,
}

impl Default for SceneCamera {
    fn default() -> Self {
        Self {
            eye: Vec3::new(0.0, 0.0, 2.0),
            target: Vec3::new(0.0, 0.0, -1.0),
            up: Vec3::Y,
        }
    }
}

impl SceneCamera {
    /// Right-handed view matrix.
    #[inline]
    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.eye, self.target, self.up)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    #[test]
    fn default_view_moves_world_back_by_eye_distance() {
        let view = SceneCamera::default().view();
        let origin = view * Vec4::new(0.0, 0.0, 0.0, 1.0);
        assert!((origin.z - -2.0).abs() < 1e-6);
        assert!(origin.x.abs() < 1e-6 && origin.y.abs() < 1e-6);
    }
}
