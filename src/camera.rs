// Free-look camera: local axes plus position, right-handed, Vulkan clip space

use glam::{Mat4, Quat, Vec3};

const UP: Vec3 = Vec3::Y;

#[derive(Debug, Clone)]
pub struct Camera {
    /// Vertical field of view in degrees
    pub fov: f32,
    pub aspect_ratio: f32,
    pub near: f32,
    pub far: f32,
    position: Vec3,
    // Local Z points away from the view direction
    local_x: Vec3,
    local_y: Vec3,
    local_z: Vec3,
}

impl Camera {
    pub fn new(aspect_ratio: f32) -> Self {
        let mut camera = Self {
            fov: 50.0,
            aspect_ratio,
            near: 0.1,
            far: 1000.0,
            position: Vec3::new(0.0, 0.0, 5.0),
            local_x: Vec3::X,
            local_y: Vec3::Y,
            local_z: Vec3::Z,
        };
        camera.look_at(Vec3::ZERO);
        camera
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    /// Orient towards `target`, keeping world up
    pub fn look_at(&mut self, target: Vec3) {
        let back = (self.position - target).normalize_or_zero();
        if back != Vec3::ZERO {
            self.set_basis(back);
        }
    }

    /// Direction the camera faces
    pub fn forward(&self) -> Vec3 {
        -self.local_z
    }

    pub fn move_local_x(&mut self, distance: f32) {
        self.position += self.local_x * distance;
    }

    pub fn move_local_y(&mut self, distance: f32) {
        self.position += self.local_y * distance;
    }

    pub fn move_local_z(&mut self, distance: f32) {
        self.position += self.local_z * distance;
    }

    pub fn rotate_yaw(&mut self, degrees: f32) {
        if degrees == 0.0 {
            return;
        }
        let rotation = Quat::from_axis_angle(UP, degrees.to_radians());
        self.set_basis(rotation * self.local_z);
    }

    /// Positive pitch looks up; refused when it would align the view with world up
    pub fn rotate_pitch(&mut self, degrees: f32) {
        if degrees == 0.0 {
            return;
        }
        let rotation = Quat::from_axis_angle(self.local_x, degrees.to_radians());
        let back = (rotation * self.local_z).normalize();
        if back.dot(UP).abs() < 0.999 {
            self.set_basis(back);
        }
    }

    fn set_basis(&mut self, back: Vec3) {
        self.local_z = back.normalize();
        self.local_x = UP.cross(self.local_z).normalize();
        self.local_y = self.local_z.cross(self.local_x).normalize();
    }

    pub fn view(&self) -> Mat4 {
        Mat4::look_to_rh(self.position, self.forward(), self.local_y)
    }

    /// Perspective projection with depth in [0, 1] and Y pointing down
    pub fn projection(&self) -> Mat4 {
        let mut projection =
            Mat4::perspective_rh(self.fov.to_radians(), self.aspect_ratio, self.near, self.far);
        projection.y_axis.y *= -1.0;
        projection
    }

    pub fn set_aspect(&mut self, width: u32, height: u32) {
        if height > 0 {
            self.aspect_ratio = width as f32 / height as f32;
        }
    }
}
