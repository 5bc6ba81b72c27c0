//! Cameras and projection matrices.

use nalgebra::{Matrix4, Point3, Vector3};
use tableau_geom::CodecError;

use crate::command::{transform_to_base64, CameraValue, Command, SetCamera};

/// A pinhole camera: a world-to-camera transform and an OpenGL-style projection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    world_to_camera: Matrix4<f32>,
    projection: Matrix4<f32>,
}

impl Default for Camera {
    fn default() -> Self {
        Self::look_at(
            &Point3::new(0.0, 0.0, 4.0),
            &Point3::origin(),
            &Vector3::y(),
            Self::DEFAULT_FOV_Y,
            Self::DEFAULT_NEAR,
            Self::DEFAULT_FAR,
            1.0,
        )
    }
}

impl Camera {
    /// Vertical field of view, in degrees.
    pub const DEFAULT_FOV_Y: f32 = 45.0;
    /// Near clipping plane distance.
    pub const DEFAULT_NEAR: f32 = 0.01;
    /// Far clipping plane distance.
    pub const DEFAULT_FAR: f32 = 100.0;

    /// A camera from explicit transforms. `projection` maps camera space to clip space.
    pub fn new(world_to_camera: Matrix4<f32>, projection: Matrix4<f32>) -> Self {
        Self {
            world_to_camera,
            projection,
        }
    }

    /// A camera at `center`, looking at `target`, with `up` pointing up.
    pub fn look_at(
        center: &Point3<f32>,
        target: &Point3<f32>,
        up: &Vector3<f32>,
        fov_y_degrees: f32,
        near: f32,
        far: f32,
        aspect_ratio: f32,
    ) -> Self {
        Self {
            world_to_camera: Matrix4::look_at_rh(center, target, up),
            projection: gl_projection(fov_y_degrees, aspect_ratio, near, far),
        }
    }

    #[inline]
    pub fn world_to_camera(&self) -> &Matrix4<f32> {
        &self.world_to_camera
    }

    #[inline]
    pub fn projection(&self) -> &Matrix4<f32> {
        &self.projection
    }

    /// `None` if the world-to-camera transform is singular.
    pub fn camera_to_world(&self) -> Option<Matrix4<f32>> {
        self.world_to_camera.try_inverse()
    }

    /// Position of the camera in world space.
    pub fn center(&self) -> Option<Point3<f32>> {
        self.camera_to_world()
            .map(|m| m.transform_point(&Point3::origin()))
    }

    /// Width over height, as implied by the projection.
    pub fn aspect_ratio(&self) -> f32 {
        self.projection[(1, 1)] / self.projection[(0, 0)]
    }

    /// Rescale the projection to a new aspect ratio, keeping the vertical field of view.
    pub fn with_aspect_ratio(mut self, aspect_ratio: f32) -> Self {
        self.projection[(0, 0)] = self.projection[(1, 1)] / aspect_ratio;
        self
    }

    /// The `SetCamera` command for this camera.
    pub fn to_command(&self) -> Result<Command, CodecError> {
        Ok(Command::SetCamera(SetCamera {
            value: CameraValue {
                world_to_camera: transform_to_base64(&self.world_to_camera)?,
                projection: transform_to_base64(&self.projection)?,
            },
        }))
    }
}

/// Right-handed OpenGL perspective projection, as built by `gluPerspective`.
pub fn gl_projection(fov_y_degrees: f32, aspect_ratio: f32, near: f32, far: f32) -> Matrix4<f32> {
    let f = 1.0 / (0.5 * fov_y_degrees.to_radians()).tan();
    let depth = near - far;
    #[rustfmt::skip]
    let projection = Matrix4::new(
        f / aspect_ratio, 0.0, 0.0, 0.0,
        0.0, f, 0.0, 0.0,
        0.0, 0.0, (far + near) / depth, 2.0 * far * near / depth,
        0.0, 0.0, -1.0, 0.0,
    );
    projection
}
