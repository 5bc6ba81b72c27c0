//! 3D canvases and their animation frames.

use nalgebra::Matrix4;
use tableau_geom::CodecError;

use crate::{
    command::{self, transform_to_base64, Command, CommandEntry},
    Camera, Mesh,
};

/// Aspect ratios closer than this are considered equal.
const ASPECT_TOLERANCE: f32 = 1e-3;

fn fit_camera(camera: Camera, aspect_ratio: f32, owner: &str) -> Camera {
    if (camera.aspect_ratio() - aspect_ratio).abs() > ASPECT_TOLERANCE {
        tracing::warn!(
            owner,
            camera = camera.aspect_ratio(),
            canvas = aspect_ratio,
            "camera aspect ratio does not match its canvas; using the canvas aspect ratio"
        );
        camera.with_aspect_ratio(aspect_ratio)
    } else {
        camera
    }
}

/// One frame of a 3D canvas: the meshes to draw and, optionally, a camera.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame3D {
    frame_id: String,
    aspect_ratio: f32,
    meshes: Vec<(String, Option<Matrix4<f32>>)>,
    camera: Option<Camera>,
}

impl Frame3D {
    #[inline]
    pub fn frame_id(&self) -> &str {
        &self.frame_id
    }

    /// Mesh ids drawn in this frame, with their transforms.
    #[inline]
    pub fn meshes(&self) -> &[(String, Option<Matrix4<f32>>)] {
        &self.meshes
    }

    #[inline]
    pub fn camera(&self) -> Option<&Camera> {
        self.camera.as_ref()
    }

    /// Draw `mesh` in this frame, optionally transformed.
    pub fn add_mesh(&mut self, mesh: &Mesh, transform: Option<Matrix4<f32>>) {
        self.add_mesh_by_id(mesh.mesh_id(), transform);
    }

    /// Identity transforms are dropped.
    pub fn add_mesh_by_id(&mut self, mesh_id: &str, transform: Option<Matrix4<f32>>) {
        let transform = transform.filter(|t| *t != Matrix4::identity());
        self.meshes.push((mesh_id.to_owned(), transform));
    }

    /// Use `camera` for this frame only. Its aspect ratio is fitted to the canvas.
    pub fn set_camera(&mut self, camera: Camera) {
        self.camera = Some(fit_camera(camera, self.aspect_ratio, &self.frame_id));
    }

    fn to_commands(&self) -> Result<Vec<Command>, CodecError> {
        let mut commands = self
            .meshes
            .iter()
            .map(|(mesh_id, transform)| {
                Ok(Command::AddMesh(command::AddMesh {
                    mesh_id: mesh_id.clone(),
                    transform: transform.as_ref().map(transform_to_base64).transpose()?,
                }))
            })
            .collect::<Result<Vec<_>, CodecError>>()?;
        if let Some(camera) = &self.camera {
            commands.push(camera.to_command()?);
        }
        Ok(vec![
            Command::AddFrame(command::AddFrame {
                frame_id: self.frame_id.clone(),
            }),
            Command::FrameCommands(command::FrameCommands {
                frame_id: self.frame_id.clone(),
                commands,
            }),
        ])
    }
}

/// A 3D viewport with a sequence of frames.
#[derive(Debug, Clone, PartialEq)]
pub struct Canvas3D {
    canvas_id: String,
    width: f64,
    height: f64,
    html_id: Option<String>,
    camera: Camera,
    frames: Vec<Frame3D>,
    num_frames: usize,
}

impl Canvas3D {
    pub(crate) fn new(
        canvas_id: String,
        width: f64,
        height: f64,
        html_id: Option<String>,
        camera: Option<Camera>,
    ) -> Self {
        let aspect_ratio = (width / height) as f32;
        let camera = match camera {
            Some(camera) => fit_camera(camera, aspect_ratio, &canvas_id),
            None => Camera::default().with_aspect_ratio(aspect_ratio),
        };
        Self {
            canvas_id,
            width,
            height,
            html_id,
            camera,
            frames: Vec::new(),
            num_frames: 0,
        }
    }

    #[inline]
    pub fn canvas_id(&self) -> &str {
        &self.canvas_id
    }

    #[inline]
    pub fn width(&self) -> f64 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> f64 {
        self.height
    }

    #[inline]
    pub fn aspect_ratio(&self) -> f32 {
        (self.width / self.height) as f32
    }

    #[inline]
    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    /// Default camera of every frame without its own.
    pub fn set_camera(&mut self, camera: Camera) {
        self.camera = fit_camera(camera, self.aspect_ratio(), &self.canvas_id);
    }

    #[inline]
    pub fn frames(&self) -> &[Frame3D] {
        &self.frames
    }

    /// The frame with the given id.
    pub fn frame_mut(&mut self, frame_id: &str) -> Option<&mut Frame3D> {
        self.frames.iter_mut().find(|f| f.frame_id == frame_id)
    }

    /// Append a frame drawing `mesh_ids`. The id defaults to the number of frames created so far.
    pub fn create_frame(
        &mut self,
        frame_id: Option<&str>,
        mesh_ids: &[&str],
        camera: Option<Camera>,
    ) -> &mut Frame3D {
        let frame_id = frame_id
            .map(str::to_owned)
            .unwrap_or_else(|| self.num_frames.to_string());
        self.num_frames += 1;

        let mut frame = Frame3D {
            frame_id,
            aspect_ratio: self.aspect_ratio(),
            meshes: Vec::new(),
            camera: None,
        };
        for mesh_id in mesh_ids {
            frame.add_mesh_by_id(mesh_id, None);
        }
        if let Some(camera) = camera {
            frame.set_camera(camera);
        }
        let index = self.frames.len();
        self.frames.push(frame);
        &mut self.frames[index]
    }

    /// Forget all frames.
    pub(crate) fn clear_script(&mut self) {
        self.frames.clear();
    }

    pub(crate) fn add_command(&self) -> Command {
        Command::AddCanvas3D(command::AddCanvas3D {
            canvas_id: self.canvas_id.clone(),
            width: self.width,
            height: self.height,
            html_id: self.html_id.clone(),
        })
    }

    /// The canvas camera followed by one `AddFrame`/`FrameCommands` group per frame.
    pub fn to_command(&self) -> Result<Command, CodecError> {
        let mut commands = vec![CommandEntry::Single(self.camera.to_command()?)];
        for frame in &self.frames {
            commands.push(CommandEntry::Group(frame.to_commands()?));
        }
        Ok(Command::CanvasCommands(command::CanvasCommands {
            canvas_id: self.canvas_id.clone(),
            commands,
        }))
    }
}
