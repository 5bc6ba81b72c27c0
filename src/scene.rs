//! The top-level scene: owns meshes, mesh updates and canvases, and serializes them to a command
//! stream.

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashMap},
    fmt, fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use crate::{
    command::{self, Command},
    quantize::{self, QuantizationInfo, QuantizeOptions},
    Camera, Canvas3D, Mesh, MeshOptions, MeshUpdate, Result, UpdateFlags,
};

#[derive(Debug, thiserror::Error)]
pub enum SceneError {
    #[error("no mesh with id {0:?}")]
    UnknownMesh(String),
    #[error("a mesh with id {0:?} already exists")]
    DuplicateMesh(String),
    #[error("no canvas with id {0:?}")]
    UnknownCanvas(String),
    #[error("a canvas with id {0:?} already exists")]
    DuplicateCanvas(String),
    #[error("the script of this scene has been cleared; it can no longer be saved as HTML")]
    ScriptCleared,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusBarVisibility {
    #[default]
    Visible,
    Hidden,
    Collapsed,
}

impl fmt::Display for StatusBarVisibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StatusBarVisibility::Visible => "visible",
            StatusBarVisibility::Hidden => "hidden",
            StatusBarVisibility::Collapsed => "collapsed",
        })
    }
}

#[derive(Debug, thiserror::Error)]
#[error("expected one of visible, hidden, collapsed; found {0:?}")]
pub struct ParseStatusBarVisibilityError(String);

impl FromStr for StatusBarVisibility {
    type Err = ParseStatusBarVisibilityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "visible" => Ok(StatusBarVisibility::Visible),
            "hidden" => Ok(StatusBarVisibility::Hidden),
            "collapsed" => Ok(StatusBarVisibility::Collapsed),
            _ => Err(ParseStatusBarVisibilityError(s.to_owned())),
        }
    }
}

/// Where the page gets a script from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptSource {
    /// Embedded in the page.
    Inline(String),
    /// Referenced by URL or path.
    Link(String),
}

/// Options for [Scene::save_as_html].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HtmlOptions {
    pub title: String,
    /// Appended to the page's `<head>`.
    pub head_html: String,
    /// Contents of the page's `<body>`.
    pub body_html: String,
    /// Write the scene script to this file and link it, instead of embedding it.
    pub script_path: Option<PathBuf>,
    /// The renderer that interprets the command stream.
    pub library: Option<ScriptSource>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Scene {
    scene_id: Option<String>,
    frame_rate: f32,
    status_bar_visibility: StatusBarVisibility,
    meshes: Vec<Mesh>,
    mesh_updates: Vec<MeshUpdate>,
    /// Number of updates made to each base mesh.
    update_counts: HashMap<String, u32>,
    canvases: Vec<Canvas3D>,
    display_order: Vec<Command>,
    misc: Vec<Command>,
    num_meshes: usize,
    num_canvases: usize,
    script_cleared: bool,
}

impl Default for Scene {
    fn default() -> Self {
        Self::new(None)
    }
}

impl Scene {
    /// Playback rate of new scenes, in frames per second.
    pub const DEFAULT_FRAME_RATE: f32 = 30.0;

    /// An empty scene. An empty id is treated as no id.
    pub fn new(scene_id: Option<&str>) -> Self {
        Self {
            scene_id: scene_id.filter(|id| !id.is_empty()).map(str::to_owned),
            frame_rate: Self::DEFAULT_FRAME_RATE,
            status_bar_visibility: StatusBarVisibility::default(),
            meshes: Vec::new(),
            mesh_updates: Vec::new(),
            update_counts: HashMap::new(),
            canvases: Vec::new(),
            display_order: Vec::new(),
            misc: Vec::new(),
            num_meshes: 0,
            num_canvases: 0,
            script_cleared: false,
        }
    }

    #[inline]
    pub fn scene_id(&self) -> Option<&str> {
        self.scene_id.as_deref()
    }

    #[inline]
    pub fn frame_rate(&self) -> f32 {
        self.frame_rate
    }

    #[inline]
    pub fn set_frame_rate(&mut self, frame_rate: f32) {
        self.frame_rate = frame_rate;
    }

    #[inline]
    pub fn status_bar_visibility(&self) -> StatusBarVisibility {
        self.status_bar_visibility
    }

    #[inline]
    pub fn set_status_bar_visibility(&mut self, visibility: StatusBarVisibility) {
        self.status_bar_visibility = visibility;
    }

    #[inline]
    pub fn meshes(&self) -> &[Mesh] {
        &self.meshes
    }

    #[inline]
    pub fn mesh_updates(&self) -> &[MeshUpdate] {
        &self.mesh_updates
    }

    #[inline]
    pub fn canvases(&self) -> &[Canvas3D] {
        &self.canvases
    }

    /// The mesh with the given id.
    pub fn mesh(&self, mesh_id: &str) -> Option<&Mesh> {
        self.meshes.iter().find(|m| m.mesh_id() == mesh_id)
    }

    pub fn mesh_mut(&mut self, mesh_id: &str) -> Option<&mut Mesh> {
        self.meshes.iter_mut().find(|m| m.mesh_id() == mesh_id)
    }

    /// Create an empty mesh. The id defaults to `Mesh-{n}`, where `n` counts every mesh created so
    /// far.
    pub fn create_mesh(&mut self, mesh_id: Option<&str>, options: MeshOptions) -> Result<&mut Mesh> {
        let mesh_id = mesh_id
            .map(str::to_owned)
            .unwrap_or_else(|| format!("Mesh-{}", self.num_meshes));
        if self.mesh(&mesh_id).is_some() {
            return Err(SceneError::DuplicateMesh(mesh_id).into());
        }
        self.num_meshes += 1;
        let index = self.meshes.len();
        self.meshes.push(Mesh::new(mesh_id, options));
        Ok(&mut self.meshes[index])
    }

    fn push_update(
        &mut self,
        base_mesh_id: &str,
        mesh_id: Option<&str>,
        rows: usize,
        buffers: &[(Option<&DMatrix<f32>>, UpdateFlags)],
    ) -> Result<&MeshUpdate> {
        let mesh_id = mesh_id
            .map(str::to_owned)
            .unwrap_or_else(|| format!("Mesh-{}", self.num_meshes));
        let frame_index = self.update_counts.get(base_mesh_id).copied().unwrap_or(0);
        let update = MeshUpdate::new(base_mesh_id.to_owned(), mesh_id, frame_index, rows, buffers)?;
        self.num_meshes += 1;
        *self.update_counts.entry(base_mesh_id.to_owned()).or_default() += 1;

        let index = self.mesh_updates.len();
        self.mesh_updates.push(update);
        Ok(&self.mesh_updates[index])
    }

    fn base_mesh(&self, base_mesh_id: &str) -> Result<&Mesh> {
        Ok(self
            .mesh(base_mesh_id)
            .ok_or_else(|| SceneError::UnknownMesh(base_mesh_id.to_owned()))?)
    }

    /// Record a new frame of a mesh's animation. Each present buffer replaces the matching
    /// attribute of every vertex.
    pub fn update_mesh(
        &mut self,
        base_mesh_id: &str,
        positions: Option<&DMatrix<f32>>,
        normals: Option<&DMatrix<f32>>,
        colors: Option<&DMatrix<f32>>,
        mesh_id: Option<&str>,
    ) -> Result<&MeshUpdate> {
        let rows = self.base_mesh(base_mesh_id)?.vertex_count();
        self.push_update(
            base_mesh_id,
            mesh_id,
            rows,
            &[
                (positions, UpdateFlags::POSITIONS),
                (normals, UpdateFlags::NORMALS),
                (colors, UpdateFlags::COLORS),
            ],
        )
    }

    /// As [Self::update_mesh], for the per-instance data of an instanced mesh.
    pub fn update_instanced_mesh(
        &mut self,
        base_mesh_id: &str,
        positions: Option<&DMatrix<f32>>,
        rotations: Option<&DMatrix<f32>>,
        colors: Option<&DMatrix<f32>>,
        mesh_id: Option<&str>,
    ) -> Result<&MeshUpdate> {
        let rows = self
            .base_mesh(base_mesh_id)?
            .instances()
            .map_or(0, |i| i.buffer().nrows());
        self.push_update(
            base_mesh_id,
            mesh_id,
            rows,
            &[
                (positions, UpdateFlags::POSITIONS),
                (rotations, UpdateFlags::ROTATIONS),
                (colors, UpdateFlags::COLORS),
            ],
        )
    }

    /// Move the vertices of a mesh, or its instances if it is instanced.
    pub fn update_mesh_positions(
        &mut self,
        base_mesh_id: &str,
        positions: &DMatrix<f32>,
        mesh_id: Option<&str>,
    ) -> Result<&MeshUpdate> {
        if self.base_mesh(base_mesh_id)?.is_instanced() {
            self.update_instanced_mesh(base_mesh_id, Some(positions), None, None, mesh_id)
        } else {
            self.update_mesh(base_mesh_id, Some(positions), None, None, mesh_id)
        }
    }

    /// Choose keyframes and quantize the updates of every base mesh (or only
    /// `options.base_mesh_id`), returning a summary per base mesh.
    #[tracing::instrument(skip(self))]
    pub fn quantize_updates(
        &mut self,
        options: &QuantizeOptions,
    ) -> Result<BTreeMap<String, QuantizationInfo>> {
        let mut groups = BTreeMap::<String, Vec<&mut MeshUpdate>>::new();
        for update in self.mesh_updates.iter_mut() {
            let include = options
                .base_mesh_id
                .as_deref()
                .map_or(true, |id| id == update.base_mesh_id());
            if include {
                groups
                    .entry(update.base_mesh_id().to_owned())
                    .or_default()
                    .push(update);
            }
        }

        let mut info = BTreeMap::new();
        for (base_mesh_id, mut updates) in groups {
            let mesh_range = self
                .meshes
                .iter()
                .find(|m| m.mesh_id() == base_mesh_id)
                .ok_or_else(|| SceneError::UnknownMesh(base_mesh_id.clone()))?
                .value_range();
            let representable_range = quantize::compute_representable_range(
                options.relative_error_threshold,
                options.absolute_error_threshold,
                mesh_range,
            )?;
            let group_info = quantize::quantize_updates_for_mesh(
                representable_range,
                &mut updates,
                options.per_frame_range,
            )?;
            tracing::debug!(mesh = %base_mesh_id, info = %group_info);
            info.insert(base_mesh_id, group_info);
        }
        Ok(info)
    }

    /// Create a 3D canvas. The id defaults to `Canvas-{n}`; without a camera, a default one is
    /// fitted to the canvas' aspect ratio.
    pub fn create_canvas_3d(
        &mut self,
        canvas_id: Option<&str>,
        width: f64,
        height: f64,
        html_id: Option<&str>,
        camera: Option<Camera>,
    ) -> Result<&mut Canvas3D> {
        let canvas_id = canvas_id
            .map(str::to_owned)
            .unwrap_or_else(|| format!("Canvas-{}", self.num_canvases));
        if self.canvas_3d(&canvas_id).is_some() {
            return Err(SceneError::DuplicateCanvas(canvas_id).into());
        }
        self.num_canvases += 1;

        let canvas = Canvas3D::new(canvas_id, width, height, html_id.map(str::to_owned), camera);
        self.display_order.push(canvas.add_command());
        let index = self.canvases.len();
        self.canvases.push(canvas);
        Ok(&mut self.canvases[index])
    }

    /// The 3D canvas with the given id.
    pub fn canvas_3d(&self, canvas_id: &str) -> Option<&Canvas3D> {
        self.canvases.iter().find(|c| c.canvas_id() == canvas_id)
    }

    pub fn canvas_3d_mut(&mut self, canvas_id: &str) -> Option<&mut Canvas3D> {
        self.canvases.iter_mut().find(|c| c.canvas_id() == canvas_id)
    }

    /// Lay out canvases in a CSS grid `width` wide with the given track templates.
    pub fn grid(&mut self, width: &str, grid_template_rows: &str, grid_template_columns: &str) {
        self.display_order.push(Command::DefineGrid(command::DefineGrid {
            width: width.to_owned(),
            grid_template_rows: grid_template_rows.to_owned(),
            grid_template_columns: grid_template_columns.to_owned(),
        }));
    }

    /// Place a canvas in a cell of the grid defined by [Self::grid].
    pub fn place(&mut self, canvas_id: &str, grid_row: &str, grid_column: &str) -> Result<()> {
        if self.canvas_3d(canvas_id).is_none() {
            return Err(SceneError::UnknownCanvas(canvas_id.to_owned()).into());
        }
        self.display_order
            .push(Command::PlaceCanvasInGrid(command::PlaceCanvasInGrid {
                canvas_id: canvas_id.to_owned(),
                grid_row: grid_row.to_owned(),
                grid_column: grid_column.to_owned(),
            }));
        Ok(())
    }

    /// Share camera and playback events between canvases.
    pub fn link_canvas_events(&mut self, canvas_ids: &[&str]) -> Result<()> {
        if let Some(missing) = canvas_ids.iter().find(|id| self.canvas_3d(id).is_none()) {
            return Err(SceneError::UnknownCanvas((*missing).to_owned()).into());
        }
        self.misc.push(Command::LinkCanvasEvents(command::LinkCanvasEvents {
            canvas_ids: canvas_ids.iter().map(|&id| id.to_owned()).collect(),
        }));
        Ok(())
    }

    /// The full command stream, in the order the renderer expects.
    pub fn to_commands(&self) -> Result<Vec<Command>> {
        let mut commands = Vec::new();
        if let Some(scene_id) = &self.scene_id {
            commands.push(Command::SetSceneId(command::SetSceneId {
                scene_id: scene_id.clone(),
            }));
        }
        commands.push(Command::SetSceneProperties(command::SetSceneProperties {
            frame_rate: self.frame_rate,
            status_bar_visibility: self.status_bar_visibility,
        }));
        for mesh in &self.meshes {
            commands.push(mesh.to_command()?);
        }
        // keyframes must reach the renderer before the deltas that reference them
        for update in self.mesh_updates.iter().filter(|u| !u.is_quantized()) {
            commands.push(update.to_command()?);
        }
        for update in self.mesh_updates.iter().filter(|u| u.is_quantized()) {
            commands.push(update.to_command()?);
        }
        commands.extend(self.display_order.iter().cloned());
        for canvas in &self.canvases {
            commands.push(canvas.to_command()?);
        }
        commands.extend(self.misc.iter().cloned());
        Ok(commands)
    }

    /// The command stream as a JSON array.
    pub fn json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.to_commands()?)?)
    }

    /// A script which hands the command stream to the renderer once the page has loaded.
    pub fn script(&self) -> Result<String> {
        Ok(format!(
            "window.onload = function(){{\n    let commands = {};\n    tableau(null, commands);\n}}\n",
            self.json()?
        ))
    }

    /// Write [Self::json] to `path`.
    pub fn save_as_json(&self, path: impl AsRef<Path>) -> Result<()> {
        fs::write(path, self.json()?)?;
        Ok(())
    }

    /// Write [Self::script], preceded by `library` if given.
    pub fn save_as_script(&self, path: impl AsRef<Path>, library: Option<&str>) -> Result<()> {
        let mut out = String::new();
        if let Some(library) = library {
            out.push_str(library);
            out.push_str("\n\n");
        }
        out.push_str(&self.script()?);
        fs::write(path, out)?;
        Ok(())
    }

    /// Write a standalone page that renders this scene.
    #[tracing::instrument(skip(self, options), fields(path = %path.as_ref().display()))]
    pub fn save_as_html(&self, path: impl AsRef<Path>, options: &HtmlOptions) -> Result<()> {
        if self.script_cleared {
            return Err(SceneError::ScriptCleared.into());
        }

        let script = self.script()?;
        let script_tag = match &options.script_path {
            Some(script_path) => {
                fs::write(script_path, &script)?;
                format!("<script src='{}'></script>", script_path.display())
            }
            None => format!("<script>{script}</script>"),
        };
        let library_tag = match &options.library {
            Some(ScriptSource::Inline(source)) => format!("<script>{source}</script>"),
            Some(ScriptSource::Link(src)) => format!("<script src='{src}'></script>"),
            None => String::new(),
        };

        let html = format!(
            "<!DOCTYPE html>\n\
             <html lang=\"en\">\n   \
             <head>\n      \
             <meta charset=\"utf-8\"/>\n      \
             <title>{title}</title>\n      \
             {library_tag}\n      \
             {script_tag}\n      \
             {head}\n   \
             </head>\n   \
             <body>\n\
             {body}\n   \
             </body>\n\
             </html>",
            title = options.title,
            head = options.head_html,
            body = options.body_html,
        );
        fs::write(path, html)?;
        Ok(())
    }

    /// Serialized size of the command stream, by command type.
    pub fn measure_command_size(&self) -> Result<BTreeMap<String, usize>> {
        Ok(command::measure_command_size(&self.to_commands()?)?)
    }

    /// Drop everything already sent to a renderer, so the next command stream only carries what
    /// is added afterwards. Canvases, their cameras and the id counters are kept.
    pub fn clear_script(&mut self) {
        self.scene_id = None;
        self.meshes.clear();
        self.mesh_updates.clear();
        self.display_order.clear();
        self.misc.clear();
        for canvas in &mut self.canvases {
            canvas.clear_script();
        }
        self.script_cleared = true;
    }

    #[inline]
    pub fn script_cleared(&self) -> bool {
        self.script_cleared
    }
}
