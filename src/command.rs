//! The command stream consumed by the renderer.
//!
//! A scene serializes to an ordered list of JSON objects, each tagged with a `"CommandType"`.
//! Numeric buffers inside commands are embedded as Base64 text of the
//! [compressed wire form](tableau_geom::codec).
//!
//! Transforms are embedded in column-major order, as WebGL expects them.

use nalgebra::{DMatrix, Matrix4};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tableau_geom::{codec, CodecError};

use crate::scene::StatusBarVisibility;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "CommandType")]
pub enum Command {
    SetSceneId(SetSceneId),
    SetSceneProperties(SetSceneProperties),
    DefineMesh(DefineMesh),
    UpdateMesh(UpdateMesh),
    AddCanvas3D(AddCanvas3D),
    DefineGrid(DefineGrid),
    PlaceCanvasInGrid(PlaceCanvasInGrid),
    CanvasCommands(CanvasCommands),
    AddFrame(AddFrame),
    FrameCommands(FrameCommands),
    AddMesh(AddMesh),
    SetCamera(SetCamera),
    LinkCanvasEvents(LinkCanvasEvents),
}

impl Command {
    /// The `"CommandType"` tag of this command.
    pub fn command_type(&self) -> &'static str {
        match self {
            Command::SetSceneId(_) => "SetSceneId",
            Command::SetSceneProperties(_) => "SetSceneProperties",
            Command::DefineMesh(_) => "DefineMesh",
            Command::UpdateMesh(_) => "UpdateMesh",
            Command::AddCanvas3D(_) => "AddCanvas3D",
            Command::DefineGrid(_) => "DefineGrid",
            Command::PlaceCanvasInGrid(_) => "PlaceCanvasInGrid",
            Command::CanvasCommands(_) => "CanvasCommands",
            Command::AddFrame(_) => "AddFrame",
            Command::FrameCommands(_) => "FrameCommands",
            Command::AddMesh(_) => "AddMesh",
            Command::SetCamera(_) => "SetCamera",
            Command::LinkCanvasEvents(_) => "LinkCanvasEvents",
        }
    }
}

/// An entry of a container command: either one command or a group of commands which belong
/// together (e.g. `AddFrame` and its `FrameCommands`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandEntry {
    Single(Command),
    Group(Vec<Command>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SetSceneId {
    pub scene_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SetSceneProperties {
    pub frame_rate: f32,
    pub status_bar_visibility: StatusBarVisibility,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DefineMesh {
    pub mesh_id: String,
    pub layer_id: Option<String>,
    pub double_sided: bool,
    pub definition: MeshDefinition,
    pub camera_space: bool,
    pub is_billboard: bool,
    pub is_label: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexBufferType {
    UInt16,
    UInt32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrimitiveType {
    SingleColorMesh,
    MultiColorMesh,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MeshDefinition {
    pub vertex_buffer: String,
    pub index_buffer_type: IndexBufferType,
    pub triangle_buffer: String,
    pub primitive_type: PrimitiveType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub texture_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nearest_neighbor_texture: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_texture_alpha: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_buffer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_buffer_has_rotations: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_buffer_has_colors: Option<bool>,
}

/// One frame of a mesh animation: either a full-precision vertex buffer, or a fixed-point delta
/// from a keyframe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UpdateMesh {
    pub base_mesh_id: String,
    pub mesh_id: String,
    pub frame_index: u32,
    pub update_flags: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyframe_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_value: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantized_buffer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vertex_buffer: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AddCanvas3D {
    pub canvas_id: String,
    #[serde(serialize_with = "integral_if_whole")]
    pub width: f64,
    #[serde(serialize_with = "integral_if_whole")]
    pub height: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DefineGrid {
    pub width: String,
    pub grid_template_rows: String,
    pub grid_template_columns: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PlaceCanvasInGrid {
    pub canvas_id: String,
    pub grid_row: String,
    pub grid_column: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CanvasCommands {
    pub canvas_id: String,
    pub commands: Vec<CommandEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AddFrame {
    pub frame_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FrameCommands {
    pub frame_id: String,
    pub commands: Vec<Command>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AddMesh {
    pub mesh_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SetCamera {
    pub value: CameraValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CameraValue {
    pub world_to_camera: String,
    pub projection: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LinkCanvasEvents {
    pub canvas_ids: Vec<String>,
}

fn integral_if_whole<S: serde::Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        serializer.serialize_i64(*value as i64)
    } else {
        serializer.serialize_f64(*value)
    }
}

/// Encode a transform as embedded in commands.
pub fn transform_to_base64(transform: &Matrix4<f32>) -> Result<String, CodecError> {
    // rows of the buffer are the columns of the transform
    codec::matrix_to_base64(&DMatrix::from_row_slice(4, 4, transform.as_slice()))
}

/// Inverse of [transform_to_base64].
pub fn transform_from_base64(text: &str) -> Result<Matrix4<f32>, CodecError> {
    let buffer = codec::matrix_from_base64::<f32>(text)?;
    let shape = buffer.shape();
    if shape != (4, 4) {
        return Err(CodecError::PayloadSize {
            expected: 16,
            found: shape.0 * shape.1,
        });
    }
    Ok(Matrix4::from_fn(|r, c| buffer[(c, r)]))
}

/// Total pretty-printed size of every command, by `"CommandType"`.
///
/// Container commands (those with a `"Commands"` list) are not counted themselves; their
/// contents are measured instead.
pub fn measure_command_size(commands: &[Command]) -> Result<BTreeMap<String, usize>, serde_json::Error> {
    let mut sizes = BTreeMap::new();
    for command in commands {
        measure_value(&serde_json::to_value(command)?, &mut sizes)?;
    }
    Ok(sizes)
}

fn measure_value(
    value: &serde_json::Value,
    sizes: &mut BTreeMap<String, usize>,
) -> Result<(), serde_json::Error> {
    use serde_json::Value;
    match value {
        Value::Array(entries) => {
            for entry in entries {
                measure_value(entry, sizes)?;
            }
        }
        Value::Object(object) if object.contains_key("Commands") => {
            measure_value(&object["Commands"], sizes)?;
        }
        _ => {
            let key = value
                .get("CommandType")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned();
            *sizes.entry(key).or_default() += serde_json::to_string_pretty(value)?.len();
        }
    }
    Ok(())
}
