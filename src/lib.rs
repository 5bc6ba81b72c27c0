//! Scene description for web-based 3D visualization.
//!
//! A [Scene] owns meshes, per-frame mesh updates and canvases, and serializes them into a stream
//! of JSON [commands](command::Command) for a companion renderer. Numeric buffers travel inside
//! commands in a compressed, Base64-embedded [wire form](geom::codec).
//!
//! Long mesh animations can be shrunk with [Scene::quantize_updates], which stores a few
//! keyframes at full precision and every other frame as a 16-bit delta.
#![cfg_attr(not(debug_assertions), warn(missing_docs))]

pub mod camera;
pub mod canvas;
pub mod color;
pub mod command;
pub mod error;
pub mod mesh;
pub mod quantize;
pub mod scene;

pub use tableau_geom as geom;

pub use camera::Camera;
pub use canvas::{Canvas3D, Frame3D};
pub use color::Color;
pub use error::{Error, Result};
pub use mesh::{Mesh, MeshOptions, MeshUpdate, UpdateFlags};
pub use quantize::{QuantizationInfo, QuantizeOptions};
pub use scene::{HtmlOptions, Scene, ScriptSource, StatusBarVisibility};
