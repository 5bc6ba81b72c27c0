//! The crate-level error type.

use tableau_geom::{CodecError, MeshInfoError, StencilError};

use crate::{mesh::MeshError, quantize::QuantizeError, scene::SceneError};

/// Any error raised while building or exporting a scene.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Stencil(#[from] StencilError),
    #[error(transparent)]
    MeshInfo(#[from] MeshInfoError),
    #[error(transparent)]
    Quantize(#[from] QuantizeError),
    #[error(transparent)]
    Mesh(#[from] MeshError),
    #[error(transparent)]
    Scene(#[from] SceneError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result with [Error] as the default error type.
pub type Result<T, E = Error> = std::result::Result<T, E>;
