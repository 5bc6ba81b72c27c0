//! Utilities for loading Wavefront OBJ data as a [MeshInfo].
//!
//! # Notes
//!
//! * Faces are triangulated on load and every vertex gets a single index shared by its position,
//!   normal, and texture coordinate.
//! * Every model in the file is merged into one mesh.
//! * Normals are only kept if every model has them; likewise for UVs and vertex colors.
//! * If a file carries both UVs and vertex colors, the colors are dropped.
//!
//! # See Also
//!
//! * [tobj](https://docs.rs/tobj)

use crate::{MeshInfo, MeshInfoError, Triangle};
use nalgebra::DMatrix;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ObjError {
    #[error(transparent)]
    Load(#[from] tobj::LoadError),
    #[error("file contains no geometry")]
    Empty,
    #[error(transparent)]
    Mesh(#[from] MeshInfoError),
}

#[derive(Default)]
struct Merged {
    positions: Vec<f32>,
    indices: Vec<u32>,
    normals: Option<Vec<f32>>,
    uvs: Option<Vec<f32>>,
    colors: Option<Vec<f32>>,
}

impl Merged {
    fn vertex_count(&self) -> usize {
        self.positions.len() / 3
    }
}

/// Extend `merged` with `attribute`, or give up on the attribute entirely if this model lacks it.
fn merge_attribute(merged: &mut Option<Vec<f32>>, attribute: &[f32], first: bool) {
    match merged {
        Some(values) if !attribute.is_empty() => values.extend_from_slice(attribute),
        None if first && !attribute.is_empty() => *merged = Some(attribute.to_vec()),
        _ => *merged = None,
    }
}

fn to_buffer(values: Vec<f32>, cols: usize) -> DMatrix<f32> {
    DMatrix::from_row_slice(values.len() / cols, cols, &values)
}

/// Load every model in an OBJ file as a single mesh.
#[tracing::instrument(skip_all, fields(path = %path.as_ref().display()))]
pub fn load_obj(path: impl AsRef<Path>) -> Result<MeshInfo, ObjError> {
    let options = tobj::LoadOptions {
        triangulate: true,
        single_index: true,
        ..Default::default()
    };
    let (models, _materials) = tobj::load_obj(path.as_ref(), &options)?;

    let mut merged = Merged::default();
    for (i, model) in models.iter().enumerate() {
        let mesh = &model.mesh;
        let offset = merged.vertex_count() as u32;
        let first = i == 0;
        merge_attribute(&mut merged.normals, &mesh.normals, first);
        merge_attribute(&mut merged.uvs, &mesh.texcoords, first);
        merge_attribute(&mut merged.colors, &mesh.vertex_color, first);
        merged.positions.extend_from_slice(&mesh.positions);
        merged.indices.extend(mesh.indices.iter().map(|&i| i + offset));
        tracing::trace!(
            model = %model.name,
            vertices = mesh.positions.len() / 3,
            triangles = mesh.indices.len() / 3,
            "merged model"
        );
    }

    if merged.indices.is_empty() {
        return Err(ObjError::Empty);
    }

    let triangles = merged
        .indices
        .chunks_exact(3)
        .map(|tri| -> Triangle { [tri[0], tri[1], tri[2]] })
        .collect();
    let mut mesh = MeshInfo::new(to_buffer(merged.positions, 3), triangles)?;
    if let Some(normals) = merged.normals {
        mesh = mesh.with_normals(to_buffer(normals, 3))?;
    }
    match (merged.uvs, merged.colors) {
        (Some(uvs), colors) => {
            if colors.is_some() {
                tracing::debug!("dropping vertex colors in favor of texture coordinates");
            }
            mesh = mesh.with_uvs(to_buffer(uvs, 2))?;
        }
        (None, Some(colors)) => mesh = mesh.with_colors(to_buffer(colors, 3))?,
        (None, None) => {}
    }

    tracing::debug!(
        vertices = mesh.vertex_count(),
        triangles = mesh.triangle_count(),
        "loaded obj"
    );
    Ok(mesh)
}
