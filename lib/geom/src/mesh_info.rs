//! Plain triangle meshes and their subdivision.

use crate::buffer::leading_rows;
use crate::stencil::{LoopSubdivisionStencil, StencilError, Triangle};
use nalgebra::DMatrix;

#[derive(Debug, thiserror::Error)]
pub enum MeshInfoError {
    #[error("a mesh cannot have both UV coordinates and per-vertex colors")]
    UvsAndColors,
    #[error("{attribute} buffer has {found} rows; expected one per vertex ({expected})")]
    RowCount {
        attribute: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("{attribute} buffer has {found} columns; expected {expected}")]
    ColumnCount {
        attribute: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("triangle {triangle} references vertex {index}, but there are only {vertex_count} vertices")]
    IndexOutOfRange {
        triangle: usize,
        index: u32,
        vertex_count: usize,
    },
    #[error(transparent)]
    Stencil(#[from] StencilError),
}

/// Raw triangle mesh data: positions, triangles, and optional per-vertex attributes.
///
/// UV coordinates and per-vertex colors are mutually exclusive.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshInfo {
    positions: DMatrix<f32>,
    triangles: Vec<Triangle>,
    normals: Option<DMatrix<f32>>,
    uvs: Option<DMatrix<f32>>,
    colors: Option<DMatrix<f32>>,
}

impl MeshInfo {
    /// `positions` is `N x 3`; every triangle must index into it.
    pub fn new(positions: DMatrix<f32>, triangles: Vec<Triangle>) -> Result<Self, MeshInfoError> {
        check_columns("position", &positions, 3)?;
        let vertex_count = positions.nrows();
        for (triangle, tri) in triangles.iter().enumerate() {
            if let Some(&index) = tri.iter().find(|&&i| i as usize >= vertex_count) {
                return Err(MeshInfoError::IndexOutOfRange {
                    triangle,
                    index,
                    vertex_count,
                });
            }
        }
        Ok(Self {
            positions,
            triangles,
            normals: None,
            uvs: None,
            colors: None,
        })
    }

    /// Attach per-vertex normals (`N x 3`).
    pub fn with_normals(mut self, normals: DMatrix<f32>) -> Result<Self, MeshInfoError> {
        self.check_attribute("normal", &normals, 3)?;
        self.normals = Some(normals);
        Ok(self)
    }

    /// Attach texture coordinates (`N x 2`). Fails if colors are attached.
    pub fn with_uvs(mut self, uvs: DMatrix<f32>) -> Result<Self, MeshInfoError> {
        if self.colors.is_some() {
            return Err(MeshInfoError::UvsAndColors);
        }
        self.check_attribute("uv", &uvs, 2)?;
        self.uvs = Some(uvs);
        Ok(self)
    }

    /// Attach per-vertex colors (`N x 3`). Fails if UVs are attached.
    pub fn with_colors(mut self, colors: DMatrix<f32>) -> Result<Self, MeshInfoError> {
        if self.uvs.is_some() {
            return Err(MeshInfoError::UvsAndColors);
        }
        self.check_attribute("color", &colors, 3)?;
        self.colors = Some(colors);
        Ok(self)
    }

    fn check_attribute(
        &self,
        attribute: &'static str,
        buffer: &DMatrix<f32>,
        cols: usize,
    ) -> Result<(), MeshInfoError> {
        check_columns(attribute, buffer, cols)?;
        if buffer.nrows() != self.vertex_count() {
            return Err(MeshInfoError::RowCount {
                attribute,
                expected: self.vertex_count(),
                found: buffer.nrows(),
            });
        }
        Ok(())
    }

    #[inline]
    pub fn positions(&self) -> &DMatrix<f32> {
        &self.positions
    }

    #[inline]
    pub fn triangles(&self) -> &[Triangle] {
        &self.triangles
    }

    #[inline]
    pub fn normals(&self) -> Option<&DMatrix<f32>> {
        self.normals.as_ref()
    }

    #[inline]
    pub fn uvs(&self) -> Option<&DMatrix<f32>> {
        self.uvs.as_ref()
    }

    #[inline]
    pub fn colors(&self) -> Option<&DMatrix<f32>> {
        self.colors.as_ref()
    }

    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.positions.nrows()
    }

    #[inline]
    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    /// Loop-subdivide this mesh, carrying every per-vertex attribute through the same stencil.
    ///
    /// Vertices past the largest referenced index are dropped.
    pub fn subdivide(&self, steps: u32, project_to_limit: bool) -> Result<Self, MeshInfoError> {
        let stencil = LoopSubdivisionStencil::create(&self.triangles, steps, project_to_limit)?;
        self.subdivide_with(&stencil)
    }

    /// Apply a prebuilt stencil, which must have been created from this mesh's triangles.
    pub fn subdivide_with(&self, stencil: &LoopSubdivisionStencil) -> Result<Self, MeshInfoError> {
        let inputs = stencil.input_vertex_count();
        let apply = |buffer: &DMatrix<f32>| -> Result<DMatrix<f32>, MeshInfoError> {
            Ok(stencil.apply(&leading_rows(buffer, inputs))?)
        };
        Ok(Self {
            positions: apply(&self.positions)?,
            triangles: stencil.triangles().to_vec(),
            normals: self.normals.as_ref().map(apply).transpose()?,
            uvs: self.uvs.as_ref().map(apply).transpose()?,
            colors: self.colors.as_ref().map(apply).transpose()?,
        })
    }
}

fn check_columns(
    attribute: &'static str,
    buffer: &DMatrix<f32>,
    expected: usize,
) -> Result<(), MeshInfoError> {
    if buffer.ncols() != expected {
        return Err(MeshInfoError::ColumnCount {
            attribute,
            expected,
            found: buffer.ncols(),
        });
    }
    Ok(())
}
