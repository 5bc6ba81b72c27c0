//! Meshes: vertex buffers, triangles, and the `DefineMesh` command.
//!
//! A mesh's vertex buffer has one row per vertex. The first six columns are always the position
//! and normal; what follows depends on how the mesh is colored:
//!
//! | Coloring | Columns |
//! |---|---|
//! | shared color | `x y z nx ny nz` |
//! | per-vertex color | `x y z nx ny nz r g b` |
//! | texture | `x y z nx ny nz u v` |

mod primitives;
mod update;

pub use update::*;

use nalgebra::{DMatrix, Matrix3, Matrix4, Vector3};
use tableau_geom::{buffer, codec, CodecError, MeshInfo, Triangle};

use crate::{
    command::{Command, DefineMesh, IndexBufferType, MeshDefinition, PrimitiveType},
    Color,
};

#[derive(Debug, thiserror::Error)]
pub enum MeshError {
    #[error("mesh {0:?} stores per-vertex colors, so a color is required")]
    MissingColor(String),
    #[error("mesh {0:?} is textured, so per-vertex UVs are required")]
    MissingUvs(String),
    #[error("mesh {0:?} has no texture; UVs cannot be used")]
    UvsWithoutTexture(String),
    #[error("{attribute} buffer has {found} rows; expected {expected}")]
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
    #[error("triangle {triangle} references vertex {index}, but only {vertex_count} vertices were given")]
    IndexOutOfRange {
        triangle: usize,
        index: u32,
        vertex_count: usize,
    },
    #[error("transform cannot be applied to normals; its upper 3x3 block is singular")]
    SingularTransform,
}

/// Properties fixed when a mesh is created.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshOptions {
    /// Layer the mesh belongs to, for toggling visibility.
    pub layer_id: Option<String>,
    pub double_sided: bool,
    /// Whether the mesh is positioned relative to the camera instead of the world.
    pub camera_space: bool,
    /// A single color for the whole mesh. If `None` (and there is no texture), every vertex
    /// stores its own color.
    pub shared_color: Option<Color>,
    /// Image used as the mesh's texture. Textured meshes store UVs instead of colors.
    pub texture_id: Option<String>,
    /// Sample the texture with nearest-neighbor filtering.
    pub nn_texture: bool,
    pub use_texture_alpha: bool,
    /// Always face the camera.
    pub is_billboard: bool,
    pub is_label: bool,
}

impl Default for MeshOptions {
    fn default() -> Self {
        Self {
            layer_id: None,
            double_sided: false,
            camera_space: false,
            shared_color: None,
            texture_id: None,
            nn_texture: true,
            use_texture_alpha: false,
            is_billboard: false,
            is_label: false,
        }
    }
}

/// What the columns following the position and normal hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexLayout {
    SharedColor,
    VertexColor,
    Textured,
}

impl VertexLayout {
    /// Number of `f32` values per vertex.
    pub const fn width(self) -> usize {
        match self {
            VertexLayout::SharedColor => 6,
            VertexLayout::VertexColor => 9,
            VertexLayout::Textured => 8,
        }
    }
}

/// Per-instance data for meshes drawn many times at once (e.g. point clouds).
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceBuffer {
    buffer: DMatrix<f32>,
    has_rotations: bool,
    has_colors: bool,
}

impl InstanceBuffer {
    /// `position (3) | rotation quaternion (4)? | color (3)?`
    #[inline]
    pub fn buffer(&self) -> &DMatrix<f32> {
        &self.buffer
    }

    #[inline]
    pub fn has_rotations(&self) -> bool {
        self.has_rotations
    }

    #[inline]
    pub fn has_colors(&self) -> bool {
        self.has_colors
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Mesh {
    mesh_id: String,
    options: MeshOptions,
    layout: VertexLayout,
    /// Row-major, `layout.width()` values per vertex.
    vertices: Vec<f32>,
    triangles: Vec<Triangle>,
    instances: Option<InstanceBuffer>,
}

impl Mesh {
    pub(crate) fn new(mesh_id: String, mut options: MeshOptions) -> Self {
        let layout = match (&options.texture_id, options.shared_color) {
            (Some(_), shared) => {
                // the renderer multiplies texels with the shared color
                options.shared_color = Some(shared.unwrap_or(Color::WHITE));
                VertexLayout::Textured
            }
            (None, Some(_)) => VertexLayout::SharedColor,
            (None, None) => VertexLayout::VertexColor,
        };
        Self {
            mesh_id,
            options,
            layout,
            vertices: Vec::new(),
            triangles: Vec::new(),
            instances: None,
        }
    }

    #[inline]
    pub fn mesh_id(&self) -> &str {
        &self.mesh_id
    }

    #[inline]
    pub fn options(&self) -> &MeshOptions {
        &self.options
    }

    #[inline]
    pub fn layout(&self) -> VertexLayout {
        self.layout
    }

    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.vertices.len() / self.layout.width()
    }

    #[inline]
    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    #[inline]
    pub fn triangles(&self) -> &[Triangle] {
        &self.triangles
    }

    #[inline]
    pub fn instances(&self) -> Option<&InstanceBuffer> {
        self.instances.as_ref()
    }

    #[inline]
    pub fn is_instanced(&self) -> bool {
        self.instances.is_some()
    }

    /// The full vertex buffer, one row per vertex.
    pub fn vertex_buffer(&self) -> DMatrix<f32> {
        DMatrix::from_row_slice(self.vertex_count(), self.layout.width(), &self.vertices)
    }

    fn columns(&self, start: usize, count: usize) -> DMatrix<f32> {
        let width = self.layout.width();
        DMatrix::from_fn(self.vertex_count(), count, |r, c| {
            self.vertices[r * width + start + c]
        })
    }

    /// Vertex positions, one row per vertex.
    pub fn vertex_positions(&self) -> DMatrix<f32> {
        self.columns(0, 3)
    }

    /// Vertex normals, one row per vertex.
    pub fn vertex_normals(&self) -> DMatrix<f32> {
        self.columns(3, 3)
    }

    /// Per-vertex colors, if the mesh stores them.
    pub fn vertex_colors(&self) -> Option<DMatrix<f32>> {
        (self.layout == VertexLayout::VertexColor).then(|| self.columns(6, 3))
    }

    /// Texture coordinates, if the mesh is textured.
    pub fn vertex_uvs(&self) -> Option<DMatrix<f32>> {
        (self.layout == VertexLayout::Textured).then(|| self.columns(6, 2))
    }

    /// `max - min` over every value in the vertex buffer; `0` for an empty mesh.
    pub fn value_range(&self) -> f32 {
        value_range(self.vertices.iter().copied())
    }

    /// Mean vertex position.
    pub fn center_of_mass(&self) -> Vector3<f32> {
        let count = self.vertex_count();
        if count == 0 {
            return Vector3::zeros();
        }
        let sum = self
            .vertices
            .chunks_exact(self.layout.width())
            .fold(Vector3::zeros(), |acc, v| acc + Vector3::new(v[0], v[1], v[2]));
        sum / count as f32
    }

    fn warn_if_instanced(&self) {
        if self.is_instanced() {
            tracing::warn!(
                mesh = %self.mesh_id,
                "editing a mesh after enabling instancing can lead to unexpected results"
            );
        }
    }

    /// Per-vertex normals: the normalized sum of the unit normals of every adjacent triangle.
    pub fn compute_normals(
        positions: &DMatrix<f32>,
        triangles: &[Triangle],
        reverse_triangle_order: bool,
    ) -> Result<DMatrix<f32>, MeshError> {
        check_columns("position", positions, 3)?;
        check_indices(triangles, positions.nrows())?;
        let position = |i: u32| -> Vector3<f32> {
            let r = i as usize;
            Vector3::new(positions[(r, 0)], positions[(r, 1)], positions[(r, 2)])
        };
        let sign = if reverse_triangle_order { -1.0 } else { 1.0 };

        let mut normals = vec![Vector3::<f32>::zeros(); positions.nrows()];
        for &[a, b, c] in triangles {
            let (p0, p1, p2) = (position(a), position(b), position(c));
            let face = (p1 - p0).cross(&(p2 - p0)).try_normalize(0.0).unwrap_or_else(Vector3::zeros) * sign;
            for i in [a, b, c] {
                normals[i as usize] += face;
            }
        }
        Ok(DMatrix::from_fn(positions.nrows(), 3, |r, c| {
            normals[r].try_normalize(0.0).unwrap_or_else(Vector3::zeros)[c]
        }))
    }

    /// Append raw geometry. `colors` is required by per-vertex-color meshes and ignored by others;
    /// `uvs` is required by textured meshes and rejected by others.
    #[allow(clippy::too_many_arguments)]
    pub fn add_mesh_with_normals(
        &mut self,
        positions: &DMatrix<f32>,
        normals: &DMatrix<f32>,
        triangles: &[Triangle],
        colors: Option<&DMatrix<f32>>,
        uvs: Option<&DMatrix<f32>>,
        transform: Option<&Matrix4<f32>>,
        reverse_triangle_order: bool,
    ) -> Result<(), MeshError> {
        self.warn_if_instanced();
        let count = positions.nrows();
        check_columns("position", positions, 3)?;
        check_shape("normal", normals, count, 3)?;
        check_indices(triangles, count)?;

        let extra = match self.layout {
            VertexLayout::SharedColor => {
                if uvs.is_some() {
                    return Err(MeshError::UvsWithoutTexture(self.mesh_id.clone()));
                }
                None
            }
            VertexLayout::VertexColor => {
                if uvs.is_some() {
                    return Err(MeshError::UvsWithoutTexture(self.mesh_id.clone()));
                }
                let colors = colors.ok_or_else(|| MeshError::MissingColor(self.mesh_id.clone()))?;
                check_shape("color", colors, count, 3)?;
                Some(colors)
            }
            VertexLayout::Textured => {
                let uvs = uvs.ok_or_else(|| MeshError::MissingUvs(self.mesh_id.clone()))?;
                check_shape("uv", uvs, count, 2)?;
                Some(uvs)
            }
        };

        let (positions, normals) = match transform {
            Some(transform) if *transform != Matrix4::identity() => {
                transform_vertices(positions, normals, transform)?
            }
            _ => (positions.clone(), normals.clone()),
        };

        let offset = self.vertex_count() as u32;
        self.vertices.reserve(count * self.layout.width());
        for r in 0..count {
            self.vertices.extend((0..3).map(|c| positions[(r, c)]));
            self.vertices.extend((0..3).map(|c| normals[(r, c)]));
            if let Some(extra) = extra {
                self.vertices.extend((0..extra.ncols()).map(|c| extra[(r, c)]));
            }
        }
        self.triangles.extend(triangles.iter().map(|&[a, b, c]| {
            let tri = [a + offset, b + offset, c + offset];
            if reverse_triangle_order {
                [tri[0], tri[2], tri[1]]
            } else {
                tri
            }
        }));
        Ok(())
    }

    /// As [Self::add_mesh_with_normals], computing normals from the triangles.
    pub fn add_mesh_without_normals(
        &mut self,
        positions: &DMatrix<f32>,
        triangles: &[Triangle],
        colors: Option<&DMatrix<f32>>,
        uvs: Option<&DMatrix<f32>>,
        transform: Option<&Matrix4<f32>>,
        reverse_triangle_order: bool,
    ) -> Result<(), MeshError> {
        let normals = Self::compute_normals(positions, triangles, reverse_triangle_order)?;
        self.add_mesh_with_normals(
            positions,
            &normals,
            triangles,
            colors,
            uvs,
            transform,
            reverse_triangle_order,
        )
    }

    /// Append a [MeshInfo], computing normals if it has none.
    pub fn add_mesh(
        &mut self,
        info: &MeshInfo,
        transform: Option<&Matrix4<f32>>,
        reverse_triangle_order: bool,
    ) -> Result<(), MeshError> {
        match info.normals() {
            Some(normals) => self.add_mesh_with_normals(
                info.positions(),
                normals,
                info.triangles(),
                info.colors(),
                info.uvs(),
                transform,
                reverse_triangle_order,
            ),
            None => self.add_mesh_without_normals(
                info.positions(),
                info.triangles(),
                info.colors(),
                info.uvs(),
                transform,
                reverse_triangle_order,
            ),
        }
    }

    /// Transform every position, and every normal by the inverse transpose.
    pub fn apply_transform(&mut self, transform: &Matrix4<f32>) -> Result<(), MeshError> {
        let (positions, normals) =
            transform_vertices(&self.vertex_positions(), &self.vertex_normals(), transform)?;
        let width = self.layout.width();
        for (r, vertex) in self.vertices.chunks_exact_mut(width).enumerate() {
            for c in 0..3 {
                vertex[c] = positions[(r, c)];
                vertex[3 + c] = normals[(r, c)];
            }
        }
        Ok(())
    }

    /// Flip the winding of every triangle, and every normal with it.
    pub fn reverse_triangle_order(&mut self) {
        for tri in &mut self.triangles {
            tri.swap(1, 2);
        }
        for vertex in self.vertices.chunks_exact_mut(self.layout.width()) {
            for n in &mut vertex[3..6] {
                *n = -*n;
            }
        }
    }

    /// Draw this mesh once per row of `positions` (`N x 3`), optionally rotated by `rotations`
    /// (`N x 4` quaternions) and colored by `colors` (`N x 3`).
    ///
    /// Replaces any previous instance buffer.
    pub fn enable_instancing(
        &mut self,
        positions: &DMatrix<f32>,
        rotations: Option<&DMatrix<f32>>,
        colors: Option<&DMatrix<f32>>,
    ) -> Result<(), MeshError> {
        if self.is_instanced() {
            tracing::warn!(
                mesh = %self.mesh_id,
                "replacing existing instance buffer"
            );
        }
        let count = positions.nrows();
        check_columns("instance position", positions, 3)?;
        if let Some(rotations) = rotations {
            check_shape("instance rotation", rotations, count, 4)?;
        }
        if let Some(colors) = colors {
            check_shape("instance color", colors, count, 3)?;
        }

        let parts = std::iter::once(positions)
            .chain(rotations)
            .chain(colors)
            .collect::<Vec<_>>();
        self.instances = Some(InstanceBuffer {
            buffer: hstack(count, &parts),
            has_rotations: rotations.is_some(),
            has_colors: colors.is_some(),
        });
        Ok(())
    }

    /// The `DefineMesh` command for this mesh.
    pub fn to_command(&self) -> Result<Command, CodecError> {
        let count = self.vertex_count();
        let triangles = buffer::from_rows(&self.triangles);
        let (index_buffer_type, triangle_buffer) = if count < u16::MAX as usize {
            (
                IndexBufferType::UInt16,
                codec::matrix_to_base64(&triangles.map(|i| i as u16))?,
            )
        } else {
            (IndexBufferType::UInt32, codec::matrix_to_base64(&triangles)?)
        };

        let (primitive_type, color) = match self.options.shared_color {
            Some(color) => (
                PrimitiveType::SingleColorMesh,
                Some(codec::matrix_to_base64(&color.to_buffer())?),
            ),
            None => (PrimitiveType::MultiColorMesh, None),
        };

        let texture = self.options.texture_id.as_ref();
        let instances = self.instances.as_ref();
        let definition = MeshDefinition {
            vertex_buffer: codec::matrix_to_base64(&self.vertex_buffer())?,
            index_buffer_type,
            triangle_buffer,
            primitive_type,
            color,
            texture_id: texture.cloned(),
            nearest_neighbor_texture: texture.map(|_| self.options.nn_texture),
            use_texture_alpha: texture.map(|_| self.options.use_texture_alpha),
            instance_buffer: instances
                .map(|i| codec::matrix_to_base64(&i.buffer))
                .transpose()?,
            instance_buffer_has_rotations: instances.map(|i| i.has_rotations),
            instance_buffer_has_colors: instances.map(|i| i.has_colors),
        };

        Ok(Command::DefineMesh(DefineMesh {
            mesh_id: self.mesh_id.clone(),
            layer_id: self.options.layer_id.clone(),
            double_sided: self.options.double_sided,
            definition,
            camera_space: self.options.camera_space,
            is_billboard: self.options.is_billboard,
            is_label: self.options.is_label,
        }))
    }
}

/// `max - min` over a set of values; `0` if there are none.
pub(crate) fn value_range(values: impl IntoIterator<Item = f32>) -> f32 {
    let (min, max) = values
        .into_iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(min, max), v| {
            (min.min(v), max.max(v))
        });
    if min > max {
        0.0
    } else {
        max - min
    }
}

/// Concatenate buffers of `rows` rows side by side.
pub(crate) fn hstack(rows: usize, parts: &[&DMatrix<f32>]) -> DMatrix<f32> {
    let cols = parts.iter().map(|p| p.ncols()).sum();
    let mut out = DMatrix::zeros(rows, cols);
    let mut start = 0;
    for part in parts {
        out.view_mut((0, start), (rows, part.ncols())).copy_from(*part);
        start += part.ncols();
    }
    out
}

fn transform_vertices(
    positions: &DMatrix<f32>,
    normals: &DMatrix<f32>,
    transform: &Matrix4<f32>,
) -> Result<(DMatrix<f32>, DMatrix<f32>), MeshError> {
    let linear: Matrix3<f32> = transform.fixed_view::<3, 3>(0, 0).into_owned();
    let normal_transform = linear
        .try_inverse()
        .ok_or(MeshError::SingularTransform)?
        .transpose();

    let mut out_positions = positions.clone();
    let mut out_normals = normals.clone();
    for r in 0..positions.nrows() {
        let p = transform.transform_point(&nalgebra::Point3::new(
            positions[(r, 0)],
            positions[(r, 1)],
            positions[(r, 2)],
        ));
        let n = (normal_transform * Vector3::new(normals[(r, 0)], normals[(r, 1)], normals[(r, 2)]))
            .try_normalize(0.0)
            .unwrap_or_else(Vector3::zeros);
        for c in 0..3 {
            out_positions[(r, c)] = p[c];
            out_normals[(r, c)] = n[c];
        }
    }
    Ok((out_positions, out_normals))
}

fn check_columns(
    attribute: &'static str,
    buffer: &DMatrix<f32>,
    expected: usize,
) -> Result<(), MeshError> {
    if buffer.ncols() != expected {
        return Err(MeshError::ColumnCount {
            attribute,
            expected,
            found: buffer.ncols(),
        });
    }
    Ok(())
}

fn check_shape(
    attribute: &'static str,
    buffer: &DMatrix<f32>,
    rows: usize,
    cols: usize,
) -> Result<(), MeshError> {
    check_columns(attribute, buffer, cols)?;
    if buffer.nrows() != rows {
        return Err(MeshError::RowCount {
            attribute,
            expected: rows,
            found: buffer.nrows(),
        });
    }
    Ok(())
}

fn check_indices(triangles: &[Triangle], vertex_count: usize) -> Result<(), MeshError> {
    for (triangle, tri) in triangles.iter().enumerate() {
        if let Some(&index) = tri.iter().find(|&&i| i as usize >= vertex_count) {
            return Err(MeshError::IndexOutOfRange {
                triangle,
                index,
                vertex_count,
            });
        }
    }
    Ok(())
}
