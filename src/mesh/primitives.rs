//! Primitive shapes appended to a [Mesh].

use nalgebra::{DMatrix, Matrix4, Point3, Vector3};
use std::collections::HashMap;
use tableau_geom::Triangle;

use super::{Mesh, MeshError, VertexLayout};
use crate::Color;

/// Geometry accumulated by a primitive before it is appended to a mesh.
#[derive(Debug, Default)]
struct Patch {
    positions: Vec<[f32; 3]>,
    normals: Vec<[f32; 3]>,
    uvs: Vec<[f32; 2]>,
    triangles: Vec<Triangle>,
}

impl Patch {
    fn push(&mut self, position: Point3<f32>, normal: Vector3<f32>, uv: [f32; 2]) -> u32 {
        let index = self.positions.len() as u32;
        self.positions.push(position.coords.into());
        self.normals.push(normal.into());
        self.uvs.push(uv);
        index
    }

    fn append_to(
        self,
        mesh: &mut Mesh,
        color: Option<Color>,
        transform: Option<&Matrix4<f32>>,
    ) -> Result<(), MeshError> {
        let count = self.positions.len();
        let positions = buffer(&self.positions);
        let normals = buffer(&self.normals);
        let (colors, uvs) = match mesh.layout {
            VertexLayout::SharedColor => (None, None),
            VertexLayout::VertexColor => {
                let color = color.ok_or_else(|| MeshError::MissingColor(mesh.mesh_id.clone()))?;
                let rgb: [f32; 3] = color.into();
                (Some(buffer(&vec![rgb; count])), None)
            }
            VertexLayout::Textured => (None, Some(buffer(&self.uvs))),
        };
        mesh.add_mesh_with_normals(
            &positions,
            &normals,
            &self.triangles,
            colors.as_ref(),
            uvs.as_ref(),
            transform,
            false,
        )
    }
}

fn buffer<const N: usize>(rows: &[[f32; N]]) -> DMatrix<f32> {
    tableau_geom::buffer::from_rows(rows)
}

fn triangle_normal(p0: &Point3<f32>, p1: &Point3<f32>, p2: &Point3<f32>) -> Vector3<f32> {
    (p1 - p0)
        .cross(&(p2 - p0))
        .try_normalize(0.0)
        .unwrap_or_else(Vector3::zeros)
}

const UNIT_SQUARE: [[f32; 2]; 4] = [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]];

/// Corners of the unit cube centered on the origin; bit 0 is x, bit 1 is y, bit 2 is z.
fn cube_corner(i: usize) -> Point3<f32> {
    let coord = |bit: usize| if i & (1 << bit) == 0 { -0.5 } else { 0.5 };
    Point3::new(coord(0), coord(1), coord(2))
}

const CUBE_FACES: [[usize; 4]; 6] = [
    [0, 2, 3, 1],
    [1, 3, 7, 5],
    [5, 7, 6, 4],
    [4, 6, 2, 0],
    [2, 6, 7, 3],
    [4, 0, 1, 5],
];

/// Unit icosahedron, scaled to radius `0.5`.
fn icosahedron() -> (Vec<Vector3<f32>>, Vec<Triangle>) {
    let t = (1.0 + 5.0f32.sqrt()) / 2.0;
    let vertices = [
        [-1.0, t, 0.0],
        [1.0, t, 0.0],
        [-1.0, -t, 0.0],
        [1.0, -t, 0.0],
        [0.0, -1.0, t],
        [0.0, 1.0, t],
        [0.0, -1.0, -t],
        [0.0, 1.0, -t],
        [t, 0.0, -1.0],
        [t, 0.0, 1.0],
        [-t, 0.0, -1.0],
        [-t, 0.0, 1.0],
    ]
    .map(|v| Vector3::from(v).normalize() * 0.5)
    .to_vec();
    #[rustfmt::skip]
    let triangles = vec![
        [0, 11, 5], [0, 5, 1], [0, 1, 7], [0, 7, 10], [0, 10, 11],
        [1, 5, 9], [5, 11, 4], [11, 10, 2], [10, 7, 6], [7, 1, 8],
        [3, 9, 4], [3, 4, 2], [3, 2, 6], [3, 6, 8], [3, 8, 9],
        [4, 9, 5], [2, 4, 11], [6, 2, 10], [8, 6, 7], [9, 8, 1],
    ];
    (vertices, triangles)
}

/// Split every triangle in four, pushing the new vertices out onto the sphere.
fn subdivide_sphere(vertices: &mut Vec<Vector3<f32>>, triangles: &[Triangle]) -> Vec<Triangle> {
    let mut midpoints = HashMap::<(u32, u32), u32>::new();
    let mut midpoint = |a: u32, b: u32, vertices: &mut Vec<Vector3<f32>>| -> u32 {
        *midpoints.entry((a.min(b), a.max(b))).or_insert_with(|| {
            let mid = (vertices[a as usize] + vertices[b as usize])
                .try_normalize(0.0)
                .unwrap_or_else(Vector3::zeros)
                * 0.5;
            vertices.push(mid);
            vertices.len() as u32 - 1
        })
    };
    let mut out = Vec::with_capacity(triangles.len() * 4);
    for &[a, b, c] in triangles {
        let ab = midpoint(a, b, vertices);
        let bc = midpoint(b, c, vertices);
        let ac = midpoint(a, c, vertices);
        out.extend([[a, ab, ac], [ab, bc, ac], [ac, bc, c], [ab, b, bc]]);
    }
    out
}

/// Spherical texture coordinates of a point on the sphere of radius `0.5`.
fn sphere_uv(v: &Vector3<f32>) -> [f32; 2] {
    let u = 0.5 - 0.5 * v.z.atan2(v.x) / std::f32::consts::PI;
    let v = 1.0 - (2.0 * v.y).clamp(-1.0, 1.0).acos() / std::f32::consts::PI;
    [u, v]
}

impl Mesh {
    /// Append a flat triangle. `normal` defaults to the face normal; `uvs` are required for
    /// textured meshes.
    pub fn add_triangle(
        &mut self,
        color: Option<Color>,
        [p0, p1, p2]: [Point3<f32>; 3],
        normal: Option<Vector3<f32>>,
        uvs: Option<[[f32; 2]; 3]>,
    ) -> Result<(), MeshError> {
        self.add_polygon(color, &[p0, p1, p2], normal, uvs.as_ref().map(|u| &u[..]), None)
    }

    /// Append a flat quad, split along the `p0`-`p2` diagonal.
    pub fn add_quad(
        &mut self,
        color: Option<Color>,
        corners: [Point3<f32>; 4],
        normal: Option<Vector3<f32>>,
        uvs: Option<[[f32; 2]; 4]>,
        transform: Option<&Matrix4<f32>>,
    ) -> Result<(), MeshError> {
        self.add_polygon(color, &corners, normal, uvs.as_ref().map(|u| &u[..]), transform)
    }

    fn add_polygon(
        &mut self,
        color: Option<Color>,
        corners: &[Point3<f32>],
        normal: Option<Vector3<f32>>,
        uvs: Option<&[[f32; 2]]>,
        transform: Option<&Matrix4<f32>>,
    ) -> Result<(), MeshError> {
        if self.layout == VertexLayout::Textured && uvs.is_none() {
            return Err(MeshError::MissingUvs(self.mesh_id.clone()));
        }
        let normal = normal.unwrap_or_else(|| triangle_normal(&corners[0], &corners[1], &corners[2]));
        let mut patch = Patch::default();
        for (i, corner) in corners.iter().enumerate() {
            let uv = uvs.and_then(|uvs| uvs.get(i)).copied().unwrap_or_default();
            patch.push(*corner, normal, uv);
        }
        // fan around the first corner
        patch
            .triangles
            .extend((1..corners.len() as u32 - 1).map(|i| [0, i, i + 1]));
        patch.append_to(self, color, transform)
    }

    /// Append a unit cube centered on the origin, with flat faces.
    pub fn add_cube(
        &mut self,
        color: Option<Color>,
        transform: Option<&Matrix4<f32>>,
    ) -> Result<(), MeshError> {
        let mut patch = Patch::default();
        for face in CUBE_FACES {
            let corners = face.map(cube_corner);
            let normal = triangle_normal(&corners[0], &corners[1], &corners[2]);
            let base = patch.positions.len() as u32;
            for (corner, uv) in corners.iter().zip(UNIT_SQUARE) {
                patch.push(*corner, normal, uv);
            }
            patch
                .triangles
                .extend([[base, base + 1, base + 2], [base, base + 2, base + 3]]);
        }
        patch.append_to(self, color, transform)
    }

    /// Append a sphere of radius `0.5` made by subdividing an icosahedron `steps` times.
    pub fn add_icosphere(
        &mut self,
        color: Option<Color>,
        transform: Option<&Matrix4<f32>>,
        steps: u32,
    ) -> Result<(), MeshError> {
        let (mut vertices, mut triangles) = icosahedron();
        for _ in 0..steps {
            triangles = subdivide_sphere(&mut vertices, &triangles);
        }

        let mut patch = Patch::default();
        for v in &vertices {
            patch.push(Point3::from(*v), v * 2.0, sphere_uv(v));
        }
        if self.layout == VertexLayout::Textured {
            // triangles straddling the u seam get copies of their low-u corners on the far side
            let mut wrapped = HashMap::<u32, u32>::new();
            for tri in &mut triangles {
                let us = tri.map(|i| patch.uvs[i as usize][0]);
                let (lo, hi) = us
                    .iter()
                    .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &u| (lo.min(u), hi.max(u)));
                if hi - lo <= 0.5 {
                    continue;
                }
                for (index, u) in tri.iter_mut().zip(us) {
                    if u >= 0.5 {
                        continue;
                    }
                    let i = *index as usize;
                    *index = *wrapped.entry(*index).or_insert_with(|| {
                        let [u, v] = patch.uvs[i];
                        let (position, normal) = (patch.positions[i], patch.normals[i]);
                        patch.push(position.into(), normal.into(), [u + 1.0, v])
                    });
                }
            }
        }
        patch.triangles = triangles;
        patch.append_to(self, color, transform)
    }

    /// An icosphere subdivided twice.
    pub fn add_sphere(
        &mut self,
        color: Option<Color>,
        transform: Option<&Matrix4<f32>>,
    ) -> Result<(), MeshError> {
        self.add_icosphere(color, transform, 2)
    }
}
