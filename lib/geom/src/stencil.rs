//! Loop subdivision stencils.
//!
//! A stencil captures the subdivision of one triangle topology as a sparse linear operator: each
//! row of the operator produces one output vertex as a weighted sum of input vertices. Because it
//! only depends on connectivity, the same stencil can be applied to positions, normals, colors, or
//! any other per-vertex attribute of every mesh sharing that topology.
//!
//! Vertices with a closed fan of triangles around them are *interior*; all others are *boundary*
//! vertices. Boundary vertices, and edges with two boundary endpoints, produce no output vertices,
//! so the subdivided surface shrinks away from open borders.

use nalgebra::DMatrix;
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use std::collections::{BTreeMap, HashMap};

/// Three vertex indices, in counter-clockwise order.
pub type Triangle = [u32; 3];

/// Smallest interior valence with precomputed weights.
pub const MIN_VALENCE: usize = 3;
/// Largest interior valence with precomputed weights.
pub const MAX_VALENCE: usize = 10;

/// Weights of an edge vertex: the two endpoints, then the two opposite vertices.
const EDGE_WEIGHTS: [f32; 4] = [0.375, 0.375, 0.125, 0.125];

#[derive(Debug, thiserror::Error)]
pub enum StencilError {
    #[error("a stencil needs at least one subdivision step unless it projects to the limit surface")]
    InvalidSteps,
    #[error("triangle {0} references the same vertex more than once")]
    DegenerateTriangle(usize),
    #[error("half-edge {0} -> {1} belongs to more than one triangle")]
    NonManifoldEdge(u32, u32),
    #[error("the triangles around vertex {0} do not form a single fan")]
    NonManifoldVertex(u32),
    #[error("interior vertex {vertex} has valence {valence}; supported valences are 3..=10")]
    ValenceOutOfRange { vertex: u32, valence: usize },
    #[error("stencil expects {expected} input vertices, found {found}")]
    VertexCountMismatch { expected: usize, found: usize },
}

/// A reusable subdivision operator for one triangle topology.
#[derive(Debug, Clone)]
pub struct LoopSubdivisionStencil {
    triangles: Vec<Triangle>,
    subdiv: CsrMatrix<f32>,
}

impl LoopSubdivisionStencil {
    /// Build the stencil for `steps` rounds of Loop subdivision of `triangles`, optionally followed
    /// by a projection of every vertex onto the limit surface.
    ///
    /// The input vertex count is taken to be one more than the largest index referenced.
    #[tracing::instrument(skip(triangles), fields(triangles = triangles.len()))]
    pub fn create(
        triangles: &[Triangle],
        steps: u32,
        project_to_limit: bool,
    ) -> Result<Self, StencilError> {
        if steps == 0 && !project_to_limit {
            return Err(StencilError::InvalidSteps);
        }

        let coefficients = Coefficients::new();
        let passes = std::iter::repeat(Pass::Subdivide)
            .take(steps as usize)
            .chain(project_to_limit.then_some(Pass::Limit));

        let mut vertex_count = triangles
            .iter()
            .flatten()
            .max()
            .map_or(0, |&max| max as usize + 1);
        let mut current = triangles.to_vec();
        let mut subdiv: Option<CsrMatrix<f32>> = None;
        for pass in passes {
            let (next, step) = subdivide_once(&current, vertex_count, pass, &coefficients)?;
            tracing::trace!(
                ?pass,
                input_vertices = vertex_count,
                output_vertices = step.nrows(),
                output_triangles = next.len(),
                "subdivision pass"
            );
            vertex_count = step.nrows();
            subdiv = Some(match subdiv {
                None => step,
                Some(previous) => &step * &previous,
            });
            current = next;
        }

        // at least one pass always runs
        let subdiv = subdiv.unwrap_or_else(|| CsrMatrix::zeros(vertex_count, vertex_count));
        Ok(Self::new(current, subdiv))
    }

    /// Wrap a precomputed operator and its output topology.
    pub fn new(triangles: Vec<Triangle>, subdiv: CsrMatrix<f32>) -> Self {
        Self { triangles, subdiv }
    }

    /// Multiply `vertices` (one row per input vertex) by the subdivision operator.
    pub fn apply(&self, vertices: &DMatrix<f32>) -> Result<DMatrix<f32>, StencilError> {
        if vertices.nrows() != self.subdiv.ncols() {
            return Err(StencilError::VertexCountMismatch {
                expected: self.subdiv.ncols(),
                found: vertices.nrows(),
            });
        }
        Ok(&self.subdiv * vertices)
    }

    /// Output topology.
    #[inline]
    pub fn triangles(&self) -> &[Triangle] {
        &self.triangles
    }

    #[inline]
    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    /// Number of vertices produced by [Self::apply].
    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.subdiv.nrows()
    }

    /// Number of vertices [Self::apply] expects.
    #[inline]
    pub fn input_vertex_count(&self) -> usize {
        self.subdiv.ncols()
    }

    #[inline]
    pub fn matrix(&self) -> &CsrMatrix<f32> {
        &self.subdiv
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    /// Split every triangle into four.
    Subdivide,
    /// Move every interior vertex onto the limit surface, keeping the topology.
    Limit,
}

/// Valence-dependent vertex weights.
struct Coefficients {
    alphas: [f64; MAX_VALENCE + 1],
    omegas: [f64; MAX_VALENCE + 1],
}

impl Coefficients {
    fn new() -> Self {
        let mut alphas = [0.0; MAX_VALENCE + 1];
        let mut omegas = [0.0; MAX_VALENCE + 1];
        for valence in MIN_VALENCE..=MAX_VALENCE {
            let n = valence as f64;
            let beta = 3.0 + 2.0 * (2.0 * std::f64::consts::PI / n).cos();
            let beta2 = beta * beta;
            alphas[valence] = 5.0 / 8.0 - beta2 / 64.0;
            omegas[valence] = 24.0 * n / (40.0 - beta2);
        }
        Self { alphas, omegas }
    }

    /// `(self weight, weight of each neighbor)` for a vertex of the given valence.
    fn vertex_weights(&self, valence: usize, pass: Pass) -> (f32, f32) {
        let n = valence as f64;
        match pass {
            Pass::Subdivide => {
                let alpha = self.alphas[valence];
                ((1.0 - alpha) as f32, (alpha / n) as f32)
            }
            Pass::Limit => {
                let omega = self.omegas[valence];
                ((omega / (omega + n)) as f32, (1.0 / (omega + n)) as f32)
            }
        }
    }
}

/// For each vertex `v`, maps every half-edge `v -> w` to the third vertex of its triangle.
type RingLinks = Vec<BTreeMap<u32, u32>>;

fn ring_links(triangles: &[Triangle], vertex_count: usize) -> Result<RingLinks, StencilError> {
    let mut links = vec![BTreeMap::new(); vertex_count];
    for (index, &[a, b, c]) in triangles.iter().enumerate() {
        if a == b || b == c || c == a {
            return Err(StencilError::DegenerateTriangle(index));
        }
        for (from, to, opposite) in [(a, b, c), (b, c, a), (c, a, b)] {
            if links[from as usize].insert(to, opposite).is_some() {
                return Err(StencilError::NonManifoldEdge(from, to));
            }
        }
    }
    Ok(links)
}

/// Ordered one-ring of every interior vertex.
fn interior_rings(links: &RingLinks) -> Result<HashMap<u32, Vec<u32>>, StencilError> {
    let mut rings = HashMap::new();
    for (vertex, neighbors) in links.iter().enumerate() {
        let vertex = vertex as u32;
        // isolated vertices are skipped
        let Some(&first) = neighbors.keys().next() else {
            continue;
        };

        let mut ring = vec![first];
        let mut current = first;
        let closed = loop {
            match neighbors.get(&current) {
                None => break false,
                Some(&next) if next == first => break true,
                Some(&next) => {
                    ring.push(next);
                    current = next;
                }
            }
        };
        if !closed {
            continue;
        }

        if ring.len() != neighbors.len() {
            return Err(StencilError::NonManifoldVertex(vertex));
        }
        if !(MIN_VALENCE..=MAX_VALENCE).contains(&ring.len()) {
            return Err(StencilError::ValenceOutOfRange {
                vertex,
                valence: ring.len(),
            });
        }
        rings.insert(vertex, ring);
    }
    Ok(rings)
}

/// Accumulates the output vertices and triangles of a single pass.
struct PassBuilder<'c> {
    coefficients: &'c Coefficients,
    pass: Pass,
    vertex_vertices: HashMap<u32, u32>,
    edge_vertices: HashMap<(u32, u32), u32>,
    entries: Vec<(usize, usize, f32)>,
    vertex_count: u32,
    triangles: Vec<Triangle>,
}

impl<'c> PassBuilder<'c> {
    fn new(coefficients: &'c Coefficients, pass: Pass) -> Self {
        Self {
            coefficients,
            pass,
            vertex_vertices: HashMap::new(),
            edge_vertices: HashMap::new(),
            entries: Vec::new(),
            vertex_count: 0,
            triangles: Vec::new(),
        }
    }

    fn push_vertex(&mut self, weights: impl IntoIterator<Item = (u32, f32)>) -> u32 {
        let row = self.vertex_count;
        self.entries.extend(
            weights
                .into_iter()
                .map(|(col, weight)| (row as usize, col as usize, weight)),
        );
        self.vertex_count += 1;
        row
    }

    fn vertex_vertex(&mut self, vertex: u32, ring: &[u32]) {
        if self.vertex_vertices.contains_key(&vertex) {
            return;
        }
        let (own, neighbor) = self.coefficients.vertex_weights(ring.len(), self.pass);
        let weights = std::iter::once((vertex, own)).chain(ring.iter().map(|&n| (n, neighbor)));
        let index = self.push_vertex(weights);
        self.vertex_vertices.insert(vertex, index);
    }

    fn edge_vertex(&mut self, a: u32, b: u32, links: &RingLinks) -> Result<(), StencilError> {
        if self.edge_vertices.contains_key(&(a, b)) {
            return Ok(());
        }
        let left = links[a as usize]
            .get(&b)
            .copied()
            .ok_or(StencilError::NonManifoldVertex(a))?;
        let right = links[b as usize]
            .get(&a)
            .copied()
            .ok_or(StencilError::NonManifoldVertex(b))?;
        let index = self.push_vertex([a, b, left, right].into_iter().zip(EDGE_WEIGHTS));
        self.edge_vertices.insert((a, b), index);
        self.edge_vertices.insert((b, a), index);
        Ok(())
    }

    fn vertex_vertex_of(&self, vertex: u32) -> Option<u32> {
        self.vertex_vertices.get(&vertex).copied()
    }

    fn edge_vertex_of(&self, a: u32, b: u32) -> Option<u32> {
        self.edge_vertices.get(&(a, b)).copied()
    }

    fn push_triangle(&mut self, corners: [Option<u32>; 3]) {
        if let [Some(a), Some(b), Some(c)] = corners {
            self.triangles.push([a, b, c]);
        }
    }

    fn finish(self, input_vertex_count: usize) -> (Vec<Triangle>, CsrMatrix<f32>) {
        let mut coo = CooMatrix::new(self.vertex_count as usize, input_vertex_count);
        for (row, col, weight) in self.entries {
            coo.push(row, col, weight);
        }
        (self.triangles, CsrMatrix::from(&coo))
    }
}

fn subdivide_once(
    triangles: &[Triangle],
    vertex_count: usize,
    pass: Pass,
    coefficients: &Coefficients,
) -> Result<(Vec<Triangle>, CsrMatrix<f32>), StencilError> {
    let links = ring_links(triangles, vertex_count)?;
    let rings = interior_rings(&links)?;
    let mut builder = PassBuilder::new(coefficients, pass);

    for &[a, b, c] in triangles {
        for vertex in [a, b, c] {
            if let Some(ring) = rings.get(&vertex) {
                builder.vertex_vertex(vertex, ring);
            }
        }

        let (va, vb, vc) = (
            builder.vertex_vertex_of(a),
            builder.vertex_vertex_of(b),
            builder.vertex_vertex_of(c),
        );
        if pass == Pass::Limit {
            builder.push_triangle([va, vb, vc]);
            continue;
        }

        for (p, q) in [(a, b), (b, c), (c, a)] {
            if rings.contains_key(&p) || rings.contains_key(&q) {
                builder.edge_vertex(p, q, &links)?;
            }
        }

        let (ab, bc, ca) = (
            builder.edge_vertex_of(a, b),
            builder.edge_vertex_of(b, c),
            builder.edge_vertex_of(c, a),
        );
        // only children whose corners all exist are kept
        for child in [[va, ab, ca], [ab, bc, ca], [ca, bc, vc], [ab, vb, bc]] {
            builder.push_triangle(child);
        }
    }

    Ok(builder.finish(vertex_count))
}
