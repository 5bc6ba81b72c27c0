use std::{f32::consts::TAU, path::Path};

use clap::Parser;
use nalgebra::{DMatrix, Point3, Vector3};
use tableau::{
    geom::de::obj::{load_obj, ObjError},
    Camera, Color, MeshOptions, Scene,
};

mod cli;

const WIDTH: f64 = 800.0;
const HEIGHT: f64 = 600.0;

#[derive(Debug, thiserror::Error)]
enum AppError {
    #[error("{path}: {source}")]
    Load {
        path: String,
        #[source]
        source: ObjError,
    },
    #[error(transparent)]
    Scene(#[from] tableau::Error),
}

fn extent(positions: &DMatrix<f32>) -> f32 {
    if positions.is_empty() {
        0.0
    } else {
        positions.max() - positions.min()
    }
}

/// Displace every vertex along y by a wave traveling along x.
fn wave(positions: &DMatrix<f32>, amplitude: f32, phase: f32) -> DMatrix<f32> {
    let size = extent(positions).max(f32::EPSILON);
    let mut moved = positions.clone();
    for mut row in moved.row_iter_mut() {
        let offset = (TAU * (row[0] / size + phase)).sin();
        row[1] += amplitude * size * offset;
    }
    moved
}

fn mesh_id(path: &Path, index: usize) -> String {
    path.file_stem()
        .map(|stem| format!("{}-{index}", stem.to_string_lossy()))
        .unwrap_or_else(|| format!("mesh-{index}"))
}

fn run(cli: &cli::Cli) -> Result<(), AppError> {
    let mut scene = Scene::new(Some("subdivide"));
    let mut mesh_ids = Vec::with_capacity(cli.files.len());
    let mut bounds_min = Point3::from(Vector3::repeat(f32::MAX));
    let mut bounds_max = Point3::from(Vector3::repeat(f32::MIN));

    for (index, path) in cli.files.iter().enumerate() {
        let info = load_obj(path).map_err(|source| AppError::Load {
            path: path.display().to_string(),
            source,
        })?;
        let info = info
            .subdivide(cli.steps, cli.project_to_limit)
            .map_err(tableau::Error::from)?;
        tracing::info!(
            path = %path.display(),
            vertices = info.vertex_count(),
            triangles = info.triangle_count(),
            "subdivided"
        );

        let options = MeshOptions {
            shared_color: info.colors().is_none().then_some(Color::GRAY),
            ..Default::default()
        };
        let id = mesh_id(path, index);
        let mesh = scene.create_mesh(Some(&id), options)?;
        // no texture is exported, so UVs are dropped
        let added = match info.normals() {
            Some(normals) => mesh.add_mesh_with_normals(
                info.positions(),
                normals,
                info.triangles(),
                info.colors(),
                None,
                None,
                false,
            ),
            None => mesh.add_mesh_without_normals(
                info.positions(),
                info.triangles(),
                info.colors(),
                None,
                None,
                false,
            ),
        };
        added.map_err(tableau::Error::from)?;

        let positions = mesh.vertex_positions();
        for row in positions.row_iter() {
            let point = Point3::new(row[0], row[1], row[2]);
            bounds_min = bounds_min.inf(&point);
            bounds_max = bounds_max.sup(&point);
        }
        for frame in 0..cli.frames {
            let phase = frame as f32 / cli.frames as f32;
            scene.update_mesh_positions(&id, &wave(&positions, cli.amplitude, phase), None)?;
        }
        mesh_ids.push(id);
    }

    if cli.frames > 0 {
        for (base_mesh_id, info) in scene.quantize_updates(&cli.quantize_options())? {
            tracing::info!(mesh = %base_mesh_id, "{info}");
        }
    }

    let target = nalgebra::center(&bounds_min, &bounds_max);
    let distance = (bounds_max - bounds_min).norm().max(1.0) * 1.5;
    let camera = Camera::look_at(
        &(target + Vector3::new(0.0, 0.0, distance)),
        &target,
        &Vector3::y(),
        Camera::DEFAULT_FOV_Y,
        Camera::DEFAULT_NEAR,
        distance * 10.0,
        WIDTH as f32 / HEIGHT as f32,
    );
    let mesh_refs = mesh_ids.iter().map(String::as_str).collect::<Vec<_>>();
    let canvas = scene.create_canvas_3d(None, WIDTH, HEIGHT, None, Some(camera))?;
    for _ in 0..cli.frames.max(1) {
        canvas.create_frame(None, &mesh_refs, None);
    }

    for (command, size) in scene.measure_command_size()? {
        tracing::debug!(%command, size, "command size");
    }

    match cli.output_format() {
        cli::OutputFormat::Html => scene.save_as_html(&cli.output, &cli.html_options())?,
        cli::OutputFormat::Json => scene.save_as_json(&cli.output)?,
        cli::OutputFormat::Script => scene.save_as_script(&cli.output, None)?,
    }
    tracing::info!(output = %cli.output.display(), "saved scene");
    Ok(())
}

pub fn main() {
    let cli = cli::Cli::parse();
    cli::initialize_tracing(&cli.log_filter, cli.log_format);

    if let Err(e) = run(&cli) {
        tracing::error!("{e}");
        std::process::exit(1);
    }
}
