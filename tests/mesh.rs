use nalgebra::{DMatrix, Matrix4, Point3, Vector3};
use tableau::{
    command::{Command, IndexBufferType, PrimitiveType},
    geom::{codec, MeshInfo},
    mesh::{MeshError, VertexLayout},
    Color, Error, MeshOptions, Scene,
};

fn shared(color: Color) -> MeshOptions {
    MeshOptions {
        shared_color: Some(color),
        ..Default::default()
    }
}

fn textured() -> MeshOptions {
    MeshOptions {
        texture_id: Some("checker".to_owned()),
        ..Default::default()
    }
}

fn row3(buffer: &DMatrix<f32>, r: usize) -> Vector3<f32> {
    Vector3::new(buffer[(r, 0)], buffer[(r, 1)], buffer[(r, 2)])
}

fn assert_unit_rows(buffer: &DMatrix<f32>) {
    for row in buffer.row_iter() {
        assert!((row.norm() - 1.0).abs() < 1e-5, "{row}");
    }
}

#[test]
fn layouts() {
    let mut scene = Scene::default();
    let plain = scene.create_mesh(None, shared(Color::BLUE)).unwrap();
    assert_eq!(plain.mesh_id(), "Mesh-0");
    assert_eq!(plain.layout(), VertexLayout::SharedColor);

    let colored = scene.create_mesh(None, MeshOptions::default()).unwrap();
    assert_eq!(colored.mesh_id(), "Mesh-1");
    assert_eq!(colored.layout(), VertexLayout::VertexColor);

    let texture = scene.create_mesh(None, textured()).unwrap();
    assert_eq!(texture.layout(), VertexLayout::Textured);
    assert_eq!(texture.options().shared_color, Some(Color::WHITE));

    assert!(matches!(
        scene.create_mesh(Some("Mesh-1"), MeshOptions::default()),
        Err(Error::Scene(_))
    ));
}

#[test]
fn cube() {
    let mut scene = Scene::default();
    let mesh = scene.create_mesh(Some("cube"), shared(Color::GREEN)).unwrap();
    mesh.add_cube(None, None).unwrap();

    assert_eq!(mesh.vertex_count(), 24);
    assert_eq!(mesh.triangle_count(), 12);
    assert_eq!(mesh.vertex_buffer().shape(), (24, 6));
    assert!((mesh.value_range() - 2.0).abs() < 1e-6);
    assert!(mesh.center_of_mass().norm() < 1e-6);

    // every face normal points away from the center
    let positions = mesh.vertex_positions();
    let normals = mesh.vertex_normals();
    assert_unit_rows(&normals);
    for r in 0..24 {
        assert!((row3(&positions, r).dot(&row3(&normals, r)) - 0.5).abs() < 1e-6);
    }
}

#[test]
fn vertex_colors_are_required() {
    let mut scene = Scene::default();
    let mesh = scene.create_mesh(Some("colored"), MeshOptions::default()).unwrap();
    assert!(matches!(
        mesh.add_cube(None, None),
        Err(MeshError::MissingColor(id)) if id == "colored"
    ));
    mesh.add_cube(Some(Color::RED), None).unwrap();
    let colors = mesh.vertex_colors().unwrap();
    assert_eq!(colors.shape(), (24, 3));
    assert!(colors.row_iter().all(|c| c[0] == 1.0 && c[1] == 0.0 && c[2] == 0.0));
}

#[test]
fn uvs_need_a_texture() {
    let mut scene = Scene::default();
    let mesh = scene.create_mesh(None, shared(Color::GRAY)).unwrap();
    let positions = DMatrix::from_row_slice(3, 3, &[0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0]);
    let uvs = DMatrix::zeros(3, 2);
    assert!(matches!(
        mesh.add_mesh_without_normals(&positions, &[[0, 1, 2]], None, Some(&uvs), None, false),
        Err(MeshError::UvsWithoutTexture(_))
    ));

    let mesh = scene.create_mesh(None, textured()).unwrap();
    assert!(matches!(
        mesh.add_mesh_without_normals(&positions, &[[0, 1, 2]], None, None, None, false),
        Err(MeshError::MissingUvs(_))
    ));
    mesh.add_mesh_without_normals(&positions, &[[0, 1, 2]], None, Some(&uvs), None, false)
        .unwrap();
    assert_eq!(mesh.vertex_buffer().shape(), (3, 8));
}

#[test]
fn shape_checks() {
    let mut scene = Scene::default();
    let mesh = scene.create_mesh(None, shared(Color::GRAY)).unwrap();
    let positions = DMatrix::zeros(3, 3);
    assert!(matches!(
        mesh.add_mesh_with_normals(&positions, &DMatrix::zeros(2, 3), &[], None, None, None, false),
        Err(MeshError::RowCount {
            attribute: "normal",
            expected: 3,
            found: 2
        })
    ));
    assert!(matches!(
        mesh.add_mesh_without_normals(&DMatrix::zeros(3, 2), &[], None, None, None, false),
        Err(MeshError::ColumnCount {
            attribute: "position",
            ..
        })
    ));
    assert!(matches!(
        mesh.add_mesh_without_normals(&positions, &[[0, 1, 3]], None, None, None, false),
        Err(MeshError::IndexOutOfRange { index: 3, .. })
    ));
    assert_eq!(mesh.vertex_count(), 0);
}

#[test]
fn icosphere() {
    let mut scene = Scene::default();
    let mesh = scene.create_mesh(None, shared(Color::WHITE)).unwrap();
    mesh.add_icosphere(None, None, 0).unwrap();
    assert_eq!(mesh.vertex_count(), 12);
    assert_eq!(mesh.triangle_count(), 20);

    let mesh = scene.create_mesh(None, shared(Color::WHITE)).unwrap();
    mesh.add_sphere(None, None).unwrap();
    assert_eq!(mesh.vertex_count(), 162);
    assert_eq!(mesh.triangle_count(), 320);

    let positions = mesh.vertex_positions();
    for row in positions.row_iter() {
        assert!((row.norm() - 0.5).abs() < 1e-5);
    }
    assert_unit_rows(&mesh.vertex_normals());
}

#[test]
fn textured_icosphere_splits_the_seam() {
    let mut scene = Scene::default();
    let mesh = scene.create_mesh(None, textured()).unwrap();
    mesh.add_icosphere(None, None, 1).unwrap();
    assert!(mesh.vertex_count() > 42);
    assert_eq!(mesh.triangle_count(), 80);

    let uvs = mesh.vertex_uvs().unwrap();
    for &[a, b, c] in mesh.triangles() {
        let us = [a, b, c].map(|i| uvs[(i as usize, 0)]);
        let span = us.iter().cloned().fold(f32::NEG_INFINITY, f32::max)
            - us.iter().cloned().fold(f32::INFINITY, f32::min);
        assert!(span <= 0.5 + 1e-6, "triangle {a} {b} {c} spans {span}");
    }
}

#[test]
fn computed_normals() {
    #[rustfmt::skip]
    let positions = DMatrix::from_row_slice(4, 3, &[
        0.0, 0.0, 0.0,
        1.0, 0.0, 0.0,
        1.0, 1.0, 0.0,
        0.0, 1.0, 0.0,
    ]);
    let triangles = [[0, 1, 2], [0, 2, 3]];
    let normals = tableau::Mesh::compute_normals(&positions, &triangles, false).unwrap();
    for r in 0..4 {
        assert_eq!(row3(&normals, r), Vector3::z());
    }
    let reversed = tableau::Mesh::compute_normals(&positions, &triangles, true).unwrap();
    assert_eq!(reversed, -normals);
}

#[test]
fn transforms() {
    let mut scene = Scene::default();
    let mesh = scene.create_mesh(None, shared(Color::WHITE)).unwrap();
    let transform = Matrix4::new_translation(&Vector3::new(1.0, 2.0, 3.0))
        * Matrix4::new_nonuniform_scaling(&Vector3::new(2.0, 1.0, 1.0));
    mesh.add_quad(
        None,
        [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 1.0),
            Point3::new(0.0, 0.0, 1.0),
        ],
        None,
        None,
        Some(&transform),
    )
    .unwrap();
    assert_eq!(mesh.triangles(), [[0, 1, 2], [0, 2, 3]]);

    let positions = mesh.vertex_positions();
    assert_eq!(row3(&positions, 1), Vector3::new(3.0, 2.0, 3.0));
    let normals = mesh.vertex_normals();
    assert!((row3(&normals, 0) - Vector3::new(0.0, -1.0, 0.0)).norm() < 1e-6);

    mesh.apply_transform(&Matrix4::new_rotation(Vector3::z() * std::f32::consts::FRAC_PI_2))
        .unwrap();
    let normals = mesh.vertex_normals();
    assert!((row3(&normals, 0) - Vector3::new(1.0, 0.0, 0.0)).norm() < 1e-6);

    assert!(matches!(
        mesh.apply_transform(&Matrix4::new_nonuniform_scaling(&Vector3::new(1.0, 0.0, 1.0))),
        Err(MeshError::SingularTransform)
    ));
}

#[test]
fn reverse_triangle_order() {
    let mut scene = Scene::default();
    let mesh = scene.create_mesh(None, shared(Color::WHITE)).unwrap();
    mesh.add_triangle(
        None,
        [Point3::origin(), Point3::new(1.0, 0.0, 0.0), Point3::new(0.0, 1.0, 0.0)],
        None,
        None,
    )
    .unwrap();
    mesh.reverse_triangle_order();
    assert_eq!(mesh.triangles(), [[0, 2, 1]]);
    assert_eq!(row3(&mesh.vertex_normals(), 0), -Vector3::z());
}

#[test]
fn add_mesh_info() {
    #[rustfmt::skip]
    let positions = DMatrix::from_row_slice(4, 3, &[
        1.0, 1.0, 1.0,
        1.0, -1.0, -1.0,
        -1.0, 1.0, -1.0,
        -1.0, -1.0, 1.0,
    ]);
    let info = MeshInfo::new(positions, vec![[0, 1, 2], [0, 3, 1], [0, 2, 3], [1, 3, 2]])
        .unwrap()
        .with_colors(DMatrix::from_element(4, 3, 0.25))
        .unwrap()
        .subdivide(1, false)
        .unwrap();

    let mut scene = Scene::default();
    let mesh = scene.create_mesh(Some("tetra"), MeshOptions::default()).unwrap();
    mesh.add_mesh(&info, None, false).unwrap();
    assert_eq!(mesh.vertex_count(), 10);
    assert_eq!(mesh.triangle_count(), 16);
    assert_unit_rows(&mesh.vertex_normals());
}

#[test]
fn instancing() {
    let mut scene = Scene::default();
    let mesh = scene.create_mesh(Some("points"), shared(Color::RED)).unwrap();
    mesh.add_cube(None, None).unwrap();

    let positions = DMatrix::from_fn(5, 3, |r, c| (r * 3 + c) as f32);
    let colors = DMatrix::from_element(5, 3, 0.5);
    assert!(matches!(
        mesh.enable_instancing(&positions, Some(&DMatrix::zeros(5, 3)), None),
        Err(MeshError::ColumnCount { .. })
    ));
    mesh.enable_instancing(&positions, None, Some(&colors)).unwrap();

    let instances = mesh.instances().unwrap();
    assert_eq!(instances.buffer().shape(), (5, 6));
    assert!(!instances.has_rotations());
    assert!(instances.has_colors());
    assert_eq!(instances.buffer()[(4, 5)], 0.5);

    let Command::DefineMesh(define) = mesh.to_command().unwrap() else {
        panic!("expected DefineMesh");
    };
    let definition = define.definition;
    assert_eq!(definition.instance_buffer_has_colors, Some(true));
    assert_eq!(definition.instance_buffer_has_rotations, Some(false));
    let decoded =
        codec::matrix_from_base64::<f32>(definition.instance_buffer.as_deref().unwrap()).unwrap();
    assert_eq!(&decoded, instances.buffer());
}

#[test]
fn define_mesh() {
    let mut scene = Scene::default();
    let mesh = scene
        .create_mesh(
            Some("cube"),
            MeshOptions {
                layer_id: Some("solids".to_owned()),
                double_sided: true,
                ..shared(Color::new(1.0, 0.5, 0.0))
            },
        )
        .unwrap();
    mesh.add_cube(None, None).unwrap();

    let Command::DefineMesh(define) = mesh.to_command().unwrap() else {
        panic!("expected DefineMesh");
    };
    assert_eq!(define.mesh_id, "cube");
    assert_eq!(define.layer_id.as_deref(), Some("solids"));
    assert!(define.double_sided);

    let definition = define.definition;
    assert_eq!(definition.primitive_type, PrimitiveType::SingleColorMesh);
    assert_eq!(definition.index_buffer_type, IndexBufferType::UInt16);
    assert!(definition.texture_id.is_none());
    assert!(definition.instance_buffer.is_none());

    let color = codec::matrix_from_base64::<f32>(definition.color.as_deref().unwrap()).unwrap();
    assert_eq!(color, DMatrix::from_row_slice(1, 3, &[1.0, 0.5, 0.0]));
    let vertices = codec::matrix_from_base64::<f32>(&definition.vertex_buffer).unwrap();
    assert_eq!(vertices, mesh.vertex_buffer());
    let triangles = codec::matrix_from_base64::<u16>(&definition.triangle_buffer).unwrap();
    assert_eq!(triangles.shape(), (12, 3));
    assert_eq!(triangles[(1, 2)], 3);

    let json = serde_json::to_value(Command::DefineMesh(define_for(&scene))).unwrap();
    assert_eq!(json["CommandType"], "DefineMesh");
    assert_eq!(json["Definition"]["IndexBufferType"], "UInt16");
    assert_eq!(json["Definition"]["PrimitiveType"], "SingleColorMesh");
    assert!(json["Definition"].get("TextureId").is_none());
}

fn define_for(scene: &Scene) -> tableau::command::DefineMesh {
    match scene.mesh("cube").unwrap().to_command().unwrap() {
        Command::DefineMesh(define) => define,
        other => panic!("unexpected {}", other.command_type()),
    }
}

#[test]
fn large_meshes_use_wide_indices() {
    let mut scene = Scene::default();
    let mesh = scene.create_mesh(None, shared(Color::WHITE)).unwrap();
    let count = u16::MAX as usize;
    let positions = DMatrix::from_fn(count, 3, |r, c| if c == 0 { r as f32 } else { 0.0 });
    let normals = DMatrix::from_fn(count, 3, |_, c| if c == 2 { 1.0 } else { 0.0 });
    mesh.add_mesh_with_normals(
        &positions,
        &normals,
        &[[0, 1, count as u32 - 1]],
        None,
        None,
        None,
        false,
    )
    .unwrap();

    let Command::DefineMesh(define) = mesh.to_command().unwrap() else {
        panic!("expected DefineMesh");
    };
    assert_eq!(define.definition.index_buffer_type, IndexBufferType::UInt32);
    let triangles = codec::matrix_from_base64::<u32>(&define.definition.triangle_buffer).unwrap();
    assert_eq!(triangles[(0, 2)], count as u32 - 1);
}
