use nalgebra::{DMatrix, Matrix4, Point3, Vector3};
use serde_json::Value;
use std::path::PathBuf;
use tableau::{
    command::{self, Command, CommandEntry},
    geom::codec,
    scene::SceneError,
    Camera, Color, Error, HtmlOptions, MeshOptions, Scene, ScriptSource, StatusBarVisibility,
    UpdateFlags,
};

fn cube_scene() -> Scene {
    let mut scene = Scene::new(Some("scene"));
    scene
        .create_mesh(
            Some("cube"),
            MeshOptions {
                shared_color: Some(Color::BLUE),
                ..Default::default()
            },
        )
        .unwrap()
        .add_cube(None, None)
        .unwrap();
    scene
}

fn scratch_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("tableau-{}-{name}", std::process::id()))
}

fn command_types(commands: &[Command]) -> Vec<&'static str> {
    commands.iter().map(Command::command_type).collect()
}

#[test]
fn command_order() {
    let mut scene = cube_scene();
    let canvas = scene
        .create_canvas_3d(Some("main"), 400.0, 300.0, None, None)
        .unwrap();
    canvas.create_frame(None, &["cube"], None);
    scene.link_canvas_events(&["main"]).unwrap();
    scene.grid("800px", "auto", "1fr 1fr");
    scene.place("main", "1", "1").unwrap();
    for i in 0..3 {
        let positions = DMatrix::from_element(24, 3, i as f32 * 0.1);
        scene.update_mesh_positions("cube", &positions, None).unwrap();
    }

    let commands = scene.to_commands().unwrap();
    assert_eq!(
        command_types(&commands),
        [
            "SetSceneId",
            "SetSceneProperties",
            "DefineMesh",
            "UpdateMesh",
            "UpdateMesh",
            "UpdateMesh",
            "AddCanvas3D",
            "DefineGrid",
            "PlaceCanvasInGrid",
            "CanvasCommands",
            "LinkCanvasEvents",
        ]
    );
}

#[test]
fn scene_properties() {
    let mut scene = Scene::default();
    assert_eq!(scene.frame_rate(), 30.0);
    assert_eq!(scene.status_bar_visibility(), StatusBarVisibility::Visible);
    scene.set_frame_rate(24.0);
    scene.set_status_bar_visibility("collapsed".parse().unwrap());

    let json: Value = serde_json::from_str(&scene.json().unwrap()).unwrap();
    // no scene id, so the properties come first
    assert_eq!(
        json[0],
        serde_json::json!({
            "CommandType": "SetSceneProperties",
            "FrameRate": 24.0,
            "StatusBarVisibility": "collapsed",
        })
    );

    assert!("sideways".parse::<StatusBarVisibility>().is_err());
    assert_eq!(StatusBarVisibility::Hidden.to_string(), "hidden");
}

#[test]
fn update_commands() {
    let mut scene = Scene::default();
    scene
        .create_mesh(Some("tri"), MeshOptions::default())
        .unwrap()
        .add_triangle(
            Some(Color::WHITE),
            [Point3::origin(), Point3::new(1.0, 0.0, 0.0), Point3::new(0.0, 1.0, 0.0)],
            None,
            None,
        )
        .unwrap();

    let positions = DMatrix::from_element(3, 3, 0.5);
    let colors = DMatrix::from_element(3, 3, 0.25);
    let update = scene
        .update_mesh("tri", Some(&positions), None, Some(&colors), Some("tri-0"))
        .unwrap();
    assert_eq!(update.flags(), UpdateFlags::POSITIONS | UpdateFlags::COLORS);
    assert!(update.flags().contains(UpdateFlags::COLORS));
    assert!(!update.flags().contains(UpdateFlags::NORMALS));
    assert_eq!(update.vertex_buffer().shape(), (3, 6));
    assert_eq!(update.vertex_buffer()[(0, 4)], 0.25);

    let update = scene.update_mesh_positions("tri", &positions, None).unwrap();
    assert_eq!(update.frame_index(), 1);
    assert_eq!(update.mesh_id(), "Mesh-2");

    let json: Value = serde_json::to_value(scene.mesh_updates()[0].to_command().unwrap()).unwrap();
    let keys = json.as_object().unwrap().keys().cloned().collect::<Vec<_>>();
    let mut expected = [
        "BaseMeshId",
        "CommandType",
        "FrameIndex",
        "MeshId",
        "UpdateFlags",
        "VertexBuffer",
    ];
    expected.sort();
    assert_eq!(keys, expected);
    assert_eq!(json["UpdateFlags"], 5);
    let buffer = codec::matrix_from_base64::<f32>(json["VertexBuffer"].as_str().unwrap()).unwrap();
    assert_eq!(&buffer, scene.mesh_updates()[0].vertex_buffer());

    assert!(matches!(
        scene.update_mesh_positions("missing", &positions, None),
        Err(Error::Scene(SceneError::UnknownMesh(id))) if id == "missing"
    ));
    assert!(matches!(
        scene.update_mesh_positions("tri", &DMatrix::zeros(4, 3), None),
        Err(Error::Mesh(_))
    ));
}

#[test]
fn instanced_updates() {
    let mut scene = cube_scene();
    let mesh = scene.mesh_mut("cube").unwrap();
    mesh.enable_instancing(&DMatrix::zeros(10, 3), None, None).unwrap();

    let update = scene
        .update_mesh_positions("cube", &DMatrix::from_element(10, 3, 1.0), None)
        .unwrap();
    assert_eq!(update.vertex_buffer().shape(), (10, 3));

    let rotations = DMatrix::from_fn(10, 4, |_, c| if c == 3 { 1.0 } else { 0.0 });
    let update = scene
        .update_instanced_mesh("cube", None, Some(&rotations), None, None)
        .unwrap();
    assert_eq!(update.flags(), UpdateFlags::ROTATIONS);
    assert_eq!(update.frame_index(), 1);
}

#[test]
fn canvas_commands() {
    let mut scene = cube_scene();
    let canvas = scene
        .create_canvas_3d(None, 640.0, 480.0, Some("viewport"), None)
        .unwrap();
    assert_eq!(canvas.canvas_id(), "Canvas-0");
    assert!((canvas.camera().aspect_ratio() - 4.0 / 3.0).abs() < 1e-5);

    let shifted = Matrix4::new_translation(&Vector3::new(0.0, 1.0, 0.0));
    canvas.create_frame(None, &["cube"], None);
    let frame = canvas.create_frame(Some("second"), &[], None);
    frame.add_mesh_by_id("cube", Some(shifted));
    frame.add_mesh_by_id("cube", Some(Matrix4::identity()));
    // a square camera is stretched to fit the canvas
    frame.set_camera(Camera::default());
    assert!((frame.camera().unwrap().aspect_ratio() - 4.0 / 3.0).abs() < 1e-5);
    assert_eq!(canvas.frames().len(), 2);
    assert_eq!(canvas.frames()[0].frame_id(), "0");

    let commands = scene.to_commands().unwrap();
    let Some(Command::AddCanvas3D(add)) = commands.iter().find(|c| c.command_type() == "AddCanvas3D")
    else {
        panic!("missing AddCanvas3D");
    };
    assert_eq!(add.html_id.as_deref(), Some("viewport"));
    let json = serde_json::to_value(Command::AddCanvas3D(add.clone())).unwrap();
    assert_eq!(json["Width"], 640);
    assert!(json["Width"].is_u64() || json["Width"].is_i64());

    let Some(Command::CanvasCommands(canvas)) = commands.last() else {
        panic!("expected canvas commands last");
    };
    assert_eq!(canvas.canvas_id, "Canvas-0");
    assert!(matches!(&canvas.commands[0], CommandEntry::Single(Command::SetCamera(_))));
    let CommandEntry::Group(second) = &canvas.commands[2] else {
        panic!("expected a frame group");
    };
    assert_eq!(command_types(second), ["AddFrame", "FrameCommands"]);
    let Command::FrameCommands(frame) = &second[1] else {
        unreachable!()
    };
    assert_eq!(frame.frame_id, "second");
    assert_eq!(
        command_types(&frame.commands),
        ["AddMesh", "AddMesh", "SetCamera"]
    );
    let Command::AddMesh(moved) = &frame.commands[0] else {
        unreachable!()
    };
    let transform = command::transform_from_base64(moved.transform.as_deref().unwrap()).unwrap();
    assert_eq!(transform, shifted);
    let Command::AddMesh(fixed) = &frame.commands[1] else {
        unreachable!()
    };
    assert!(fixed.transform.is_none());
}

#[test]
fn transforms_are_column_major() {
    let transform = Matrix4::new_translation(&Vector3::new(1.0, 2.0, 3.0));
    let text = command::transform_to_base64(&transform).unwrap();
    let raw = codec::matrix_from_base64::<f32>(&text).unwrap();
    // the translation is in the last row of the buffer, as WebGL expects
    assert_eq!(raw[(3, 0)], 1.0);
    assert_eq!(raw[(3, 1)], 2.0);
    assert_eq!(raw[(3, 2)], 3.0);
    assert_eq!(command::transform_from_base64(&text).unwrap(), transform);
}

#[test]
fn camera() {
    let camera = Camera::default();
    let center = camera.center().unwrap();
    assert!((center - Point3::new(0.0, 0.0, 4.0)).norm() < 1e-5);
    assert!((camera.aspect_ratio() - 1.0).abs() < 1e-6);

    let Command::SetCamera(set) = camera.to_command().unwrap() else {
        unreachable!()
    };
    let projection = command::transform_from_base64(&set.value.projection).unwrap();
    assert_eq!(&projection, camera.projection());
}

#[test]
fn nested_commands_are_measured() {
    let mut scene = cube_scene();
    let canvas = scene
        .create_canvas_3d(Some("main"), 100.0, 100.0, None, None)
        .unwrap();
    canvas.create_frame(None, &["cube"], None);
    canvas.create_frame(None, &["cube"], None);

    let sizes = scene.measure_command_size().unwrap();
    assert!(!sizes.contains_key("CanvasCommands"));
    assert!(!sizes.contains_key("FrameCommands"));
    for key in ["SetSceneId", "SetSceneProperties", "DefineMesh", "AddCanvas3D", "SetCamera", "AddFrame", "AddMesh"] {
        assert!(sizes[key] > 0, "{key}");
    }

    let add_mesh = serde_json::to_string_pretty(&Command::AddMesh(command::AddMesh {
        mesh_id: "cube".to_owned(),
        transform: None,
    }))
    .unwrap();
    assert_eq!(sizes["AddMesh"], 2 * add_mesh.len());
}

#[test]
fn json_round_trip() {
    let mut scene = cube_scene();
    scene
        .create_canvas_3d(None, 300.0, 200.0, None, None)
        .unwrap()
        .create_frame(None, &["cube"], None);
    let commands = scene.to_commands().unwrap();
    let parsed: Vec<Command> = serde_json::from_str(&scene.json().unwrap()).unwrap();
    assert_eq!(parsed, commands);
}

#[test]
fn script() {
    let scene = cube_scene();
    let script = scene.script().unwrap();
    assert!(script.starts_with("window.onload = function(){\n    let commands = [{"));
    assert!(script.ends_with("];\n    tableau(null, commands);\n}\n"));
}

#[test]
fn html() {
    let scene = cube_scene();
    let page = scratch_path("page.html");
    let script_path = scratch_path("scene.js");
    scene
        .save_as_html(
            &page,
            &HtmlOptions {
                title: "Cube".to_owned(),
                script_path: Some(script_path.clone()),
                library: Some(ScriptSource::Link("tableau.min.js".to_owned())),
                ..Default::default()
            },
        )
        .unwrap();

    let html = std::fs::read_to_string(&page).unwrap();
    assert!(html.starts_with("<!DOCTYPE html>\n<html lang=\"en\">\n   <head>\n"));
    assert!(html.contains("<title>Cube</title>"));
    assert!(html.contains("<script src='tableau.min.js'></script>"));
    assert!(html.contains(&format!("<script src='{}'></script>", script_path.display())));
    assert!(html.ends_with("</html>"));
    assert_eq!(std::fs::read_to_string(&script_path).unwrap(), scene.script().unwrap());

    std::fs::remove_file(page).unwrap();
    std::fs::remove_file(script_path).unwrap();
}

#[test]
fn clear_script() {
    let mut scene = cube_scene();
    scene
        .create_canvas_3d(Some("main"), 100.0, 100.0, None, None)
        .unwrap()
        .create_frame(None, &["cube"], None);
    scene.clear_script();
    assert!(scene.script_cleared());
    assert!(scene.meshes().is_empty());

    let commands = scene.to_commands().unwrap();
    assert_eq!(command_types(&commands), ["SetSceneProperties", "CanvasCommands"]);

    // ids keep counting after a clear
    let mesh = scene.create_mesh(None, MeshOptions::default()).unwrap();
    assert_eq!(mesh.mesh_id(), "Mesh-1");

    assert!(matches!(
        scene.save_as_html(scratch_path("cleared.html"), &HtmlOptions::default()),
        Err(Error::Scene(SceneError::ScriptCleared))
    ));
}
