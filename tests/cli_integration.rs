// CLI integration tests: JSON on stdout, JSON errors on stderr, stable exit codes.
use std::path::Path;
use std::process::{Command, Output};

use serde_json::Value;

fn cmd() -> Command {
    let exe = env!("CARGO_BIN_EXE_emio");
    Command::new(exe)
}

fn run(args: &[&str]) -> Output {
    cmd().args(args).output().expect("spawn emio")
}

fn stdout_json(output: &Output) -> Value {
    serde_json::from_slice(&output.stdout).expect("stdout json")
}

fn stderr_json(output: &Output) -> Value {
    let text = String::from_utf8_lossy(&output.stderr);
    let line = text
        .lines()
        .find(|line| line.starts_with('{'))
        .expect("json error line");
    serde_json::from_str(line).expect("stderr json")
}

fn path_str(path: &Path) -> &str {
    path.to_str().expect("utf8 path")
}

const PARTICLES: &str = "\
data_optics

_rlnOpticsGroup 1

data_particles

loop_
_rlnImageName #1
_rlnDefocusU #2
_rlnClassNumber #3
1@stack.mrcs 12000.5 1
2@stack.mrcs 25000.0 2
3@stack.mrcs 31000.0 2
";

#[test]
fn formats_lists_builtin_keys() {
    let output = run(&["formats"]);
    assert!(output.status.success());
    let value = stdout_json(&output);
    let image: Vec<&str> = value["image"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(Value::as_str)
        .collect();
    assert!(image.contains(&"em"));
    assert!(image.contains(&"mrcs"));
    assert_eq!(value["table"], serde_json::json!(["star", "xmd"]));
}

#[test]
fn image_create_then_info() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("stack.mrcs");

    let create = run(&["image", "create", path_str(&path), "--dim", "16,16,1,4", "--type", "int16"]);
    assert!(create.status.success(), "{}", String::from_utf8_lossy(&create.stderr));
    assert_eq!(stdout_json(&create)["file_size"], 1024 + 16 * 16 * 2 * 4);

    let info = run(&["image", "info", path_str(&path)]);
    assert!(info.status.success());
    let value = stdout_json(&info);
    assert_eq!(value["format"], "mrc");
    assert_eq!(value["type"], "int16");
    assert_eq!(value["dim"], serde_json::json!({"x": 16, "y": 16, "z": 1, "n": 4}));
    assert_eq!(value["header_size"], 1024);
    assert_eq!(value["header"]["mode"], 1);
}

#[test]
fn image_errors_are_json_with_exit_codes() {
    let dir = tempfile::tempdir().expect("tempdir");

    let missing = run(&["image", "info", path_str(&dir.path().join("missing.em"))]);
    assert_eq!(missing.status.code(), Some(5));
    assert_eq!(stderr_json(&missing)["error"]["kind"], "Io");

    let unknown = run(&["image", "info", path_str(&dir.path().join("image.tiff"))]);
    assert_eq!(unknown.status.code(), Some(3));
    assert_eq!(stderr_json(&unknown)["error"]["kind"], "UnknownFormat");

    let bad = dir.path().join("bad.em");
    std::fs::write(&bad, b"not an em header").expect("write");
    let parse = run(&["image", "info", path_str(&bad)]);
    assert_eq!(parse.status.code(), Some(4));

    let bad_dim = run(&["image", "create", path_str(&dir.path().join("x.em")), "--dim", "0,4"]);
    assert_eq!(bad_dim.status.code(), Some(2));
    assert_eq!(stderr_json(&bad_dim)["error"]["kind"], "Usage");
}

#[test]
fn table_show_lists_every_block() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("particles.star");
    std::fs::write(&path, PARTICLES).expect("write");

    let output = run(&["table", "show", path_str(&path)]);
    assert!(output.status.success());
    let tables = stdout_json(&output)["tables"].clone();
    assert_eq!(tables[0]["name"], "optics");
    assert_eq!(tables[1]["rows"].as_array().unwrap().len(), 3);
    assert_eq!(tables[1]["columns"][1]["type"], "float");
    assert_eq!(tables[1]["rows"][0]["rlnImageName"], "1@stack.mrcs");

    let missing = run(&["table", "show", path_str(&path), "--name", "micrographs"]);
    assert_eq!(missing.status.code(), Some(2));
}

#[test]
fn table_delete_writes_output_and_keeps_other_blocks() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("particles.star");
    let output_path = dir.path().join("kept.star");
    std::fs::write(&input, PARTICLES).expect("write");

    let output = run(&[
        "table",
        "delete",
        path_str(&input),
        "--name",
        "particles",
        "--where",
        "rlnDefocusU > 20000",
        "--output",
        path_str(&output_path),
    ]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let value = stdout_json(&output);
    assert_eq!(value["deleted"], 2);
    assert_eq!(value["rows"], 1);
    assert_eq!(std::fs::read_to_string(&input).unwrap(), PARTICLES);

    let show = run(&["table", "show", path_str(&output_path)]);
    let tables = stdout_json(&show)["tables"].clone();
    assert_eq!(tables.as_array().unwrap().len(), 2);
    assert_eq!(tables[1]["rows"].as_array().unwrap().len(), 1);
}

#[test]
fn table_update_rewrites_in_place() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("particles.star");
    std::fs::write(&path, PARTICLES).expect("write");

    let output = run(&[
        "table",
        "update",
        path_str(&path),
        "--name",
        "particles",
        "--set",
        ".rlnClassNumber = 7",
        "--where",
        "rlnClassNumber == 2",
    ]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(stdout_json(&output)["updated"], 2);

    let show = run(&["table", "show", path_str(&path), "--name", "particles"]);
    let rows = stdout_json(&show)["tables"][0]["rows"].clone();
    assert_eq!(rows[0]["rlnClassNumber"], 1);
    assert_eq!(rows[2]["rlnClassNumber"], 7);

    let bad = run(&["table", "update", path_str(&path), "--set", ".x = ", "--where", "true"]);
    assert_eq!(bad.status.code(), Some(2));
}
