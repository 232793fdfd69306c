use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

const FRAGMENT: &str = r#"#version 330 core
uniform sampler2D _tex0;
uniform vec3 _tint;
uniform float _gain;
out vec4 fragColor;
void main(void)
{
    fragColor = vec4(_tint * _gain, 1.0);
}
"#;

fn lumiere(config_dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_lumiere"))
        .env("LUMIERE_CONFIG_DIR", config_dir)
        .env("RUST_LOG", "warn")
        .args(args)
        .output()
        .expect("failed to run lumiere")
}

fn uniform<'a>(report: &'a serde_json::Value, name: &str) -> &'a serde_json::Value {
    report
        .as_array()
        .expect("uniform list")
        .iter()
        .find(|entry| entry["name"] == name)
        .unwrap_or_else(|| panic!("uniform {name} missing from {report}"))
}

#[test]
fn lists_declared_uniforms_as_json() {
    let root = TempDir::new().unwrap();
    let shader = root.path().join("tint.frag");
    fs::write(&shader, FRAGMENT).unwrap();

    let output = lumiere(
        root.path(),
        &["uniforms", shader.to_str().unwrap(), "--json"],
    );
    assert!(output.status.success(), "{output:?}");

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let tint = uniform(&report, "_tint");
    assert_eq!(tint["type"], "vec3");
    assert_eq!(tint["values"].as_array().unwrap().len(), 3);
    assert_eq!(uniform(&report, "_gain")["values"].as_array().unwrap().len(), 1);
    assert_eq!(uniform(&report, "_scale")["values"], serde_json::json!([1.0, 1.0, 1.0]));
    assert_eq!(uniform(&report, "_modelViewProjectionMatrix")["type"], "mat4");
}

#[test]
fn configured_uniforms_survive_the_link() {
    let root = TempDir::new().unwrap();
    fs::write(
        root.path().join("lumiere.toml"),
        "version = 1\n[shader.uniforms]\n_gain = 0.5\n_tint = [1.0, 0.25, 0.0]\n",
    )
    .unwrap();
    let shader = root.path().join("tint.frag");
    fs::write(&shader, FRAGMENT).unwrap();

    let output = lumiere(
        root.path(),
        &["uniforms", shader.to_str().unwrap(), "--json"],
    );
    assert!(output.status.success(), "{output:?}");

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(uniform(&report, "_gain")["values"], serde_json::json!([0.5]));
    assert_eq!(
        uniform(&report, "_tint")["values"],
        serde_json::json!([1.0, 0.25, 0.0])
    );
}

#[test]
fn compile_errors_fail_the_command() {
    let root = TempDir::new().unwrap();
    let shader = root.path().join("broken.frag");
    fs::write(&shader, "#error not today\nvoid main() {}\n").unwrap();

    let output = lumiere(root.path(), &["uniforms", shader.to_str().unwrap()]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("failed to compile"), "{stderr}");
}

#[test]
fn invalid_config_is_reported() {
    let root = TempDir::new().unwrap();
    let config = root.path().join("custom.toml");
    fs::write(&config, "version = 2\n").unwrap();
    let shader = root.path().join("tint.frag");
    fs::write(&shader, FRAGMENT).unwrap();

    let output = lumiere(
        root.path(),
        &[
            "uniforms",
            shader.to_str().unwrap(),
            "--config",
            config.to_str().unwrap(),
        ],
    );
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("unsupported config version"), "{stderr}");
}
