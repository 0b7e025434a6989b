use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;

fn write_survey(dir: &Path) -> PathBuf {
    let mut csv = String::from("longitude,latitude,altitude,nom\n");
    for k in 0..36 {
        csv.push_str(&format!("{},{},10.0,\n", k % 6, k / 6));
    }
    for k in 0..16 {
        csv.push_str(&format!("{},{},60.0,\n", k % 4, k / 4));
    }
    csv.push_str("1.5,1.5,80.0,Cim de la Serra\n");
    let path = dir.join("processed_data.csv");
    fs::write(&path, csv).unwrap();
    path
}

fn write_config(dir: &Path) -> PathBuf {
    let path = dir.join("topoband.toml");
    fs::write(
        &path,
        "[logging]\nlevel = \"warn\"\n\n[survey]\nxy_range = [0.0, 5.0]\n",
    )
    .unwrap();
    path
}

fn topoband(config: &Path) -> Command {
    let mut cmd = Command::cargo_bin("topoband").expect("找不到 topoband 可执行文件");
    cmd.env_remove("TOPOBAND_CONFIG").arg("--config").arg(config);
    cmd
}

#[test]
fn bands_merge_and_inspect() {
    let dir = tempfile::tempdir().expect("创建临时目录失败");
    let survey = write_survey(dir.path());
    let config = write_config(dir.path());
    let bands = dir.path().join("bands");
    let composites = dir.path().join("composites");

    topoband(&config)
        .arg("bands")
        .arg("--input")
        .arg(&survey)
        .arg("--output")
        .arg(&bands)
        .assert()
        .success()
        .stdout(predicate::str::contains("0m to 50m.dxf"))
        .stdout(predicate::str::contains("50m to 100m.dxf"));
    assert!(bands.join("0m to 50m.dxf").is_file());
    assert!(bands.join("50m to 100m.dxf").is_file());

    topoband(&config)
        .args(["merge", "--gap", "100", "--input"])
        .arg(&bands)
        .arg("--output")
        .arg(&composites)
        .assert()
        .success();
    let composite = composites.join("0m to 50m.dxf");
    assert!(composite.is_file());

    topoband(&config)
        .arg("inspect")
        .arg(&composite)
        .assert()
        .success()
        .stdout(predicate::str::contains("Boundaries_start (颜色: 7"))
        .stdout(predicate::str::contains("Crosses (颜色: 1, 可见: 是) 多段线=0, 圆=1"));
}

#[test]
fn invalid_gap_fails_without_output() {
    let dir = tempfile::tempdir().expect("创建临时目录失败");
    let config = write_config(dir.path());
    let bands = dir.path().join("bands");
    fs::create_dir(&bands).unwrap();
    fs::write(bands.join("0m to 50m.dxf"), "").unwrap();
    let composites = dir.path().join("composites");

    topoband(&config)
        .args(["merge", "--gap", "75", "--input"])
        .arg(&bands)
        .arg("--output")
        .arg(&composites)
        .assert()
        .failure()
        .code(1);
    assert!(!composites.exists());
}

#[test]
fn unreadable_config_is_fatal() {
    let dir = tempfile::tempdir().expect("创建临时目录失败");
    topoband(&dir.path().join("absent.toml"))
        .args(["inspect", "whatever.dxf"])
        .assert()
        .failure()
        .code(1);
}

#[test]
fn missing_survey_is_fatal() {
    let dir = tempfile::tempdir().expect("创建临时目录失败");
    let config = write_config(dir.path());
    topoband(&config)
        .arg("bands")
        .arg("--input")
        .arg(dir.path().join("absent.csv"))
        .arg("--output")
        .arg(dir.path().join("bands"))
        .assert()
        .failure()
        .code(1);
}
