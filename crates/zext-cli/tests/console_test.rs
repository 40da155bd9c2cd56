use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use zext_testing::{assert_dirs_equal, create_sample_tree, TestDir};

fn write_config(path: &Path, source: &Path, destination: &Path) {
    let contents = format!(
        r#"[paths]
source = "{}"
destination = "{}"

[executor]
max_queue_size = 3
max_pool_size = 1
wait_on_shutdown = true

[extraction]
warn_on_conflicts = true
log_files = false
page_size = 4
"#,
        source.display(),
        destination.display()
    );
    fs::write(path, contents).unwrap();
}

fn zext(config: &Path) -> Command {
    let mut cmd = Command::cargo_bin("zext").unwrap();
    cmd.arg("--config").arg(config);
    cmd
}

#[test]
fn test_help_lists_commands() {
    let mut cmd = Command::cargo_bin("zext").unwrap();
    cmd.arg("--help");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("extract"))
        .stdout(predicate::str::contains("forceterminate"));
}

#[test]
fn test_missing_config_is_created() {
    let test_dir = TestDir::new().unwrap();
    let config = test_dir.join("nested/config.toml");

    zext(&config).arg("status").assert().success();
    let written = fs::read_to_string(&config).unwrap();
    assert!(written.contains("max_queue_size = 3"));
}

#[test]
fn test_compress_then_extract_one_shot() {
    let test_dir = TestDir::new().unwrap();
    let src = create_sample_tree(&test_dir, "world").unwrap();
    let archive = test_dir.join("world.tar.gz");
    let out = test_dir.join("restored");
    let config = test_dir.join("config.toml");

    write_config(&config, &src, &archive);
    zext(&config)
        .arg("compress")
        .assert()
        .success()
        .stdout(predicate::str::contains("Queued compress tar -> gzip"))
        .stdout(predicate::str::contains("Finished compress tar -> gzip"));
    assert!(archive.is_file());
    assert!(!test_dir.join("world.tar").exists());

    write_config(&config, &archive, &out);
    zext(&config)
        .args(["extract", "--all"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Finished extract gzip -> tar"));
    assert_dirs_equal(&src, &out.join("world")).unwrap();
}

#[test]
fn test_missing_source_exit_code() {
    let test_dir = TestDir::new().unwrap();
    let config = test_dir.join("config.toml");
    write_config(&config, &test_dir.join("nope.zip"), &test_dir.join("out"));

    zext(&config)
        .arg("extract")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Source not found"));
}

#[test]
fn test_corrupt_archive_exit_code() {
    let test_dir = TestDir::new().unwrap();
    let archive = test_dir.create_file("broken.zip", b"not a zip").unwrap();
    let config = test_dir.join("config.toml");
    write_config(&config, &archive, &test_dir.join("out"));

    zext(&config).arg("extract").assert().code(4);
}

#[test]
fn test_conflict_confirmed_by_repeating() {
    let test_dir = TestDir::new().unwrap();
    let plain = test_dir.create_file("notes.txt", b"new notes").unwrap();
    let archive = test_dir.join("notes.txt.gz");
    let out = test_dir.create_dir("out").unwrap();
    test_dir.create_file("out/notes.txt", b"old notes").unwrap();
    let config = test_dir.join("config.toml");

    write_config(&config, &plain, &archive);
    zext(&config).arg("compress").assert().success();

    write_config(&config, &archive, &out);
    zext(&config)
        .write_stdin("extract\nextract view 1\nextract\nexit\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("1 file(s) in"))
        .stdout(predicate::str::contains("would be overwritten"))
        .stdout(predicate::str::contains("Queued extract gzip"));

    assert_eq!(fs::read(out.join("notes.txt")).unwrap(), b"new notes");
}

#[test]
fn test_interactive_status_and_terminate() {
    let test_dir = TestDir::new().unwrap();
    let config = test_dir.join("config.toml");

    zext(&config)
        .write_stdin("status\nterminate\nterminate\ncompress\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("READY | Active : 0 | Queued : 0"))
        .stdout(predicate::str::contains("Executor is terminating."))
        .stdout(predicate::str::contains("Executor is already terminated."))
        .stdout(predicate::str::contains("Error: No source set"));
}

#[test]
fn test_setdest_persists() {
    let test_dir = TestDir::new().unwrap();
    let config = test_dir.join("config.toml");

    zext(&config)
        .args(["setdest", "backups/out"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Destination set to backups/out"));
    zext(&config)
        .arg("dest")
        .assert()
        .success()
        .stdout(predicate::str::contains("Destination : backups/out"));
}

#[test]
fn test_unknown_command_is_reported() {
    let test_dir = TestDir::new().unwrap();
    let config = test_dir.join("config.toml");

    zext(&config)
        .write_stdin("frobnicate\nexit\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("frobnicate"));
}
