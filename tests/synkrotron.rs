#![cfg(test)]

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

fn write_config(local_root: &Path, remote_root: &Path, extra: &str) {
    let sync_dir = local_root.join(".synkrotron");
    fs::create_dir_all(&sync_dir).unwrap();
    fs::write(
        sync_dir.join("config"),
        format!(
            "[backup]\nlocation: {}\n{}",
            remote_root.display(),
            extra
        ),
    )
    .unwrap();
}

#[test]
fn init_creates_config_with_template_stanza() {
    let dir = tempdir().unwrap();
    let mut cmd = cargo_bin_cmd!("synkrotron");
    cmd.current_dir(dir.path())
        .arg("init")
        .arg("backup")
        .assert()
        .success()
        .stdout(predicate::str::contains("Creating new configuration"));

    let contents = fs::read_to_string(dir.path().join(".synkrotron/config")).unwrap();
    assert!(contents.contains("[backup]"));
    assert!(contents.contains("location: <HOST>:<PATH>"));
}

#[test]
fn unknown_remote_name_is_a_fatal_config_error() {
    let dir = tempdir().unwrap();
    let remote = tempdir().unwrap();
    write_config(dir.path(), remote.path(), "");

    let mut cmd = cargo_bin_cmd!("synkrotron");
    cmd.current_dir(dir.path())
        .arg("diff")
        .arg("nope")
        .assert()
        .failure()
        .stdout(predicate::str::contains("error:"))
        .stdout(predicate::str::contains("nope"));
}

#[test]
fn baseline_push_lists_all_three_new_paths_sorted() {
    let local = tempdir().unwrap();
    let remote = tempdir().unwrap();
    fs::create_dir_all(local.path().join("dir")).unwrap();
    fs::write(local.path().join("dir/file"), b"hello").unwrap();
    fs::write(local.path().join("file"), b"hi").unwrap();
    write_config(local.path(), remote.path(), "");

    let mut cmd = cargo_bin_cmd!("synkrotron");
    let output = cmd
        .current_dir(local.path())
        .arg("diff")
        .arg("backup")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(output).unwrap();

    let dir_pos = text.find("--> dir").expect("dir push line present");
    let dir_file_pos = text.find("--> dir/file").expect("dir/file push line present");
    let file_pos = text.find("--> file").expect("file push line present");
    assert!(dir_pos < dir_file_pos);
    assert!(dir_file_pos < file_pos);
}

#[test]
fn modify_window_absorbs_small_time_skew_end_to_end() {
    let local = tempdir().unwrap();
    let remote = tempdir().unwrap();
    fs::write(local.path().join("file"), b"same content").unwrap();
    fs::write(remote.path().join("file"), b"same content").unwrap();

    use std::time::{Duration, SystemTime};
    let now = SystemTime::now();
    let skewed = now + Duration::from_secs(3);
    fs::File::open(local.path().join("file"))
        .unwrap()
        .set_modified(now)
        .unwrap();
    fs::File::open(remote.path().join("file"))
        .unwrap()
        .set_modified(skewed)
        .unwrap();

    write_config(local.path(), remote.path(), "modify_window: 5\n");
    let mut cmd = cargo_bin_cmd!("synkrotron");
    cmd.current_dir(local.path())
        .arg("diff")
        .arg("backup")
        .assert()
        .success()
        .stdout(predicate::str::contains("-->").not())
        .stdout(predicate::str::contains("<--").not());
}

#[test]
fn exclude_anchored_suppresses_only_top_level_match() {
    let local = tempdir().unwrap();
    let remote = tempdir().unwrap();
    fs::create_dir_all(local.path().join("dir")).unwrap();
    fs::create_dir_all(remote.path().join("dir")).unwrap();
    fs::write(local.path().join("file"), b"a").unwrap();
    fs::write(local.path().join("dir/file"), b"b").unwrap();
    write_config(local.path(), remote.path(), "exclude: /file\n");

    let mut cmd = cargo_bin_cmd!("synkrotron");
    cmd.current_dir(local.path())
        .arg("diff")
        .arg("backup")
        .assert()
        .success()
        .stdout(predicate::str::contains("--> file (").not())
        .stdout(predicate::str::contains("dir/file"));
}

#[test]
fn push_then_pull_round_trips_through_rsync() {
    let local = tempdir().unwrap();
    let remote = tempdir().unwrap();
    fs::create_dir_all(local.path().join("dir")).unwrap();
    fs::write(local.path().join("dir/file"), b"payload").unwrap();
    write_config(local.path(), remote.path(), "");

    let mut push = cargo_bin_cmd!("synkrotron");
    push.current_dir(local.path())
        .arg("push")
        .arg("backup")
        .assert()
        .success();

    assert!(remote.path().join("dir/file").is_file());
    assert_eq!(
        fs::read_to_string(remote.path().join("dir/file")).unwrap(),
        "payload"
    );

    let mut diff = cargo_bin_cmd!("synkrotron");
    diff.current_dir(local.path())
        .arg("diff")
        .arg("backup")
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}

#[test]
fn delete_flag_removes_destination_only_files_on_push() {
    let local = tempdir().unwrap();
    let remote = tempdir().unwrap();
    fs::write(local.path().join("keep"), b"k").unwrap();
    fs::write(remote.path().join("stale"), b"s").unwrap();
    write_config(local.path(), remote.path(), "delete: 1\n");

    let mut cmd = cargo_bin_cmd!("synkrotron");
    cmd.current_dir(local.path())
        .arg("push")
        .arg("backup")
        .assert()
        .success();

    assert!(remote.path().join("keep").is_file());
    assert!(!remote.path().join("stale").exists());
}
