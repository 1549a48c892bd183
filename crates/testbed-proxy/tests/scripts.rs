//! Runs generated scripts against a fake engine CLI.

#![cfg(unix)]
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::ffi::OsStr;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use testbed_common::config::ProxyConfig;
use testbed_common::types::{ExternalServer, User};
use testbed_proxy::{ProxyGenerator, ProxySet, ProxyTarget, Suite};

const IMAGE: &str = "mercury/baton:0.17.0-with-irods-4.1.10";

/// Records calls next to itself; `run -d` is slow so racing callers overlap.
const FAKE_DOCKER: &str = r#"#!/usr/bin/env bash
state="$(dirname "$0")"
case "$1" in
    inspect)
        if [ -e "$state/running" ]; then echo true; else echo false; fi
        ;;
    run)
        if [ "$2" = "-d" ]; then
            echo "$*" >> "$state/created.log"
            sleep 0.3
            touch "$state/running"
        else
            echo "one-shot $*"
        fi
        ;;
    exec)
        shift 3
        echo "exec $*"
        ;;
    rm)
        ;;
esac
"#;

fn fake_docker(dir: &Path) -> PathBuf {
    let path = dir.join("docker");
    std::fs::write(&path, FAKE_DOCKER).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn generator(docker: PathBuf, lock_dir: &Path, shared: bool) -> ProxyGenerator {
    ProxyGenerator::with_docker(
        docker,
        ProxyConfig {
            shared_container: shared,
            lock_wait_secs: 10,
            ..ProxyConfig::default()
        },
        lock_dir.to_path_buf(),
    )
}

fn target() -> ProxyTarget {
    ProxyTarget::from_external(&ExternalServer {
        host: "irods.example.org".into(),
        port: 1247,
        users: vec![User::new("rods", "testZone", "irods123", true)],
    })
    .unwrap()
}

#[test]
fn later_invocations_reuse_the_running_container() {
    let state = tempfile::tempdir().unwrap();
    let docker = fake_docker(state.path());
    let set = generator(docker, &state.path().join("locks"), true)
        .create_suite(&target(), IMAGE, Suite::ICommands)
        .unwrap();
    let ils = set.binary_path("ils").unwrap();

    for i in 0..3 {
        let out = Command::new(&ils)
            .arg(format!("/testZone/home/rods/{i}"))
            .output()
            .unwrap();
        assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
        let stdout = String::from_utf8_lossy(&out.stdout);
        assert_eq!(stdout.trim(), format!("exec ils /testZone/home/rods/{i}"));
    }

    let created = std::fs::read_to_string(state.path().join("created.log")).unwrap();
    assert_eq!(created.lines().count(), 1);
    assert!(created.contains(&set.shared().unwrap().name));
    assert!(created.contains("sleep infinity"));
}

/// Binaries invoked side by side in the concurrency tests.
const MIXED: [&str; 6] = [
    "baton",
    "baton-get",
    "baton-list",
    "baton-metaquery",
    "baton-chmod",
    "baton-list",
];

/// Starts every binary in `MIXED` at once and waits for all of them.
fn run_concurrently(set: &ProxySet, path: Option<&OsStr>) {
    let children: Vec<_> = MIXED
        .iter()
        .map(|binary| {
            let mut command = Command::new(set.binary_path(binary).unwrap());
            let _ = command.arg("--acl").stdout(Stdio::piped()).stderr(Stdio::piped());
            if let Some(path) = path {
                let _ = command.env("PATH", path);
            }
            (*binary, command.spawn().unwrap())
        })
        .collect();
    for (binary, child) in children {
        let out = child.wait_with_output().unwrap();
        assert!(out.status.success(), "{binary}: {}", String::from_utf8_lossy(&out.stderr));
        assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), format!("exec {binary} --acl"));
    }
}

/// A `PATH` holding only the tools the scripts and the fake engine need,
/// without `flock`.
fn path_without_flock(dir: &Path) -> std::ffi::OsString {
    let bin = dir.join("bin");
    std::fs::create_dir(&bin).unwrap();
    for tool in ["bash", "mkdir", "rmdir", "dirname", "sleep", "touch"] {
        std::os::unix::fs::symlink(which::which(tool).unwrap(), bin.join(tool)).unwrap();
    }
    bin.into_os_string()
}

#[test]
fn different_binaries_in_parallel_share_one_cold_start() {
    let state = tempfile::tempdir().unwrap();
    let docker = fake_docker(state.path());
    let set = generator(docker, &state.path().join("locks"), true)
        .create_suite(&target(), IMAGE, Suite::Baton)
        .unwrap();

    run_concurrently(&set, None);

    let created = std::fs::read_to_string(state.path().join("created.log")).unwrap();
    assert_eq!(created.lines().count(), 1);
}

#[test]
fn lock_directory_serialises_cold_starts_without_flock() {
    let state = tempfile::tempdir().unwrap();
    let docker = fake_docker(state.path());
    let path = path_without_flock(state.path());
    let set = generator(docker, &state.path().join("locks"), true)
        .create_suite(&target(), IMAGE, Suite::Baton)
        .unwrap();

    run_concurrently(&set, Some(&path));

    let created = std::fs::read_to_string(state.path().join("created.log")).unwrap();
    assert_eq!(created.lines().count(), 1);
    assert!(!set.shared().unwrap().lock_dir().exists());
    assert!(!set.shared().unwrap().lock_path.exists());
}

#[test]
fn one_shot_scripts_pass_arguments_through() {
    let state = tempfile::tempdir().unwrap();
    let docker = fake_docker(state.path());
    let set = generator(docker, &state.path().join("locks"), false)
        .create_suite(&target(), IMAGE, Suite::Baton)
        .unwrap();

    let out = Command::new(set.binary_path("baton-list").unwrap())
        .args(["--acl", "--avu"])
        .output()
        .unwrap();
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.starts_with("one-shot run -i --rm"));
    assert!(stdout.trim_end().ends_with(&format!("{IMAGE} baton-list --acl --avu")));
    assert!(!state.path().join("created.log").exists());
}

#[test]
fn iput_mounts_the_source_directory() {
    let state = tempfile::tempdir().unwrap();
    let docker = fake_docker(state.path());
    let set = generator(docker, &state.path().join("locks"), true)
        .create_suite(&target(), IMAGE, Suite::ICommands)
        .unwrap();
    let data = tempfile::tempdir().unwrap();
    let file = data.path().join("payload.txt");
    std::fs::write(&file, "data").unwrap();

    let out = Command::new(set.binary_path("iput").unwrap())
        .arg(&file)
        .arg("/testZone/home/rods/payload.txt")
        .output()
        .unwrap();
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    let mount = format!("-v {}:/tmp/input:ro", data.path().display());
    assert!(stdout.contains(&mount), "{stdout}");
    assert!(stdout.contains("iput /tmp/input/payload.txt /testZone/home/rods/payload.txt"));

    let missing = Command::new(set.binary_path("iput").unwrap()).output().unwrap();
    assert!(!missing.status.success());
}
