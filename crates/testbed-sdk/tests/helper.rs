//! Setup helper against stand-in icommands.

#![cfg(unix)]
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::collections::BTreeMap;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use tempfile::TempDir;
use testbed_common::error::TestbedError;
use testbed_sdk::SetupHelper;

const HOME: &str = "/testZone/home/rods";

/// Writes an executable icommand that records its arguments to `calls.log`.
fn icommand(dir: &Path, name: &str, body: &str) {
    let path = dir.join(name);
    let script = format!(
        "#!/usr/bin/env bash\necho \"{name} $*\" >> \"$(dirname \"$0\")/calls.log\"\n{body}\n"
    );
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

fn icommands() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    icommand(dir.path(), "ipwd", &format!("echo {HOME}"));
    icommand(dir.path(), "imkdir", "");
    icommand(
        dir.path(),
        "iput",
        "cp \"$1\" \"$(dirname \"$0\")/uploaded\"",
    );
    icommand(
        dir.path(),
        "ils",
        r#"case "$1" in
    */fixtures) echo "$1:" ;;
    *) echo "  $(basename "$1")" ;;
esac"#,
    );
    icommand(dir.path(), "imeta", "");
    icommand(
        dir.path(),
        "ichksum",
        r#"if [ "$1" = "-f" ]; then exit 0; fi
echo "    payload.txt    sha2:3q2+7w=="
echo "Total checksum performed = 1, Failed checksum = 0""#,
    );
    icommand(dir.path(), "irepl", "");
    icommand(dir.path(), "iadmin", r#"if [ "$3" = "rodsuser" ] && [ "$2" = "taken#testZone" ]; then
    echo "remote addresses: 172.17.0.3 ERROR: execCmd: CATALOG_ALREADY_HAS_ITEM_BY_THAT_NAME" >&2
fi"#);
    icommand(dir.path(), "iwarn", "echo partial; echo 'something odd' >&2");
    dir
}

fn calls(dir: &Path) -> Vec<String> {
    std::fs::read_to_string(dir.join("calls.log"))
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

#[tokio::test]
async fn run_command_returns_trimmed_stdout() {
    let dir = icommands();
    let helper = SetupHelper::new(dir.path());
    assert_eq!(helper.current_directory().await.unwrap(), HOME);
}

#[tokio::test]
async fn stderr_output_is_an_error() {
    let dir = icommands();
    let helper = SetupHelper::new(dir.path());
    match helper.run_command(&["iwarn", "-v"]).await {
        Err(TestbedError::CommandFailed {
            command,
            stdout,
            stderr,
        }) => {
            assert_eq!(command, "iwarn -v");
            assert_eq!(stdout.trim(), "partial");
            assert_eq!(stderr.trim(), "something odd");
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn collections_and_data_objects_land_in_the_working_collection() {
    let dir = icommands();
    let staging = tempfile::tempdir().unwrap();
    let helper = SetupHelper::new(dir.path()).with_staging_dir(staging.path());

    let collection = helper.create_collection("fixtures").await.unwrap();
    assert_eq!(collection, format!("{HOME}/fixtures"));

    let object = helper.create_data_object("payload.txt", "abc").await.unwrap();
    assert_eq!(object, format!("{HOME}/payload.txt"));
    assert_eq!(std::fs::read_to_string(dir.path().join("uploaded")).unwrap(), "abc");

    assert!(helper.create_collection("a/b").await.is_err());
    assert!(helper.create_data_object("a/b", "").await.is_err());
    assert!(calls(dir.path()).iter().any(|c| c == "imkdir fixtures"));
}

#[tokio::test]
async fn uploads_are_staged_under_the_configured_directory() {
    let dir = icommands();
    let root = tempfile::tempdir().unwrap();
    let staging = root.path().join("staging");
    let helper = SetupHelper::new(dir.path()).with_staging_dir(&staging);

    let _ = helper.create_data_object("payload.txt", "abc").await.unwrap();

    let staged = calls(dir.path())
        .into_iter()
        .find_map(|c| c.strip_prefix("iput ").map(str::to_string))
        .unwrap();
    let staged = Path::new(&staged);
    assert!(staged.starts_with(&staging));
    assert!(staged.parent().unwrap().file_name().unwrap().to_string_lossy().starts_with(".iput-"));
    assert!(!staged.exists());
    assert_eq!(std::fs::read_dir(&staging).unwrap().count(), 0);
}

#[tokio::test]
async fn metadata_uses_the_entity_kind() {
    let dir = icommands();
    let helper = SetupHelper::new(dir.path());
    let metadata = BTreeMap::from([
        ("colour".to_string(), vec!["red".to_string(), "blue".to_string()]),
        ("size".to_string(), vec!["3".to_string()]),
    ]);

    helper
        .add_metadata_to(&format!("{HOME}/fixtures"), &metadata)
        .await
        .unwrap();
    helper
        .add_metadata_to(&format!("{HOME}/payload.txt"), &metadata)
        .await
        .unwrap();

    let imeta: Vec<_> = calls(dir.path())
        .into_iter()
        .filter(|c| c.starts_with("imeta"))
        .collect();
    assert_eq!(imeta.len(), 6);
    assert_eq!(imeta[0], format!("imeta add -C {HOME}/fixtures colour red"));
    assert_eq!(imeta[3], format!("imeta add -d {HOME}/payload.txt colour red"));
    assert_eq!(imeta[5], format!("imeta add -d {HOME}/payload.txt size 3"));
}

#[tokio::test]
async fn checksums_are_read_from_the_first_line() {
    let dir = icommands();
    let helper = SetupHelper::new(dir.path());
    let path = format!("{HOME}/payload.txt");

    helper.update_checksums(&path).await.unwrap();
    assert_eq!(helper.get_checksum(&path).await.unwrap(), "sha2:3q2+7w==");
    assert!(calls(dir.path()).contains(&format!("ichksum -f -a -r {path}")));
}

#[tokio::test]
async fn replicas_and_users() {
    let dir = icommands();
    let helper = SetupHelper::new(dir.path());

    let resource = helper.create_replica_storage().await.unwrap();
    assert!(resource.name.starts_with("replicas-"));
    assert_eq!(resource.location, format!("/tmp/{}", resource.name));
    helper
        .replicate_data_object(&format!("{HOME}/payload.txt"), &resource.name)
        .await
        .unwrap();

    let user = helper.create_user("alice", "testZone").await.unwrap();
    assert_eq!(user.username, "alice");
    assert!(!user.admin);
    assert!(user.password.is_none());

    let err = helper.create_user("taken", "testZone").await.unwrap_err();
    assert!(matches!(err, TestbedError::InvalidState { .. }));

    let log = calls(dir.path());
    assert!(log.contains(&format!("irepl -R {} {HOME}/payload.txt", resource.name)));
    assert!(log.contains(&"iadmin mkuser alice#testZone rodsuser".to_string()));
}
