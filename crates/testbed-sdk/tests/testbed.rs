//! Testbed setup and tear-down against the in-memory runtime.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use testbed_common::config::TestbedConfig;
use testbed_common::error::TestbedError;
use testbed_common::types::{ExternalServer, User};
use testbed_proxy::ProxyGenerator;
use testbed_runtime::mock::{LogScript, MockRuntime};
use testbed_sdk::{ClientSetup, SetupState, TestBed};
use testbed_server::readiness::{FAILED_MARKER, STARTED_MARKER};

struct Fixture {
    data: TempDir,
    mock: Arc<MockRuntime>,
}

impl Fixture {
    fn new(logs: LogScript) -> Self {
        Self {
            data: tempfile::tempdir().unwrap(),
            mock: Arc::new(MockRuntime::new().with_default_logs(logs)),
        }
    }

    fn config(&self, prewarm: bool) -> TestbedConfig {
        let mut config = TestbedConfig {
            data_dir: self.data.path().to_path_buf(),
            ..TestbedConfig::default()
        };
        config.start.max_start_attempts = Some(2);
        config.start.readiness_timeout_secs = Some(5);
        config.start.probe_interval_ms = 1;
        config.proxy.prewarm = prewarm;
        config
    }

    fn testbed(&self, prewarm: bool) -> testbed_sdk::TestBedBuilder {
        let config = self.config(prewarm);
        TestBed::builder()
            .proxy_generator(ProxyGenerator::with_docker(
                PathBuf::from("/usr/bin/docker"),
                config.proxy.clone(),
                config.lock_dir(),
            ))
            .config(config)
            .runtime(self.mock.clone())
    }
}

fn scripts_in(dir: &Path) -> usize {
    std::fs::read_dir(dir).unwrap().count()
}

#[tokio::test]
async fn setup_starts_server_and_writes_proxies() {
    let fixture = Fixture::new(LogScript::hanging([STARTED_MARKER]));
    let mut testbed = fixture.testbed(false).build().unwrap();
    assert_eq!(testbed.state(), SetupState::Init);
    assert!(testbed.baton_location().is_none());

    testbed.setup().await.unwrap();

    assert_eq!(testbed.state(), SetupState::Running);
    assert!(fixture.mock.has_image("mercury/baton:0.17.0-with-irods-4.1.10"));
    let server = testbed.started_server().unwrap().clone();
    assert_eq!(fixture.mock.config_of(&server.name).unwrap().image, "mercury/icat:4.1.10");
    assert_eq!(scripts_in(testbed.baton_location().unwrap()), 7);
    assert_eq!(scripts_in(testbed.icommands_location().unwrap()), 47);

    let ils = std::fs::read_to_string(testbed.icommands_location().unwrap().join("ils")).unwrap();
    let list = std::fs::read_to_string(testbed.baton_location().unwrap().join("baton-list")).unwrap();
    let container_line = |script: &str| {
        script
            .lines()
            .find(|line| line.starts_with("container="))
            .unwrap()
            .to_string()
    };
    assert_eq!(container_line(&ils), container_line(&list));
    assert!(ils.contains(&format!("--link '{0}:{0}'", server.name)));

    let helper = testbed.helper().unwrap();
    assert_eq!(helper.staging_location(), fixture.data.path().join("staging"));
    testbed.tear_down().await;
}

#[tokio::test]
async fn tear_down_stops_server_and_removes_proxies() {
    let fixture = Fixture::new(LogScript::hanging([STARTED_MARKER]));
    let mut testbed = fixture.testbed(false).build().unwrap();
    testbed.setup().await.unwrap();
    let server = testbed.started_server().unwrap().name.clone();
    let baton = testbed.baton_location().unwrap().to_path_buf();
    let icommands = testbed.icommands_location().unwrap().to_path_buf();

    testbed.tear_down().await;

    assert_eq!(testbed.state(), SetupState::Stopped);
    assert!(fixture.mock.killed().contains(&server));
    assert!(!baton.exists());
    assert!(!icommands.exists());
    assert!(testbed.baton_location().is_none());
    assert!(testbed.started_server().is_none());

    testbed.tear_down().await;
    assert_eq!(fixture.mock.killed().len(), 1);
}

#[tokio::test]
async fn setup_runs_only_once() {
    let fixture = Fixture::new(LogScript::hanging([STARTED_MARKER]));
    let mut testbed = fixture.testbed(false).build().unwrap();
    testbed.setup().await.unwrap();

    let err = testbed.setup().await.unwrap_err();
    assert!(matches!(err, TestbedError::InvalidState { .. }));

    testbed.tear_down().await;
    assert!(matches!(testbed.setup().await, Err(TestbedError::InvalidState { .. })));
}

#[tokio::test]
async fn tear_down_before_setup_does_nothing() {
    let fixture = Fixture::new(LogScript::hanging([STARTED_MARKER]));
    let mut testbed = fixture.testbed(false).build().unwrap();
    testbed.tear_down().await;
    assert_eq!(testbed.state(), SetupState::Init);
    testbed.setup().await.unwrap();
    testbed.tear_down().await;
}

#[tokio::test]
async fn external_server_is_used_and_left_running() {
    let fixture = Fixture::new(LogScript::hanging([STARTED_MARKER]));
    let external = ExternalServer {
        host: "irods.example.org".into(),
        port: 1247,
        users: vec![User::new("rods", "testZone", "irods123", true)],
    };
    let mut testbed = fixture.testbed(false).external_server(external).build().unwrap();

    testbed.setup().await.unwrap();
    assert!(testbed.started_server().is_none());
    assert!(fixture.mock.created_names().is_empty());
    let ils = std::fs::read_to_string(testbed.icommands_location().unwrap().join("ils")).unwrap();
    assert!(ils.contains("-e IRODS_HOST='irods.example.org'"));
    assert!(!ils.contains("--link"));

    testbed.tear_down().await;
    assert!(fixture.mock.killed().is_empty());
}

#[tokio::test]
async fn prewarm_starts_the_shared_container() {
    let fixture = Fixture::new(LogScript::hanging([STARTED_MARKER]));
    let mut testbed = fixture
        .testbed(true)
        .client_setup(ClientSetup::LATEST_LEGACY)
        .build()
        .unwrap();
    fixture.mock.push_logs(LogScript::lines(["exited: irods (exit status 0; expected)"]));

    testbed.setup().await.unwrap();

    let server = testbed.started_server().unwrap().name.clone();
    let running = fixture.mock.running_names();
    assert_eq!(running.len(), 2);
    let shared = running.iter().find(|name| **name != server).unwrap();
    assert!(shared.starts_with("testbed-proxy-"));
    assert_eq!(
        fixture.mock.config_of(shared).unwrap().image,
        "mercury/baton:0.16.4-with-irods-3.3.1"
    );

    testbed.tear_down().await;
    assert!(fixture.mock.removed().contains(shared));
}

#[tokio::test]
async fn dropping_a_running_testbed_removes_its_containers() {
    let fixture = Fixture::new(LogScript::hanging([STARTED_MARKER]));
    let mut testbed = fixture.testbed(true).build().unwrap();
    testbed.setup().await.unwrap();
    let server = testbed.started_server().unwrap().name.clone();
    let running = fixture.mock.running_names();
    let shared = running.iter().find(|name| **name != server).unwrap().clone();

    drop(testbed);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let removed = fixture.mock.removed();
    assert!(removed.contains(&server));
    assert!(removed.contains(&shared));
}

#[tokio::test]
async fn failed_setup_releases_everything() {
    let fixture = Fixture::new(LogScript::hanging([FAILED_MARKER]));
    let mut testbed = fixture.testbed(false).build().unwrap();

    let err = testbed.setup().await.unwrap_err();

    assert!(matches!(err, TestbedError::StartAttemptsExhausted { attempts: 2, .. }));
    assert_eq!(testbed.state(), SetupState::Stopped);
    assert!(testbed.baton_location().is_none());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(fixture.mock.running_names().is_empty());
}
