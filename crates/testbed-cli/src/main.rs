//! # testbed
//!
//! Sets up a catalog server with baton and icommand proxies pointed at it,
//! prints where the proxies are, and tears everything down when interrupted.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

mod output;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use testbed_common::config::TestbedConfig;
use testbed_common::constants::BIN_NAME;
use testbed_sdk::{ClientSetup, TestBed};

/// Sets up a version of baton connected to a catalog server for use in
/// testing.
#[derive(Parser, Debug)]
#[command(name = BIN_NAME, version, about, long_about = None)]
struct Cli {
    /// Version of baton to set up: [0.16.1, 0.16.2, 0.16.3, 0.16.4, 0.17.0]
    #[arg(long, default_value = "0.17.0")]
    baton: String,

    /// Version of iRODS to set up: [3.3.1, 4.1.8, 4.1.9, 4.1.10]
    #[arg(long, default_value = "4.1.10")]
    irods: String,

    /// Use the server described by the IRODS_* environment variables
    /// instead of starting one.
    #[arg(long)]
    external: bool,

    /// Start the shared proxy container before printing the locations.
    #[arg(long)]
    prewarm: bool,

    /// Log as JSON lines.
    #[arg(long, env = "TESTBED_LOG_JSON")]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.json_logs);

    let setup = ClientSetup::lookup(&cli.baton, &cli.irods)
        .with_context(|| format!("no setup for baton {} with iRODS {}", cli.baton, cli.irods))?;
    let mut config = TestbedConfig::from_env()?;
    config.proxy.prewarm |= cli.prewarm;

    let mut builder = TestBed::builder().client_setup(setup).config(config);
    if cli.external {
        let server = testbed_server::external::from_env()?
            .context("--external needs IRODS_HOST, IRODS_PORT, IRODS_USERNAME, IRODS_PASSWORD and IRODS_ZONE")?;
        builder = builder.external_server(server);
    }
    let mut testbed = builder.build()?;

    let running = shutdown_flag()?;
    tracing::info!(%setup, "setting up");
    let result = if setup_until_interrupted(&mut testbed, &running).await? {
        report_and_wait(&testbed, &running).await
    } else {
        tracing::info!("interrupted during setup, tearing down");
        Ok(())
    };
    testbed.tear_down().await;
    result
}

/// Runs setup until it finishes or the shutdown flag clears.
///
/// Returns `false` when interrupted; the abandoned setup is dropped, which
/// kills any server it had not handed over yet.
async fn setup_until_interrupted(testbed: &mut TestBed, running: &AtomicBool) -> anyhow::Result<bool> {
    tokio::select! {
        result = testbed.setup() => {
            result?;
            Ok(true)
        }
        () = wait_for_shutdown(running) => Ok(false),
    }
}

async fn wait_for_shutdown(running: &AtomicBool) {
    while running.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
}

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn report_and_wait(testbed: &TestBed, running: &AtomicBool) -> anyhow::Result<()> {
    let (Some(baton), Some(icommands)) = (testbed.baton_location(), testbed.icommands_location())
    else {
        anyhow::bail!("testbed has no proxies after setup");
    };
    output::write_locations(&mut std::io::stdout().lock(), baton, icommands)?;

    tracing::info!("running until interrupted (Ctrl+C, SIGTERM or SIGHUP)");
    wait_for_shutdown(running).await;
    tracing::info!("tearing down");
    Ok(())
}

fn shutdown_flag() -> anyhow::Result<Arc<AtomicBool>> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .map_err(|e| anyhow::anyhow!("failed to set signal handler: {e}"))?;
    Ok(running)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use testbed_common::config::TestbedConfig;
    use testbed_proxy::ProxyGenerator;
    use testbed_runtime::mock::{LogScript, MockRuntime};
    use testbed_sdk::SetupState;
    use testbed_server::readiness::STARTED_MARKER;

    use super::*;

    fn testbed(mock: &Arc<MockRuntime>, data: &std::path::Path) -> TestBed {
        let mut config = TestbedConfig {
            data_dir: data.to_path_buf(),
            ..TestbedConfig::default()
        };
        config.start.readiness_timeout_secs = None;
        config.start.probe_interval_ms = 1;
        TestBed::builder()
            .proxy_generator(ProxyGenerator::with_docker(
                PathBuf::from("/usr/bin/docker"),
                config.proxy.clone(),
                config.lock_dir(),
            ))
            .config(config)
            .runtime(mock.clone())
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn interrupt_abandons_a_hanging_setup() {
        let data = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockRuntime::new().with_default_logs(LogScript::hanging::<_, &str>([])));
        let mut testbed = testbed(&mock, data.path());
        let running = Arc::new(AtomicBool::new(true));

        let flag = Arc::clone(&running);
        let interrupt = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            flag.store(false, Ordering::SeqCst);
        });
        let completed = setup_until_interrupted(&mut testbed, &running).await.unwrap();
        interrupt.await.unwrap();

        assert!(!completed);
        assert_eq!(mock.created_names().len(), 1);
        testbed.tear_down().await;
        assert_eq!(testbed.state(), SetupState::Stopped);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(mock.killed().len(), 1);
        assert!(mock.running_names().is_empty());
    }

    #[tokio::test]
    async fn setup_completes_while_not_interrupted() {
        let data = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockRuntime::new().with_default_logs(LogScript::hanging([STARTED_MARKER])));
        let mut testbed = testbed(&mock, data.path());
        let running = AtomicBool::new(true);

        assert!(setup_until_interrupted(&mut testbed, &running).await.unwrap());
        assert_eq!(testbed.state(), SetupState::Running);
        testbed.tear_down().await;
    }
}
