//! Launcher end-to-end: load a root config with `${VAR}` expansion, start
//! every declared node in order, observe them all running, then tear down in
//! reverse order. A second scenario checks that a bad `startup_order` entry
//! rolls every already-started node back instead of leaving a half-started
//! system behind.

mod common;

use std::sync::Arc;
use std::time::Duration;

use conduit_core::launcher::{auth_from_env, default_context, session_config_from_env, Launcher};
use conduit_core::realtime::RealtimeConnection;

fn write_config(dir: &std::path::Path, startup_order: &str) {
    common::write_file(
        dir,
        "config.yaml",
        &format!(
            r#"
version: "3.0"
system:
  log_level: "${{CONDUIT_IT_LOG_LEVEL:-info}}"
  startup_delay: 0
launch:
  startup_order: [{startup_order}]
environment: {{}}
"#
        ),
    );
}

fn write_empty_descriptor(dir: &std::path::Path, name: &str) {
    common::write_file(dir, &format!("{name}.yaml"), "publishes: []\nsubscribes: []\nconfiguration: {}\n");
}

#[tokio::test]
async fn all_declared_nodes_start_and_stop_cleanly() {
    let dir = common::tempdir("launcher-ok");
    write_config(&dir, r#""audio_capture", "ai_core", "speech_synthesis""#);
    write_empty_descriptor(&dir, "audio_capture");
    write_empty_descriptor(&dir, "ai_core");
    write_empty_descriptor(&dir, "speech_synthesis");

    let mut launcher = Launcher::load(dir.join("config.yaml")).unwrap();
    assert_eq!(launcher.config().system.log_level, "info");

    let bus = common::bus();
    let realtime = Arc::new(RealtimeConnection::new(
        "wss://example.invalid",
        auth_from_env(),
        session_config_from_env("be helpful"),
    ));
    let ctx = default_context(
        Arc::clone(&bus),
        realtime,
        tokio::runtime::Handle::current(),
        common::tempdir("utterances"),
    );

    launcher.start_all(&dir, &ctx).unwrap();
    let statuses = launcher.node_statuses();
    assert_eq!(statuses.len(), 3);
    for name in ["audio_capture", "ai_core", "speech_synthesis"] {
        assert_eq!(statuses.get(name).copied(), Some("running"), "{name} should be running");
    }

    launcher.stop_all(Duration::from_secs(2));
    assert!(launcher.node_statuses().is_empty());
}

#[tokio::test]
async fn unrecognized_node_name_rolls_back_everything_already_started() {
    let dir = common::tempdir("launcher-bad");
    write_config(&dir, r#""audio_capture", "not_a_real_node""#);
    write_empty_descriptor(&dir, "audio_capture");
    write_empty_descriptor(&dir, "not_a_real_node");

    let mut launcher = Launcher::load(dir.join("config.yaml")).unwrap();
    let bus = common::bus();
    let realtime = Arc::new(RealtimeConnection::new(
        "wss://example.invalid",
        auth_from_env(),
        session_config_from_env("be helpful"),
    ));
    let ctx = default_context(bus, realtime, tokio::runtime::Handle::current(), common::tempdir("utterances"));

    let err = launcher.start_all(&dir, &ctx).unwrap_err();
    assert!(err.to_string().contains("not_a_real_node"));
    assert!(launcher.node_statuses().is_empty());
}
