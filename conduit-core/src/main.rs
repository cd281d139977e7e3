//! conduit-launcher — process entry point.
//!
//! Usage: conduit-launcher <root-config.yaml> <nodes-dir>
//!
//! Reads the root descriptor, starts every node named in its
//! `launch.startup_order`, then blocks until SIGINT/SIGTERM and shuts them
//! down in reverse order.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use conduit_core::bus::MessageBus;
use conduit_core::launcher::{auth_from_env, default_context, session_config_from_env, wait_for_shutdown_signal, Launcher};
use conduit_core::realtime::RealtimeConnection;

const DEFAULT_INSTRUCTIONS: &str = "You are a friendly robot companion. Keep responses short and conversational.";

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        eprintln!("Usage: {} <root-config.yaml> <nodes-dir>", args[0]);
        std::process::exit(1);
    }
    let root_config_path = PathBuf::from(&args[1]);
    let nodes_dir = PathBuf::from(&args[2]);

    let mut launcher = match Launcher::load(&root_config_path) {
        Ok(l) => l,
        Err(e) => {
            eprintln!("failed to load root config: {e}");
            std::process::exit(1);
        }
    };

    init_logging(&launcher.config().system.log_level);

    let instructions = std::env::var("CONDUIT_INSTRUCTIONS").unwrap_or_else(|_| DEFAULT_INSTRUCTIONS.to_string());
    let bus = Arc::new(MessageBus::new());
    let realtime = Arc::new(RealtimeConnection::new(
        std::env::var("CONDUIT_REALTIME_URL").unwrap_or_else(|_| "wss://api.openai.com/v1/realtime".to_string()),
        auth_from_env(),
        session_config_from_env(instructions),
    ));
    realtime.start();

    let utterance_dir = std::env::var("CONDUIT_UTTERANCE_DIR").unwrap_or_else(|_| "/tmp/conduit-utterances".to_string());
    let ctx = default_context(Arc::clone(&bus), Arc::clone(&realtime), tokio::runtime::Handle::current(), utterance_dir);

    if let Err(e) = launcher.start_all(&nodes_dir, &ctx) {
        tracing::error!(error = %e, "startup failed");
        std::process::exit(1);
    }

    wait_for_shutdown_signal().await;

    let shutdown_timeout = Duration::from_secs_f64(launcher.config().system.shutdown_timeout);
    launcher.stop_all(shutdown_timeout);
    realtime.stop();

    std::process::exit(0);
}

fn init_logging(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
