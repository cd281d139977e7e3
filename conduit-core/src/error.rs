//! Crate-wide error taxonomy.
//!
//! Each module that can fail defines its own narrow error enum; this module
//! aggregates them behind `CoreError` for call sites that cross module
//! boundaries (the launcher, the node runtime's dispatch loop). Per-message
//! and per-delivery failures are handled locally inside the bus and never
//! reach this type — only failures that should abort startup or a node's
//! main loop propagate this far.

use thiserror::Error;

use crate::audio::AudioError;
use crate::bus::BusError;
use crate::config::ConfigError;
use crate::realtime::RealtimeError;
use crate::runtime::RuntimeError;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    Realtime(#[from] RealtimeError),

    #[error(transparent)]
    Audio(#[from] AudioError),

    #[error("hardware capability unavailable: {0}")]
    HardwareUnavailable(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
