//! Test doubles and helpers.
//!
//! These are shipped as a regular module (not `#[cfg(test)]`) so downstream
//! crates can drive the engine in their own tests with the same doubles.

mod mocks;

pub use mocks::{
    FailingPlugin, FnPlugin, NoOpPlugin, RecordingPlugin, RespondingPlugin, ScriptedResource,
    SharedInitLog, StoringPlugin,
};

/// Installs a compact tracing subscriber for test debugging.
///
/// Safe to call from every test; repeat installs are ignored.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
