//! Tracing setup, mirroring the teacher's `tracing` + `tracing-subscriber` usage
//! in `server.rs`/`terminal_executor.rs`, pulled into one place for the binary.

use tracing_subscriber::EnvFilter;

/// Installs a global `tracing` subscriber reading `RUST_LOG`, defaulting to `info`.
/// Safe to call once; a second call is a no-op (the underlying `set_global_default`
/// error is swallowed, matching how short-lived CLI tools in the pack avoid
/// panicking on re-init during tests).
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
