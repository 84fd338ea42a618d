//! Structured logging setup via
//! `tracing_subscriber::fmt().with_env_filter(...).json().init()`.

use anyhow::Result;

/// Initialize JSON-structured tracing with an env-filter default of `info`
/// for `modelmesh` crates, overridable via `RUST_LOG`.
pub fn init_tracing() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("modelmesh=info".parse()?),
        )
        .json()
        .init();
    Ok(())
}
