//! Launcher and supervisor for the Sauce Connect tunnel binary.
//!
//! Downloads and verifies the platform-specific sc executable, launches
//! it, watches its output and readiness signal, and tears the tunnel down
//! cleanly again.

pub mod defaults;
pub mod error;

pub mod args;
pub mod binary;
pub mod config;
pub mod guard;
pub mod retry;
pub mod tunnel;

pub use error::{Error, Result};

pub use args::{build_args, redact};
pub use binary::fetch::{AcquireError, BinaryFetcher};
pub use binary::store::Platform;
pub use config::Config;
pub use retry::{connect_with_retries, RetryPolicy};
pub use tunnel::supervisor::{ConnectError, Supervisor, TunnelProcess};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Acquire the sc binary (unless `config.exe` overrides it) and open a
/// tunnel, retrying the connect per `policy`.
///
/// Acquisition always runs to completion, permission fix-up included,
/// before the first connect attempt starts.
pub async fn run(config: Config, policy: RetryPolicy) -> Result<TunnelProcess> {
    let exe = match &config.exe {
        Some(exe) => exe.clone(),
        None => {
            let fetcher = BinaryFetcher::new(config.work_dir(), config.proxy.as_deref())?;
            fetcher.ensure(&config.version).await?
        }
    };

    let supervisor = Supervisor::new(config, exe)?;
    let tunnel = connect_with_retries(&supervisor, &policy).await?;
    Ok(tunnel)
}

/// Terminate any active tunnel and remove the work directory, including
/// the cached manifest, stale download markers and the unpacked binary.
pub async fn clean(config: &Config) -> Result<()> {
    guard::kill().await;

    let work_dir = config.work_dir();
    if work_dir.exists() {
        std::fs::remove_dir_all(&work_dir)?;
    }
    Ok(())
}
