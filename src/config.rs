//! Launcher configuration.

use std::path::PathBuf;

use crate::defaults::LATEST_VERSION;

/// Options recognized by the launcher.
///
/// Credentials are passed to the sc binary on its command line and used
/// for the remote tunnel delete on [`TunnelProcess::close`].
///
/// [`TunnelProcess::close`]: crate::tunnel::supervisor::TunnelProcess::close
#[derive(Debug, Clone)]
pub struct Config {
    /// Sauce Labs username (`-u`).
    pub username: Option<String>,
    /// Sauce Labs access key (`-k`).
    pub access_key: Option<String>,
    /// Forward every sc output line to the log.
    pub verbose: bool,
    /// Suffix appended to the readiness signal file name, so that
    /// concurrent tunnels on one host use distinct signal paths.
    pub ready_file_id: Option<String>,
    /// HTTP(S) proxy URL for the manifest and archive downloads.
    ///
    /// When unset, reqwest picks up `https_proxy`/`http_proxy` from the
    /// environment on its own.
    pub proxy: Option<String>,
    /// Override of the Sauce Labs REST base URL used for the remote
    /// tunnel delete. Defaults to the public API.
    pub rest_url: Option<String>,
    /// Explicit sc executable. Bypasses acquisition entirely.
    pub exe: Option<PathBuf>,
    /// Directory holding the cached manifest, downloads and the unpacked
    /// binary. Defaults to `<cache_dir>/sauce-connect`.
    pub work_dir: Option<PathBuf>,
    /// Sauce Connect version to acquire. `"latest"` resolves through the
    /// version manifest; a pinned version skips checksum verification.
    pub version: String,
    /// Additional arguments appended verbatim to the sc command line.
    pub extra_args: Vec<String>,
}

impl Config {
    /// Resolved work directory.
    pub fn work_dir(&self) -> PathBuf {
        self.work_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join("sauce-connect")
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            username: None,
            access_key: None,
            verbose: false,
            ready_file_id: None,
            proxy: None,
            rest_url: None,
            exe: None,
            work_dir: None,
            version: LATEST_VERSION.to_string(),
            extra_args: Vec::new(),
        }
    }
}
