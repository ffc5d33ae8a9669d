//! Endpoint URLs and timing constants for the Sauce Labs service.

/// Base URL for all Sauce Labs HTTP endpoints.
pub const SAUCE_BASE_URL: &str = "https://saucelabs.com";

/// Version sentinel that triggers manifest resolution.
pub const LATEST_VERSION: &str = "latest";

/// File name of the cached version manifest inside the work directory.
pub const VERSIONS_FILE: &str = "versions.json";

/// Base name of the readiness signal file created by the sc binary.
pub const READY_FILE_NAME: &str = "sc-launcher-readyfile";

/// Timeout for manifest and tunnel-management requests.
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Overall timeout for the archive download.
pub const DOWNLOAD_TIMEOUT_SECS: u64 = 600;

/// Interval between existence checks while another acquirer downloads.
pub const BINARY_POLL_INTERVAL_MS: u64 = 1000;

/// Interval between existence checks on the readiness signal file.
pub const READY_POLL_INTERVAL_MS: u64 = 250;

/// Grace period given to the sc process after the remote tunnel delete
/// before it is killed.
pub const KILL_GRACE_SECS: u64 = 5;
