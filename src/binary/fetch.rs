//! Sc binary downloading, verification and installation.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use flate2::read::GzDecoder;
use reqwest::Client;
use serde::Deserialize;
use sha1::{Digest, Sha1};
use tar::Archive;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::binary::store::{self, Platform};
use crate::defaults::{
    BINARY_POLL_INTERVAL_MS, DOWNLOAD_TIMEOUT_SECS, LATEST_VERSION, REQUEST_TIMEOUT_SECS,
    SAUCE_BASE_URL, VERSIONS_FILE,
};
use crate::guard;

/// Errors that can occur while acquiring the sc binary.
///
/// All of them are terminal for the acquisition attempt; retrying is the
/// caller's responsibility.
#[derive(Error, Debug)]
pub enum AcquireError {
    #[error("Failed to fetch version manifest: {0}")]
    ManifestFetch(String),

    #[error("Failed to download archive: {0}")]
    Download(String),

    #[error("Checksum of the downloaded archive ({actual}) doesn't match ({expected})")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Failed to unpack archive: {0}")]
    Unpack(String),

    #[error("Failed to fix binary permissions: {0}")]
    PermissionFix(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Shape of `versions.json` as published by Sauce Labs.
#[derive(Debug, Deserialize)]
struct VersionsManifest {
    #[serde(rename = "Sauce Connect")]
    sauce_connect: ManifestEntry,
}

#[derive(Debug, Deserialize)]
struct ManifestEntry {
    version: String,
    osx: Option<PlatformDigest>,
    win32: Option<PlatformDigest>,
    linux: Option<PlatformDigest>,
}

#[derive(Debug, Deserialize)]
struct PlatformDigest {
    sha1: String,
}

impl ManifestEntry {
    fn digest_for(&self, platform: Platform) -> Option<&str> {
        let digest = match platform {
            Platform::MacOs => self.osx.as_ref(),
            Platform::Windows => self.win32.as_ref(),
            Platform::Linux => self.linux.as_ref(),
        };
        digest.map(|d| d.sha1.as_str())
    }
}

struct ResolvedVersion {
    version: String,
    /// Only present when the version came from the fetched manifest.
    checksum: Option<String>,
}

/// Sc binary fetcher.
///
/// Materializes the sc executable in the work directory: manifest
/// resolution, archive download (optionally through a proxy), checksum
/// verification, unpacking and permission fix-up.
pub struct BinaryFetcher {
    client: Client,
    work_dir: PathBuf,
    platform: Platform,
}

impl BinaryFetcher {
    /// Create a fetcher rooted at `work_dir`.
    ///
    /// `proxy` routes the manifest and archive requests through an
    /// explicit HTTP(S) proxy; without it, reqwest honors the
    /// `https_proxy`/`http_proxy` environment variables on its own.
    pub fn new(work_dir: PathBuf, proxy: Option<&str>) -> Result<Self, AcquireError> {
        let mut builder = Client::builder().timeout(Duration::from_secs(DOWNLOAD_TIMEOUT_SECS));
        if let Some(url) = proxy {
            builder = builder.proxy(reqwest::Proxy::all(url)?);
        }
        let client = builder.build()?;

        Ok(Self {
            client,
            work_dir,
            platform: Platform::current(),
        })
    }

    /// Ensure the sc binary for `version` exists on disk and return its
    /// path.
    ///
    /// If the binary is already present this performs no network
    /// activity. If another acquirer is downloading into the same work
    /// directory (detected by the archive marker file), this waits for
    /// the binary to appear instead of downloading a second time. There
    /// is no upper bound on that wait; operators layer a timeout on top.
    pub async fn ensure(&self, version: &str) -> Result<PathBuf, AcquireError> {
        std::fs::create_dir_all(&self.work_dir)?;

        let resolved = self.resolve_version(version).await?;
        let binary = store::binary_path(&self.work_dir, self.platform, &resolved.version);

        if !binary.exists() {
            let archive = self
                .work_dir
                .join(store::archive_name(self.platform, &resolved.version));

            if !archive.exists() {
                self.fetch_and_unpack(&archive, resolved.checksum.as_deref())
                    .await?;
            } else {
                log::info!(
                    "Archive download already in progress, waiting for {}",
                    binary.display()
                );
                while !binary.exists() {
                    tokio::time::sleep(Duration::from_millis(BINARY_POLL_INTERVAL_MS)).await;
                }
            }
        }

        self.fix_permissions(&binary)?;
        Ok(binary)
    }

    async fn resolve_version(&self, version: &str) -> Result<ResolvedVersion, AcquireError> {
        if version != LATEST_VERSION {
            log::warn!("Checksum verification is not supported for manually pinned sc versions");
            return Ok(ResolvedVersion {
                version: version.to_string(),
                checksum: None,
            });
        }

        let versions_file = self.work_dir.join(VERSIONS_FILE);
        let body = if versions_file.exists() {
            std::fs::read_to_string(&versions_file)?
        } else {
            let body = self.fetch_manifest().await?;
            std::fs::write(&versions_file, &body)?;
            body
        };

        let manifest: VersionsManifest = serde_json::from_str(&body)
            .map_err(|e| AcquireError::ManifestFetch(format!("invalid manifest: {e}")))?;
        let entry = manifest.sauce_connect;
        let checksum = entry.digest_for(self.platform).map(str::to_string);

        Ok(ResolvedVersion {
            version: entry.version,
            checksum,
        })
    }

    async fn fetch_manifest(&self) -> Result<String, AcquireError> {
        let url = format!("{SAUCE_BASE_URL}/{VERSIONS_FILE}");

        let response = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .send()
            .await
            .map_err(|e| AcquireError::ManifestFetch(format!("{url}: {e}")))?;

        if !response.status().is_success() {
            return Err(AcquireError::ManifestFetch(format!(
                "Fetching {} failed: {}",
                url,
                response.status()
            )));
        }

        response
            .text()
            .await
            .map_err(|e| AcquireError::ManifestFetch(e.to_string()))
    }

    async fn fetch_and_unpack(
        &self,
        archive: &Path,
        checksum: Option<&str>,
    ) -> Result<(), AcquireError> {
        mark_in_flight(archive)?;

        log::info!("Missing Sauce Connect local proxy, downloading dependency");
        log::info!("This will only happen once.");

        let result = self.download_verify_unpack(archive, checksum).await;

        // Remove the archive on success and on failure alike; a leftover
        // file would be mistaken for an in-progress download on the next
        // run.
        let _ = std::fs::remove_file(archive);
        guard::clear_pending_archive();

        result
    }

    async fn download_verify_unpack(
        &self,
        archive: &Path,
        checksum: Option<&str>,
    ) -> Result<(), AcquireError> {
        let name = archive
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let url = format!("{SAUCE_BASE_URL}/downloads/{name}");

        let mut response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| AcquireError::Download(format!("{url}: {e}")))?;

        if !response.status().is_success() {
            return Err(AcquireError::Download(format!(
                "{} returned {}",
                url,
                response.status()
            )));
        }

        if let Some(len) = response.content_length() {
            log::info!("Downloading {:.1}MB", len as f64 / (1024.0 * 1024.0));
        }

        let mut file = tokio::fs::File::create(archive).await?;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| AcquireError::Download(e.to_string()))?
        {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        drop(file);

        if let Some(expected) = checksum {
            verify_checksum(archive, expected).await?;
        }

        unpack_archive(archive, &self.work_dir)?;
        log::info!("Sauce Connect downloaded correctly");
        Ok(())
    }

    #[cfg(unix)]
    fn fix_permissions(&self, binary: &Path) -> Result<(), AcquireError> {
        use std::os::unix::fs::PermissionsExt;

        let metadata = std::fs::metadata(binary)
            .map_err(|e| AcquireError::PermissionFix(format!("couldn't read sc permissions: {e}")))?;

        if metadata.permissions().mode() & 0o7777 != 0o755 {
            std::fs::set_permissions(binary, std::fs::Permissions::from_mode(0o755))
                .map_err(|e| AcquireError::PermissionFix(format!("couldn't set permissions: {e}")))?;
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn fix_permissions(&self, _binary: &Path) -> Result<(), AcquireError> {
        Ok(())
    }
}

/// Mark an acquisition as in flight.
///
/// The empty archive file is written synchronously so concurrent
/// acquirers racing on the same work directory see it immediately, and
/// the exit hook is installed before the path is handed to the guard, so
/// an interrupted download never leaves a marker behind that later runs
/// would mistake for an in-progress one.
fn mark_in_flight(archive: &Path) -> io::Result<()> {
    std::fs::write(archive, "")?;
    guard::register_exit_hook();
    guard::set_pending_archive(archive.to_path_buf());
    Ok(())
}

/// Hash `archive` with a streamed SHA-1 digest and compare against
/// `expected` (lowercase hex).
pub(crate) async fn verify_checksum(archive: &Path, expected: &str) -> Result<(), AcquireError> {
    let mut file = tokio::fs::File::open(archive).await?;
    let mut hasher = Sha1::new();
    let mut buf = vec![0u8; 64 * 1024];

    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    let actual = hex::encode(hasher.finalize());
    if actual != expected {
        return Err(AcquireError::ChecksumMismatch {
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}

/// Unpack `archive` into `dest`, dispatching on the archive format.
pub(crate) fn unpack_archive(archive: &Path, dest: &Path) -> Result<(), AcquireError> {
    let name = archive.to_string_lossy();
    log::info!("Unpacking {}", name);

    if name.ends_with(".tar.gz") {
        let file = std::fs::File::open(archive)?;
        let mut tarball = Archive::new(GzDecoder::new(file));

        for entry in tarball.entries().map_err(unpack_err)? {
            let mut entry = entry.map_err(unpack_err)?;
            let path = entry.path().map_err(unpack_err)?;

            let path_str = path.to_string_lossy();
            if path_str.starts_with('/') || path_str.contains("..") {
                return Err(AcquireError::Unpack(format!(
                    "unsafe path in archive: {path_str}"
                )));
            }

            let target = dest.join(&*path);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }

            if entry.header().entry_type().is_dir() {
                std::fs::create_dir_all(&target)?;
            } else if entry.header().entry_type().is_file() {
                let mut out = std::fs::File::create(&target)?;
                io::copy(&mut entry, &mut out)?;

                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    let mode = entry.header().mode().unwrap_or(0o755);
                    std::fs::set_permissions(&target, std::fs::Permissions::from_mode(mode))?;
                }
            }
        }
    } else {
        let file = std::fs::File::open(archive)?;
        let mut zip = zip::ZipArchive::new(file).map_err(unpack_err)?;
        zip.extract(dest).map_err(unpack_err)?;
    }

    Ok(())
}

fn unpack_err(e: impl std::fmt::Display) -> AcquireError {
    AcquireError::Unpack(e.to_string())
}
