//! Platform-specific naming of the sc archive, unpack folder and binary.
//!
//! Pure functions of `(platform, version)`; no side effects.

use std::path::{Path, PathBuf};

/// Platform family the sc binary is distributed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    MacOs,
    Windows,
    Linux,
}

impl Platform {
    /// Platform of the running host.
    pub fn current() -> Self {
        match std::env::consts::OS {
            "macos" => Platform::MacOs,
            "windows" => Platform::Windows,
            _ => Platform::Linux,
        }
    }

    /// Platform segment used in archive names and the version manifest.
    pub fn segment(self) -> &'static str {
        match self {
            Platform::MacOs => "osx",
            Platform::Windows => "win32",
            Platform::Linux => "linux",
        }
    }
}

/// Name of the downloadable archive for a platform/version pair.
pub fn archive_name(platform: Platform, version: &str) -> String {
    match platform {
        Platform::MacOs => format!("sc-{version}-osx.zip"),
        Platform::Windows => format!("sc-{version}-win32.zip"),
        Platform::Linux => format!("sc-{version}-linux.tar.gz"),
    }
}

/// Name of the folder the archive unpacks to.
pub fn folder_name(platform: Platform, version: &str) -> String {
    format!("sc-{}-{}", version, platform.segment())
}

/// Path of the sc executable inside an unpacked work directory.
pub fn binary_path(work_dir: &Path, platform: Platform, version: &str) -> PathBuf {
    let exe = if platform == Platform::Windows {
        "sc.exe"
    } else {
        "sc"
    };
    work_dir.join(folder_name(platform, version)).join("bin").join(exe)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_archive_names() {
        assert_eq!(archive_name(Platform::MacOs, "4.9.1"), "sc-4.9.1-osx.zip");
        assert_eq!(
            archive_name(Platform::Windows, "4.9.1"),
            "sc-4.9.1-win32.zip"
        );
        assert_eq!(
            archive_name(Platform::Linux, "4.9.1"),
            "sc-4.9.1-linux.tar.gz"
        );
    }

    #[test]
    fn test_folder_matches_archive_stem() {
        for platform in [Platform::MacOs, Platform::Windows, Platform::Linux] {
            let archive = archive_name(platform, "4.9.1");
            let folder = folder_name(platform, "4.9.1");
            assert!(
                archive.starts_with(&folder),
                "{archive} does not start with {folder}"
            );
        }
    }

    #[test]
    fn test_binary_path_layout() {
        let path = binary_path(Path::new("/work"), Platform::Linux, "4.9.1");
        assert_eq!(path, PathBuf::from("/work/sc-4.9.1-linux/bin/sc"));

        let path = binary_path(Path::new("/work"), Platform::Windows, "4.9.1");
        assert_eq!(path, PathBuf::from("/work/sc-4.9.1-win32/bin/sc.exe"));
    }

    #[test]
    fn test_deterministic() {
        assert_eq!(
            archive_name(Platform::Linux, "9.9"),
            archive_name(Platform::Linux, "9.9")
        );
        assert_eq!(
            folder_name(Platform::MacOs, "9.9"),
            folder_name(Platform::MacOs, "9.9")
        );
    }
}
